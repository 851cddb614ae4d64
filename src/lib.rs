//! Development-server middleware for an in-memory build output.
//!
//! A build pipeline ([`compiler::Compiler`]) writes its output into a
//! [`fs::MemoryFs`]; [`middleware::Middleware`] maps request URLs onto that
//! output, holds requests while a build is in flight and serves files with
//! byte-range support.

pub mod compiler;
pub mod config;
pub mod error;
pub mod fs;
pub mod gate;
pub mod http;
pub mod logger;
pub mod middleware;
pub mod resolver;
pub mod server;

pub use error::{DevServeError, Result};
pub use middleware::{Middleware, MiddlewareOptions};
