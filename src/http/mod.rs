//! HTTP protocol layer
//!
//! Range handling, content types and canned responses, independent of how
//! the build output is produced.

pub mod mime;
pub mod range;
pub mod response;

pub use range::{parse_range_header, serve, ResponseSink};
pub use response::{build_404_response, build_405_response, build_500_response};
