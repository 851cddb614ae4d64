// Connection handling module
// Serves one accepted TCP connection with the middleware

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::logger;
use crate::middleware::Middleware;

/// Per-connection settings taken from `[server]`
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub keep_alive: bool,
    pub timeout: Duration,
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            keep_alive: config.keep_alive,
            timeout: Duration::from_secs(config.request_timeout),
        }
    }
}

/// Handle a single connection in a spawned local task.
///
/// The connection counter is decremented when the connection ends,
/// whether it closed, failed or timed out.
pub fn handle_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    middleware: Arc<Middleware>,
    settings: ConnectionSettings,
    conn_counter: Arc<AtomicUsize>,
) {
    conn_counter.fetch_add(1, Ordering::SeqCst);

    tokio::task::spawn_local(async move {
        let io = TokioIo::new(stream);

        let mut builder = http1::Builder::new();
        builder.keep_alive(settings.keep_alive);

        let conn = builder.serve_connection(
            io,
            service_fn(move |req| {
                let middleware = Arc::clone(&middleware);
                async move { Ok::<_, Infallible>(middleware.handle(req, Some(peer_addr)).await) }
            }),
        );

        match tokio::time::timeout(settings.timeout, conn).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => logger::log_connection_error(&err),
            Err(_) => {
                logger::log_warning(&format!(
                    "Connection from {peer_addr} timed out after {} seconds",
                    settings.timeout.as_secs()
                ));
            }
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}
