// Server module entry point
// Accept loop, connection handling and signal-driven shutdown

pub mod connection;
pub mod listener;
pub mod signal;

pub use connection::{handle_connection, ConnectionSettings};
pub use listener::create_listener;
pub use signal::{start_signal_handler, SignalHandler};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::gate::noop;
use crate::logger;
use crate::middleware::Middleware;

/// Accept connections until `signals` asks for shutdown.
///
/// Must run inside a `LocalSet`; connections are served with
/// `spawn_local`. On shutdown the build pipeline is closed.
#[allow(clippy::ignored_unit_patterns)]
pub async fn run(
    listener: TcpListener,
    middleware: Arc<Middleware>,
    settings: ConnectionSettings,
    signals: Arc<SignalHandler>,
) {
    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        handle_connection(
                            stream,
                            peer_addr,
                            Arc::clone(&middleware),
                            settings,
                            Arc::clone(&active_connections),
                        );
                    }
                    Err(e) => logger::log_error(&format!("Failed to accept connection: {e}")),
                }
            }

            _ = signals.rebuild.notified() => {
                middleware.invalidate(noop);
            }

            _ = signals.shutdown.notified() => {
                break;
            }
        }
    }

    middleware.close();
    logger::log_server_stop(active_connections.load(Ordering::SeqCst));
}
