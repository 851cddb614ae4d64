// Signal handling module
//
// Supported signals:
// - SIGHUP:  Rebuild the bundle
// - SIGTERM: Graceful shutdown
// - SIGINT:  Graceful shutdown (Ctrl+C)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Signal handler state
pub struct SignalHandler {
    /// Shutdown signal (SIGTERM, SIGINT)
    pub shutdown: Arc<Notify>,
    /// Rebuild signal (SIGHUP)
    pub rebuild: Arc<Notify>,
    /// Whether shutdown has been requested
    pub shutdown_requested: Arc<AtomicBool>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Notify::new()),
            rebuild: Arc::new(Notify::new()),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Start signal handlers (Unix only)
///
/// | Signal  | Action                 |
/// |---------|------------------------|
/// | SIGHUP  | Invalidate and rebuild |
/// | SIGTERM | Graceful stop          |
/// | SIGINT  | Graceful stop          |
#[cfg(unix)]
pub fn start_signal_handler(handler: Arc<SignalHandler>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    println!("[SIGNAL] SIGHUP received, rebuilding");
                    handler.rebuild.notify_one();
                }
                _ = sigterm.recv() => {
                    println!("[SIGNAL] SIGTERM received, shutting down");
                    handler.request_shutdown();
                    break;
                }
                _ = sigint.recv() => {
                    println!("[SIGNAL] SIGINT received, shutting down");
                    handler.request_shutdown();
                    break;
                }
            }
        }
    });
    Ok(())
}

/// Windows fallback - only handles Ctrl+C
#[cfg(not(unix))]
pub fn start_signal_handler(handler: Arc<SignalHandler>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            println!("[SIGNAL] Ctrl+C received, shutting down");
            handler.request_shutdown();
        }
    });
    Ok(())
}
