//! Logger module
//!
//! Logging utilities for the dev server:
//! - Server lifecycle logging
//! - Build progress reporting
//! - Access logging with multiple formats
//! - Error and warning logging
//!
//! Messages go to stdout/stderr until `init` installs file targets.

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::compiler::BuildStats;
use crate::config::Config;
use std::net::SocketAddr;

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &Config) -> std::io::Result<()> {
    writer::init(
        &config.logging.level,
        config.logging.access_log_file.as_deref(),
        config.logging.error_log_file.as_deref(),
    )
}

/// Write to info/access log
fn write_info(message: &str) {
    match writer::get() {
        Some(writer) => writer.write_info(message),
        None => println!("{message}"),
    }
}

/// Write to error log
fn write_error(message: &str) {
    match writer::get() {
        Some(writer) => writer.write_error(message),
        None => eprintln!("{message}"),
    }
}

/// Write to access log specifically
fn write_access(message: &str) {
    match writer::get() {
        Some(writer) => writer.write_access(message),
        None => println!("{message}"),
    }
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    write_info("======================================");
    write_info("Dev server started");
    write_info(&format!("Listening on: http://{addr}"));
    write_info(&format!(
        "Public path: {}",
        config.middleware.public_path.as_deref().unwrap_or("/")
    ));
    write_info(&format!("Output path: {}", config.build.output_path));
    if config.middleware.lazy {
        write_info("Lazy mode: builds run on request");
    }
    if let Some(workers) = config.server.workers {
        write_info(&format!("Worker threads: {workers}"));
    }
    if let Some(ref path) = config.logging.access_log_file {
        write_info(&format!("Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write_info(&format!("Error log: {path}"));
    }
    write_info("======================================\n");
}

pub fn log_server_stop(active_connections: usize) {
    write_info(&format!(
        "[Server] Shutting down ({active_connections} connections still open)"
    ));
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    write_error(&format!("[ERROR] Failed to serve connection: {err:?}"));
}

pub fn log_build_invalid() {
    write_info("[Build] Compiling...");
}

pub fn log_build_done(stats: &BuildStats) {
    for error in &stats.errors {
        write_error(&format!("[Build] {error}"));
    }
    for warning in &stats.warnings {
        write_error(&format!("[Build] warning: {warning}"));
    }

    let outcome = if stats.has_errors() {
        "Failed to compile"
    } else if stats.has_warnings() {
        "Compiled with warnings"
    } else {
        "Compiled successfully"
    };
    write_info(&format!(
        "[Build] {outcome} ({} assets, hash {}, {} ms)",
        stats.assets.len(),
        stats.hash,
        stats.duration.as_millis()
    ));
}

pub fn log_wait_until_finished(label: &str) {
    write_info(&format!("[Build] wait until bundle finished: {label}"));
}

pub fn log_error(message: &str) {
    write_error(&format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(&format!("[WARN] {message}"));
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    write_access(&entry.format(format));
}
