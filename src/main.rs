use devserve::compiler::{Compiler, DirectoryCompiler};
use devserve::config::{self, Config};
use devserve::middleware::{gate_options_from_config, Middleware, MiddlewareOptions};
use devserve::{logger, server};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let cfg = Config::load_from(&config_path)?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    logger::init(&cfg)?;

    // LocalSet for spawn_local support
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(async_main(cfg)))
}

async fn async_main(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;

    let compiler: Arc<dyn Compiler> = Arc::new(DirectoryCompiler::from_config(&cfg.build));
    let options = MiddlewareOptions::from_config(&cfg.middleware, &cfg.logging)?;
    let gate_options = gate_options_from_config(&cfg.middleware)?;
    let middleware = Arc::new(Middleware::new(compiler, options, gate_options)?);

    let listener = server::create_listener(addr)?;
    let signals = Arc::new(server::SignalHandler::new());
    server::start_signal_handler(Arc::clone(&signals))?;

    logger::log_server_start(&addr, &cfg);
    server::run(
        listener,
        middleware,
        server::ConnectionSettings::from(&cfg.server),
        signals,
    )
    .await;
    Ok(())
}
