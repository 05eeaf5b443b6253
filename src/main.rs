use std::sync::Arc;

mod config;
mod handler;
mod http;
mod logger;
mod server;
mod storage;

/// Config file path from `-c <path>` / `--config <path>`, without extension
fn config_path_from_args() -> Result<String, String> {
    let mut args = std::env::args().skip(1);
    let mut path = config::DEFAULT_CONFIG_PATH.to_string();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                path = args
                    .next()
                    .ok_or_else(|| format!("{arg} requires a path argument"))?;
            }
            other => return Err(format!("Unknown argument '{other}'")),
        }
    }
    Ok(path)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path_from_args()?;
    let cfg = config::Config::load_from(&config_path)?;
    logger::init(&cfg)?;

    // Size the Tokio runtime from the workers setting
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    let listener = server::create_reusable_listener(addr)?;

    let store = storage::open(&cfg.storage).await?;
    let state = Arc::new(config::AppState::new(&cfg, store));

    let signals = Arc::new(server::SignalHandler::new());
    server::start_signal_handler(Arc::clone(&signals))?;

    logger::log_server_start(&addr, &cfg);

    // Connections are served with spawn_local
    let local = tokio::task::LocalSet::new();
    local.run_until(server::run(listener, state, signals)).await
}
