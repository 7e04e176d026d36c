mod chart;
mod logger;
mod session;

use data::SessionConfig;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(err) = logger::setup(cfg!(debug_assertions)) {
        eprintln!("Failed to initialize logger: {err}");
    }

    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map_or_else(
            || "unknown location".to_string(),
            |loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()),
        );
        let msg = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        log::error!("PANIC at {location}: {msg}");
        eprintln!("PANIC at {location}: {msg}");
    }));

    let config = SessionConfig::load();
    if let Err(err) = config.save() {
        log::warn!("Failed to save session config: {err}");
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Shutting down");
                    cancel.cancel();
                }
                Err(err) => log::error!("Failed to listen for Ctrl-C: {err}"),
            }
        }
    });

    if let Err(err) = session::run(config, cancel).await {
        log::error!("Session failed: {err}");
        std::process::exit(1);
    }
}
