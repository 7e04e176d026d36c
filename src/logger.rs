use std::io::Write;

use env_logger::{Builder, Env};

/// Installs the global logger. `RUST_LOG` overrides the default filter.
pub fn setup(is_debug: bool) -> Result<(), log::SetLoggerError> {
    let default_filter = if is_debug {
        "footprint=debug,data=debug,exchange=debug,info"
    } else {
        "info"
    };

    Builder::from_env(Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:<5}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
}
