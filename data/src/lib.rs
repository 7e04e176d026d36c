pub mod aggr;
pub mod chart;
pub mod config;
pub mod util;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

pub use aggr::{SequenceSnapshot, SeriesConfig, SeriesEvent, TradeAggregator};
pub use chart::{Candle, VisibleRange};
pub use config::SessionConfig;
pub use config::timezone::UserTimezone;

use ::log::{info, warn};
use serde::de::DeserializeOwned;

pub const DATA_PATH_ENV: &str = "FOOTPRINT_DATA_PATH";

#[derive(thiserror::Error, Debug)]
pub enum InternalError {
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn write_json_to_file(json: &str, file_name: &str) -> std::io::Result<()> {
    let path = data_path(Some(file_name));

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid state file path")
    })?;

    if !parent.exists() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Reads and parses a JSON file from the data folder.
///
/// A file that exists but fails to parse is renamed to `<name>_old.<ext>` so the
/// next save does not overwrite it.
pub fn read_from_file<T: DeserializeOwned>(
    file_name: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    let path = data_path(Some(file_name));

    let mut file = File::open(&path)?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    match serde_json::from_str(&contents) {
        Ok(state) => Ok(state),
        Err(e) => {
            drop(file);

            let backup_path = data_path(Some(&backup_file_name(file_name)));

            if let Err(rename_err) = std::fs::rename(&path, &backup_path) {
                warn!(
                    "Failed to backup corrupted file '{}' to '{}': {}",
                    path.display(),
                    backup_path.display(),
                    rename_err
                );
            } else {
                info!(
                    "Backed up corrupted file to '{}'. It can be restored manually.",
                    backup_path.display()
                );
            }

            Err(Box::new(e))
        }
    }
}

fn backup_file_name(file_name: &str) -> String {
    if let Some(pos) = file_name.rfind('.') {
        format!("{}_old{}", &file_name[..pos], &file_name[pos..])
    } else {
        format!("{}_old", file_name)
    }
}

/// `$FOOTPRINT_DATA_PATH/<name>` when set, the platform data dir otherwise.
pub fn data_path(path_name: Option<&str>) -> PathBuf {
    let base = if let Ok(path) = std::env::var(DATA_PATH_ENV) {
        PathBuf::from(path)
    } else {
        dirs_next::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("footprint")
    };

    match path_name {
        Some(path_name) => base.join(path_name),
        None => base,
    }
}
