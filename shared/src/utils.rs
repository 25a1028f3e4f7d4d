use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

fn temp_sibling(path: &Path) -> PathBuf {
    let suffix: u32 = rand::thread_rng().gen();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    path.with_file_name(format!(".{name}.{suffix:08x}.tmp"))
}

/// Writes `contents` to a temporary file next to `path` and renames it over
/// `path`, so readers see either the old or the new contents.
pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create directory {}", parent.display())
        })?;
    }

    let temp = temp_sibling(path);
    fs::write(&temp, contents)
        .with_context(|| format!("Failed to write {}", temp.display()))?;

    fs::rename(&temp, path).map_err(|error| {
        let _ = fs::remove_file(&temp);
        anyhow::Error::new(error)
            .context(format!("Failed to replace {}", path.display()))
    })
}

pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let contents = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &contents)
}

/// Parses the JSON file at `path`, `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Option<T>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None)
        }
        Err(error) => {
            return Err(anyhow::Error::new(error)
                .context(format!("Failed to read {}", path.display())))
        }
    };

    serde_json::from_slice(&raw)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parses human durations such as `250ms`, `2s` or `1h` for clap flags.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    duration_str::parse(raw).map_err(|error| error.to_string())
}
