use anyhow::{Context, Result, anyhow};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::backup::engine::PostAction;
use crate::cli::Cli;

const CONFIG_FILE_NAME: &str = "garminbak.toml";

/// Config keys mirror the CLI flag names; anything else is a fatal
/// configuration error.
const KNOWN_KEYS: [&str; 4] = ["f", "v", "auto-umount", "auto-eject"];

/// Effective settings for one run, resolved once at startup and read-only
/// afterwards. Precedence: explicitly passed CLI flags, then the config
/// file, then built-in defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub archive: PathBuf,
    pub verbose: bool,
    pub auto_umount: bool,
    pub auto_eject: bool,
}

impl Settings {
    /// Eject wins when both post actions are configured.
    pub fn post_action(&self) -> PostAction {
        if self.auto_eject {
            PostAction::Eject
        } else if self.auto_umount {
            PostAction::Unmount
        } else {
            PostAction::None
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FileConfig {
    archive: Option<PathBuf>,
    verbose: Option<bool>,
    auto_umount: Option<bool>,
    auto_eject: Option<bool>,
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("GARMINBAK_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let exe = env::current_exe().ok()?;
    Some(exe.parent()?.join(CONFIG_FILE_NAME))
}

fn bool_key(table: &toml::Table, key: &str) -> Result<Option<bool>> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::Boolean(value)) => Ok(Some(*value)),
        Some(other) => Err(anyhow!(
            "configuration file error: key \"{key}\" expects a boolean, got {}",
            other.type_str()
        )),
    }
}

fn parse_file_config(raw: &str) -> Result<FileConfig> {
    let table: toml::Table = toml::from_str(raw).context("configuration file is not valid TOML")?;

    for key in table.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            return Err(anyhow!("configuration file error: invalid key \"{key}\""));
        }
    }

    let archive = match table.get("f") {
        None => None,
        Some(toml::Value::String(value)) if !value.trim().is_empty() => {
            Some(PathBuf::from(value.trim()))
        }
        Some(toml::Value::String(_)) => None,
        Some(other) => {
            return Err(anyhow!(
                "configuration file error: key \"f\" expects a string, got {}",
                other.type_str()
            ));
        }
    };

    Ok(FileConfig {
        archive,
        verbose: bool_key(&table, "v")?,
        auto_umount: bool_key(&table, "auto-umount")?,
        auto_eject: bool_key(&table, "auto-eject")?,
    })
}

fn load_file_config() -> Result<FileConfig> {
    let Some(path) = resolve_config_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let raw =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_file_config(&raw).with_context(|| format!("in {}", path.display()))
}

fn merge(cli: &Cli, file: FileConfig) -> Result<Settings> {
    let archive = cli
        .archive
        .clone()
        .filter(|path| !path.as_os_str().is_empty())
        .or(file.archive)
        .ok_or_else(|| anyhow!("filename for backup unspecified (use -f <PATH>)"))?;

    Ok(Settings {
        archive,
        verbose: cli.verbose || file.verbose.unwrap_or(false),
        auto_umount: cli.auto_umount || file.auto_umount.unwrap_or(true),
        auto_eject: cli.auto_eject || file.auto_eject.unwrap_or(false),
    })
}

pub fn resolve(cli: &Cli) -> Result<Settings> {
    merge(cli, load_file_config()?)
}
