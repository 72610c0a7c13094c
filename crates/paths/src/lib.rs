//! Where opencode2go keeps its files.
//!
//! `OPENCODE2GO_CONFIG_DIR` / `OPENCODE2GO_DATA_DIR` override the platform
//! directories from `directories::ProjectDirs`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use opencode2go_runtime_config::{CONFIG_FILE_NAME, ClientConfig, apply_compat_fallbacks};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_DIR_ENV: &str = "OPENCODE2GO_CONFIG_DIR";
pub const DATA_DIR_ENV: &str = "OPENCODE2GO_DATA_DIR";

/// File name of the key-value store under the data dir.
pub const STORE_FILE_NAME: &str = "store.json";

#[derive(Debug, Error)]
pub enum PathsError {
    #[error("could not determine a home directory")]
    NoHome,
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, PathsError>;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "opencode2go").ok_or(PathsError::NoHome)
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Config directory (`~/.config/opencode2go` on Linux).
pub fn config_dir() -> Result<PathBuf> {
    match env_dir(CONFIG_DIR_ENV) {
        Some(dir) => Ok(dir),
        None => Ok(project_dirs()?.config_dir().to_path_buf()),
    }
}

/// Data directory (`~/.local/share/opencode2go` on Linux).
pub fn data_dir() -> Result<PathBuf> {
    match env_dir(DATA_DIR_ENV) {
        Some(dir) => Ok(dir),
        None => Ok(project_dirs()?.data_dir().to_path_buf()),
    }
}

/// Canonical config file path.
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Key-value store file path.
pub fn store_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(STORE_FILE_NAME))
}

/// Load the config at `path`. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<ClientConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no config at {}, using defaults", path.display());
            return Ok(ClientConfig::default());
        }
        Err(source) => {
            return Err(PathsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut config: ClientConfig = toml::from_str(&content).map_err(|source| PathsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if apply_compat_fallbacks(&mut config) {
        debug!("normalized config values from {}", path.display());
    }
    Ok(config)
}

pub fn load_config() -> Result<ClientConfig> {
    load_config_from(&config_path()?)
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config_to(path: &Path, config: &ClientConfig) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    let write_err = |source| PathsError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, content).map_err(write_err)
}

pub fn save_config(config: &ClientConfig) -> Result<()> {
    save_config_to(&config_path()?, config)
}
