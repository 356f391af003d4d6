use crate::error::{Error, Result};
use crate::runtime::DepotPath;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub const CONFIG_FILE: &str = "kernelc.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub depots: DepotPath,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    cache: RawCache,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCache {
    #[serde(default)]
    depots: Vec<String>,
}

impl Config {
    /// Reads `kernelc.toml` from `dir` when present; `KERNELC_DEPOT_PATH` wins over the file.
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        if let Some(depots) = DepotPath::from_env() {
            config.depots = depots;
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).map_err(|err| Error::Config {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if raw.cache.depots.is_empty() {
            return Ok(Self::default());
        }
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let roots = raw
            .cache
            .depots
            .iter()
            .map(|entry| {
                let entry = PathBuf::from(entry);
                if entry.is_absolute() {
                    entry
                } else {
                    base.join(entry)
                }
            })
            .collect();
        Ok(Self {
            depots: DepotPath::new(roots),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            depots: DepotPath::new(vec![home.join(".kernelc")]),
        }
    }
}
