use super::logger::{LogLevel, LoggerConfig};
use std::path::PathBuf;

/// Configuration of the search and of the autotune cache.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AutotuneConfig {
    /// Logger of the search results.
    #[serde(default)]
    pub logger: LoggerConfig<AutotuneLogLevel>,
    /// Where the persistent cache is stored.
    #[serde(default)]
    pub cache: AutotuneCache,
    /// Whether accepted results are saved to disk.
    #[serde(default = "persist_default")]
    pub persist: bool,
    /// Number of best broad-pass configurations seeding the narrow pass.
    #[serde(default = "seed_count_default")]
    pub seed_count: usize,
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            logger: Default::default(),
            cache: Default::default(),
            persist: persist_default(),
            seed_count: seed_count_default(),
        }
    }
}

fn persist_default() -> bool {
    true
}

fn seed_count_default() -> usize {
    4
}

/// Location of the persistent autotune cache.
#[derive(Default, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AutotuneCache {
    /// Next to the current directory.
    Local,
    /// Inside the `target` directory of the enclosing cargo project.
    #[default]
    Target,
    /// In the user configuration directory.
    Global,
    /// In the given directory.
    File(PathBuf),
}

/// Verbosity of the autotune channel.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AutotuneLogLevel {
    /// Nothing is logged.
    #[serde(rename = "disabled")]
    Disabled,
    /// Only the accepted result.
    #[default]
    #[serde(rename = "minimal")]
    Minimal,
    /// The accepted result and the ranked summary.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for AutotuneLogLevel {}

impl AutotuneCache {
    /// Root directory of the cache.
    pub fn root(&self) -> PathBuf {
        let current_dir = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        match self {
            AutotuneCache::Local => current_dir(),
            AutotuneCache::Target => {
                let dir_original = current_dir();
                let mut dir = dir_original.clone();

                loop {
                    if let Ok(true) = std::fs::exists(dir.join("Cargo.toml")) {
                        return dir.join("target");
                    }

                    if !dir.pop() {
                        break;
                    }
                }

                dir_original.join("target")
            }
            AutotuneCache::Global => dirs::config_local_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(current_dir),
            AutotuneCache::File(path_buf) => path_buf.clone(),
        }
    }
}
