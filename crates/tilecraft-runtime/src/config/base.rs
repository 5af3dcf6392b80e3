use super::{
    autotune::{AutotuneCache, AutotuneConfig, AutotuneLogLevel},
    build::{BuildConfig, BuildLogLevel},
    profiling::{ProfilingConfig, ProfilingLogLevel},
};
use std::path::Path;
use std::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static TILECRAFT_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// Global configuration of tilecraft, combining the autotune, build and profiling settings.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Configuration of the search and the autotune cache.
    #[serde(default)]
    pub autotune: AutotuneConfig,

    /// Configuration of the parallel build pool.
    #[serde(default)]
    pub build: BuildConfig,

    /// Configuration of the on-device measurements.
    #[serde(default)]
    pub profiling: ProfilingConfig,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from `tilecraft.toml` or
    /// `Tilecraft.toml` in the current directory or its parents, then applies the environment
    /// overrides. If no file is found, a default configuration is used.
    ///
    /// Calling this function takes a global lock; read it once and keep the values around.
    pub fn get() -> Arc<Self> {
        let mut state = TILECRAFT_GLOBAL_CONFIG.lock();
        if let Some(config) = state.as_ref() {
            return config.clone();
        }

        let config = Arc::new(Self::from_current_dir().override_from_env());
        *state = Some(config.clone());
        config
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    pub fn set(config: Self) {
        let mut state = TILECRAFT_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
        let config = Self::get();
        let content = toml::to_string_pretty(config.as_ref())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, content)
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("TILECRAFT_DEBUG_LOG") {
            self.build.logger.level = BuildLogLevel::Full;
            self.profiling.logger.level = ProfilingLogLevel::Basic;
            self.autotune.logger.level = AutotuneLogLevel::Full;

            match val.as_str() {
                "stdout" => {
                    self.build.logger.stdout = true;
                    self.profiling.logger.stdout = true;
                    self.autotune.logger.stdout = true;
                }
                "stderr" => {
                    self.build.logger.stderr = true;
                    self.profiling.logger.stderr = true;
                    self.autotune.logger.stderr = true;
                }
                "1" | "true" => {
                    let file_path = "/tmp/tilecraft.log";
                    self.build.logger.file = Some(file_path.into());
                    self.profiling.logger.file = Some(file_path.into());
                    self.autotune.logger.file = Some(file_path.into());
                }
                "0" | "false" => {
                    self.build.logger.level = BuildLogLevel::Disabled;
                    self.profiling.logger.level = ProfilingLogLevel::Disabled;
                    self.autotune.logger.level = AutotuneLogLevel::Disabled;
                }
                file_path => {
                    self.build.logger.file = Some(file_path.into());
                    self.profiling.logger.file = Some(file_path.into());
                    self.autotune.logger.file = Some(file_path.into());
                }
            }
        };

        if let Ok(val) = std::env::var("TILECRAFT_DEBUG_OPTION") {
            match val.as_str() {
                "debug" => {
                    self.build.logger.level = BuildLogLevel::Full;
                    self.profiling.logger.level = ProfilingLogLevel::Basic;
                    self.autotune.logger.level = AutotuneLogLevel::Full;
                }
                "debug-full" => {
                    self.build.logger.level = BuildLogLevel::Full;
                    self.profiling.logger.level = ProfilingLogLevel::Full;
                    self.autotune.logger.level = AutotuneLogLevel::Full;
                }
                "profile" => {
                    self.profiling.logger.level = ProfilingLogLevel::Basic;
                }
                "profile-full" => {
                    self.profiling.logger.level = ProfilingLogLevel::Full;
                }
                _ => {}
            }
        };

        if let Ok(val) = std::env::var("TILECRAFT_BUILD_WORKERS") {
            match val.parse::<usize>() {
                Ok(workers) if workers > 0 => self.build.workers = Some(workers),
                _ => log::warn!("Ignoring invalid TILECRAFT_BUILD_WORKERS={val}"),
            }
        }

        if let Ok(val) = std::env::var("TILECRAFT_AUTOTUNE_CACHE") {
            self.autotune.cache = match val.as_str() {
                "local" => AutotuneCache::Local,
                "target" => AutotuneCache::Target,
                "global" => AutotuneCache::Global,
                path => AutotuneCache::File(path.into()),
            };
        }

        self
    }

    // Loads configuration from `tilecraft.toml` or `Tilecraft.toml` in the current directory or
    // its parents, falling back to the default configuration.
    fn from_current_dir() -> Self {
        let mut dir = match std::env::current_dir() {
            Ok(dir) => dir,
            Err(_) => return Self::default(),
        };

        loop {
            for name in ["tilecraft.toml", "Tilecraft.toml"] {
                match Self::from_file_path(dir.join(name)) {
                    Ok(config) => return config,
                    Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                        log::warn!("Ignoring {}: {err}", dir.join(name).display());
                    }
                    Err(_) => {}
                }
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    /// Loads configuration from a specified file path.
    pub fn from_file_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: GlobalConfig = toml::from_str(
            r#"
            [build]
            workers = 3

            [profiling]
            samples = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.build.workers, Some(3));
        assert_eq!(config.build.load_retries, 2);
        assert_eq!(config.profiling.samples, 20);
        assert_eq!(config.profiling.warmup, 5);
        assert_eq!(config.autotune.seed_count, 4);
        assert_eq!(config.autotune.cache, AutotuneCache::Target);
    }

    #[test]
    #[serial]
    fn env_overrides_workers_and_cache() {
        // SAFETY: serialized with the other tests touching the environment.
        unsafe {
            std::env::set_var("TILECRAFT_BUILD_WORKERS", "6");
            std::env::set_var("TILECRAFT_AUTOTUNE_CACHE", "local");
        }

        let config = GlobalConfig::default().override_from_env();

        unsafe {
            std::env::remove_var("TILECRAFT_BUILD_WORKERS");
            std::env::remove_var("TILECRAFT_AUTOTUNE_CACHE");
        }

        assert_eq!(config.build.workers, Some(6));
        assert_eq!(config.autotune.cache, AutotuneCache::Local);
    }

    #[test]
    #[serial]
    fn debug_log_disables_every_channel() {
        unsafe {
            std::env::set_var("TILECRAFT_DEBUG_LOG", "0");
        }

        let config = GlobalConfig::default().override_from_env();

        unsafe {
            std::env::remove_var("TILECRAFT_DEBUG_LOG");
        }

        assert_eq!(config.build.logger.level, BuildLogLevel::Disabled);
        assert_eq!(config.profiling.logger.level, ProfilingLogLevel::Disabled);
        assert_eq!(config.autotune.logger.level, AutotuneLogLevel::Disabled);
    }
}
