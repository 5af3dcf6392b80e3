use super::GlobalConfig;
use crate::config::{
    autotune::AutotuneLogLevel, build::BuildLogLevel, profiling::ProfilingLogLevel,
};
use core::fmt::Display;
use hashbrown::HashMap;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

/// Configuration of one logging channel, parameterized by a log level type.
///
/// Several channels may share the same outputs.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional forwarding to the `log` crate at the given level.
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// The log level for this channel.
    #[serde(default)]
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

/// Log levels using the `log` crate.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    /// Logs informational messages.
    #[default]
    #[serde(rename = "info")]
    Info,

    /// Logs debugging messages.
    #[serde(rename = "debug")]
    Debug,

    /// Logs trace-level messages.
    #[serde(rename = "trace")]
    Trace,
}

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in [LoggerConfig].
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Binary log level for enabling or disabling logging.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryLogLevel {
    /// Logging is disabled.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Logging is fully enabled.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for BinaryLogLevel {}

/// Logging utility managing the outputs of the build, profiling and autotune channels.
#[derive(Debug)]
pub struct Logger {
    loggers: Vec<LoggerKind>,
    build_index: Vec<usize>,
    profiling_index: Vec<usize>,
    autotune_index: Vec<usize>,

    /// Configuration the channels were created from.
    pub config: Arc<GlobalConfig>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Hash, PartialEq, Eq)]
enum LoggerId {
    File(PathBuf),
    Stdout,
    Stderr,
    LogCrate(LogCrateLevel),
}

impl Logger {
    /// Creates a logger from the global configuration.
    ///
    /// Note that creating a logger opens its files; create it once per search.
    pub fn new() -> Self {
        Self::from_config(GlobalConfig::get())
    }

    /// Creates a logger from an explicit configuration.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        let mut loggers = Vec::new();
        let mut build_index = Vec::new();
        let mut profiling_index = Vec::new();
        let mut autotune_index = Vec::new();
        let mut logger2index = HashMap::<LoggerId, usize>::new();

        if config.build.logger.level != BuildLogLevel::Disabled {
            register_logger(
                &config.build.logger,
                &mut build_index,
                &mut loggers,
                &mut logger2index,
            );
        }

        if config.profiling.logger.level != ProfilingLogLevel::Disabled {
            register_logger(
                &config.profiling.logger,
                &mut profiling_index,
                &mut loggers,
                &mut logger2index,
            );
        }

        if config.autotune.logger.level != AutotuneLogLevel::Disabled {
            register_logger(
                &config.autotune.logger,
                &mut autotune_index,
                &mut loggers,
                &mut logger2index,
            );
        }

        Self {
            loggers,
            build_index,
            profiling_index,
            autotune_index,
            config,
        }
    }

    /// Logs a message to every build output.
    pub fn log_build<S: Display>(&mut self, msg: &S) {
        let indices = self.build_index.clone();
        self.log_all(msg, &indices);
    }

    /// Logs a message to every profiling output.
    pub fn log_profiling<S: Display>(&mut self, msg: &S) {
        let indices = self.profiling_index.clone();
        self.log_all(msg, &indices);
    }

    /// Logs a message to every autotune output.
    pub fn log_autotune<S: Display>(&mut self, msg: &S) {
        let indices = self.autotune_index.clone();
        self.log_all(msg, &indices);
    }

    /// Current build log level.
    pub fn log_level_build(&self) -> BuildLogLevel {
        self.config.build.logger.level
    }

    /// Current profiling log level.
    pub fn log_level_profiling(&self) -> ProfilingLogLevel {
        self.config.profiling.logger.level
    }

    /// Current autotune log level.
    pub fn log_level_autotune(&self) -> AutotuneLogLevel {
        self.config.autotune.logger.level
    }

    fn log_all<S: Display>(&mut self, msg: &S, indices: &[usize]) {
        match indices {
            [] => {}
            [index] => self.loggers[*index].log(msg),
            indices => {
                let msg = msg.to_string();
                for index in indices {
                    self.loggers[*index].log(&msg);
                }
            }
        }
    }
}

fn new_logger(
    setting_index: &mut Vec<usize>,
    loggers: &mut Vec<LoggerKind>,
    logger2index: &mut HashMap<LoggerId, usize>,
    id: LoggerId,
    func_logger: impl FnOnce() -> Option<LoggerKind>,
) {
    if let Some(index) = logger2index.get(&id) {
        setting_index.push(*index);
    } else if let Some(logger) = func_logger() {
        let index = loggers.len();
        logger2index.insert(id, index);
        loggers.push(logger);
        setting_index.push(index);
    }
}

fn register_logger<L: LogLevel>(
    kind: &LoggerConfig<L>,
    setting_index: &mut Vec<usize>,
    loggers: &mut Vec<LoggerKind>,
    logger2index: &mut HashMap<LoggerId, usize>,
) {
    if let Some(file) = &kind.file {
        new_logger(
            setting_index,
            loggers,
            logger2index,
            LoggerId::File(file.clone()),
            || FileLogger::new(file, kind.append).map(LoggerKind::File),
        );
    }

    if kind.stdout {
        new_logger(setting_index, loggers, logger2index, LoggerId::Stdout, || {
            Some(LoggerKind::Stdout)
        });
    }

    if kind.stderr {
        new_logger(setting_index, loggers, logger2index, LoggerId::Stderr, || {
            Some(LoggerKind::Stderr)
        });
    }

    if let Some(level) = kind.log {
        new_logger(
            setting_index,
            loggers,
            logger2index,
            LoggerId::LogCrate(level),
            || Some(LoggerKind::Log(level)),
        );
    }
}

#[derive(Debug)]
enum LoggerKind {
    File(FileLogger),
    Stdout,
    Stderr,
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            LoggerKind::File(file_logger) => file_logger.log(msg),
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

#[derive(Debug)]
struct FileLogger {
    writer: BufWriter<File>,
}

impl FileLogger {
    fn new(path: &PathBuf, append: bool) -> Option<Self> {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .truncate(!append)
            .create(true)
            .open(path);

        match file {
            Ok(file) => Some(Self {
                writer: BufWriter::new(file),
            }),
            Err(err) => {
                log::warn!("Unable to open log file {}: {err}", path.display());
                None
            }
        }
    }

    fn log<S: Display>(&mut self, msg: &S) {
        let result = writeln!(self.writer, "{msg}").and_then(|_| self.writer.flush());
        if let Err(err) = result {
            log::warn!("Unable to write log: {err}");
        }
    }
}
