//! 日志系统
//!
//! 基于 tracing 生态初始化框架日志：
//!
//! - 控制台输出（pretty 或 JSON）
//! - 按时间轮转的文件输出（异步非阻塞）
//! - `RUST_LOG` 与自定义指令过滤
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_framework::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let config = LoggerConfig::builder()
//!     .level("debug")
//!     .file_output("./logs")
//!     .rotation(RotationStrategy::Hourly)
//!     .build();
//! let _guard = Logger::init(config).unwrap();
//!
//! tracing::info!(bundle_id = 1, "bundle 已启动");
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter, Layer};

use crate::core::config::LogConfig;
use crate::utils::{FrameworkError, Result};

// ==================== 轮转策略 ====================

/// 日志文件轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转
    Never,
    /// 每小时
    Hourly,
    /// 每天（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从配置字符串解析，未知值按每天处理
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationStrategy::Never => "never",
            RotationStrategy::Hourly => "hourly",
            RotationStrategy::Daily => "daily",
        };
        f.write_str(s)
    }
}

// ==================== 日志配置 ====================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别
    pub level: String,
    /// 是否使用 JSON 格式
    pub json_format: bool,
    /// 是否输出到控制台
    pub console_output: bool,
    /// 文件输出目录（None 表示不输出到文件）
    pub file_output: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    pub rotation: RotationStrategy,
    /// 保留的日志文件数
    pub max_files: usize,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 是否显示线程 ID
    pub show_thread_ids: bool,
    /// 自定义过滤指令（EnvFilter 格式），例如 `chips_framework::resolver=trace`
    pub filter_directives: Option<String>,
    /// 控制台是否使用 ANSI 颜色
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: "chips-framework".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: 7,
            show_target: true,
            show_thread_ids: false,
            filter_directives: None,
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从框架配置的日志段创建
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: log_config
                .log_dir
                .clone()
                .filter(|_| log_config.file_output),
            rotation: RotationStrategy::parse(&log_config.rotation),
            max_files: log_config.max_files,
            ..Default::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    pub fn max_files(mut self, count: usize) -> Self {
        self.config.max_files = count;
        self
    }

    pub fn show_target(mut self, enable: bool) -> Self {
        self.config.show_target = enable;
        self
    }

    pub fn show_thread_ids(mut self, enable: bool) -> Self {
        self.config.show_thread_ids = enable;
        self
    }

    /// 追加过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ==================== 日志守卫 ====================

/// 日志系统守卫
///
/// 持有非阻塞写入器的 WorkerGuard，丢弃时刷新挂起的日志。
#[derive(Default)]
pub struct LogGuard {
    guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 持有的写入器数量
    pub fn writers(&self) -> usize {
        self.guards.len()
    }
}

impl fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogGuard")
            .field("writers", &self.guards.len())
            .finish()
    }
}

// ==================== 日志系统 ====================

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化全局日志订阅者
    ///
    /// 返回的 [`LogGuard`] 需要保持到程序退出。
    ///
    /// # 错误
    ///
    /// 已经初始化过，或过滤指令无效时返回 `InitFailed`。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(FrameworkError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let filter = Self::create_env_filter(&config)?;
        let mut guard = LogGuard::default();

        let console = if config.console_output {
            let (writer, worker) = tracing_appender::non_blocking(io::stdout());
            guard.guards.push(worker);
            Some(Self::fmt_layer(&config, writer, config.ansi_colors))
        } else {
            None
        };

        let file = match config.file_output {
            Some(ref dir) => {
                let appender = RollingFileAppender::builder()
                    .rotation(config.rotation.to_rotation())
                    .filename_prefix(&config.file_prefix)
                    .filename_suffix("log")
                    .max_log_files(config.max_files.max(1))
                    .build(dir)
                    .map_err(|e| FrameworkError::InitFailed(format!("无法创建日志文件: {}", e)))?;
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard.guards.push(worker);
                Some(Self::fmt_layer(&config, writer, false))
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(file)
            .try_init()
            .map_err(|e| FrameworkError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 初始化日志系统，已初始化时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    /// 按框架配置初始化
    pub fn init_from_config(log_config: &LogConfig) -> Result<LogGuard> {
        Self::init(LoggerConfig::from_log_config(log_config))
    }

    fn create_env_filter(config: &LoggerConfig) -> Result<EnvFilter> {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.level));

        if let Some(ref directives) = config.filter_directives {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                let directive = directive.parse().map_err(|e| {
                    FrameworkError::InitFailed(format!("无效的过滤指令 '{}': {}", directive, e))
                })?;
                filter = filter.add_directive(directive);
            }
        }
        Ok(filter)
    }

    fn fmt_layer<S>(config: &LoggerConfig, writer: NonBlocking, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = tfmt::layer()
            .with_writer(writer)
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids);
        if config.json_format {
            layer.json().with_ansi(false).boxed()
        } else {
            layer.with_ansi(ansi).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_parse() {
        assert_eq!(RotationStrategy::parse("HOURLY"), RotationStrategy::Hourly);
        assert_eq!(RotationStrategy::parse("none"), RotationStrategy::Never);
        assert_eq!(RotationStrategy::parse("whatever"), RotationStrategy::Daily);
        assert_eq!(RotationStrategy::Hourly.to_string(), "hourly");
    }

    #[test]
    fn test_from_log_config() {
        let log_config = LogConfig {
            level: "debug".to_string(),
            file_output: true,
            log_dir: Some(PathBuf::from("/var/log/chips")),
            json_format: true,
            rotation: "hourly".to_string(),
            max_files: 3,
        };
        let config = LoggerConfig::from_log_config(&log_config);
        assert_eq!(config.level, "debug");
        assert!(config.json_format);
        assert_eq!(config.file_output, Some(PathBuf::from("/var/log/chips")));
        assert_eq!(config.rotation, RotationStrategy::Hourly);
        assert_eq!(config.max_files, 3);

        let log_config = LogConfig {
            file_output: false,
            ..log_config
        };
        assert!(LoggerConfig::from_log_config(&log_config).file_output.is_none());
    }

    #[test]
    fn test_env_filter_directives() {
        let config = LoggerConfig::builder()
            .filter_directives("chips_framework::resolver=trace, chips_framework=debug")
            .build();
        assert!(Logger::create_env_filter(&config).is_ok());
    }

    #[test]
    fn test_try_init_never_fails() {
        let _guard = Logger::try_init(LoggerConfig::builder().console_output(false).build());
        let second = Logger::try_init(LoggerConfig::default());
        assert_eq!(second.writers(), 0);
    }
}
