//! 框架配置
//!
//! 定义框架的配置结构和加载逻辑。配置文件可以是 YAML 或 JSON（按扩展名判断）：
//!
//! ```yaml
//! logging:
//!   level: debug
//! framework:
//!   boot_delegation: ["java.*"]
//!   system_packages: "org.chips.framework;version=1.0"
//!   max_resolve_depth: 16
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::resolver::DEFAULT_MAX_RESOLVE_DEPTH;
use crate::utils::{FrameworkError, Result};

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略（hourly / daily / never）
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 解析与类加载配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// 优先交给父加载器的包模式，`*` 表示全部
    #[serde(default = "default_boot_delegation")]
    pub boot_delegation: Vec<String>,

    /// 系统 bundle 导出的包（`Export-Package` 语法）
    #[serde(default)]
    pub system_packages: String,

    /// 嵌套解析深度上限
    #[serde(default = "default_max_resolve_depth")]
    pub max_resolve_depth: usize,

    /// 是否允许动态导入
    #[serde(default = "default_true")]
    pub dynamic_imports: bool,
}

fn default_boot_delegation() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_resolve_depth() -> usize {
    DEFAULT_MAX_RESOLVE_DEPTH
}

fn default_true() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            boot_delegation: default_boot_delegation(),
            system_packages: String::new(),
            max_resolve_depth: default_max_resolve_depth(),
            dynamic_imports: true,
        }
    }
}

/// 框架配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 解析与类加载配置
    #[serde(default)]
    pub framework: ResolverConfig,
}

impl FrameworkConfig {
    /// 创建配置构建器
    pub fn builder() -> FrameworkConfigBuilder {
        FrameworkConfigBuilder::new()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            FrameworkError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;

        let mut config: FrameworkConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;

        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.framework.max_resolve_depth == 0 {
            return Err(FrameworkError::ConfigLoadFailed(
                "max_resolve_depth 必须大于 0".to_string(),
            ));
        }
        if !matches!(self.logging.rotation.as_str(), "hourly" | "daily" | "never") {
            return Err(FrameworkError::ConfigLoadFailed(format!(
                "未知的日志轮转策略: {}",
                self.logging.rotation
            )));
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: FrameworkConfig) {
        // 只覆盖非默认值的配置
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.framework.boot_delegation != default_boot_delegation() {
            self.framework.boot_delegation = other.framework.boot_delegation;
        }
        if !other.framework.system_packages.is_empty() {
            self.framework.system_packages = other.framework.system_packages;
        }
        if other.framework.max_resolve_depth != default_max_resolve_depth() {
            self.framework.max_resolve_depth = other.framework.max_resolve_depth;
        }
        if !other.framework.dynamic_imports {
            self.framework.dynamic_imports = false;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct FrameworkConfigBuilder {
    config: FrameworkConfig,
}

impl FrameworkConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置启动委派模式（替换默认的 `*`）
    pub fn boot_delegation<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.config.framework.boot_delegation = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// 设置系统 bundle 导出的包
    pub fn system_packages(mut self, packages: impl Into<String>) -> Self {
        self.config.framework.system_packages = packages.into();
        self
    }

    /// 设置嵌套解析深度上限
    pub fn max_resolve_depth(mut self, depth: usize) -> Self {
        self.config.framework.max_resolve_depth = depth;
        self
    }

    /// 关闭动态导入
    pub fn disable_dynamic_imports(mut self) -> Self {
        self.config.framework.dynamic_imports = false;
        self
    }

    /// 构建配置
    pub fn build(self) -> FrameworkConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FrameworkConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.framework.boot_delegation, vec!["*"]);
        assert_eq!(config.framework.max_resolve_depth, DEFAULT_MAX_RESOLVE_DEPTH);
        assert!(config.framework.dynamic_imports);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = FrameworkConfig::builder()
            .log_level("debug")
            .boot_delegation(["java.*"])
            .system_packages("org.chips.api")
            .disable_dynamic_imports()
            .build();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.framework.boot_delegation, vec!["java.*"]);
        assert_eq!(config.framework.system_packages, "org.chips.api");
        assert!(!config.framework.dynamic_imports);
    }

    #[test]
    fn test_config_merge() {
        let mut base = FrameworkConfig::default();
        let override_config = FrameworkConfig::builder()
            .log_level("debug")
            .max_resolve_depth(8)
            .build();

        base.merge(override_config);

        assert_eq!(base.logging.level, "debug");
        assert_eq!(base.framework.max_resolve_depth, 8);
        assert_eq!(base.framework.boot_delegation, vec!["*"]);
    }

    #[test]
    fn test_validate() {
        let config = FrameworkConfig::builder().max_resolve_depth(0).build();
        assert!(matches!(config.validate(), Err(FrameworkError::ConfigLoadFailed(_))));

        let mut config = FrameworkConfig::default();
        config.logging.rotation = "weekly".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = FrameworkConfig::builder()
            .log_level("warn")
            .boot_delegation(Vec::<String>::new())
            .build();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: FrameworkConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.logging.level, "warn");
        assert!(parsed.framework.boot_delegation.is_empty());
    }
}
