//! 框架错误类型定义
//!
//! 本模块定义了框架中使用的所有错误类型。错误分为四类：
//!
//! - 解析失败（可重试）：缺少必需的导入/依赖、单例冲突、uses 冲突
//! - 生命周期违规：在激活器回调内操作自身、操作已卸载的 bundle
//! - 激活器失败：bundle 自身的 start/stop 回调返回错误
//! - 存储失败：安装/更新时内容获取失败

use thiserror::Error;

use crate::resolver::BundleId;

/// 框架核心错误类型
#[derive(Error, Debug)]
pub enum FrameworkError {
    // ==================== bundle 管理错误 ====================

    /// bundle 未找到
    #[error("bundle 未找到: #{0}")]
    BundleNotFound(BundleId),

    /// 相同符号名与版本的 bundle 已安装
    #[error("bundle 已安装: '{symbolic_name}' 版本 {version}")]
    DuplicateBundle {
        symbolic_name: String,
        version: String,
    },

    /// 非法的状态转换
    #[error("非法状态: {0}")]
    IllegalState(String),

    // ==================== 解析错误 ====================

    /// 依赖解析失败
    #[error("bundle #{bundle} 解析失败: {reason}")]
    ResolutionFailed {
        bundle: BundleId,
        reason: String,
    },

    /// 激活器回调失败
    #[error("bundle #{bundle} 激活器失败: {reason}")]
    ActivatorFailed {
        bundle: BundleId,
        reason: String,
    },

    // ==================== 清单错误 ====================

    /// 无效的清单
    #[error("无效的 bundle 清单: {0}")]
    InvalidManifest(String),

    /// 清单头语法错误
    #[error("清单头 '{header}' 语法错误: {reason}")]
    HeaderSyntax {
        header: String,
        reason: String,
    },

    /// 版本解析错误
    #[error("无效的版本: {0}")]
    InvalidVersion(String),

    // ==================== 类加载错误 ====================

    /// 类未找到
    #[error("bundle #{bundle} 中未找到类 '{class}'")]
    ClassNotFound {
        bundle: BundleId,
        class: String,
    },

    // ==================== 存储错误 ====================

    /// 存储操作失败
    #[error("存储操作失败: '{location}' - {reason}")]
    StorageFailed {
        location: String,
        reason: String,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 框架操作结果类型别名
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// 错误码常量
pub mod error_code {
    // bundle 错误 (BUNDLE-xxx)
    pub const BUNDLE_NOT_FOUND: &str = "BUNDLE-001";
    pub const BUNDLE_DUPLICATE: &str = "BUNDLE-002";
    pub const BUNDLE_ILLEGAL_STATE: &str = "BUNDLE-003";
    pub const BUNDLE_ACTIVATOR_FAILED: &str = "BUNDLE-004";

    // 解析错误 (RESOLVE-xxx)
    pub const RESOLVE_FAILED: &str = "RESOLVE-001";

    // 清单错误 (MANIFEST-xxx)
    pub const MANIFEST_INVALID: &str = "MANIFEST-001";
    pub const MANIFEST_HEADER_SYNTAX: &str = "MANIFEST-002";
    pub const MANIFEST_VERSION: &str = "MANIFEST-003";

    // 类加载错误 (CLASS-xxx)
    pub const CLASS_NOT_FOUND: &str = "CLASS-001";

    // 存储错误 (STORAGE-xxx)
    pub const STORAGE_FAILED: &str = "STORAGE-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
}

impl FrameworkError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            FrameworkError::BundleNotFound(_) => error_code::BUNDLE_NOT_FOUND,
            FrameworkError::DuplicateBundle { .. } => error_code::BUNDLE_DUPLICATE,
            FrameworkError::IllegalState(_) => error_code::BUNDLE_ILLEGAL_STATE,
            FrameworkError::ActivatorFailed { .. } => error_code::BUNDLE_ACTIVATOR_FAILED,
            FrameworkError::ResolutionFailed { .. } => error_code::RESOLVE_FAILED,
            FrameworkError::InvalidManifest(_) => error_code::MANIFEST_INVALID,
            FrameworkError::HeaderSyntax { .. } => error_code::MANIFEST_HEADER_SYNTAX,
            FrameworkError::InvalidVersion(_) => error_code::MANIFEST_VERSION,
            FrameworkError::ClassNotFound { .. } => error_code::CLASS_NOT_FOUND,
            FrameworkError::StorageFailed { .. } => error_code::STORAGE_FAILED,
            FrameworkError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            _ => "UNKNOWN",
        }
    }

    /// 是否可以重试
    ///
    /// 只有解析失败是可重试的：安装缺失的提供者后再次解析即可能成功。
    pub fn is_retryable(&self) -> bool {
        matches!(self, FrameworkError::ResolutionFailed { .. })
    }

    /// 构造清单头语法错误
    pub(crate) fn header(header: &str, reason: impl Into<String>) -> Self {
        FrameworkError::HeaderSyntax {
            header: header.to_string(),
            reason: reason.into(),
        }
    }
}
