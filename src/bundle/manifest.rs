//! bundle 清单
//!
//! 从存档提供的原始清单属性中提取 bundle 的身份信息：符号名、版本、
//! 单例标记、激活器以及片段宿主声明。依赖边（导入/导出/依赖 bundle）
//! 由 [`crate::resolver::BundlePackages`] 负责解析。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::header::parse_entries;
use super::version::{Version, VersionRange};
use crate::utils::{FrameworkError, Result};

/// 原始清单属性：头名称 -> 值
pub type Headers = BTreeMap<String, String>;

/// 系统 bundle 的符号名
pub const SYSTEM_BUNDLE_NAME: &str = "system.bundle";

/// 清单头名称常量
pub mod constants {
    pub const BUNDLE_SYMBOLIC_NAME: &str = "Bundle-SymbolicName";
    pub const BUNDLE_VERSION: &str = "Bundle-Version";
    pub const BUNDLE_ACTIVATOR: &str = "Bundle-Activator";
    pub const EXPORT_PACKAGE: &str = "Export-Package";
    pub const IMPORT_PACKAGE: &str = "Import-Package";
    pub const DYNAMIC_IMPORT_PACKAGE: &str = "DynamicImport-Package";
    pub const REQUIRE_BUNDLE: &str = "Require-Bundle";
    pub const FRAGMENT_HOST: &str = "Fragment-Host";

    pub const SINGLETON_DIRECTIVE: &str = "singleton";
    pub const EXTENSION_DIRECTIVE: &str = "extension";
    pub const RESOLUTION_DIRECTIVE: &str = "resolution";
    pub const VISIBILITY_DIRECTIVE: &str = "visibility";
    pub const USES_DIRECTIVE: &str = "uses";
    pub const MANDATORY_DIRECTIVE: &str = "mandatory";
    pub const INCLUDE_DIRECTIVE: &str = "include";
    pub const EXCLUDE_DIRECTIVE: &str = "exclude";

    pub const VERSION_ATTRIBUTE: &str = "version";
    pub const SPECIFICATION_VERSION_ATTRIBUTE: &str = "specification-version";
    pub const BUNDLE_SYMBOLIC_NAME_ATTRIBUTE: &str = "bundle-symbolic-name";
    pub const BUNDLE_VERSION_ATTRIBUTE: &str = "bundle-version";
}

use constants::*;

/// 扩展片段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    /// 框架扩展
    Framework,
    /// 启动类路径扩展
    BootClassPath,
}

/// 片段宿主声明（`Fragment-Host`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHost {
    /// 宿主符号名
    pub symbolic_name: String,
    /// 宿主版本区间
    pub version_range: VersionRange,
    /// 扩展类型，仅当宿主为系统 bundle 时有效
    pub extension: Option<ExtensionKind>,
}

impl FragmentHost {
    /// 是否为扩展片段
    pub fn is_extension(&self) -> bool {
        self.extension.is_some()
    }
}

/// bundle 清单的类型化视图
#[derive(Debug, Clone)]
pub struct BundleManifest {
    /// 原始清单属性
    pub headers: Headers,
    /// 符号名
    pub symbolic_name: Option<String>,
    /// 版本
    pub version: Version,
    /// 是否为单例
    pub singleton: bool,
    /// 激活器名称
    pub activator: Option<String>,
    /// 片段宿主
    pub fragment_host: Option<FragmentHost>,
}

impl BundleManifest {
    /// 从原始清单属性构造
    ///
    /// # 错误
    ///
    /// 清单头语法错误返回 `HeaderSyntax`，语义错误返回 `InvalidManifest`，
    /// 所有语义错误会汇总到一条错误信息中。
    pub fn from_headers(headers: Headers) -> Result<Self> {
        let mut errors: Vec<String> = Vec::new();

        let (symbolic_name, singleton) = match headers.get(BUNDLE_SYMBOLIC_NAME) {
            Some(value) => {
                let entries = parse_entries(BUNDLE_SYMBOLIC_NAME, value, true)?;
                match entries.as_slice() {
                    [entry] => {
                        if !is_valid_symbolic_name(entry.key()) {
                            errors.push(format!("符号名 '{}' 格式无效", entry.key()));
                        }
                        let singleton = entry
                            .directive(SINGLETON_DIRECTIVE)
                            .map(|v| v.eq_ignore_ascii_case("true"))
                            .unwrap_or(false);
                        (Some(entry.key().to_string()), singleton)
                    }
                    _ => {
                        errors.push(format!("{} 必须且只能包含一个条目", BUNDLE_SYMBOLIC_NAME));
                        (None, false)
                    }
                }
            }
            None => (None, false),
        };

        let version = match headers.get(BUNDLE_VERSION) {
            Some(v) => Version::parse(v)?,
            None => Version::empty(),
        };

        let activator = headers
            .get(BUNDLE_ACTIVATOR)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let fragment_host = match headers.get(FRAGMENT_HOST) {
            Some(value) => Some(Self::parse_fragment_host(value, &mut errors)?),
            None => None,
        };

        if let Some(host) = &fragment_host {
            if activator.is_some() {
                errors.push("片段 bundle 不能声明激活器".to_string());
            }
            if host.is_extension()
                && (headers.contains_key(IMPORT_PACKAGE) || headers.contains_key(REQUIRE_BUNDLE))
            {
                errors.push("扩展片段不能导入包或依赖其他 bundle".to_string());
            }
            if symbolic_name.is_none() {
                errors.push("片段 bundle 必须声明符号名".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(FrameworkError::InvalidManifest(errors.join("; ")));
        }

        Ok(Self {
            headers,
            symbolic_name,
            version,
            singleton,
            activator,
            fragment_host,
        })
    }

    fn parse_fragment_host(value: &str, errors: &mut Vec<String>) -> Result<FragmentHost> {
        let entries = parse_entries(FRAGMENT_HOST, value, true)?;
        let entry = match entries.as_slice() {
            [entry] => entry,
            _ => {
                return Err(FrameworkError::header(FRAGMENT_HOST, "必须且只能包含一个条目"));
            }
        };

        let version_range = match entry.attribute(BUNDLE_VERSION_ATTRIBUTE) {
            Some(range) => VersionRange::parse(range)?,
            None => VersionRange::default(),
        };

        let extension = match entry.directive(EXTENSION_DIRECTIVE) {
            None => None,
            Some("framework") => Some(ExtensionKind::Framework),
            Some("bootclasspath") => Some(ExtensionKind::BootClassPath),
            Some(other) => {
                errors.push(format!("未知的扩展类型 '{}'", other));
                None
            }
        };

        if extension.is_some() && entry.key() != SYSTEM_BUNDLE_NAME {
            errors.push(format!("扩展片段的宿主必须是 {}", SYSTEM_BUNDLE_NAME));
        }

        Ok(FragmentHost {
            symbolic_name: entry.key().to_string(),
            version_range,
            extension,
        })
    }

    /// 获取原始清单属性
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// 是否为片段
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }

    /// 是否为扩展片段
    pub fn is_extension(&self) -> bool {
        self.fragment_host
            .as_ref()
            .map(FragmentHost::is_extension)
            .unwrap_or(false)
    }
}

/// 校验符号名（以点分隔的标识符，允许连字符）
pub fn is_valid_symbolic_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$").expect("符号名正则表达式有效")
        })
        .is_match(name)
}

/// 校验包名（以点分隔的标识符）
pub fn is_valid_package_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$")
                .expect("包名正则表达式有效")
        })
        .is_match(name)
}
