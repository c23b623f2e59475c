//! 启动委派
//!
//! 包名匹配委派模式的类优先交给父加载器（系统 bundle）查找，
//! 父加载器找不到时再按 bundle 自身的规则查找。

/// 启动委派模式集合
///
/// 支持 `*`（全部）、`a.b.*`（`a.b` 的子包）与精确包名。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootDelegation {
    all: bool,
    prefixes: Vec<String>,
    exact: Vec<String>,
}

impl BootDelegation {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut delegation = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if pattern == "*" {
                delegation.all = true;
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                delegation.prefixes.push(prefix.to_string());
            } else {
                delegation.exact.push(pattern.to_string());
            }
        }
        delegation
    }

    /// 不委派任何包
    pub fn none() -> Self {
        Self::default()
    }

    /// 包是否委派给父加载器
    pub fn delegates(&self, package: &str) -> bool {
        self.all
            || self.exact.iter().any(|p| p == package)
            || self.prefixes.iter().any(|p| package.starts_with(p.as_str()))
    }

    pub fn delegates_all(&self) -> bool {
        self.all
    }
}
