//! bundle 生命周期状态
//!
//! ```text
//! INSTALLED -> RESOLVED -> STARTING -> ACTIVE -> STOPPING -> RESOLVED
//!     \___________\___________________________________________\-> UNINSTALLED
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// bundle 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    /// 已安装，依赖尚未解析
    #[default]
    Installed,
    /// 依赖已解析
    Resolved,
    /// 正在启动（激活器 start 执行中）
    Starting,
    /// 运行中
    Active,
    /// 正在停止（激活器 stop 执行中）
    Stopping,
    /// 已卸载（终态）
    Uninstalled,
}

impl BundleState {
    /// 是否处于已解析或更高的状态
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            BundleState::Resolved | BundleState::Starting | BundleState::Active | BundleState::Stopping
        )
    }

    /// 是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, BundleState::Installed | BundleState::Resolved)
    }

    /// 是否可以停止
    pub fn can_stop(&self) -> bool {
        matches!(self, BundleState::Active | BundleState::Starting)
    }

    /// 是否已卸载
    pub fn is_uninstalled(&self) -> bool {
        *self == BundleState::Uninstalled
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleState::Installed => "INSTALLED",
            BundleState::Resolved => "RESOLVED",
            BundleState::Starting => "STARTING",
            BundleState::Active => "ACTIVE",
            BundleState::Stopping => "STOPPING",
            BundleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!BundleState::Installed.is_resolved());
        assert!(BundleState::Active.is_resolved());
        assert!(BundleState::Resolved.can_start());
        assert!(!BundleState::Active.can_start());
        assert!(BundleState::Active.can_stop());
        assert!(BundleState::Uninstalled.is_uninstalled());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BundleState::Stopping.to_string(), "STOPPING");
        assert_eq!(BundleState::default(), BundleState::Installed);
    }
}
