//! bundle 与框架事件
//!
//! 监听器在执行状态转换的任务上同步调用，调用发生在状态更新之后。
//! 监听器可以归属于某个 bundle，该 bundle 停止时其监听器会被自动移除。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::resolver::BundleId;

/// bundle 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleEventKind {
    Installed,
    Resolved,
    Starting,
    Started,
    Stopping,
    Stopped,
    Updated,
    Unresolved,
    Uninstalled,
}

impl fmt::Display for BundleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleEventKind::Installed => "INSTALLED",
            BundleEventKind::Resolved => "RESOLVED",
            BundleEventKind::Starting => "STARTING",
            BundleEventKind::Started => "STARTED",
            BundleEventKind::Stopping => "STOPPING",
            BundleEventKind::Stopped => "STOPPED",
            BundleEventKind::Updated => "UPDATED",
            BundleEventKind::Unresolved => "UNRESOLVED",
            BundleEventKind::Uninstalled => "UNINSTALLED",
        };
        f.write_str(s)
    }
}

/// bundle 事件
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEvent {
    pub kind: BundleEventKind,
    pub bundle: BundleId,
    pub timestamp: DateTime<Utc>,
}

impl BundleEvent {
    pub fn new(kind: BundleEventKind, bundle: BundleId) -> Self {
        Self {
            kind,
            bundle,
            timestamp: Utc::now(),
        }
    }
}

/// 框架事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkEventKind {
    /// 框架已启动
    Started,
    /// 某个操作失败，但未中止整个批处理
    Error,
    /// 非致命警告
    Warning,
    /// `refresh_packages` 完成
    PackagesRefreshed,
}

/// 框架事件
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkEvent {
    pub kind: FrameworkEventKind,
    /// 相关 bundle
    pub bundle: Option<BundleId>,
    /// 描述信息
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl FrameworkEvent {
    pub fn new(kind: FrameworkEventKind, bundle: Option<BundleId>, message: impl Into<String>) -> Self {
        Self {
            kind,
            bundle,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// bundle 监听器
pub type BundleListener = Arc<dyn Fn(&BundleEvent) + Send + Sync>;

/// 框架监听器
pub type FrameworkListener = Arc<dyn Fn(&FrameworkEvent) + Send + Sync>;

/// 监听器注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Entry<L> {
    id: ListenerId,
    owner: Option<BundleId>,
    listener: L,
}

/// 监听器注册表
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    bundle_listeners: RwLock<Vec<Entry<BundleListener>>>,
    framework_listeners: RwLock<Vec<Entry<FrameworkListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// 注册 bundle 监听器
    ///
    /// `owner` 为 `Some` 时，监听器在该 bundle 停止时被移除。
    pub fn add_bundle_listener(&self, owner: Option<BundleId>, listener: BundleListener) -> ListenerId {
        let id = self.next_id();
        self.bundle_listeners.write().push(Entry { id, owner, listener });
        id
    }

    /// 注册框架监听器
    pub fn add_framework_listener(
        &self,
        owner: Option<BundleId>,
        listener: FrameworkListener,
    ) -> ListenerId {
        let id = self.next_id();
        self.framework_listeners.write().push(Entry { id, owner, listener });
        id
    }

    /// 移除监听器，返回是否存在
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut removed = false;
        self.bundle_listeners.write().retain(|e| {
            let keep = e.id != id;
            removed |= !keep;
            keep
        });
        self.framework_listeners.write().retain(|e| {
            let keep = e.id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    /// 移除某个 bundle 拥有的全部监听器，返回移除数量
    pub fn remove_owned_by(&self, bundle: BundleId) -> usize {
        let mut bundle_listeners = self.bundle_listeners.write();
        let mut framework_listeners = self.framework_listeners.write();
        let before = bundle_listeners.len() + framework_listeners.len();
        bundle_listeners.retain(|e| e.owner != Some(bundle));
        framework_listeners.retain(|e| e.owner != Some(bundle));
        before - bundle_listeners.len() - framework_listeners.len()
    }

    /// 同步分发 bundle 事件
    ///
    /// 分发前复制监听器列表，监听器内部可以安全地注册或移除监听器。
    pub fn fire_bundle_event(&self, event: &BundleEvent) {
        trace!(bundle_id = event.bundle, kind = %event.kind, "分发 bundle 事件");
        let listeners: Vec<BundleListener> = self
            .bundle_listeners
            .read()
            .iter()
            .map(|e| e.listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// 同步分发框架事件
    pub fn fire_framework_event(&self, event: &FrameworkEvent) {
        trace!(kind = ?event.kind, message = %event.message, "分发框架事件");
        let listeners: Vec<FrameworkListener> = self
            .framework_listeners
            .read()
            .iter()
            .map(|e| e.listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// 已注册的监听器数量
    pub fn len(&self) -> usize {
        self.bundle_listeners.read().len() + self.framework_listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
