//! bundle 实例
//!
//! [`Bundle`] 保存一个已安装 bundle 的身份、当前状态以及当前代的存档与清单。
//! 状态转换由 [`crate::framework::Framework`] 驱动；同一 bundle 上的生命周期
//! 操作通过 `op_lock` 串行执行，不同 bundle 之间可以并发。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::activator::BundleActivator;
use super::archive::BundleArchive;
use super::manifest::BundleManifest;
use super::state::BundleState;
use super::version::Version;
use crate::resolver::{BundleId, GenerationId};

/// bundle 的可变数据
pub(crate) struct BundleData {
    pub state: BundleState,
    pub generation: GenerationId,
    pub archive: Arc<dyn BundleArchive>,
    pub manifest: Arc<BundleManifest>,
    /// 最近一次解析失败的原因
    pub resolve_failure: Option<String>,
    /// 运行中的激活器
    pub activator: Option<Arc<dyn BundleActivator>>,
    pub last_modified: DateTime<Utc>,
    /// 被替换但仍被引用的旧代存档
    pub zombies: Vec<(u32, Arc<dyn BundleArchive>)>,
}

/// 已安装的 bundle
pub struct Bundle {
    id: BundleId,
    location: String,
    data: RwLock<BundleData>,
    /// 生命周期操作锁
    pub(crate) op_lock: tokio::sync::Mutex<()>,
}

impl Bundle {
    pub(crate) fn new(
        id: BundleId,
        location: impl Into<String>,
        archive: Arc<dyn BundleArchive>,
        manifest: BundleManifest,
    ) -> Self {
        Self {
            id,
            location: location.into(),
            data: RwLock::new(BundleData {
                state: BundleState::Installed,
                generation: GenerationId::new(id, 0),
                archive,
                manifest: Arc::new(manifest),
                resolve_failure: None,
                activator: None,
                last_modified: Utc::now(),
                zombies: Vec::new(),
            }),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn state(&self) -> BundleState {
        self.data.read().state
    }

    pub fn symbolic_name(&self) -> Option<String> {
        self.data.read().manifest.symbolic_name.clone()
    }

    pub fn version(&self) -> Version {
        self.data.read().manifest.version.clone()
    }

    /// 当前代
    pub fn generation(&self) -> GenerationId {
        self.data.read().generation
    }

    pub fn manifest(&self) -> Arc<BundleManifest> {
        self.data.read().manifest.clone()
    }

    pub fn archive(&self) -> Arc<dyn BundleArchive> {
        self.data.read().archive.clone()
    }

    pub fn is_fragment(&self) -> bool {
        self.data.read().manifest.is_fragment()
    }

    /// 最近一次解析失败的原因
    pub fn resolve_failure(&self) -> Option<String> {
        self.data.read().resolve_failure.clone()
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.data.read().last_modified
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, BundleData> {
        self.data.read()
    }

    pub(crate) fn write(&self) -> parking_lot::RwLockWriteGuard<'_, BundleData> {
        self.data.write()
    }

    pub(crate) fn set_state(&self, state: BundleState) {
        let mut data = self.data.write();
        data.state = state;
        data.last_modified = Utc::now();
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.read();
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("symbolic_name", &data.manifest.symbolic_name)
            .field("version", &data.manifest.version.to_string())
            .field("state", &data.state)
            .field("generation", &data.generation)
            .finish()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.read();
        match &data.manifest.symbolic_name {
            Some(name) => write!(f, "{} [{}] ({})", name, self.id, data.manifest.version),
            None => write!(f, "{} [{}]", self.location, self.id),
        }
    }
}
