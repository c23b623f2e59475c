//! bundle 模块
//!
//! 提供 bundle 的身份与内容相关功能，包括：
//! - 版本与版本区间
//! - 清单头语法与清单解析
//! - 存档与存储接口
//! - 生命周期状态与事件
//! - 激活器接口

pub mod activator;
pub mod archive;
#[allow(clippy::module_inception)]
pub mod bundle;
pub mod event;
pub mod header;
pub mod manifest;
pub mod state;
pub mod version;

pub use activator::{ActivatorFactory, ActivatorRegistry, BundleActivator};
pub use archive::{BundleArchive, BundleContent, BundleStorage, MemoryArchive, MemoryStorage};
pub use bundle::Bundle;
pub use event::{
    BundleEvent, BundleEventKind, BundleListener, FrameworkEvent, FrameworkEventKind,
    FrameworkListener, ListenerId, ListenerRegistry,
};
pub use manifest::{BundleManifest, ExtensionKind, FragmentHost, Headers, SYSTEM_BUNDLE_NAME};
pub use state::BundleState;
pub use version::{Version, VersionRange};
