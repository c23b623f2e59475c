//! 依赖解析模块
//!
//! 提供包级与 bundle 级依赖的建模与解析，包括：
//! - 依赖边模型（导出、导入、bundle 依赖、动态导入模式）
//! - 包索引与解析算法
//! - 供类加载器使用的绑定快照

pub mod bundle_packages;
pub mod edge;
pub mod packages;
pub mod pkg;
mod transaction;
pub mod wiring;

pub use bundle_packages::BundlePackages;
pub use edge::{
    BundleId, DynamicImportPattern, ExportKey, ExportedPackage, GenerationId, ImportKey,
    ImportedPackage, RequireEdge, RequireKey, ResolutionPolicy, Visibility, SYSTEM_BUNDLE_ID,
};
pub use packages::{GraphSnapshot, Packages, ResolveFailure, ResolveReport, DEFAULT_MAX_RESOLVE_DEPTH};
pub use pkg::Pkg;
pub use wiring::{WireTarget, Wiring};
