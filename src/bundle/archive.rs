//! bundle 存档与存储
//!
//! 框架本身不做文件 I/O：每一代 bundle 的清单属性、类字节与资源都通过
//! [`BundleArchive`] 读取，内容的获取、清除以及"启动时自动启动"标记的持久化
//! 都交给 [`BundleStorage`]。
//!
//! [`MemoryStorage`] 是基于内存的实现，内容可以用代码构造，也可以从 YAML 描述加载：
//!
//! ```yaml
//! headers:
//!   Bundle-SymbolicName: org.chips.demo
//!   Export-Package: org.chips.demo.api;version=1.0
//! classes:
//!   org.chips.demo.api.Service: "service bytes"
//! resources:
//!   org/chips/demo/config.txt: "key=value"
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::manifest::Headers;
use crate::utils::{FrameworkError, Result};

/// 一代 bundle 的只读内容
pub trait BundleArchive: Send + Sync + fmt::Debug {
    /// 安装位置
    fn location(&self) -> &str;

    /// 原始清单属性
    fn headers(&self) -> &Headers;

    /// 按全限定类名读取类字节
    fn class_bytes(&self, class_name: &str) -> Option<Arc<[u8]>>;

    /// 按路径读取资源
    fn resource(&self, path: &str) -> Option<Arc<[u8]>>;
}

/// bundle 存储
///
/// 负责按位置获取内容、清除不再使用的代以及持久化启动标记。
#[async_trait]
pub trait BundleStorage: Send + Sync {
    /// 打开指定位置的当前内容
    async fn open(&self, location: &str) -> Result<Arc<dyn BundleArchive>>;

    /// 清除某个位置的一代内容
    async fn purge(&self, location: &str, generation: u32) -> Result<()>;

    /// 持久化"启动时自动启动"标记
    async fn set_start_on_launch(&self, location: &str, start: bool) -> Result<()>;

    /// 读取"启动时自动启动"标记
    async fn start_on_launch(&self, location: &str) -> bool;
}

/// bundle 内容
#[derive(Debug, Clone, Default)]
pub struct BundleContent {
    headers: Headers,
    classes: BTreeMap<String, Arc<[u8]>>,
    resources: BTreeMap<String, Arc<[u8]>>,
}

/// YAML 描述格式
#[derive(Debug, Default, Serialize, Deserialize)]
struct ContentFile {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    classes: BTreeMap<String, String>,
    #[serde(default)]
    resources: BTreeMap<String, String>,
}

impl BundleContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置清单属性
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// 添加类
    pub fn class(mut self, name: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        self.classes.insert(name.into(), Arc::from(bytes.as_ref()));
        self
    }

    /// 添加资源
    pub fn resource(mut self, path: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        self.resources.insert(path.into(), Arc::from(bytes.as_ref()));
        self
    }

    /// 从 YAML 字符串解析
    pub fn parse_string(content: &str) -> Result<Self> {
        let file: ContentFile = serde_yaml::from_str(content)?;
        Ok(Self {
            headers: file.headers,
            classes: file
                .classes
                .into_iter()
                .map(|(k, v)| (k, Arc::from(v.as_bytes())))
                .collect(),
            resources: file
                .resources
                .into_iter()
                .map(|(k, v)| (k, Arc::from(v.as_bytes())))
                .collect(),
        })
    }

    /// 从 YAML 文件解析
    pub async fn parse_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// 内存中的一代 bundle 内容
#[derive(Debug, Clone)]
pub struct MemoryArchive {
    location: String,
    content: BundleContent,
}

impl MemoryArchive {
    pub fn new(location: impl Into<String>, content: BundleContent) -> Self {
        Self {
            location: location.into(),
            content,
        }
    }
}

impl BundleArchive for MemoryArchive {
    fn location(&self) -> &str {
        &self.location
    }

    fn headers(&self) -> &Headers {
        &self.content.headers
    }

    fn class_bytes(&self, class_name: &str) -> Option<Arc<[u8]>> {
        self.content.classes.get(class_name).cloned()
    }

    fn resource(&self, path: &str) -> Option<Arc<[u8]>> {
        self.content.resources.get(path).cloned()
    }
}

/// 基于内存的存储
///
/// 通过 [`MemoryStorage::publish`] 发布某个位置的内容，之后的安装与更新
/// 都会读取该位置当前发布的内容。
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// 已发布的内容：位置 -> 内容
    published: RwLock<HashMap<String, BundleContent>>,
    /// 启动标记
    start_flags: RwLock<HashSet<String>>,
    /// 已清除的代（按清除顺序）
    purged: RwLock<Vec<(String, u32)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布（或替换）某个位置的内容
    pub fn publish(&self, location: impl Into<String>, content: BundleContent) {
        let location = location.into();
        debug!(location = %location, "发布 bundle 内容");
        self.published.write().insert(location, content);
    }

    /// 从 YAML 字符串发布内容
    pub fn publish_yaml(&self, location: impl Into<String>, yaml: &str) -> Result<()> {
        let content = BundleContent::parse_string(yaml)?;
        self.publish(location, content);
        Ok(())
    }

    /// 撤销某个位置的内容，之后的 open 会失败
    pub fn unpublish(&self, location: &str) -> bool {
        self.published.write().remove(location).is_some()
    }

    /// 已清除的代
    pub fn purged(&self) -> Vec<(String, u32)> {
        self.purged.read().clone()
    }
}

#[async_trait]
impl BundleStorage for MemoryStorage {
    async fn open(&self, location: &str) -> Result<Arc<dyn BundleArchive>> {
        let content = self
            .published
            .read()
            .get(location)
            .cloned()
            .ok_or_else(|| FrameworkError::StorageFailed {
                location: location.to_string(),
                reason: "内容不存在".to_string(),
            })?;
        Ok(Arc::new(MemoryArchive::new(location, content)))
    }

    async fn purge(&self, location: &str, generation: u32) -> Result<()> {
        debug!(location = %location, generation, "清除 bundle 内容");
        self.purged.write().push((location.to_string(), generation));
        Ok(())
    }

    async fn set_start_on_launch(&self, location: &str, start: bool) -> Result<()> {
        let mut flags = self.start_flags.write();
        if start {
            flags.insert(location.to_string());
        } else {
            flags.remove(location);
        }
        Ok(())
    }

    async fn start_on_launch(&self, location: &str) -> bool {
        self.start_flags.read().contains(location)
    }
}
