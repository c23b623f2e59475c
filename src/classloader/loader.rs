//! bundle 类加载器
//!
//! 每个已解析的（非片段）代拥有一个类加载器。查找顺序：
//!
//! 1. 包名匹配启动委派模式时先问父加载器
//! 2. 静态导入（含已成功的动态导入）：只委派给提供者，不回退到本地
//! 3. `Require-Bundle` 可见的导出
//! 4. 本地内容：自身存档，然后按附加顺序查找片段存档
//! 5. 动态导入：匹配模式时解析并永久绑定提供者
//!
//! 委派只有一跳：提供者只在自己的本地内容中查找。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::boot::BootDelegation;
use super::{ClassSpace, LoadedClass};
use crate::bundle::archive::BundleArchive;
use crate::resolver::edge::package_of;
use crate::resolver::{GenerationId, WireTarget, Wiring};
use crate::utils::{FrameworkError, Result};

/// bundle 类加载器
pub struct BundleClassLoader {
    generation: GenerationId,
    /// 类路径：自身存档在前，片段存档按附加顺序在后
    classpath: Vec<Arc<dyn BundleArchive>>,
    wiring: Wiring,
    boot: Arc<BootDelegation>,
    /// 是否为父加载器（系统 bundle）
    parent: bool,
    /// 动态导入得到的绑定
    dynamic_wires: Mutex<BTreeMap<String, WireTarget>>,
    /// 已定义的类
    classes: Mutex<HashMap<String, Arc<LoadedClass>>>,
}

impl BundleClassLoader {
    pub fn new(wiring: Wiring, classpath: Vec<Arc<dyn BundleArchive>>, boot: Arc<BootDelegation>) -> Self {
        Self {
            generation: wiring.generation,
            classpath,
            wiring,
            boot,
            parent: false,
            dynamic_wires: Mutex::new(BTreeMap::new()),
            classes: Mutex::new(HashMap::new()),
        }
    }

    /// 父加载器：只查找本地内容
    pub fn parent(generation: GenerationId, classpath: Vec<Arc<dyn BundleArchive>>) -> Self {
        let wiring = Wiring {
            generation,
            ..Default::default()
        };
        let mut loader = Self::new(wiring, classpath, Arc::new(BootDelegation::none()));
        loader.parent = true;
        loader
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    /// 已通过动态导入绑定的包
    pub fn dynamic_packages(&self) -> Vec<String> {
        self.dynamic_wires.lock().keys().cloned().collect()
    }

    /// 加载类
    ///
    /// # 错误
    ///
    /// 所有途径都找不到（或被提供者的过滤器排除）时返回 `ClassNotFound`。
    pub fn load_class(&self, name: &str, space: &dyn ClassSpace) -> Result<Arc<LoadedClass>> {
        let package = package_of(name);
        trace!(generation = %self.generation, class = %name, "加载类");

        if !self.parent && self.boot.delegates(package) {
            if let Some(class) = space.parent().and_then(|p| p.find_local_class(name)) {
                return Ok(class);
            }
        }

        if let Some(wire) = self.static_wire(package) {
            return self
                .delegate_class(&wire, name, space)
                .ok_or_else(|| self.not_found(name));
        }

        for wire in self.wiring.required_for(package) {
            if let Some(class) = self.delegate_class(wire, name, space) {
                return Ok(class);
            }
        }

        if let Some(class) = self.find_local_class(name) {
            return Ok(class);
        }

        if let Some(wire) = self.dynamic_wire(package, space) {
            return self
                .delegate_class(&wire, name, space)
                .ok_or_else(|| self.not_found(name));
        }

        Err(self.not_found(name))
    }

    /// 查找资源，规则与类相同，但不应用类名过滤器
    pub fn get_resource(&self, path: &str, space: &dyn ClassSpace) -> Option<Arc<[u8]>> {
        let package = resource_package(path);

        if !self.parent && self.boot.delegates(&package) {
            if let Some(bytes) = space.parent().and_then(|p| p.find_local_resource(path)) {
                return Some(bytes);
            }
        }

        if let Some(wire) = self.static_wire(&package) {
            return self.delegate_resource(&wire, path, space);
        }

        for wire in self.wiring.required_for(&package) {
            if let Some(bytes) = self.delegate_resource(wire, path, space) {
                return Some(bytes);
            }
        }

        if let Some(bytes) = self.find_local_resource(path) {
            return Some(bytes);
        }

        let wire = self.dynamic_wire(&package, space)?;
        self.delegate_resource(&wire, path, space)
    }

    /// 在本地类路径中查找并定义类
    ///
    /// 定义过程在加载器锁内完成，同一个类不会被并发重复定义。
    pub fn find_local_class(&self, name: &str) -> Option<Arc<LoadedClass>> {
        let mut classes = self.classes.lock();
        if let Some(class) = classes.get(name) {
            return Some(class.clone());
        }

        for archive in &self.classpath {
            if let Some(bytes) = archive.class_bytes(name) {
                let class = Arc::new(LoadedClass {
                    name: name.to_string(),
                    bytes,
                    defined_by: self.generation,
                    location: archive.location().to_string(),
                });
                classes.insert(name.to_string(), class.clone());
                debug!(generation = %self.generation, class = %name, "定义类");
                return Some(class);
            }
        }
        None
    }

    /// 在本地类路径中查找资源
    pub fn find_local_resource(&self, path: &str) -> Option<Arc<[u8]>> {
        self.classpath.iter().find_map(|archive| archive.resource(path))
    }

    /// 已定义的类数量
    pub fn defined_count(&self) -> usize {
        self.classes.lock().len()
    }

    fn static_wire(&self, package: &str) -> Option<WireTarget> {
        self.wiring
            .import_for(package)
            .cloned()
            .or_else(|| self.dynamic_wires.lock().get(package).cloned())
    }

    fn dynamic_wire(&self, package: &str, space: &dyn ClassSpace) -> Option<WireTarget> {
        if package.is_empty() || !self.wiring.allows_dynamic(package) {
            return None;
        }
        let wire = space.resolve_dynamic(self.generation, package)?;
        self.dynamic_wires
            .lock()
            .insert(package.to_string(), wire.clone());
        Some(wire)
    }

    fn delegate_class(&self, wire: &WireTarget, name: &str, space: &dyn ClassSpace) -> Option<Arc<LoadedClass>> {
        if !wire.is_class_visible(name) {
            trace!(class = %name, provider = %wire.loader, "类被导出过滤器排除");
            return None;
        }
        if wire.loader == self.generation {
            return self.find_local_class(name);
        }
        space.loader(wire.loader)?.find_local_class(name)
    }

    fn delegate_resource(&self, wire: &WireTarget, path: &str, space: &dyn ClassSpace) -> Option<Arc<[u8]>> {
        if wire.loader == self.generation {
            return self.find_local_resource(path);
        }
        space.loader(wire.loader)?.find_local_resource(path)
    }

    fn not_found(&self, name: &str) -> FrameworkError {
        FrameworkError::ClassNotFound {
            bundle: self.generation.bundle,
            class: name.to_string(),
        }
    }
}

impl fmt::Debug for BundleClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleClassLoader")
            .field("generation", &self.generation)
            .field("classpath", &self.classpath.len())
            .field("parent", &self.parent)
            .finish()
    }
}

/// 资源路径对应的包名：`a/b/c.txt` -> `a.b`
fn resource_package(path: &str) -> String {
    let path = path.trim_start_matches('/');
    path.rsplit_once('/')
        .map(|(dir, _)| dir.replace('/', "."))
        .unwrap_or_default()
}
