//! 已解析代的绑定快照
//!
//! 类加载器只读取解析时固定下来的绑定，不访问实时的包索引，因此类查找
//! 不需要持有依赖图锁。动态导入成功后由类加载器自行追加。

use std::collections::{BTreeMap, BTreeSet};

use super::edge::{simple_name_of, DynamicImportPattern, ExportKey, ExportedPackage, GenerationId, Visibility};
use super::packages::Packages;

/// 一条指向提供者类加载器的绑定
#[derive(Debug, Clone, PartialEq)]
pub struct WireTarget {
    /// 提供者的类加载器所属代（片段的导出由宿主加载）
    pub loader: GenerationId,
    /// 被绑定的导出
    pub export: ExportedPackage,
}

impl WireTarget {
    pub(crate) fn from_export(packages: &Packages, key: ExportKey) -> Option<Self> {
        Some(Self {
            loader: packages.loader_of(key.owner),
            export: packages.export(key)?.clone(),
        })
    }

    pub fn package(&self) -> &str {
        &self.export.name
    }

    /// 按导出的 include/exclude 过滤器判断类是否可见
    pub fn is_class_visible(&self, class_name: &str) -> bool {
        self.export.is_class_visible(simple_name_of(class_name))
    }
}

/// 一个类加载器的完整绑定
#[derive(Debug, Clone, Default)]
pub struct Wiring {
    pub generation: GenerationId,
    /// 包名 -> 静态导入绑定（包括宿主与片段的导入）
    pub imports: BTreeMap<String, WireTarget>,
    /// `Require-Bundle` 可见的导出（按声明顺序，含 reexport 传递）
    pub required: Vec<WireTarget>,
    /// 动态导入模式
    pub dynamic: Vec<DynamicImportPattern>,
    /// 已附加的片段
    pub fragments: Vec<GenerationId>,
}

impl Wiring {
    /// 为已解析的代构造绑定快照
    pub fn build(packages: &Packages, generation: GenerationId) -> Option<Self> {
        let unit = packages.unit(generation)?;
        if !unit.is_resolved() {
            return None;
        }

        let mut wiring = Wiring {
            generation,
            fragments: unit.fragments().to_vec(),
            ..Default::default()
        };

        let space: Vec<_> = std::iter::once(unit)
            .chain(unit.fragments().iter().filter_map(|f| packages.unit(*f)))
            .collect();

        for member in &space {
            for import in &member.imports {
                if wiring.imports.contains_key(&import.name) {
                    continue;
                }
                if let Some(target) = import
                    .provider
                    .and_then(|key| WireTarget::from_export(packages, key))
                {
                    wiring.imports.insert(import.name.clone(), target);
                }
            }
            wiring.dynamic.extend(member.dynamic_imports.iter().cloned());
        }

        let mut visited = BTreeSet::from([generation]);
        for member in &space {
            for require in &member.requires {
                if let Some(target) = require.provider {
                    collect_required(packages, target, &mut visited, &mut wiring.required);
                }
            }
        }

        Some(wiring)
    }

    /// 静态导入绑定
    pub fn import_for(&self, package: &str) -> Option<&WireTarget> {
        self.imports.get(package)
    }

    /// 通过 `Require-Bundle` 可见的同名包导出
    pub fn required_for<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a WireTarget> + 'a {
        self.required.iter().filter(move |w| w.package() == package)
    }

    /// 是否有动态导入模式匹配该包
    pub fn allows_dynamic(&self, package: &str) -> bool {
        self.dynamic.iter().any(|p| p.matches(package))
    }
}

/// 收集被依赖 bundle 的导出，沿 `visibility:=reexport` 继续传递
fn collect_required(
    packages: &Packages,
    target: GenerationId,
    visited: &mut BTreeSet<GenerationId>,
    out: &mut Vec<WireTarget>,
) {
    if !visited.insert(target) {
        return;
    }
    let Some(unit) = packages.unit(target) else {
        return;
    };

    let members: Vec<_> = std::iter::once(unit)
        .chain(unit.fragments().iter().filter_map(|f| packages.unit(*f)))
        .collect();
    for member in &members {
        for index in 0..member.exports.len() {
            let key = ExportKey {
                owner: member.id,
                index,
            };
            if let Some(wire) = WireTarget::from_export(packages, key) {
                out.push(wire);
            }
        }
    }
    for member in &members {
        for require in &member.requires {
            if require.visibility == Visibility::Reexport {
                if let Some(next) = require.provider {
                    collect_required(packages, next, visited, out);
                }
            }
        }
    }
}

impl Packages {
    /// 已解析代的绑定快照
    pub fn wiring(&self, generation: GenerationId) -> Option<Wiring> {
        Wiring::build(self, generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::version::Version;
    use crate::resolver::BundlePackages;

    fn unit(id: u64, name: &str) -> BundlePackages {
        BundlePackages::new(GenerationId::new(id, 0), Some(name.into()), Version::empty())
    }

    #[test]
    fn test_wiring_imports_and_filters() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a").with_exports(r#"pkg.x;exclude:="*Impl""#).unwrap());
        packages.register_unit(unit(2, "b").with_imports("pkg.x").unwrap());
        packages.resolve(2).unwrap();

        let wiring = packages.wiring(GenerationId::new(2, 0)).unwrap();
        let wire = wiring.import_for("pkg.x").unwrap();
        assert_eq!(wire.loader, GenerationId::new(1, 0));
        assert!(wire.is_class_visible("pkg.x.Service"));
        assert!(!wire.is_class_visible("pkg.x.ServiceImpl"));
    }

    #[test]
    fn test_wiring_requires_reexport() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "base").with_exports("base.api").unwrap());
        packages.register_unit(
            unit(2, "mid")
                .with_exports("mid.api")
                .unwrap()
                .with_requires("base;visibility:=reexport")
                .unwrap(),
        );
        packages.register_unit(unit(3, "app").with_requires("mid").unwrap());
        packages.resolve(3).unwrap();

        let wiring = packages.wiring(GenerationId::new(3, 0)).unwrap();
        let packages_seen: Vec<&str> = wiring.required.iter().map(|w| w.package()).collect();
        assert_eq!(packages_seen, vec!["mid.api", "base.api"]);
        assert_eq!(
            wiring.required_for("base.api").next().unwrap().loader,
            GenerationId::new(1, 0)
        );
    }

    #[test]
    fn test_wiring_unresolved_is_none() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a").with_imports("missing").unwrap());
        assert!(packages.wiring(GenerationId::new(1, 0)).is_none());
    }

    #[test]
    fn test_wiring_dynamic_patterns() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a").with_dynamic_imports("org.chips.*").unwrap());
        packages.resolve(1).unwrap();
        let wiring = packages.wiring(GenerationId::new(1, 0)).unwrap();
        assert!(wiring.allows_dynamic("org.chips.util"));
        assert!(!wiring.allows_dynamic("org.other"));
    }
}
