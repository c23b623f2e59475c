//! 一代 bundle 的依赖集合
//!
//! 由清单的 `Export-Package`、`Import-Package`、`DynamicImport-Package` 与
//! `Require-Bundle` 解析得到。格式错误（如以 `.` 结尾的通配、非末尾位置的 `*`）
//! 在这里被拒绝，不会进入包索引。

use glob::Pattern;

use super::edge::{
    DynamicImportPattern, ExportedPackage, GenerationId, ImportedPackage, RequireEdge,
    ResolutionPolicy, Visibility,
};
use crate::bundle::header::{parse_entries, split_list, HeaderEntry};
use crate::bundle::manifest::constants::*;
use crate::bundle::manifest::{is_valid_package_name, is_valid_symbolic_name, BundleManifest, FragmentHost};
use crate::bundle::version::{Version, VersionRange};
use crate::utils::{FrameworkError, Result};

/// 一代 bundle 声明的全部依赖边
#[derive(Debug, Clone)]
pub struct BundlePackages {
    pub id: GenerationId,
    pub symbolic_name: Option<String>,
    pub version: Version,
    pub singleton: bool,
    pub fragment_host: Option<FragmentHost>,
    pub exports: Vec<ExportedPackage>,
    pub imports: Vec<ImportedPackage>,
    pub dynamic_imports: Vec<DynamicImportPattern>,
    pub requires: Vec<RequireEdge>,
    /// 片段已附加到的宿主代
    pub(crate) host: Option<GenerationId>,
    /// 已附加的片段代（按 bundle id 排序）
    pub(crate) fragments: Vec<GenerationId>,
    pub(crate) resolved: bool,
    pub(crate) zombie: bool,
}

impl BundlePackages {
    /// 创建没有任何依赖边的集合
    pub fn new(id: GenerationId, symbolic_name: Option<String>, version: Version) -> Self {
        Self {
            id,
            symbolic_name,
            version,
            singleton: false,
            fragment_host: None,
            exports: Vec::new(),
            imports: Vec::new(),
            dynamic_imports: Vec::new(),
            requires: Vec::new(),
            host: None,
            fragments: Vec::new(),
            resolved: false,
            zombie: false,
        }
    }

    /// 从清单构造
    pub fn from_manifest(id: GenerationId, manifest: &BundleManifest) -> Result<Self> {
        let mut unit = Self::new(id, manifest.symbolic_name.clone(), manifest.version.clone());
        unit.singleton = manifest.singleton;
        unit.fragment_host = manifest.fragment_host.clone();

        if let Some(value) = manifest.header(EXPORT_PACKAGE) {
            unit = unit.with_exports(value)?;
        }
        if let Some(value) = manifest.header(IMPORT_PACKAGE) {
            unit = unit.with_imports(value)?;
        }
        if let Some(value) = manifest.header(DYNAMIC_IMPORT_PACKAGE) {
            unit = unit.with_dynamic_imports(value)?;
        }
        if let Some(value) = manifest.header(REQUIRE_BUNDLE) {
            unit = unit.with_requires(value)?;
        }
        Ok(unit)
    }

    /// 追加 `Export-Package` 条目
    pub fn with_exports(mut self, value: &str) -> Result<Self> {
        for entry in parse_entries(EXPORT_PACKAGE, value, false)? {
            let version = package_version(EXPORT_PACKAGE, &entry)?;
            let version = match version {
                Some(v) => Version::parse(v)?,
                None => Version::empty(),
            };
            let include = match entry.directive(INCLUDE_DIRECTIVE) {
                Some(list) => Some(class_patterns(list)?),
                None => None,
            };
            let exclude = match entry.directive(EXCLUDE_DIRECTIVE) {
                Some(list) => class_patterns(list)?,
                None => Vec::new(),
            };
            let attributes = plain_attributes(&entry);

            for name in &entry.keys {
                check_package_name(EXPORT_PACKAGE, name)?;
                self.exports.push(ExportedPackage {
                    name: name.clone(),
                    version: version.clone(),
                    owner: self.id,
                    uses: entry.directive_list(USES_DIRECTIVE),
                    mandatory: entry.directive_list(MANDATORY_DIRECTIVE),
                    include: include.clone(),
                    exclude: exclude.clone(),
                    attributes: attributes.clone(),
                    zombie: false,
                });
            }
        }
        Ok(self)
    }

    /// 追加 `Import-Package` 条目
    pub fn with_imports(mut self, value: &str) -> Result<Self> {
        for entry in parse_entries(IMPORT_PACKAGE, value, false)? {
            let template = import_template(IMPORT_PACKAGE, &entry, self.id)?;
            for name in &entry.keys {
                check_package_name(IMPORT_PACKAGE, name)?;
                if self.imports.iter().any(|i| i.name == *name) {
                    return Err(FrameworkError::header(
                        IMPORT_PACKAGE,
                        format!("重复导入包 '{}'", name),
                    ));
                }
                let mut import = template.clone();
                import.name = name.clone();
                self.imports.push(import);
            }
        }
        Ok(self)
    }

    /// 追加 `DynamicImport-Package` 条目
    pub fn with_dynamic_imports(mut self, value: &str) -> Result<Self> {
        for entry in parse_entries(DYNAMIC_IMPORT_PACKAGE, value, false)? {
            let template = import_template(DYNAMIC_IMPORT_PACKAGE, &entry, self.id)?;
            for pattern in &entry.keys {
                check_dynamic_pattern(pattern)?;
                self.dynamic_imports
                    .push(DynamicImportPattern::new(pattern, template.clone()));
            }
        }
        Ok(self)
    }

    /// 追加 `Require-Bundle` 条目
    pub fn with_requires(mut self, value: &str) -> Result<Self> {
        for entry in parse_entries(REQUIRE_BUNDLE, value, true)? {
            let name = entry.key();
            if !is_valid_symbolic_name(name) {
                return Err(FrameworkError::header(
                    REQUIRE_BUNDLE,
                    format!("无效的符号名 '{}'", name),
                ));
            }

            let mut require = RequireEdge::new(name, optional_range(&entry, BUNDLE_VERSION_ATTRIBUTE)?, self.id);
            require.visibility = match entry.directive(VISIBILITY_DIRECTIVE) {
                None | Some("private") => Visibility::Private,
                Some("reexport") => Visibility::Reexport,
                Some(other) => {
                    return Err(FrameworkError::header(
                        REQUIRE_BUNDLE,
                        format!("未知的可见性 '{}'", other),
                    ))
                }
            };
            require.policy = resolution_policy(REQUIRE_BUNDLE, &entry)?;
            self.requires.push(require);
        }
        Ok(self)
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }

    pub fn is_extension(&self) -> bool {
        self.fragment_host
            .as_ref()
            .map(FragmentHost::is_extension)
            .unwrap_or(false)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie
    }

    /// 片段附加到的宿主
    pub fn host(&self) -> Option<GenerationId> {
        self.host
    }

    /// 已附加的片段
    pub fn fragments(&self) -> &[GenerationId] {
        &self.fragments
    }

    /// 同名导出的下标
    pub fn export_index(&self, package: &str) -> Option<usize> {
        self.exports.iter().position(|e| e.name == package)
    }

    /// 同名导入的下标
    pub fn import_index(&self, package: &str) -> Option<usize> {
        self.imports.iter().position(|i| i.name == package)
    }
}

/// 读取包版本属性，`specification-version` 是 `version` 的旧写法
fn package_version<'a>(header: &str, entry: &'a HeaderEntry) -> Result<Option<&'a str>> {
    let version = entry.attribute(VERSION_ATTRIBUTE);
    let legacy = entry.attribute(SPECIFICATION_VERSION_ATTRIBUTE);
    match (version, legacy) {
        (Some(v), Some(l)) if v != l => Err(FrameworkError::header(
            header,
            format!("'{}' 的 version 与 specification-version 不一致", entry.key()),
        )),
        (Some(v), _) => Ok(Some(v)),
        (None, legacy) => Ok(legacy),
    }
}

fn optional_range(entry: &HeaderEntry, attribute: &str) -> Result<VersionRange> {
    match entry.attribute(attribute) {
        Some(range) => VersionRange::parse(range),
        None => Ok(VersionRange::default()),
    }
}

fn resolution_policy(header: &str, entry: &HeaderEntry) -> Result<ResolutionPolicy> {
    let value = entry.directive(RESOLUTION_DIRECTIVE);
    ResolutionPolicy::from_directive(value).ok_or_else(|| {
        FrameworkError::header(header, format!("未知的解析策略 '{}'", value.unwrap_or_default()))
    })
}

/// 构造导入模板（包名在调用方填充）
fn import_template(header: &str, entry: &HeaderEntry, owner: GenerationId) -> Result<ImportedPackage> {
    let range = match package_version(header, entry)? {
        Some(range) => VersionRange::parse(range)?,
        None => VersionRange::default(),
    };

    let mut import = ImportedPackage::new("", range, owner);
    import.bundle_symbolic_name = entry
        .attribute(BUNDLE_SYMBOLIC_NAME_ATTRIBUTE)
        .map(str::to_string);
    import.bundle_range = optional_range(entry, BUNDLE_VERSION_ATTRIBUTE)?;
    import.attributes = plain_attributes(entry);
    import.policy = resolution_policy(header, entry)?;
    Ok(import)
}

/// 除版本与 bundle 约束以外的属性
fn plain_attributes(entry: &HeaderEntry) -> std::collections::BTreeMap<String, String> {
    entry
        .attributes
        .iter()
        .filter(|(k, _)| {
            !matches!(
                k.as_str(),
                VERSION_ATTRIBUTE
                    | SPECIFICATION_VERSION_ATTRIBUTE
                    | BUNDLE_SYMBOLIC_NAME_ATTRIBUTE
                    | BUNDLE_VERSION_ATTRIBUTE
            )
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn class_patterns(list: &str) -> Result<Vec<Pattern>> {
    split_list(list)
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                FrameworkError::header(EXPORT_PACKAGE, format!("无效的类名过滤器 '{}': {}", p, e))
            })
        })
        .collect()
}

fn check_package_name(header: &str, name: &str) -> Result<()> {
    if is_valid_package_name(name) {
        Ok(())
    } else {
        Err(FrameworkError::header(header, format!("无效的包名 '{}'", name)))
    }
}

/// 动态导入只允许 `*`、`a.b.*` 或精确包名
fn check_dynamic_pattern(pattern: &str) -> Result<()> {
    if pattern == "*" {
        return Ok(());
    }
    let name = pattern.strip_suffix(".*").unwrap_or(pattern);
    if name.ends_with('.') {
        return Err(FrameworkError::header(
            DYNAMIC_IMPORT_PACKAGE,
            format!("'{}' 以 '.' 结尾", pattern),
        ));
    }
    if !is_valid_package_name(name) {
        return Err(FrameworkError::header(
            DYNAMIC_IMPORT_PACKAGE,
            format!("'{}' 中的 '*' 位置无效或包名无效", pattern),
        ));
    }
    Ok(())
}
