//! 依赖边模型
//!
//! 每个 bundle 代（generation）声明的导出包、导入包与 bundle 依赖。
//! 边之间通过整数句柄互相引用，不持有彼此的引用，避免所有权环。

use std::collections::BTreeMap;
use std::fmt;

use glob::Pattern;

use crate::bundle::version::{Version, VersionRange};

/// bundle 标识
pub type BundleId = u64;

/// 系统 bundle 的标识
pub const SYSTEM_BUNDLE_ID: BundleId = 0;

/// bundle 代标识
///
/// 每次更新 bundle 都会产生新的一代；旧的一代在仍被引用时成为僵尸代。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId {
    pub bundle: BundleId,
    pub generation: u32,
}

impl GenerationId {
    pub fn new(bundle: BundleId, generation: u32) -> Self {
        Self { bundle, generation }
    }

    /// 下一代
    pub fn next(self) -> Self {
        Self {
            bundle: self.bundle,
            generation: self.generation + 1,
        }
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.bundle, self.generation)
    }
}

/// 导出包句柄：所属代 + 在该代导出列表中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExportKey {
    pub owner: GenerationId,
    pub index: usize,
}

/// 导入包句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportKey {
    pub owner: GenerationId,
    pub index: usize,
}

/// bundle 依赖句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequireKey {
    pub owner: GenerationId,
    pub index: usize,
}

/// 解析策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolutionPolicy {
    #[default]
    Mandatory,
    Optional,
}

impl ResolutionPolicy {
    /// 解析 `resolution:=` 指令
    pub fn from_directive(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("mandatory") => Some(ResolutionPolicy::Mandatory),
            Some("optional") => Some(ResolutionPolicy::Optional),
            Some(_) => None,
        }
    }
}

/// `Require-Bundle` 的可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Private,
    Reexport,
}

/// 导出包
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedPackage {
    /// 包名
    pub name: String,
    /// 包版本
    pub version: Version,
    /// 所属代
    pub owner: GenerationId,
    /// uses 约束：使用本导出的 bundle 必须与这些包的提供者保持一致
    pub uses: Vec<String>,
    /// 导入方必须显式指定的属性
    pub mandatory: Vec<String>,
    /// 类名包含过滤器（`None` 表示全部包含）
    pub include: Option<Vec<Pattern>>,
    /// 类名排除过滤器
    pub exclude: Vec<Pattern>,
    /// 其他匹配属性
    pub attributes: BTreeMap<String, String>,
    /// 所属代已被替换但仍被引用
    pub zombie: bool,
}

impl ExportedPackage {
    /// 创建一个只有名称与版本的导出
    pub fn new(name: impl Into<String>, version: Version, owner: GenerationId) -> Self {
        Self {
            name: name.into(),
            version,
            owner,
            uses: Vec::new(),
            mandatory: Vec::new(),
            include: None,
            exclude: Vec::new(),
            attributes: BTreeMap::new(),
            zombie: false,
        }
    }

    /// 判断简单类名是否通过 include/exclude 过滤器
    pub fn is_class_visible(&self, simple_name: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.iter().any(|p| p.matches(simple_name)) {
                return false;
            }
        }
        !self.exclude.iter().any(|p| p.matches(simple_name))
    }

    /// 用于错误信息的包描述
    pub fn package_string(&self) -> String {
        format!("{};version={}", self.name, self.version)
    }
}

/// 导入包
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedPackage {
    /// 包名
    pub name: String,
    /// 可接受的包版本区间
    pub version_range: VersionRange,
    /// 其他匹配属性
    pub attributes: BTreeMap<String, String>,
    /// 限定导出方的符号名
    pub bundle_symbolic_name: Option<String>,
    /// 限定导出方的 bundle 版本区间
    pub bundle_range: VersionRange,
    /// 解析策略
    pub policy: ResolutionPolicy,
    /// 解析成功后固定的提供者
    pub provider: Option<ExportKey>,
    /// 所属代
    pub owner: GenerationId,
    /// 是否由动态导入产生
    pub dynamic: bool,
}

impl ImportedPackage {
    /// 创建一个只有名称与版本区间的必需导入
    pub fn new(name: impl Into<String>, version_range: VersionRange, owner: GenerationId) -> Self {
        Self {
            name: name.into(),
            version_range,
            attributes: BTreeMap::new(),
            bundle_symbolic_name: None,
            bundle_range: VersionRange::default(),
            policy: ResolutionPolicy::Mandatory,
            provider: None,
            owner,
            dynamic: false,
        }
    }

    /// 是否为可选导入
    pub fn is_optional(&self) -> bool {
        self.policy == ResolutionPolicy::Optional
    }

    /// 判断导出是否满足本导入的版本、属性与强制属性约束
    ///
    /// # 参数
    ///
    /// * `export` - 候选导出
    /// * `exporter_name` - 导出方 bundle 的符号名
    /// * `exporter_version` - 导出方 bundle 的版本
    pub fn matches(
        &self,
        export: &ExportedPackage,
        exporter_name: Option<&str>,
        exporter_version: &Version,
    ) -> bool {
        if export.name != self.name || !self.version_range.within_range(&export.version) {
            return false;
        }

        if let Some(name) = &self.bundle_symbolic_name {
            if exporter_name != Some(name.as_str()) {
                return false;
            }
        }
        if !self.bundle_range.within_range(exporter_version) {
            return false;
        }

        let attributes_match = self
            .attributes
            .iter()
            .all(|(k, v)| export.attributes.get(k) == Some(v));
        if !attributes_match {
            return false;
        }

        export.mandatory.iter().all(|attr| self.specifies(attr))
    }

    /// 导入方是否显式指定了某个属性
    fn specifies(&self, attribute: &str) -> bool {
        match attribute {
            "version" | "specification-version" => self.version_range.is_specified(),
            "bundle-symbolic-name" => self.bundle_symbolic_name.is_some(),
            "bundle-version" => self.bundle_range.is_specified(),
            other => self.attributes.contains_key(other),
        }
    }

    /// 用于错误信息的包描述
    pub fn package_string(&self) -> String {
        if self.version_range.is_specified() {
            format!("{};version={}", self.name, self.version_range)
        } else {
            self.name.clone()
        }
    }
}

/// bundle 依赖边（`Require-Bundle`）
#[derive(Debug, Clone, PartialEq)]
pub struct RequireEdge {
    /// 目标符号名
    pub name: String,
    /// 目标版本区间
    pub version_range: VersionRange,
    /// 可见性
    pub visibility: Visibility,
    /// 解析策略
    pub policy: ResolutionPolicy,
    /// 解析成功后固定的目标代
    pub provider: Option<GenerationId>,
    /// 所属代
    pub owner: GenerationId,
}

impl RequireEdge {
    pub fn new(name: impl Into<String>, version_range: VersionRange, owner: GenerationId) -> Self {
        Self {
            name: name.into(),
            version_range,
            visibility: Visibility::Private,
            policy: ResolutionPolicy::Mandatory,
            provider: None,
            owner,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.policy == ResolutionPolicy::Optional
    }

    /// 用于错误信息的描述
    pub fn bundle_string(&self) -> String {
        if self.version_range.is_specified() {
            format!("{};bundle-version={}", self.name, self.version_range)
        } else {
            self.name.clone()
        }
    }
}

/// 动态导入模式（`DynamicImport-Package`）
///
/// - `*` 匹配所有包
/// - `a.b.*` 匹配 `a.b` 的所有子包
/// - `a.b` 精确匹配
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicImportPattern {
    /// 精确包名或以 `.` 结尾的前缀；空串匹配全部
    prefix: String,
    wildcard: bool,
    /// 实例化时使用的约束模板
    template: ImportedPackage,
}

impl DynamicImportPattern {
    /// 由模式字符串和模板构造，模式应已通过语法校验
    pub(crate) fn new(pattern: &str, template: ImportedPackage) -> Self {
        let (prefix, wildcard) = if pattern == "*" {
            (String::new(), true)
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            (prefix.to_string(), true)
        } else {
            (pattern.to_string(), false)
        };
        Self {
            prefix,
            wildcard,
            template,
        }
    }

    /// 判断包名是否匹配
    pub fn matches(&self, package: &str) -> bool {
        if self.wildcard {
            package.starts_with(&self.prefix)
        } else {
            package == self.prefix
        }
    }

    /// 为具体包名实例化一个导入
    pub fn instantiate(&self, package: &str, owner: GenerationId) -> ImportedPackage {
        let mut import = self.template.clone();
        import.name = package.to_string();
        import.owner = owner;
        import.provider = None;
        import.dynamic = true;
        import.policy = ResolutionPolicy::Optional;
        import
    }
}

impl fmt::Display for DynamicImportPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            write!(f, "{}*", self.prefix)
        } else {
            write!(f, "{}", self.prefix)
        }
    }
}

/// 取类名的包名部分
pub fn package_of(class_name: &str) -> &str {
    class_name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
}

/// 取类名的简单名部分
pub fn simple_name_of(class_name: &str) -> &str {
    class_name
        .rsplit_once('.')
        .map(|(_, name)| name)
        .unwrap_or(class_name)
}
