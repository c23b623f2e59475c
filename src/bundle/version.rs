//! 版本与版本区间
//!
//! bundle 与包使用四段式版本 `major.minor.micro.qualifier`，
//! 前三段按数值比较，qualifier 按字符串比较。
//!
//! # 示例
//!
//! ```rust
//! use chips_framework::bundle::version::{Version, VersionRange};
//!
//! let range: VersionRange = "[1.0,2.0)".parse().unwrap();
//! assert!(range.within_range(&Version::new(1, 5, 0)));
//! assert!(!range.within_range(&Version::new(2, 0, 0)));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::{FrameworkError, Result};

/// 四段式版本号
///
/// 全序：先比较 major/minor/micro，再按字典序比较 qualifier。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: String,
}

impl Version {
    /// 空版本 `0.0.0`
    pub const fn empty() -> Self {
        Self {
            major: 0,
            minor: 0,
            micro: 0,
            qualifier: String::new(),
        }
    }

    /// 创建不带 qualifier 的版本
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// 设置 qualifier
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// 解析版本字符串
    ///
    /// 空字符串解析为 `0.0.0`；缺省的段视为 0。
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::empty());
        }

        let invalid = |why: &str| FrameworkError::InvalidVersion(format!("'{}': {}", s, why));
        let mut parts = s.splitn(4, '.');
        let mut numbers = [0u32; 3];
        for (index, slot) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(invalid("版本段必须是非负整数"));
                    }
                    *slot = part.parse().map_err(|_| invalid("版本段超出范围"))?;
                }
                None if index == 0 => return Err(invalid("缺少主版本号")),
                None => break,
            }
        }

        let qualifier = parts.next().unwrap_or("").to_string();
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("qualifier 只允许字母、数字、下划线和连字符"));
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = FrameworkError;

    fn try_from(value: String) -> Result<Self> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// 版本区间
///
/// 支持三种写法：
/// - `[low,high)` / `(low,high]` 等：闭/开由括号决定
/// - `low`：至少为 `low`，上界无限
/// - 空串：任意版本
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    low: Version,
    low_inclusive: bool,
    high: Option<Version>,
    high_inclusive: bool,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::at_least(Version::empty())
    }
}

impl VersionRange {
    /// `[low, ∞)`
    pub fn at_least(low: Version) -> Self {
        Self {
            low,
            low_inclusive: true,
            high: None,
            high_inclusive: false,
        }
    }

    /// `[low, high)`
    pub fn half_open(low: Version, high: Version) -> Self {
        Self {
            low,
            low_inclusive: true,
            high: Some(high),
            high_inclusive: false,
        }
    }

    /// 解析区间字符串
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }

        let first = s.as_bytes()[0];
        if first != b'[' && first != b'(' {
            return Ok(Self::at_least(Version::parse(s)?));
        }

        let invalid = |why: &str| FrameworkError::InvalidVersion(format!("区间 '{}': {}", s, why));
        let last = s.as_bytes()[s.len() - 1];
        if s.len() < 2 || (last != b']' && last != b')') {
            return Err(invalid("缺少右括号"));
        }

        let body = &s[1..s.len() - 1];
        let (low, high) = body.split_once(',').ok_or_else(|| invalid("缺少逗号"))?;
        let low = Version::parse(low)?;
        let high = Version::parse(high)?;
        if high < low {
            return Err(invalid("上界小于下界"));
        }

        Ok(Self {
            low,
            low_inclusive: first == b'[',
            high: Some(high),
            high_inclusive: last == b']',
        })
    }

    /// 下界
    pub fn low(&self) -> &Version {
        &self.low
    }

    /// 上界（`None` 表示无上界）
    pub fn high(&self) -> Option<&Version> {
        self.high.as_ref()
    }

    /// 是否显式声明过（非默认的任意版本）
    pub fn is_specified(&self) -> bool {
        *self != Self::default()
    }

    /// 判断版本是否落在区间内
    pub fn within_range(&self, version: &Version) -> bool {
        let above_low = match version.cmp(&self.low) {
            Ordering::Greater => true,
            Ordering::Equal => self.low_inclusive,
            Ordering::Less => false,
        };
        if !above_low {
            return false;
        }

        match &self.high {
            None => true,
            Some(high) => match version.cmp(high) {
                Ordering::Less => true,
                Ordering::Equal => self.high_inclusive,
                Ordering::Greater => false,
            },
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.high {
            None => write!(f, "{}", self.low),
            Some(high) => write!(
                f,
                "{}{},{}{}",
                if self.low_inclusive { '[' } else { '(' },
                self.low,
                high,
                if self.high_inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        VersionRange::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        let v = Version::parse("1.2.3.beta").unwrap();
        assert_eq!((v.major, v.minor, v.micro), (1, 2, 3));
        assert_eq!(v.qualifier, "beta");

        assert_eq!(Version::parse("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(Version::parse("").unwrap(), Version::empty());
        assert_eq!(Version::parse("2.1").unwrap().to_string(), "2.1.0");
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(Version::parse("a.b").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.0.0.bad!").is_err());
        assert!(Version::parse("-1").is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v1 = Version::parse("1.0.0").unwrap();
        let v2 = Version::parse("1.0.0.a").unwrap();
        let v3 = Version::parse("1.0.1").unwrap();
        let v4 = Version::parse("1.10").unwrap();
        assert!(v1 < v2);
        assert!(v2 < v3);
        assert!(v3 < v4);
    }

    #[test]
    fn test_range_closed_open() {
        let r = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(r.within_range(&Version::new(1, 0, 0)));
        assert!(r.within_range(&Version::new(1, 9, 9)));
        assert!(!r.within_range(&Version::new(2, 0, 0)));
        assert!(!r.within_range(&Version::new(0, 9, 0)));

        let r = VersionRange::parse("(1.0,2.0]").unwrap();
        assert!(!r.within_range(&Version::new(1, 0, 0)));
        assert!(r.within_range(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_range_at_least() {
        let r = VersionRange::parse("1.5").unwrap();
        assert!(r.within_range(&Version::new(1, 5, 0)));
        assert!(r.within_range(&Version::new(99, 0, 0)));
        assert!(!r.within_range(&Version::new(1, 4, 9)));
        assert!(r.is_specified());

        let any = VersionRange::parse("").unwrap();
        assert!(!any.is_specified());
        assert!(any.within_range(&Version::empty()));
    }

    #[test]
    fn test_range_invalid() {
        assert!(VersionRange::parse("[1.0,2.0").is_err());
        assert!(VersionRange::parse("[1.0]").is_err());
        assert!(VersionRange::parse("[2.0,1.0)").is_err());
    }

    #[test]
    fn test_range_display() {
        assert_eq!(VersionRange::parse("[1,2)").unwrap().to_string(), "[1.0.0,2.0.0)");
        assert_eq!(VersionRange::parse("1.1").unwrap().to_string(), "1.1.0");
    }

    #[test]
    fn test_version_serde() {
        let v: Version = serde_json::from_str("\"1.2\"").unwrap();
        assert_eq!(v, Version::new(1, 2, 0));
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.2.0\"");
    }
}
