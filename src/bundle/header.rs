//! 清单头语法解析
//!
//! `Export-Package`、`Import-Package`、`DynamicImport-Package`、`Require-Bundle`
//! 等清单头共用同一套语法：
//!
//! ```text
//! header  = clause ( ',' clause )*
//! clause  = key ( ';' key )* ( ';' param )*
//! param   = name '=' value      // 属性
//!         | name ':=' value     // 指令
//! ```
//!
//! 值可以用双引号包裹，引号内的 `,` 与 `;` 不作为分隔符。

use std::collections::BTreeMap;

use crate::utils::{FrameworkError, Result};

/// 清单头中的一个条目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderEntry {
    /// 条目的键（包名或 bundle 符号名），同一条目可以有多个键
    pub keys: Vec<String>,
    /// `name=value` 属性
    pub attributes: BTreeMap<String, String>,
    /// `name:=value` 指令
    pub directives: BTreeMap<String, String>,
}

impl HeaderEntry {
    /// 第一个键
    pub fn key(&self) -> &str {
        self.keys.first().map(String::as_str).unwrap_or("")
    }

    /// 获取属性
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// 获取指令
    pub fn directive(&self, name: &str) -> Option<&str> {
        self.directives.get(name).map(String::as_str)
    }

    /// 以逗号分隔的列表形式读取指令（如 `uses:="a,b"`）
    pub fn directive_list(&self, name: &str) -> Vec<String> {
        self.directive(name).map(split_list).unwrap_or_default()
    }
}

/// 解析清单头
///
/// # 参数
///
/// * `header` - 清单头名称，仅用于错误信息
/// * `value` - 清单头的值
/// * `single_key` - 每个条目是否只允许一个键（如 `Require-Bundle`）
///
/// # 错误
///
/// 空条目、未闭合的引号、键出现在参数之后、重复参数等均返回 `HeaderSyntax`。
pub fn parse_entries(header: &str, value: &str, single_key: bool) -> Result<Vec<HeaderEntry>> {
    let mut entries = Vec::new();
    if value.trim().is_empty() {
        return Ok(entries);
    }

    for clause in split_unquoted(header, value, ',')? {
        let clause = clause.trim();
        if clause.is_empty() {
            return Err(FrameworkError::header(header, "存在空条目"));
        }

        let mut entry = HeaderEntry::default();
        for param in split_unquoted(header, clause, ';')? {
            let param = param.trim();
            if param.is_empty() {
                return Err(FrameworkError::header(header, format!("'{}' 中存在空参数", clause)));
            }

            if let Some((name, value)) = split_param(param) {
                let (name, is_directive) = match name.strip_suffix(':') {
                    Some(name) => (name.trim(), true),
                    None => (name.trim(), false),
                };
                if name.is_empty() {
                    return Err(FrameworkError::header(header, format!("'{}' 缺少参数名", param)));
                }

                let target = if is_directive {
                    &mut entry.directives
                } else {
                    &mut entry.attributes
                };
                if target.insert(name.to_string(), unquote(value.trim())).is_some() {
                    return Err(FrameworkError::header(
                        header,
                        format!("'{}' 中参数 '{}' 重复", clause, name),
                    ));
                }
            } else {
                if !entry.attributes.is_empty() || !entry.directives.is_empty() {
                    return Err(FrameworkError::header(
                        header,
                        format!("'{}' 中的键 '{}' 出现在参数之后", clause, param),
                    ));
                }
                entry.keys.push(unquote(param));
            }
        }

        if entry.keys.is_empty() {
            return Err(FrameworkError::header(header, format!("'{}' 缺少键", clause)));
        }
        if single_key && entry.keys.len() > 1 {
            return Err(FrameworkError::header(
                header,
                format!("'{}' 只允许一个键", clause),
            ));
        }
        entries.push(entry);
    }

    Ok(entries)
}

/// 拆分逗号分隔的列表，忽略空项
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 按分隔符拆分，忽略引号内的分隔符
fn split_unquoted<'a>(header: &str, s: &'a str, separator: char) -> Result<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (index, c) in s.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == separator && !in_quotes {
            parts.push(&s[start..index]);
            start = index + c.len_utf8();
        }
    }

    if in_quotes {
        return Err(FrameworkError::header(header, format!("'{}' 中引号未闭合", s)));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

/// 拆分 `name=value` 或 `name:=value`，返回的 name 保留末尾的 `:`
fn split_param(param: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (index, c) in param.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '=' if !in_quotes => return Some((&param[..index], &param[index + 1..])),
            _ => {}
        }
    }
    None
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
