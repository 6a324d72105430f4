//! Frontmatter 파싱 및 정규화
//!
//! 문서 앞의 `---` YAML 블록을 한 번만 파싱하여 타입이 지정된 맵으로 정규화합니다.
//! - 날짜 형태 문자열 → Date / DateTime
//! - 태그 계열 키의 쉼표 문자열 / 시퀀스 → 태그 집합
//!
//! 파싱에 실패해도 문서 수집은 계속되며, 빈 맵과 경고를 반환합니다.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_yaml::Value;

use super::document::{Frontmatter, FrontmatterValue};

/// 태그 집합으로 정규화되는 키
const TAG_KEYS: &[&str] = &["tags", "tag", "keywords", "categories", "aliases"];

/// 청크 태그로 전파되는 키 (aliases는 대체 이름이므로 제외)
const CHUNK_TAG_KEYS: &[&str] = &["tags", "tag", "keywords", "categories"];

fn frontmatter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\A---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)")
            .expect("frontmatter regex is valid")
    })
}

// ============================================================================
// Parsing
// ============================================================================

/// frontmatter 파싱 결과
#[derive(Debug, Clone, Default)]
pub struct ParsedFrontmatter<'a> {
    /// 정규화된 필드
    pub fields: Frontmatter,
    /// frontmatter를 제외한 본문
    pub body: &'a str,
    /// 파싱 경고 (잘못된 YAML 등)
    pub warning: Option<String>,
}

/// 문서에서 frontmatter를 분리하고 정규화
pub fn parse_frontmatter(content: &str) -> ParsedFrontmatter<'_> {
    let Some(captures) = frontmatter_re().captures(content) else {
        return ParsedFrontmatter {
            fields: Frontmatter::new(),
            body: content,
            warning: None,
        };
    };

    let body_start = captures.get(0).map(|m| m.end()).unwrap_or(0);
    let body = &content[body_start..];
    let raw = captures.get(1).map(|m| m.as_str()).unwrap_or("");

    if raw.trim().is_empty() {
        return ParsedFrontmatter {
            fields: Frontmatter::new(),
            body,
            warning: None,
        };
    }

    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Mapping(mapping)) => {
            let mut fields = Frontmatter::new();
            for (key, value) in mapping {
                let Some(key) = key_to_string(&key) else {
                    continue;
                };
                if let Some(normalized) = normalize_value(&key, value) {
                    fields.insert(key, normalized);
                }
            }
            ParsedFrontmatter {
                fields,
                body,
                warning: None,
            }
        }
        Ok(Value::Null) => ParsedFrontmatter {
            fields: Frontmatter::new(),
            body,
            warning: None,
        },
        Ok(_) => ParsedFrontmatter {
            fields: Frontmatter::new(),
            body,
            warning: Some("Frontmatter is not a key/value mapping".to_string()),
        },
        Err(e) => ParsedFrontmatter {
            fields: Frontmatter::new(),
            body,
            warning: Some(format!("Failed to parse frontmatter: {}", e)),
        },
    }
}

/// frontmatter에서 청크 태그 추출
pub fn frontmatter_tags(fields: &Frontmatter) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for key in CHUNK_TAG_KEYS {
        match fields.get(*key) {
            Some(FrontmatterValue::Tags(values)) => tags.extend(values.iter().cloned()),
            Some(FrontmatterValue::Text(value)) => {
                tags.extend(normalize_tag(value));
            }
            _ => {}
        }
    }
    tags
}

/// 태그 정규화 (앞의 `#` 제거, 소문자, 공백 제거)
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#').trim().to_lowercase();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

// ============================================================================
// Normalization
// ============================================================================

fn key_to_string(key: &Value) -> Option<String> {
    let key = match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let key = key.trim().to_lowercase();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

fn is_tag_key(key: &str) -> bool {
    TAG_KEYS.contains(&key)
}

fn normalize_value(key: &str, value: Value) -> Option<FrontmatterValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) if is_tag_key(key) => Some(tags_from(std::iter::once(b.to_string()))),
        Value::Bool(b) => Some(FrontmatterValue::Bool(b)),
        Value::Number(n) if is_tag_key(key) => Some(tags_from(std::iter::once(n.to_string()))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(FrontmatterValue::Integer(i)),
            None => n.as_f64().map(FrontmatterValue::Float),
        },
        Value::String(s) => Some(coerce_string(key, &s)),
        Value::Sequence(items) => {
            let items: Vec<String> = items.into_iter().filter_map(scalar_to_string).collect();
            if is_tag_key(key) {
                Some(tags_from(items))
            } else {
                Some(FrontmatterValue::List(items))
            }
        }
        Value::Mapping(_) => serde_yaml::to_string(&value)
            .ok()
            .map(|s| FrontmatterValue::Text(s.trim().to_string())),
        Value::Tagged(tagged) => normalize_value(key, tagged.value),
    }
}

fn coerce_string(key: &str, raw: &str) -> FrontmatterValue {
    let s = raw.trim();

    if is_tag_key(key) {
        return tags_from(s.split(',').map(str::to_string));
    }

    if let Some(date) = parse_date(s) {
        return date;
    }

    FrontmatterValue::Text(s.to_string())
}

/// 날짜 형태 문자열 변환
fn parse_date(s: &str) -> Option<FrontmatterValue> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(FrontmatterValue::Date(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(FrontmatterValue::DateTime(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(FrontmatterValue::DateTime(naive.and_utc()));
        }
    }
    None
}

fn tags_from(items: impl IntoIterator<Item = String>) -> FrontmatterValue {
    FrontmatterValue::Tags(
        items
            .into_iter()
            .flat_map(|item| {
                item.split(',')
                    .filter_map(normalize_tag)
                    .collect::<Vec<_>>()
            })
            .collect(),
    )
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(tagged.value),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
