use lru::LruCache;
use regex::{Regex, RegexBuilder};
use serde_json::{Number, Value as Json};
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use super::ast::{BinaryOp, Expr};
use crate::core::{PlatformError, Result};

const LIKE_CACHE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(255);

lazy_static::lazy_static! {
    static ref LIKE_REGEX_CACHE: Mutex<LruCache<(String, bool), Arc<Regex>>> =
        Mutex::new(LruCache::new(LIKE_CACHE_SIZE));
}

/// Looks up a dotted path in a JSON scope.
///
/// Object keys match exactly first, then case-insensitively; array segments
/// must be indexes. Anything missing resolves to `null`.
pub fn resolve_path(scope: &Json, path: &[String]) -> Json {
    let mut current = scope;
    for segment in path {
        let next = match current {
            Json::Object(map) => map.get(segment).or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(segment))
                    .map(|(_, v)| v)
            }),
            Json::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Json::Null,
        }
    }
    current.clone()
}

pub fn evaluate(expr: &Expr, scope: &Json) -> Result<Json> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(parts) => Ok(resolve_path(scope, parts)),
        Expr::Not(inner) => Ok(Json::Bool(!truthy(&evaluate(inner, scope)?)?)),
        Expr::Negate(inner) => match evaluate(inner, scope)? {
            Json::Null => Ok(Json::Null),
            value => {
                let n = as_number(&value).ok_or_else(|| {
                    PlatformError::TypeError(format!("Cannot negate {}", value))
                })?;
                Ok(number_json(-n, value.is_i64()))
            }
        },
        Expr::Binary { left, op, right } => match op {
            BinaryOp::And => {
                if !truthy(&evaluate(left, scope)?)? {
                    return Ok(Json::Bool(false));
                }
                Ok(Json::Bool(truthy(&evaluate(right, scope)?)?))
            }
            BinaryOp::Or => {
                if truthy(&evaluate(left, scope)?)? {
                    return Ok(Json::Bool(true));
                }
                Ok(Json::Bool(truthy(&evaluate(right, scope)?)?))
            }
            op if op.is_comparison() => {
                let l = evaluate(left, scope)?;
                let r = evaluate(right, scope)?;
                compare(&l, *op, &r).map(Json::Bool)
            }
            op => {
                let l = evaluate(left, scope)?;
                let r = evaluate(right, scope)?;
                arithmetic(&l, *op, &r)
            }
        },
        Expr::IsNull { expr, negated } => {
            let is_null = evaluate(expr, scope)?.is_null();
            Ok(Json::Bool(is_null != *negated))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let needle = evaluate(expr, scope)?;
            let mut found = false;
            for item in list {
                if loosely_equal(&needle, &evaluate(item, scope)?) {
                    found = true;
                    break;
                }
            }
            Ok(Json::Bool(found != *negated))
        }
        Expr::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => {
            let text = evaluate(expr, scope)?;
            let pattern = evaluate(pattern, scope)?;
            let (Some(text), Some(pattern)) = (text_of(&text), text_of(&pattern)) else {
                return Ok(Json::Bool(false));
            };
            let matched = like_regex(&pattern, *case_insensitive)?.is_match(&text);
            Ok(Json::Bool(matched != *negated))
        }
    }
}

/// Evaluates to a boolean; `null` counts as false.
pub fn evaluate_bool(expr: &Expr, scope: &Json) -> Result<bool> {
    truthy(&evaluate(expr, scope)?)
}

fn truthy(value: &Json) -> Result<bool> {
    match value {
        Json::Null => Ok(false),
        Json::Bool(b) => Ok(*b),
        Json::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Json::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(PlatformError::TypeError(format!(
            "Expected a boolean, got {}",
            other
        ))),
    }
}

fn as_number(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn number_json(n: f64, prefer_int: bool) -> Json {
    if prefer_int && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Json::from(n as i64);
    }
    Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
}

fn text_of(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Equality with numeric coercion between numbers and numeric strings.
fn loosely_equal(left: &Json, right: &Json) -> bool {
    match (left, right) {
        (Json::Number(_), Json::String(_)) | (Json::String(_), Json::Number(_)) => {
            match (as_number(left), as_number(right)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Json::Number(a), Json::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare(left: &Json, op: BinaryOp, right: &Json) -> Result<bool> {
    match op {
        BinaryOp::Eq => return Ok(loosely_equal(left, right)),
        BinaryOp::NotEq => return Ok(!loosely_equal(left, right)),
        _ => {}
    }
    if left.is_null() || right.is_null() {
        return Ok(false);
    }

    let ordering = match (left, right) {
        (Json::String(a), Json::String(b)) => Some(a.cmp(b)),
        (Json::Bool(a), Json::Bool(b)) => Some(a.cmp(b)),
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
    .ok_or_else(|| {
        PlatformError::TypeError(format!("Cannot compare {} {} {}", left, op, right))
    })?;

    Ok(match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        _ => false,
    })
}

fn arithmetic(left: &Json, op: BinaryOp, right: &Json) -> Result<Json> {
    if left.is_null() || right.is_null() {
        return Ok(Json::Null);
    }
    if op == BinaryOp::Plus
        && let (Json::String(a), Json::String(b)) = (left, right)
    {
        return Ok(Json::String(format!("{}{}", a, b)));
    }

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let exact = match op {
            BinaryOp::Plus => a.checked_add(b),
            BinaryOp::Minus => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Modulo if b != 0 => a.checked_rem(b),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Json::from(result));
        }
    }

    let (Some(a), Some(b)) = (as_number(left), as_number(right)) else {
        return Err(PlatformError::TypeError(format!(
            "Cannot apply {} to {} and {}",
            op, left, right
        )));
    };
    let result = match op {
        BinaryOp::Plus => a + b,
        BinaryOp::Minus => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide | BinaryOp::Modulo if b == 0.0 => {
            return Err(PlatformError::Expression("Division by zero".into()));
        }
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        other => {
            return Err(PlatformError::Expression(format!(
                "{} is not an arithmetic operator",
                other
            )));
        }
    };
    Ok(number_json(result, false))
}

fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    regex
}

fn like_regex(pattern: &str, case_insensitive: bool) -> Result<Arc<Regex>> {
    let cache_key = (pattern.to_string(), case_insensitive);
    if let Ok(mut cache) = LIKE_REGEX_CACHE.lock()
        && let Some(regex) = cache.get(&cache_key)
    {
        return Ok(regex.clone());
    }

    let regex = RegexBuilder::new(&like_to_regex(pattern))
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map(Arc::new)
        .map_err(|e| PlatformError::Expression(format!("Invalid LIKE pattern: {}", e)))?;

    if let Ok(mut cache) = LIKE_REGEX_CACHE.lock() {
        cache.put(cache_key, regex.clone());
    }
    Ok(regex)
}
