use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A single physical cell value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Guid(Uuid),
    Bytes(Vec<u8>),
    /// Duration in milliseconds.
    TimeSpan(i64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::DateTime(_) => "DATETIME",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::Guid(_) => "GUID",
            Self::Bytes(_) => "BYTES",
            Self::TimeSpan(_) => "TIMESPAN",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Renders the value as JSON for record output.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Boolean(b) => Json::Bool(*b),
            Self::Integer(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::Text(s) => Json::String(s.clone()),
            Self::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Json::String(t.format("%H:%M:%S%.f").to_string()),
            Self::Guid(g) => Json::String(g.to_string()),
            Self::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Self::TimeSpan(ms) => Json::from(*ms),
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
            Self::DateTime(_) => 5,
            Self::Date(_) => 6,
            Self::Time(_) => 7,
            Self::Guid(_) => 8,
            Self::Bytes(_) => 9,
            Self::TimeSpan(_) => 10,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                (a - b).abs() < f64::EPSILON
            }
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                (*i as f64 - f).abs() < f64::EPSILON
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Guid(a), Self::Guid(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::TimeSpan(a), Self::TimeSpan(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Integer(a), Self::Integer(b)) => a.partial_cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Integer(i), Self::Float(f)) => (*i as f64).partial_cmp(f),
            (Self::Float(f), Self::Integer(i)) => f.partial_cmp(&(*i as f64)),
            (Self::Text(a), Self::Text(b)) => a.partial_cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.partial_cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.partial_cmp(b),
            (Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
            (Self::Time(a), Self::Time(b)) => a.partial_cmp(b),
            (Self::Guid(a), Self::Guid(b)) => a.partial_cmp(b),
            (Self::TimeSpan(a), Self::TimeSpan(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            Self::Null => {}
            Self::Boolean(b) => b.hash(state),
            Self::Integer(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Text(s) => s.hash(state),
            Self::DateTime(dt) => dt.hash(state),
            Self::Date(d) => d.hash(state),
            Self::Time(t) => t.hash(state),
            Self::Guid(g) => g.hash(state),
            Self::Bytes(b) => b.hash(state),
            Self::TimeSpan(ms) => ms.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            other => match other.to_json() {
                Json::String(s) => write!(f, "{}", s),
                json => write!(f, "{}", json),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Physical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Float,
    Text,
    DateTime,
    Date,
    Time,
    Guid,
    Bytes,
    TimeSpan,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Boolean, Value::Boolean(_))
                | (Self::Integer, Value::Integer(_))
                | (Self::Float, Value::Float(_))
                | (Self::Float, Value::Integer(_))
                | (Self::Text, Value::Text(_))
                | (Self::DateTime, Value::DateTime(_))
                | (Self::Date, Value::Date(_))
                | (Self::Time, Value::Time(_))
                | (Self::Guid, Value::Guid(_))
                | (Self::Bytes, Value::Bytes(_))
                | (Self::TimeSpan, Value::TimeSpan(_))
        )
    }

    /// Value used to back-fill existing rows when a NOT NULL column is added.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Integer => Value::Integer(0),
            Self::Float => Value::Float(0.0),
            Self::Text => Value::Text(String::new()),
            Self::DateTime => Value::DateTime(DateTime::<Utc>::default()),
            Self::Date => Value::Date(NaiveDate::default()),
            Self::Time => Value::Time(NaiveTime::default()),
            Self::Guid => Value::Guid(Uuid::nil()),
            Self::Bytes => Value::Bytes(Vec::new()),
            Self::TimeSpan => Value::TimeSpan(0),
        }
    }

    /// Coerces a JSON input into a value of this type.
    pub fn coerce_json(&self, input: &Json) -> std::result::Result<Value, String> {
        if input.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || format!("expected {}, got {}", self, input);
        match self {
            Self::Boolean => match input {
                Json::Bool(b) => Ok(Value::Boolean(*b)),
                Json::String(s) => s.trim().parse::<bool>().map(Value::Boolean).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            Self::Integer => match input {
                Json::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(whole_f64_to_i64))
                    .map(Value::Integer)
                    .ok_or_else(mismatch),
                Json::String(s) => s.trim().parse::<i64>().map(Value::Integer).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            Self::Float => match input {
                Json::Number(n) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
                Json::String(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            Self::Text => match input {
                Json::String(s) => Ok(Value::Text(s.clone())),
                Json::Number(n) => Ok(Value::Text(n.to_string())),
                Json::Bool(b) => Ok(Value::Text(b.to_string())),
                _ => Err(mismatch()),
            },
            Self::DateTime => {
                let raw = input.as_str().ok_or_else(mismatch)?;
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                    .or_else(|_| {
                        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                            .map(|naive| Value::DateTime(naive.and_utc()))
                    })
                    .map_err(|_| mismatch())
            }
            Self::Date => {
                let raw = input.as_str().ok_or_else(mismatch)?;
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|_| mismatch())
            }
            Self::Time => {
                let raw = input.as_str().ok_or_else(mismatch)?;
                NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
                    .map(Value::Time)
                    .map_err(|_| mismatch())
            }
            Self::Guid => {
                let raw = input.as_str().ok_or_else(mismatch)?;
                Uuid::parse_str(raw.trim()).map(Value::Guid).map_err(|_| mismatch())
            }
            Self::Bytes => match input {
                Json::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .filter(|b| *b <= u8::MAX as u64)
                            .map(|b| b as u8)
                            .ok_or_else(mismatch)
                    })
                    .collect::<std::result::Result<Vec<u8>, String>>()
                    .map(Value::Bytes),
                Json::String(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
                _ => Err(mismatch()),
            },
            Self::TimeSpan => match input {
                Json::Number(n) => n.as_i64().map(Value::TimeSpan).ok_or_else(mismatch),
                Json::String(s) => parse_timespan(s).map(Value::TimeSpan).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
        }
    }

    /// Converts a stored value when a column changes type during migration.
    pub fn convert(&self, value: &Value) -> Option<Value> {
        if value.is_null() || self.is_compatible(value) {
            return match (self, value) {
                (Self::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
                _ => Some(value.clone()),
            };
        }
        match (self, value) {
            (Self::Integer, Value::Float(f)) => whole_f64_to_i64(*f).map(Value::Integer),
            (Self::Integer, Value::Boolean(b)) => Some(Value::Integer(i64::from(*b))),
            (Self::Integer, Value::TimeSpan(ms)) => Some(Value::Integer(*ms)),
            (Self::TimeSpan, Value::Integer(ms)) => Some(Value::TimeSpan(*ms)),
            (Self::Text, other) => Some(Value::Text(other.to_string())),
            (target, Value::Text(s)) => target.coerce_json(&Json::String(s.clone())).ok(),
            _ => None,
        }
    }
}

/// Parses `[d.]hh:mm:ss[.fff]` into milliseconds.
fn parse_timespan(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (negative, raw) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (days, clock) = match raw.split_once('.') {
        Some((days, rest)) if rest.contains(':') && !days.contains(':') => {
            (days.parse::<i64>().ok()?, rest)
        }
        _ => (0, raw),
    };
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours = parts[0].parse::<i64>().ok()?;
    let minutes = parts[1].parse::<i64>().ok()?;
    let seconds = parts[2].parse::<f64>().ok()?;
    let millis = whole_f64_to_i64((seconds * 1000.0).round())?;
    let total = days
        .checked_mul(24)?
        .checked_add(hours)?
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60_000)?
        .checked_add(millis)?;
    Some(if negative { total.checked_neg()? } else { total })
}

/// `f` as an `i64` when it is whole and inside the `i64` range.
fn whole_f64_to_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Text => "TEXT",
            Self::DateTime => "DATETIME",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Guid => "GUID",
            Self::Bytes => "BYTES",
            Self::TimeSpan => "TIMESPAN",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Text("1".into()), Value::Integer(1));
    }

    #[test]
    fn test_coerce_accepts_numeric_strings_for_integers() {
        assert_eq!(
            DataType::Integer.coerce_json(&json!("17")).unwrap(),
            Value::Integer(17)
        );
        assert!(DataType::Integer.coerce_json(&json!("seventeen")).is_err());
        assert!(DataType::Integer.coerce_json(&json!(1.5)).is_err());
    }

    #[test]
    fn test_timespan_parsing() {
        assert_eq!(
            DataType::TimeSpan.coerce_json(&json!("01:00:30")).unwrap(),
            Value::TimeSpan(3_630_000)
        );
        assert_eq!(
            DataType::TimeSpan.coerce_json(&json!("1.00:00:00")).unwrap(),
            Value::TimeSpan(86_400_000)
        );
    }

    #[test]
    fn test_convert_for_migration() {
        assert_eq!(
            DataType::Float.convert(&Value::Integer(2)),
            Some(Value::Float(2.0))
        );
        assert_eq!(
            DataType::Integer.convert(&Value::Text("12".into())),
            Some(Value::Integer(12))
        );
        assert_eq!(DataType::Integer.convert(&Value::Text("x".into())), None);
        assert_eq!(
            DataType::Text.convert(&Value::Boolean(true)),
            Some(Value::Text("true".into()))
        );
    }

    #[test]
    fn test_overflowing_timespan_is_a_mismatch() {
        let err = DataType::TimeSpan
            .coerce_json(&json!("99999999999999.00:00:00"))
            .unwrap_err();
        assert!(err.contains("expected TIMESPAN"));
        assert!(DataType::TimeSpan.coerce_json(&json!("1.00:00:01.5")).is_ok());
        assert_eq!(
            DataType::TimeSpan.coerce_json(&json!("-00:01:00")).unwrap(),
            Value::TimeSpan(-60_000)
        );
    }

    #[test]
    fn test_integers_reject_floats_outside_i64() {
        assert!(DataType::Integer.coerce_json(&json!(1e300)).is_err());
        assert!(DataType::Integer.coerce_json(&json!(-1e19)).is_err());
        assert!(DataType::Integer.coerce_json(&json!(2.5)).is_err());
        assert_eq!(
            DataType::Integer.coerce_json(&json!(42.0)).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(DataType::Integer.convert(&Value::Float(1e300)), None);
    }
}
