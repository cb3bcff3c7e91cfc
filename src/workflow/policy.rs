use std::fmt;
use std::time::Duration;

use crate::core::{PlatformError, Result};

/// What to do when a step's executor fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Fail,
    /// `attempts` counts the first try.
    Retry { attempts: u32 },
}

impl ErrorPolicy {
    /// Parses an `onError` string. Absent or blank means [`ErrorPolicy::Fail`].
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(Self::Fail);
        };
        let invalid = || {
            PlatformError::TypeError(format!(
                "onError '{}' must have the form Retry:<N> with N a positive integer",
                raw
            ))
        };
        let (verb, count) = raw.split_once(':').ok_or_else(invalid)?;
        if !verb.trim().eq_ignore_ascii_case("retry") {
            return Err(invalid());
        }
        match count.trim().parse::<u32>() {
            Ok(attempts) if attempts >= 1 => Ok(Self::Retry { attempts }),
            _ => Err(invalid()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Fail => 1,
            Self::Retry { attempts } => *attempts,
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => write!(f, "fail"),
            Self::Retry { attempts } => write!(f, "Retry:{}", attempts),
        }
    }
}

/// Delay before retry number `retry` (1-based): doubles from `base`, capped at `max`.
pub fn backoff(retry: u32, base: Duration, max: Duration) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}
