//! Time range resolution for chart panels.
//!
//! Panels carry three optional string inputs: a start timestamp, an end
//! timestamp, and a lookback duration. This module classifies them into
//! either a fixed window or a relative lookback, mirroring the behavior the
//! chart frontend relies on: the literal end value `NOW` means "no fixed
//! end", and a lone start (without a usable end) is ignored in favor of a
//! relative window.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder end value meaning "no fixed end, evaluate against the
/// current time". Never parsed as a date.
pub const END_NOW: &str = "NOW";

/// Lookback applied when no duration is supplied.
pub const DEFAULT_PAST_DURATION: &str = "1h";

/// Floor for derived steps so narrow containers cannot request
/// sub-scrape-interval resolution.
const MIN_STEP_MS: i64 = 15_000;

#[derive(Debug, Error)]
pub enum TimeRangeError {
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
}

/// A resolved time range: exactly one of a fixed window or a lookback.
///
/// The serialized form matches what the chart panels consume: absolute
/// ranges as `{"start": ..., "end": ...}`, relative ranges as
/// `{"pastDuration": "1h"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeRangeValue {
    /// Both endpoints fixed.
    Absolute {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A lookback window ending at evaluation time.
    #[serde(rename_all = "camelCase")]
    Relative { past_duration: String },
}

/// Resolve optional `start`/`end`/`duration` strings into a [`TimeRangeValue`].
///
/// The range is absolute only when both `start` and `end` are present,
/// non-empty, and `end` is not the [`END_NOW`] sentinel; otherwise it is
/// relative, defaulting to [`DEFAULT_PAST_DURATION`]. Timestamps that fail
/// to parse surface as [`TimeRangeError::InvalidTimestamp`].
///
/// Note that a `start` without a usable `end` is silently dropped rather
/// than producing an open-ended absolute range. Callers have come to depend
/// on that, so it is preserved here.
pub fn resolve(
    start: Option<&str>,
    end: Option<&str>,
    duration: Option<&str>,
) -> Result<TimeRangeValue, TimeRangeError> {
    let end = end.filter(|e| *e != END_NOW);

    let start = start.filter(|s| !s.is_empty());
    let end = end.filter(|e| !e.is_empty());

    if let (Some(start), Some(end)) = (start, end) {
        return Ok(TimeRangeValue::Absolute {
            start: parse_timestamp(start)?,
            end: parse_timestamp(end)?,
        });
    }

    let past_duration = duration
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_PAST_DURATION);

    Ok(TimeRangeValue::Relative {
        past_duration: past_duration.to_string(),
    })
}

impl TimeRangeValue {
    /// Materialize the range into concrete endpoints, anchoring relative
    /// ranges at `now`.
    ///
    /// Relative durations are parsed lazily, so an unparseable duration
    /// surfaces here as [`TimeRangeError::InvalidDuration`] rather than at
    /// resolution time.
    pub fn window_at(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeRangeError> {
        match self {
            Self::Absolute { start, end } => Ok((*start, *end)),
            Self::Relative { past_duration } => {
                let lookback = parse_duration(past_duration)?;
                Ok((now - lookback, now))
            }
        }
    }
}

/// Parse a timestamp string: RFC 3339, or Unix epoch seconds (fractional
/// allowed), the formats the query backend accepts.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, TimeRangeError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }

    if let Ok(epoch) = input.parse::<f64>() {
        if epoch.is_finite() {
            if let Some(parsed) = Utc.timestamp_millis_opt((epoch * 1000.0) as i64).single() {
                return Ok(parsed);
            }
        }
    }

    Err(TimeRangeError::InvalidTimestamp(input.to_string()))
}

/// Parse a lookback duration such as `1h`, `90s`, or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration, TimeRangeError> {
    let parsed = humantime::parse_duration(input)
        .map_err(|_| TimeRangeError::InvalidDuration(input.to_string()))?;

    Duration::from_std(parsed).map_err(|_| TimeRangeError::InvalidDuration(input.to_string()))
}

/// Suggest a query step from the rendered width of the chart container:
/// one sample per pixel, floored at 15s.
pub fn suggested_step(width_px: u32, start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    let span_ms = (end - start).num_milliseconds().max(0);
    let step_ms = (span_ms / i64::from(width_px.max(1))).max(MIN_STEP_MS);
    Duration::milliseconds(step_ms)
}

/// Single-entry memoization of [`resolve`], keyed by the input triple.
///
/// Callers that re-evaluate on every refresh can hold one of these to skip
/// redundant work; re-running [`resolve`] unconditionally is equally
/// correct. Failed resolutions are not cached.
#[derive(Debug, Default)]
pub struct TimeRangeCache {
    key: Option<(Option<String>, Option<String>, Option<String>)>,
    value: Option<TimeRangeValue>,
}

impl TimeRangeCache {
    pub fn resolve(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
        duration: Option<&str>,
    ) -> Result<TimeRangeValue, TimeRangeError> {
        let key = (
            start.map(str::to_string),
            end.map(str::to_string),
            duration.map(str::to_string),
        );

        if self.key.as_ref() == Some(&key) {
            if let Some(value) = &self.value {
                return Ok(value.clone());
            }
        }

        let value = resolve(start, end, duration)?;
        self.key = Some(key);
        self.value = Some(value.clone());

        Ok(value)
    }
}
