//! Lookup tables mapping a bar interval to history windows and forecast steps.
//!
//! Intervals use the data source's notation (`1m`, `5m`, `1h`, `1d`, `1wk`, ...),
//! periods are range strings (`8d`, `60d`, `1y`, `5y`).

use crate::error::ForecastError;

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 1_440;
const MINUTES_PER_WEEK: u64 = 10_080;
const MINUTES_PER_MONTH: u64 = 43_200;

/// History to fetch when training a model for `interval`.
/// Unrecognised intervals fall back to sixty days.
pub fn training_period(interval: &str) -> &'static str {
    match interval {
        "1m" => "8d",
        "2m" | "5m" | "15m" | "30m" | "60m" | "90m" | "1h" => "60d",
        "1d" => "5y",
        _ => "60d",
    }
}

/// History to fetch when building the inference window for `interval`.
pub fn prediction_period(interval: &str) -> &'static str {
    match interval {
        "1m" | "2m" | "5m" | "15m" | "30m" | "60m" | "90m" | "1h" => "1d",
        "1d" => "1y",
        _ => "1y",
    }
}

/// Length of one bar in minutes, `None` when the notation is not understood.
pub fn interval_minutes(interval: &str) -> Option<u64> {
    let interval = interval.trim();
    let (count, unit_minutes) = if let Some(n) = interval.strip_suffix("mo") {
        (n, MINUTES_PER_MONTH)
    } else if let Some(n) = interval.strip_suffix("wk") {
        (n, MINUTES_PER_WEEK)
    } else if let Some(n) = interval.strip_suffix('m') {
        (n, 1)
    } else if let Some(n) = interval.strip_suffix('h') {
        (n, MINUTES_PER_HOUR)
    } else if let Some(n) = interval.strip_suffix('d') {
        (n, MINUTES_PER_DAY)
    } else {
        return None;
    };

    match count.parse::<u64>() {
        Ok(n) if n > 0 => n.checked_mul(unit_minutes),
        _ => None,
    }
}

/// Parse a `"<integer> <unit>"` horizon into minutes.
fn timeframe_minutes(timeframe: &str) -> Option<u64> {
    let mut parts = timeframe.split_whitespace();
    let count: u64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_lowercase();
    if parts.next().is_some() {
        return None;
    }

    let unit_minutes = match unit.as_str() {
        "minute" | "minutes" => 1,
        "hour" | "hours" => MINUTES_PER_HOUR,
        "day" | "days" => MINUTES_PER_DAY,
        _ => return None,
    };
    count.checked_mul(unit_minutes)
}

/// Number of bars of `interval` that fit into `timeframe`, never less than one.
pub fn step_count(interval: &str, timeframe: &str) -> Result<usize, ForecastError> {
    let bar = interval_minutes(interval)
        .ok_or_else(|| ForecastError::UnknownInterval(interval.to_string()))?;
    let horizon = timeframe_minutes(timeframe)
        .ok_or_else(|| ForecastError::InvalidTimeframe(timeframe.to_string()))?;

    Ok(usize::try_from(horizon / bar).unwrap_or(usize::MAX).max(1))
}
