//! Step duration strings: `500ms`, `1.5s`, `10m`, `2h`.

use std::{sync::LazyLock, time::Duration};

use fngate_core::StepError;
use regex::Regex;

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)(ms|s|m|h)$").expect("static pattern compiles")
});

/// Parses a duration string matching `^\d+(\.\d+)?(ms|s|m|h)$`.
///
/// # Errors
///
/// Returns [`StepError::InvalidDuration`] for any other input, including
/// surrounding whitespace and values too large to represent.
pub fn parse_duration(input: &str) -> Result<Duration, StepError> {
    let invalid = || StepError::InvalidDuration { input: input.to_string() };

    let captures = DURATION.captures(input).ok_or_else(invalid)?;
    let value: f64 = captures[1].parse().map_err(|_| invalid())?;
    let unit_nanos = match &captures[2] {
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3_600e9,
        _ => return Err(invalid()),
    };

    let nanos = (value * unit_nanos).round();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(nanos as u64))
}
