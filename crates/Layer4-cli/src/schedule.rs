//! Parsing of `--at HH:MM` and `--after 5m` style arguments

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use std::time::Duration;

/// `30s`, `5m`, `2h`, `1d`. A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty duration");
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid duration '{}'", input))?;

    let secs_per_unit = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => bail!("unknown duration unit '{}' (use s, m, h or d)", other),
    };
    let secs = value
        .checked_mul(secs_per_unit)
        .with_context(|| format!("duration '{}' is too large", input))?;
    Ok(Duration::from_secs(secs))
}

/// Next occurrence of a local `HH:MM` wall-clock time after `now`
pub fn next_clock_time(input: &str, now: DateTime<Local>) -> Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .with_context(|| format!("invalid time '{}' (expected HH:MM)", input))?;

    let mut date = now.date_naive();
    for _ in 0..2 {
        let candidate = Local
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .with_context(|| format!("{} does not exist on {}", input, date))?;
        if candidate > now {
            return Ok(candidate.with_timezone(&Utc));
        }
        date = date
            .succ_opt()
            .context("date out of range")?;
    }
    bail!("could not schedule {}", input)
}

/// Absolute start time from `--after`
pub fn after(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let delay = chrono::Duration::from_std(parse_duration(input)?)
        .with_context(|| format!("duration '{}' is too large", input))?;
    now.checked_add_signed(delay)
        .with_context(|| format!("duration '{}' is too large", input))
}
