//! Cron expression handling.
//!
//! Users write conventional five-field expressions (`min hour dom month dow`,
//! Sunday = 0 or 7). The `cron` crate wants a leading seconds field and numbers
//! weekdays 1-7 starting at Sunday, so expressions are normalized first.

use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use cron::Schedule;

use crate::error::{CronError, Result};

fn invalid(expr: &str, reason: impl Into<String>) -> CronError {
    CronError::InvalidSchedule {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Rewrite an expression into the six-field form the `cron` crate accepts.
pub fn normalize(expr: &str) -> Result<String> {
    let mut fields: Vec<String> = expr.split_whitespace().map(String::from).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => return Err(invalid(expr, format!("expected 5 or 6 fields, got {n}"))),
    }
    fields[5] = translate_dow(&fields[5]).map_err(|reason| invalid(expr, reason))?;
    Ok(fields.join(" "))
}

/// Parse an expression as entered by a user.
pub fn parse(expr: &str) -> Result<Schedule> {
    let normalized = normalize(expr)?;
    Schedule::from_str(&normalized).map_err(|e| invalid(expr, e.to_string()))
}

/// Next fire time strictly after `after`.
pub fn next_after<Tz: TimeZone>(schedule: &Schedule, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(after).next()
}

fn dow_number(s: &str) -> std::result::Result<Option<u32>, String> {
    if !s.chars().all(|c| c.is_ascii_digit()) {
        // Names (MON, Tue, ...) and `*` pass through untouched.
        return Ok(None);
    }
    let n: u32 = s.parse().map_err(|_| format!("bad day of week: {s}"))?;
    if n > 7 {
        return Err(format!("day of week out of range: {n}"));
    }
    Ok(Some(n))
}

/// 0-7 (0 and 7 = Sunday) → 1-7 (1 = Sunday).
fn shift(n: u32) -> u32 {
    n % 7 + 1
}

fn translate_dow(field: &str) -> std::result::Result<String, String> {
    field
        .split(',')
        .map(translate_dow_item)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(|items| items.join(","))
}

fn translate_dow_item(item: &str) -> std::result::Result<String, String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

    if let Some((a, b)) = base.split_once('-') {
        let (Some(a), Some(b)) = (dow_number(a)?, dow_number(b)?) else {
            return Ok(item.to_string());
        };
        if a > b {
            return Err(format!("descending day-of-week range: {base}"));
        }
        return Ok(match (a, b) {
            (0, 7) => format!("1-7{suffix}"),
            // Sunday alone.
            (7, 7) => "1".to_string(),
            (a, 7) if a > 0 => {
                if step.is_some() {
                    return Err(format!("step over a range ending on Sunday: {item}"));
                }
                // Ranges ending on Sunday wrap around in the 1-7 numbering.
                match shift(a) {
                    7 => "7,1".to_string(),
                    start => format!("{start}-7,1"),
                }
            }
            (a, b) => format!("{}-{}{suffix}", shift(a), shift(b)),
        });
    }

    match dow_number(base)? {
        Some(n) => Ok(format!("{}{suffix}", shift(n))),
        None => Ok(item.to_string()),
    }
}
