//! Sexagesimal (`H:MM:SS.fraction`) timestamps for encoder seek flags.

use std::time::Duration;

/// Render `d` as `H:MM:SS.nnnnnnnnn`, then strip trailing zero digits and a
/// bare trailing decimal point.
///
/// ```
/// use std::time::Duration;
/// use dms_av::timefmt::format_duration_sexagesimal;
///
/// assert_eq!(
///     format_duration_sexagesimal(Duration::from_nanos(1_377_628_452_000)),
///     "0:22:57.628452"
/// );
/// assert_eq!(format_duration_sexagesimal(Duration::from_secs(3600)), "1:00:00");
/// ```
pub fn format_duration_sexagesimal(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;

    let mut out = format!(
        "{hours}:{minutes:02}:{seconds:02}.{:09}",
        d.subsec_nanos()
    );
    let trimmed = out.trim_end_matches('0').trim_end_matches('.').len();
    out.truncate(trimmed);
    out
}

/// Parse `H:MM:SS[.frac]`, `MM:SS[.frac]` or plain `SS[.frac]` seconds.
///
/// Returns `None` for malformed input, negative values, or minute/second
/// fields of 60 or more in the colon forms.
pub fn parse_duration_sexagesimal(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut fields = s.rsplit(':');
    let secs_field = fields.next()?;
    let minutes: u64 = match fields.next() {
        Some(m) => parse_digits(m)?,
        None => 0,
    };
    let hours: u64 = match fields.next() {
        Some(h) => parse_digits(h)?,
        None => 0,
    };
    if fields.next().is_some() {
        return None;
    }

    let colon_form = s.contains(':');
    let (whole, frac) = match secs_field.split_once('.') {
        Some((w, f)) => (w, f),
        None => (secs_field, ""),
    };
    let seconds = parse_digits(whole)?;
    if colon_form && (seconds >= 60 || minutes >= 60) {
        return None;
    }

    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // Nanosecond resolution; extra digits are truncated.
    let mut nanos_str: String = frac.chars().take(9).collect();
    while nanos_str.len() < 9 {
        nanos_str.push('0');
    }
    let nanos: u32 = nanos_str.parse().ok()?;

    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60)?
        .checked_add(seconds)?;
    Some(Duration::new(total, nanos))
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
