use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimecodeError {
    #[error("empty timecode")]
    Empty,
    #[error("invalid timecode '{0}': expected SS, MM:SS or HH:MM:SS")]
    Invalid(String),
}

/// A position in a video, in whole seconds.
///
/// Parsed from the human formats produced by the analysis service and typed
/// by users: `"SS"`, `"MM:SS"` or `"HH:MM:SS"`. Fractional seconds are
/// accepted in the last component and truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timecode(u64);

impl Timecode {
    pub const ZERO: Timecode = Timecode(0);

    pub fn from_secs(secs: u64) -> Self {
        Timecode(secs)
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    pub fn parse(input: &str) -> Result<Self, TimecodeError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TimecodeError::Empty);
        }

        let invalid = || TimecodeError::Invalid(input.to_string());
        let parts: Vec<&str> = trimmed.split(':').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }

        let (leading, last) = parts.split_at(parts.len() - 1);
        let mut total: u64 = 0;
        for part in leading {
            let value = parse_whole(part).ok_or_else(invalid)?;
            total = total
                .checked_mul(60)
                .and_then(|t| t.checked_add(value))
                .ok_or_else(invalid)?;
        }

        let seconds = parse_seconds(last[0]).ok_or_else(invalid)?;
        total
            .checked_mul(60)
            .and_then(|t| t.checked_add(seconds))
            .map(Timecode)
            .ok_or_else(invalid)
    }

    /// `HH-MM-SS`, safe for use inside file names.
    pub fn file_safe(self) -> String {
        let (h, m, s) = self.split();
        format!("{:02}-{:02}-{:02}", h, m, s)
    }

    fn split(self) -> (u64, u64, u64) {
        (self.0 / 3600, (self.0 % 3600) / 60, self.0 % 60)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = self.split();
        write!(f, "{:02}:{:02}:{:02}", h, m, s)
    }
}

impl FromStr for Timecode {
    type Err = TimecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timecode::parse(s)
    }
}

fn parse_whole(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn parse_seconds(part: &str) -> Option<u64> {
    if let Some(whole) = parse_whole(part) {
        return Some(whole);
    }
    let (int, frac) = part.split_once('.')?;
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if int.is_empty() {
        return Some(0);
    }
    parse_whole(int)
}

/// Parse a timecode straight to seconds.
pub fn parse_timecode(input: &str) -> Result<u64, TimecodeError> {
    Timecode::parse(input).map(Timecode::as_secs)
}

/// Seconds between `start` and `end`, clamped at zero.
pub fn clip_duration(start: Timecode, end: Timecode) -> u64 {
    end.0.saturating_sub(start.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_forms() {
        assert_eq!(parse_timecode("01:02:03"), Ok(3723));
        assert_eq!(parse_timecode("02:03"), Ok(123));
        assert_eq!(parse_timecode("45"), Ok(45));
        assert_eq!(parse_timecode(" 00:00:07 "), Ok(7));
    }

    #[test]
    fn truncates_fractional_seconds() {
        assert_eq!(parse_timecode("12.9"), Ok(12));
        assert_eq!(parse_timecode("00:01:02.500"), Ok(62));
        assert_eq!(parse_timecode(".5"), Ok(0));
    }

    #[test]
    fn minutes_past_an_hour_are_kept() {
        assert_eq!(parse_timecode("75:10"), Ok(4510));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timecode(""), Err(TimecodeError::Empty));
        for bad in ["abc", "1:2:3:4", "-5", "01::03", "1:x", "12.", "1e3", "01:02.3.4"] {
            assert!(
                matches!(parse_timecode(bad), Err(TimecodeError::Invalid(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn inverted_range_has_zero_duration() {
        let start = Timecode::parse("00:10").unwrap();
        let end = Timecode::parse("00:05").unwrap();
        assert_eq!(clip_duration(start, end), 0);
        assert_eq!(clip_duration(end, start), 5);
    }

    #[test]
    fn formats_for_display_and_file_names() {
        let tc = Timecode::from_secs(3723);
        assert_eq!(tc.to_string(), "01:02:03");
        assert_eq!(tc.file_safe(), "01-02-03");
        assert_eq!(Timecode::ZERO.file_safe(), "00-00-00");
    }
}
