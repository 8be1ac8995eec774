//! Unit conversions and small helpers shared by the measurement code

use std::time::{Duration, Instant};

/// Bytes per mebibyte, the unit RAM figures are reported in
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Converts a byte count to mebibytes
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Renders a byte count in mebibytes for log lines
pub fn format_mb(bytes: u64) -> String {
    format!("{:.1} MB", bytes_to_mb(bytes))
}

/// Converts a duration to fractional milliseconds
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Runs `f` and returns its value with the wall-clock time it took
///
/// ```
/// use common::utils::measure_execution_time;
///
/// let (sum, elapsed) = measure_execution_time(|| (1..=4).sum::<u32>());
/// assert_eq!(sum, 10);
/// assert!(elapsed.as_secs() < 1);
/// ```
pub fn measure_execution_time<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let started = Instant::now();
    let value = f();
    (value, started.elapsed())
}

/// Cuts `s` to at most `max_chars` characters, marking the cut with `...`
pub fn truncate_string(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(bytes_to_mb(3 * 1024 * 1024), 3.0);
        assert_eq!(format_mb(1536 * 1024), "1.5 MB");
        assert!((duration_ms(Duration::from_micros(2500)) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("registration refused", 12), "registration...");
        assert_eq!(truncate_string("short", 12), "short");
        assert_eq!(truncate_string("héllo wörld", 4), "héll...");
    }
}
