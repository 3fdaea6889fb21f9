//! Human-readable formatting for sizes, throughput and durations

use std::time::Duration;

const SIZE_UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
const RATE_UNITS: [&str; 5] = ["KiB/s", "MiB/s", "GiB/s", "TiB/s", "PiB/s"];

/// Format a byte count, e.g. `999 B` or `1.50 GiB`.
pub fn bytes(size: u64) -> String {
    if size < 1024 {
        return format!("{} B", size);
    }

    let (value, unit) = scale(size as f64, &SIZE_UNITS);
    format!("{:.2} {}", value, unit)
}

/// Format a throughput in bytes per second, e.g. `900.00 B/s` or `2.00 KiB/s`.
pub fn bytes_per_second(rate: f64) -> String {
    if rate < 1024.0 {
        return format!("{:.2} B/s", rate);
    }

    let (value, unit) = scale(rate, &RATE_UNITS);
    format!("{:.2} {}", value, unit)
}

/// Format a duration rounded to whole milliseconds, e.g. `123ms` or `1s 500ms`.
pub fn duration(elapsed: Duration) -> String {
    humantime::format_duration(round_millis(elapsed)).to_string()
}

/// Round a duration to the nearest millisecond.
pub fn round_millis(elapsed: Duration) -> Duration {
    let micros = elapsed.as_micros();
    let millis = (micros + 500) / 1000;
    Duration::from_millis(millis as u64)
}

/// Divide by 1024 until the value fits the largest applicable unit.
fn scale(mut value: f64, units: &[&'static str]) -> (f64, &'static str) {
    let mut idx = 0;
    value /= 1024.0;
    while value >= 1024.0 && idx < units.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    (value, units[idx])
}
