//! Human-readable sizes, durations and rates.

/// Format a size given in kilobytes: `512 KB`, `1.50 MB`, `2 GB`.
pub fn format_size_kb(kilobytes: f64) -> String {
    const KB_PER_MB: f64 = 1024.0;
    const KB_PER_GB: f64 = 1024.0 * 1024.0;

    if kilobytes < KB_PER_MB {
        format!("{:.0} KB", kilobytes)
    } else if kilobytes < KB_PER_GB {
        with_unit(kilobytes / KB_PER_MB, "MB")
    } else {
        with_unit(kilobytes / KB_PER_GB, "GB")
    }
}

/// Format a size given in bytes.
pub fn format_size_bytes(bytes: u64) -> String {
    format_size_kb(bytes as f64 / 1024.0)
}

/// Format a transfer rate given in bytes per second.
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_size_kb(bytes_per_sec.max(0.0) / 1024.0))
}

fn with_unit(value: f64, unit: &str) -> String {
    if value.fract() == 0.0 {
        format!("{:.0} {}", value, unit)
    } else {
        format!("{:.2} {}", value, unit)
    }
}

/// Format a duration in seconds: `12.5 sec`, `3:07 min`, `1:05 hr`.
pub fn format_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        return format!("{:.1} sec", seconds);
    }

    let total = seconds as u64;
    if total < 60 * 60 {
        format!("{}:{:02} min", total / 60, total % 60)
    } else {
        format!("{}:{:02} hr", total / 3600, (total % 3600) / 60)
    }
}

/// Format a ratio as a percentage with one decimal.
pub fn format_percentage(done: u64, total: u64) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", done as f64 * 100.0 / total as f64)
}
