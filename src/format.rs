//! # Formatter Utilities
//!
//! Human-readable rendering helpers shared by alerts, reports and menus:
//! byte quantities, durations, percentages, unicode progress bars and
//! length-bounded truncation. All helpers are pure and allocation-light so
//! they can be called while composing messages without touching any lock.

use std::time::Duration;

/// Binary units used by [`format_bytes`]
const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Render a byte count using binary units with one decimal place
///
/// # Examples
///
/// ```
/// use nas_sentinel::format::format_bytes;
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1536), "1.5 KiB");
/// assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Render a duration as the two most significant components
///
/// Seconds are dropped once the duration reaches one hour; sub-second
/// durations collapse to `"0s"`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use nas_sentinel::format::format_duration;
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
/// assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 600)), "3h 10m");
/// assert_eq!(format_duration(Duration::from_secs(50 * 3600)), "2d 2h");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Render a percentage with one decimal place
pub fn format_percent(value: f64) -> String {
    format!("{value:.1}%")
}

/// Render a fixed-width unicode progress bar for a 0-100 value
///
/// Values outside [0, 100] are clamped. `width` is the number of bar cells,
/// not counting the brackets.
///
/// # Examples
///
/// ```
/// use nas_sentinel::format::progress_bar;
/// assert_eq!(progress_bar(50.0, 10), "[█████░░░░░]");
/// assert_eq!(progress_bar(-3.0, 4), "[░░░░]");
/// assert_eq!(progress_bar(250.0, 4), "[████]");
/// ```
pub fn progress_bar(percent: f64, width: usize) -> String {
    let clamped = percent.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    for _ in 0..filled {
        bar.push('█');
    }
    for _ in filled..width {
        bar.push('░');
    }
    bar.push(']');
    bar
}

/// Truncate a string to at most `max_chars` characters, appending an ellipsis
/// when anything was cut
///
/// Operates on character boundaries, so multi-byte content is safe.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}
