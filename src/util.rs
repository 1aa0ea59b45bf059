use std::time::Duration;

/// `mm:ss`, or `h:mm:ss` from one hour up. Sub-second remainders are dropped.
pub fn clock_format(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Filled fraction bar, e.g. `[####------]`.
pub fn progress_bar(done: Duration, total: Duration, width: usize) -> String {
    let ratio = if total.is_zero() {
        1.0
    } else {
        (done.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
    };
    let filled = (ratio * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
