//! What's a project without a util module.

use std::time::Duration;

/// Get a human-readable duration, largest units first,
/// e.g. `9h 59m 30s`.
pub fn human_duration(duration: Duration) -> String {
    let minute = 60;
    let hour = minute * 60;
    let day = hour * 24;

    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".into();
    }

    let mut parts = vec![];
    for (unit, name) in [(day, "d"), (hour, "h"), (minute, "m"), (1, "s")] {
        if secs >= unit {
            parts.push(format!("{}{}", secs / unit, name));
            secs %= unit;
        }
    }

    parts.join(" ")
}
