//! Presentation helpers for distances and durations. These feed the
//! tracking UI directly and are intentionally lossy; anything numeric
//! should consume the raw meter/second values instead.

/// Formats a distance as `850m` below one kilometre, `1.2km` above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m", meters.round() as i64)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}

/// Formats a duration as `45s`, `3m 45s` or `1h 12m` depending on scale.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as i64;

    if total < 60 {
        return format!("{}s", total);
    }

    let minutes = total / 60;
    if minutes < 60 {
        return format!("{}m {}s", minutes, total % 60);
    }

    format!("{}h {}m", minutes / 60, minutes % 60)
}
