use chrono::Utc;

/// Returns a string representing the elapsed time since `start_time` like
/// "1m15s" or "1.50s", used for the CLI's turn-duration banner.
pub fn format_elapsed(start_time: chrono::DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(start_time);
    format_elapsed_millis(elapsed.num_milliseconds())
}

fn format_elapsed_millis(millis: i64) -> String {
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.2}s", millis as f64 / 1000.0)
    } else {
        let minutes = millis / 60_000;
        let seconds = (millis % 60_000) / 1000;
        format!("{minutes}m{seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use chrono::Duration;

    #[test]
    fn subsecond_is_milliseconds() {
        assert_eq!(format_elapsed_millis(Duration::milliseconds(250).num_milliseconds()), "250ms");
    }

    #[test]
    fn seconds_get_two_decimals() {
        assert_eq!(format_elapsed_millis(Duration::milliseconds(1_500).num_milliseconds()), "1.50s");
    }

    #[test]
    fn minutes_get_mmss() {
        assert_eq!(format_elapsed_millis(Duration::milliseconds(75_000).num_milliseconds()), "1m15s");
    }
}
