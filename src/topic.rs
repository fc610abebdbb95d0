//! MQTT topic filter matching.

/// True when `filter` contains a `+` or `#` wildcard level.
pub fn is_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

/// Match a concrete topic against an MQTT subscription filter.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level and
/// everything below it. Topics starting with `$` are only matched by filters
/// that name the `$` level explicitly.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && !filter.starts_with('$') {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_topics() {
        assert!(topic_matches("calibration/results", "calibration/results"));
        assert!(!topic_matches("calibration/results", "calibration/result"));
        assert!(!topic_matches("calibration/results", "calibration/results/x"));
    }

    #[test]
    fn multi_level_wildcard_includes_parent() {
        assert!(topic_matches("calibration/#", "calibration/ratio/32A/32B"));
        assert!(topic_matches("calibration/#", "calibration"));
        assert!(!topic_matches("calibration/#", "telemetry/powcalib/32B"));
        assert!(topic_matches("#", "usrp/state"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("telemetry/powcalib/+", "telemetry/powcalib/32B"));
        assert!(!topic_matches("telemetry/powcalib/+", "telemetry/powcalib"));
        assert!(!topic_matches("telemetry/+", "telemetry/powcalib/32B"));
    }

    #[test]
    fn system_topics_need_explicit_prefix() {
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn wildcard_detection() {
        assert!(is_wildcard("otac/#"));
        assert!(is_wildcard("telemetry/+/x"));
        assert!(!is_wildcard("config/run_config_info"));
    }
}
