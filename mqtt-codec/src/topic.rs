// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic name/filter validation, per MQTT 3.1.1 §4.7.

/// A topic name used in PUBLISH must be non-empty and must not contain the
/// wildcard characters `+`/`#` or a null byte.
#[must_use]
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#', '\0'])
}

/// A topic filter used in SUBSCRIBE/UNSUBSCRIBE may use `+` as a single-level
/// wildcard and `#` as a multi-level wildcard, but only in specific
/// positions: `#` must be the last level, and both wildcards must occupy an
/// entire level on their own (`a/+` is valid, `a+` is not).
#[must_use]
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return false;
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }
    true
}

/// Whether `filter` matches `topic`, per the MQTT wildcard matching rules.
/// `topic` must be a validated topic name (no wildcards); `filter` must be a
/// validated topic filter.
#[must_use]
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    // Topics beginning with `$` are never matched by a filter starting with a
    // wildcard, per MQTT-4.7.2-1.
    if topic.starts_with('$') && matches!(filter_levels.first(), Some(&"+") | Some(&"#")) {
        return false;
    }

    let mut ti = topic_levels.iter();
    let mut fi = filter_levels.iter();

    loop {
        match (ti.next(), fi.next()) {
            (Some(_), Some(&"#")) => return true,
            (Some(t), Some(&"+")) => {
                let _ = t;
                continue;
            }
            (Some(t), Some(f)) => {
                if t != f {
                    return false;
                }
            }
            (None, Some(&"#")) => return true,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topic_name() {
        assert!(is_valid_topic_name("a/b"));
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("a/+"));
        assert!(!is_valid_topic_name("a/#"));
    }

    #[test]
    fn test_valid_topic_filter() {
        assert!(is_valid_topic_filter("a/b"));
        assert!(is_valid_topic_filter("a/+/c"));
        assert!(is_valid_topic_filter("a/#"));
        assert!(is_valid_topic_filter("#"));
        assert!(!is_valid_topic_filter("a/b#"));
        assert!(!is_valid_topic_filter("a/#/c"));
        assert!(!is_valid_topic_filter(""));
    }

    #[test]
    fn test_topic_matches_filter() {
        assert!(topic_matches_filter("a/b", "a/b"));
        assert!(topic_matches_filter("a/b", "a/+"));
        assert!(topic_matches_filter("a/b/c", "a/#"));
        assert!(topic_matches_filter("a", "a/#"));
        assert!(!topic_matches_filter("a/b", "a/b/c"));
        assert!(!topic_matches_filter("$SYS/foo", "#"));
        assert!(!topic_matches_filter("$SYS/foo", "+/foo"));
        assert!(topic_matches_filter("$SYS/foo", "$SYS/#"));
    }
}
