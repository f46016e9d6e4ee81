use std::collections::HashMap;

// ======================================================
// MARKER LABELS
// ======================================================

/// Label keys that mark a container or image as managed by hutch.
/// `com.github.hutch.hutch` is the current marker; `io.hutch.managed` is
/// still honoured for records created by older releases.
pub const MARKER_LABELS: [&str; 2] = ["com.github.hutch.hutch", "io.hutch.managed"];

/// True when at least one marker label key is present. Values are ignored:
/// older releases wrote values other than "true", so key presence is the
/// rule for containers and images alike.
pub fn is_managed(labels: &HashMap<String, String>) -> bool {
    MARKER_LABELS.iter().any(|key| labels.contains_key(*key))
}

/// Label set stamped onto records fabricated from the low-level runtime,
/// which has no label storage of its own.
pub fn marker_labels() -> HashMap<String, String> {
    HashMap::from([(MARKER_LABELS[0].to_string(), "true".to_string())])
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(keys: &[&str]) -> HashMap<String, String> {
        keys.iter()
            .map(|k| (k.to_string(), "true".to_string()))
            .collect()
    }

    #[test]
    fn unlabelled_records_are_not_managed() {
        assert!(!is_managed(&HashMap::new()));
        assert!(!is_managed(&labels(&["io.podman.annotations.autoremove"])));
    }

    #[test]
    fn either_marker_label_is_enough() {
        assert!(is_managed(&labels(&["com.github.hutch.hutch"])));
        assert!(is_managed(&labels(&["io.hutch.managed"])));
        assert!(is_managed(&labels(&["com.github.hutch.hutch", "io.hutch.managed"])));
    }

    #[test]
    fn marker_value_is_ignored() {
        let mut m = HashMap::new();
        m.insert("io.hutch.managed".to_string(), "".to_string());
        assert!(is_managed(&m));
    }

    #[test]
    fn fabricated_label_set_passes_the_filter() {
        assert!(is_managed(&marker_labels()));
    }
}
