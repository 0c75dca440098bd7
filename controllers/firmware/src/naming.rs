//! Child resource names.
//!
//! Children are named `<parent>-<target>`. Names longer than a DNS label are
//! cut down and finished by the store with a random suffix (`generateName`),
//! so children must always be found through their owner reference.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Longest name usable as a DNS label
pub const DNS_LABEL_MAX: usize = 63;
/// Length of the random suffix appended to `generateName`
pub const RANDOM_SUFFIX_LEN: usize = 5;

/// Name of a child resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildName {
    /// Use as `metadata.name`
    Fixed(String),
    /// Use as `metadata.generateName`
    Generated(String),
}

/// Name for the child of `parent` targeting `target`
pub fn child_name(parent: &str, target: &str) -> ChildName {
    let full = format!("{parent}-{target}");
    if full.len() <= DNS_LABEL_MAX {
        return ChildName::Fixed(full);
    }
    let keep = DNS_LABEL_MAX - RANDOM_SUFFIX_LEN - 1;
    let prefix: String = full.chars().take(keep).collect();
    ChildName::Generated(format!("{}-", prefix.trim_end_matches(['-', '.'])))
}

/// Write a child name into object metadata
pub fn apply(meta: &mut ObjectMeta, name: ChildName) {
    match name {
        ChildName::Fixed(name) => {
            meta.name = Some(name);
            meta.generate_name = None;
        }
        ChildName::Generated(prefix) => {
            meta.name = None;
            meta.generate_name = Some(prefix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_are_fixed() {
        assert_eq!(
            child_name("fw-rack-a", "server-01"),
            ChildName::Fixed("fw-rack-a-server-01".to_string())
        );
    }

    #[test]
    fn test_exact_limit_is_fixed() {
        let parent = "p".repeat(31);
        let target = "t".repeat(31);
        match child_name(&parent, &target) {
            ChildName::Fixed(name) => assert_eq!(name.len(), DNS_LABEL_MAX),
            other => panic!("expected fixed name, got {other:?}"),
        }
    }

    #[test]
    fn test_long_names_are_generated() {
        let parent = "bios-settings-for-the-entire-rack-row-a";
        let target = "server-with-a-rather-long-inventory-name-0001";
        let ChildName::Generated(prefix) = child_name(parent, target) else {
            panic!("expected generated name");
        };
        assert!(prefix.ends_with('-'));
        assert!(prefix.len() + RANDOM_SUFFIX_LEN <= DNS_LABEL_MAX);
        assert!(prefix.starts_with("bios-settings-for-the-entire-rack-row-a-server"));
        assert!(!prefix.ends_with("--"));
    }

    #[test]
    fn test_apply_sets_exactly_one_field() {
        let mut meta = ObjectMeta::default();
        apply(&mut meta, ChildName::Generated("abc-".to_string()));
        assert_eq!(meta.generate_name.as_deref(), Some("abc-"));
        assert!(meta.name.is_none());

        apply(&mut meta, ChildName::Fixed("abc-x".to_string()));
        assert_eq!(meta.name.as_deref(), Some("abc-x"));
        assert!(meta.generate_name.is_none());
    }
}
