use std::cmp::Ordering;

/// Compares two resource versions.
///
/// Resource versions are opaque, but every apiserver we sync with hands out
/// etcd revisions, so numeric tokens are ordered numerically. Anything else can
/// only be compared for equality, and a differing token is assumed to be newer.
pub fn compare_resource_versions(candidate: &str, current: &str) -> Option<Ordering> {
    match (candidate.parse::<u64>(), current.parse::<u64>()) {
        (Ok(candidate), Ok(current)) => Some(candidate.cmp(&current)),
        _ if candidate == current => Some(Ordering::Equal),
        _ => None,
    }
}

/// `true` when `candidate` should replace an object observed at `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    !matches!(
        compare_resource_versions(candidate, current),
        Some(Ordering::Less | Ordering::Equal)
    )
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{compare_resource_versions, is_newer};

    #[test]
    fn numeric_versions_are_ordered_numerically() {
        assert_eq!(compare_resource_versions("10", "9"), Some(Ordering::Greater));
        assert!(is_newer("10", "9"));
        assert!(!is_newer("9", "10"));
        assert!(!is_newer("10", "10"));
    }

    #[test]
    fn opaque_versions_are_newer_when_different() {
        assert_eq!(compare_resource_versions("abc", "abd"), None);
        assert!(is_newer("abc", "abd"));
        assert!(!is_newer("abc", "abc"));
    }
}
