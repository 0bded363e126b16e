//! Datastore selection

use regex::Regex;
use serde::Serialize;

use crate::error::{MkvmError, MkvmResult};

/// Name fragment marking the preferred datastore when cloning.
pub const VMSTORE_MARKER: &str = "VMstore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatastoreCandidate {
    pub name: String,
    pub free_space: u64,
}

/// Pick the datastore matching `pattern` with the most free space.
///
/// Ties go to the candidate listed first.
pub fn select(candidates: &[DatastoreCandidate], pattern: &str) -> MkvmResult<String> {
    let regex = Regex::new(pattern).map_err(|e| {
        MkvmError::configuration(format!("Invalid datastore pattern '{}': {}", pattern, e))
    })?;

    candidates
        .iter()
        .filter(|c| regex.is_match(&c.name))
        .fold(None::<&DatastoreCandidate>, |best, c| match best {
            Some(b) if b.free_space >= c.free_space => Some(b),
            _ => Some(c),
        })
        .map(|c| c.name.clone())
        .ok_or_else(|| MkvmError::not_found(format!("datastore matching '{}'", pattern)))
}

/// Clone-only override: a source VM datastore carrying the VMstore marker wins
/// over the free space ranking. The last such datastore is used.
pub fn clone_override(source_datastores: &[String]) -> Option<&str> {
    source_datastores
        .iter()
        .rev()
        .find(|name| name.contains(VMSTORE_MARKER))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    fn ds(name: &str, free_space: u64) -> DatastoreCandidate {
        DatastoreCandidate {
            name: name.to_string(),
            free_space,
        }
    }

    #[test]
    fn test_max_free_space_among_matches() {
        let candidates = vec![ds("a-ds", 100), ds("a-ds2", 500), ds("b-ds", 900)];
        assert_eq!(select(&candidates, "a-ds").unwrap(), "a-ds2");
    }

    #[test]
    fn test_tie_goes_to_first() {
        let candidates = vec![ds("lun-1", 500), ds("lun-2", 500), ds("lun-3", 10)];
        assert_eq!(select(&candidates, "^lun").unwrap(), "lun-1");
    }

    #[test]
    fn test_no_match() {
        let err = select(&[], "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("'x'"));

        let err = select(&[ds("a", 1)], "zzz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = select(&[ds("a", 1)], "(unclosed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_clone_override() {
        let names = vec![
            "local-ssd".to_string(),
            "prod-VMstore-01".to_string(),
            "prod-VMstore-02".to_string(),
        ];
        assert_eq!(clone_override(&names), Some("prod-VMstore-02"));
        assert_eq!(clone_override(&names[..1]), None);
    }

    proptest! {
        #[test]
        fn prop_selected_is_first_maximum(free in prop::collection::vec(0u64..1_000, 1..20)) {
            let candidates: Vec<_> = free
                .iter()
                .enumerate()
                .map(|(i, f)| ds(&format!("ds-{}", i), *f))
                .collect();

            let chosen = select(&candidates, "^ds-").unwrap();
            let max = *free.iter().max().unwrap();
            let first_max = free.iter().position(|f| *f == max).unwrap();
            prop_assert_eq!(chosen, format!("ds-{}", first_max));
        }
    }
}
