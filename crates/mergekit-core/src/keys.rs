//! Key-selection helpers for the multiplicity-based key policies

use std::collections::BTreeMap;

use crate::settings::MergeSettings;
use crate::value::RecordRef;

/// Returns a map of key occurrences across the given key lists.
///
/// ```
/// use mergekit_core::keys::count_occurrences;
///
/// let counts = count_occurrences(&[
///     vec!["a".to_string(), "b".to_string()],
///     vec!["b".to_string(), "c".to_string()],
/// ]);
/// assert_eq!(counts.get("b"), Some(&2));
/// assert_eq!(counts.get("c"), Some(&1));
/// ```
pub fn count_occurrences(lists: &[Vec<String>]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for list in lists {
        for key in list {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Returns keys found in all lists, in first-list order.
///
/// ```
/// use mergekit_core::keys::in_all;
///
/// let keys = in_all(&[
///     vec!["a".to_string(), "b".to_string(), "c".to_string()],
///     vec!["b".to_string(), "c".to_string(), "d".to_string()],
///     vec!["c".to_string(), "d".to_string(), "e".to_string()],
/// ]);
/// assert_eq!(keys, vec!["c".to_string()]);
/// ```
pub fn in_all(lists: &[Vec<String>]) -> Vec<String> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    rest.iter().fold(first.clone(), |acc, list| {
        acc.into_iter().filter(|key| list.contains(key)).collect()
    })
}

/// Returns keys found in multiple (possibly all) lists.
///
/// ```
/// use mergekit_core::keys::in_multiple;
///
/// let keys = in_multiple(&[
///     vec!["a".to_string(), "b".to_string(), "c".to_string()],
///     vec!["b".to_string(), "c".to_string(), "d".to_string()],
///     vec!["c".to_string(), "d".to_string(), "e".to_string()],
/// ]);
/// assert_eq!(keys, vec!["b".to_string(), "c".to_string(), "d".to_string()]);
/// ```
pub fn in_multiple(lists: &[Vec<String>]) -> Vec<String> {
    count_occurrences(lists)
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| decode_key_literal(&key))
        .collect()
}

/// Returns keys not found in all lists.
///
/// ```
/// use mergekit_core::keys::not_in_all;
///
/// let keys = not_in_all(&[
///     vec!["a".to_string(), "b".to_string()],
///     vec!["b".to_string(), "c".to_string()],
/// ]);
/// assert_eq!(keys, vec!["a".to_string(), "c".to_string()]);
/// ```
pub fn not_in_all(lists: &[Vec<String>]) -> Vec<String> {
    let total = lists.len();
    count_occurrences(lists)
        .into_iter()
        .filter(|(_, count)| *count < total)
        .map(|(key, _)| decode_key_literal(&key))
        .collect()
}

/// Returns keys found in exactly one list.
///
/// ```
/// use mergekit_core::keys::not_in_multiple;
///
/// let keys = not_in_multiple(&[
///     vec!["a".to_string(), "b".to_string(), "c".to_string()],
///     vec!["b".to_string(), "c".to_string(), "d".to_string()],
///     vec!["c".to_string(), "d".to_string(), "e".to_string()],
/// ]);
/// assert_eq!(keys, vec!["a".to_string(), "e".to_string()]);
/// ```
pub fn not_in_multiple(lists: &[Vec<String>]) -> Vec<String> {
    count_occurrences(lists)
        .into_iter()
        .filter(|(_, count)| *count == 1)
        .map(|(key, _)| decode_key_literal(&key))
        .collect()
}

/// Best-effort recovery of a counted key's literal form: keys that parse as
/// JSON scalars re-render canonically, everything else stays verbatim.
///
/// This is lossy by construction (the string `"2"` and the number `2` count
/// as the same key), a known approximation rather than a faithful round
/// trip.
fn decode_key_literal(key: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(key) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(literal) => literal.to_string(),
        Err(_) => key.to_string(),
    }
}

/// Resolves the multiplicity policy and `only_keys` into a shared key list
/// for this merge step, or `None` when each source should fall back to its
/// own key set.
pub(crate) fn resolve_key_policy(
    sources: &[RecordRef],
    settings: &MergeSettings,
) -> Option<Vec<String>> {
    let mut key_list: Option<Vec<String>> = None;

    if sources.len() > 1 {
        let key_sets: Vec<Vec<String>> = sources
            .iter()
            .map(|source| source.keys(settings.hoist_enumerable))
            .collect();

        // Fixed priority order; the first set flag wins.
        if settings.only_common_keys {
            key_list = Some(in_multiple(&key_sets));
        } else if settings.only_universal_keys {
            key_list = Some(in_all(&key_sets));
        } else if settings.skip_common_keys {
            key_list = Some(not_in_multiple(&key_sets));
        } else if settings.skip_universal_keys {
            key_list = Some(not_in_all(&key_sets));
        }
    }

    if !settings.only_keys.is_empty() {
        match &mut key_list {
            None => key_list = Some(settings.only_keys.clone()),
            Some(list) => list.retain(|key| settings.only_keys.contains(key)),
        }
    }

    if let Some(list) = &key_list {
        tracing::trace!(keys = ?list, "resolved key policy");
    }
    key_list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RecordBuilder;

    fn lists(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|list| list.iter().map(|key| key.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_in_multiple() {
        assert_eq!(in_multiple(&lists(&[&["1", "2"], &["2", "3"]])), vec!["2"]);
        assert_eq!(
            in_multiple(&lists(&[&["1", "2", "3"], &["2", "3", "4"], &["3", "4", "5"]])),
            vec!["2", "3", "4"]
        );
        assert_eq!(
            in_multiple(&lists(&[
                &["1", "2", "3", "x"],
                &["2", "3", "4", "x"],
                &["3", "4", "5"]
            ])),
            vec!["2", "3", "4", "x"]
        );
    }

    #[test]
    fn test_in_all() {
        assert_eq!(in_all(&lists(&[&["1", "2"], &["2", "3"]])), vec!["2"]);
        assert_eq!(
            in_all(&lists(&[&["1", "2", "3"], &["2", "3", "4"], &["3", "4", "5"]])),
            vec!["3"]
        );
        assert_eq!(
            in_all(&lists(&[
                &["1", "2", "3", "x"],
                &["2", "3", "4", "x"],
                &["3", "4", "5"]
            ])),
            vec!["3"]
        );
    }

    #[test]
    fn test_not_in_multiple() {
        assert_eq!(
            not_in_multiple(&lists(&[&["1", "2"], &["2", "3"]])),
            vec!["1", "3"]
        );
        assert_eq!(
            not_in_multiple(&lists(&[&["1", "2", "3"], &["2", "3", "4"], &["3", "4", "5"]])),
            vec!["1", "5"]
        );
    }

    #[test]
    fn test_not_in_all() {
        assert_eq!(not_in_all(&lists(&[&["1", "2"], &["2", "3"]])), vec!["1", "3"]);
        assert_eq!(
            not_in_all(&lists(&[&["1", "2", "3"], &["2", "3", "4"], &["3", "4", "5"]])),
            vec!["1", "2", "4", "5"]
        );
    }

    #[test]
    fn test_decode_key_literal() {
        assert_eq!(decode_key_literal("a"), "a");
        assert_eq!(decode_key_literal("2"), "2");
        assert_eq!(decode_key_literal("true"), "true");
        assert_eq!(decode_key_literal("\"quoted\""), "quoted");
    }

    #[test]
    fn test_policy_priority_order() {
        let a = RecordBuilder::new().field("a", 1).field("b", 1).build();
        let b = RecordBuilder::new().field("b", 2).field("c", 2).build();
        let sources = vec![a, b];

        // only_common_keys wins over skip_universal_keys.
        let settings = MergeSettings {
            only_common_keys: true,
            skip_universal_keys: true,
            ..Default::default()
        };
        assert_eq!(
            resolve_key_policy(&sources, &settings),
            Some(vec!["b".to_string()])
        );
    }

    #[test]
    fn test_only_keys_intersects_policy_list() {
        let a = RecordBuilder::new().field("a", 1).field("b", 1).build();
        let b = RecordBuilder::new().field("a", 2).field("b", 2).build();
        let sources = vec![a, b];

        let settings = MergeSettings {
            only_common_keys: true,
            only_keys: vec!["b".to_string(), "z".to_string()],
            ..Default::default()
        };
        assert_eq!(
            resolve_key_policy(&sources, &settings),
            Some(vec!["b".to_string()])
        );
    }

    #[test]
    fn test_only_keys_without_policy_becomes_the_list() {
        let a = RecordBuilder::new().field("a", 1).build();
        let settings = MergeSettings {
            only_keys: vec!["a".to_string(), "zz".to_string()],
            ..Default::default()
        };
        assert_eq!(
            resolve_key_policy(&[a], &settings),
            Some(vec!["a".to_string(), "zz".to_string()])
        );
    }

    #[test]
    fn test_no_policy_yields_none() {
        let a = RecordBuilder::new().field("a", 1).build();
        let b = RecordBuilder::new().field("b", 2).build();
        assert_eq!(resolve_key_policy(&[a, b], &MergeSettings::default()), None);
    }
}
