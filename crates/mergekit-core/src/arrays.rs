//! Array combination strategies: append/prepend, dedup, and sort
//!
//! Dedup and sort run in one of two modes. With an `after_each` hook
//! registered they run inline at assembly time so the hook observes the
//! final value; without one they are deferred and batched per target record
//! after all sources have been merged, which is cheaper.

use crate::error::MergeError;
use crate::settings::{MergeSettings, SortSpec};
use crate::value::{PropertyShape, RecordRef, Slot, Value};

/// Combines a (shallow-copied) source array with the target's current value
/// for the same key.
pub(crate) fn combine(
    items: Vec<Value>,
    target_val: Option<&Value>,
    settings: &MergeSettings,
) -> Vec<Value> {
    let mut combined = items;
    if let Some(Value::Array(existing)) = target_val {
        if settings.append_arrays {
            let mut appended = existing.clone();
            appended.extend(combined);
            combined = appended;
        } else if settings.prepend_arrays {
            combined.extend(existing.iter().cloned());
        }
    }
    combined
}

/// Removes duplicate elements, keeping first occurrences in order. Record
/// elements compare by canonical JSON, everything else by strict equality.
///
/// # Errors
///
/// Returns [`MergeError::CyclicValue`] when a record element participates
/// in a reference cycle.
pub(crate) fn dedup(items: &[Value]) -> Result<Vec<Value>, MergeError> {
    let mut seen_records: Vec<String> = Vec::new();
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        let duplicate = match item {
            Value::Record(_) => {
                let canonical = item.canonical_json()?;
                if seen_records.contains(&canonical) {
                    true
                } else {
                    seen_records.push(canonical);
                    false
                }
            }
            _ => out.iter().any(|existing| existing == item),
        };
        if !duplicate {
            out.push(item.clone());
        }
    }
    Ok(out)
}

/// Stable in-place sort per the configured policy.
pub(crate) fn sort(items: &mut [Value], spec: &SortSpec) {
    match spec {
        SortSpec::Unsorted => {}
        SortSpec::Default => items.sort_by(|a, b| display_form(a).cmp(&display_form(b))),
        SortSpec::Comparator(comparator) => items.sort_by(|a, b| comparator(a, b)),
    }
}

/// Display form used by the default sort ordering: numbers sort as their
/// decimal strings, like a stringly default sort.
fn display_form(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Value::String(s) => s.clone(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Date(date) => date.to_rfc3339(),
        Value::Array(items) => items
            .iter()
            .map(display_form)
            .collect::<Vec<_>>()
            .join(","),
        Value::Record(_) => "[record]".to_string(),
    }
}

/// Deferred dedup/sort bookkeeping, keyed by target record identity. Scoped
/// to one merge step and resolved once all sources are processed.
#[derive(Default)]
pub(crate) struct DeferredArrayWork {
    dedup: Vec<(RecordRef, Vec<String>)>,
    sort: Vec<(RecordRef, Vec<String>)>,
}

impl DeferredArrayWork {
    pub(crate) fn track_dedup(&mut self, target: &RecordRef, key: &str) {
        Self::track(&mut self.dedup, target, key);
    }

    pub(crate) fn track_sort(&mut self, target: &RecordRef, key: &str) {
        Self::track(&mut self.sort, target, key);
    }

    fn track(list: &mut Vec<(RecordRef, Vec<String>)>, target: &RecordRef, key: &str) {
        if let Some((_, keys)) = list
            .iter_mut()
            .find(|(tracked, _)| tracked.same_identity(target))
        {
            if !keys.iter().any(|tracked_key| tracked_key == key) {
                keys.push(key.to_string());
            }
        } else {
            list.push((target.clone(), vec![key.to_string()]));
        }
    }

    /// Applies pending dedup then sort work and clears the queues. Both
    /// passes read through accessors and re-install the key as a static
    /// data slot (flags preserved) so arrays received from getters end up
    /// materialized.
    pub(crate) fn resolve(&mut self, settings: &MergeSettings) -> Result<(), MergeError> {
        if self.dedup.is_empty() && self.sort.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            dedup_targets = self.dedup.len(),
            sort_targets = self.sort.len(),
            "resolving deferred array work"
        );

        for (target, keys) in self.dedup.drain(..) {
            for key in keys {
                let Some(slot) = target.own_slot(&key) else {
                    continue;
                };
                if let Value::Array(items) = slot.read() {
                    let deduped = dedup(&items)?;
                    let writable = match &slot.shape {
                        PropertyShape::Data { writable, .. } => *writable,
                        PropertyShape::Accessor { .. } => true,
                    };
                    target.define(
                        &key,
                        Slot {
                            shape: PropertyShape::Data {
                                value: Value::Array(deduped),
                                writable,
                            },
                            enumerable: slot.enumerable,
                            configurable: slot.configurable,
                        },
                    );
                }
            }
        }

        for (target, keys) in self.sort.drain(..) {
            for key in keys {
                let Some(slot) = target.own_slot(&key) else {
                    continue;
                };
                if let Value::Array(mut items) = slot.read() {
                    sort(&mut items, &settings.sort_arrays);
                    let writable = match &slot.shape {
                        PropertyShape::Data { writable, .. } => *writable,
                        PropertyShape::Accessor { .. } => true,
                    };
                    target.define(
                        &key,
                        Slot {
                            shape: PropertyShape::Data {
                                value: Value::Array(items),
                                writable,
                            },
                            enumerable: slot.enumerable,
                            configurable: slot.configurable,
                        },
                    );
                }
            }
        }
        Ok(())
    }
}
