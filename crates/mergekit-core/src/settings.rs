//! Merge configuration and user hook surfaces
//!
//! Settings are resolved once per top-level [`merge`](crate::merge) call;
//! callers overlay the fields they care about onto [`MergeSettings::default`]
//! with struct-update syntax. Hooks are optional function fields: an unset
//! hook is distinguishable from a hook that ran and declined to override
//! (returned `Ok(None)`).

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::error::HookError;
use crate::value::{RecordRef, Slot, Value};

/// Per-property inspection hook. `Ok(Some(false))` skips the key entirely;
/// `Ok(Some(true))` and `Ok(None)` continue the pipeline.
pub type FilterHook = Rc<dyn Fn(&HookContext) -> Result<Option<bool>, HookError>>;

/// Value-replacing hook (`before_each`, `on_circular`). `Ok(None)` means
/// "no opinion"; `Ok(Some(..))` overrides the pending merge value.
pub type OverrideHook = Rc<dyn Fn(&HookContext) -> Result<Option<HookOverride>, HookError>>;

/// Post-assembly hook (`after_each`), invoked with the value about to be
/// committed.
pub type AfterHook = Rc<dyn Fn(&AfterContext) -> Result<Option<HookOverride>, HookError>>;

/// Array sort comparator.
pub type SortComparator = Rc<dyn Fn(&Value, &Value) -> Ordering>;

/// Replacement produced by a hook.
#[derive(Clone, Debug)]
pub enum HookOverride {
    /// Replaces the merge value; committed as a standard data slot.
    Value(Value),
    /// Installs a full property descriptor verbatim, bypassing descriptor
    /// synthesis.
    Descriptor(Slot),
}

/// Context passed to `filter`, `before_each`, and `on_circular`.
pub struct HookContext<'a> {
    /// Recursion nesting level; 0 at the top-level call.
    pub depth: usize,
    pub key: &'a str,
    pub src_obj: &'a RecordRef,
    pub src_val: &'a Value,
    pub target_obj: &'a RecordRef,
    /// The target's current value for this key, if any.
    pub target_val: Option<&'a Value>,
}

/// Context passed to `after_each`; `merge_val` is the value about to be
/// committed.
pub struct AfterContext<'a> {
    pub depth: usize,
    pub key: &'a str,
    pub merge_val: &'a Value,
    pub src_obj: &'a RecordRef,
    pub target_obj: &'a RecordRef,
}

/// Required key/value pair for the structural source filter
/// (`only_object_with_key_values`). A source record is skipped unless the
/// key is absent or strict-equal to `value`.
#[derive(Clone, Debug)]
pub struct KeyValueFilter {
    pub key: String,
    pub value: Value,
}

/// Array sorting policy.
#[derive(Clone, Default)]
pub enum SortSpec {
    #[default]
    Unsorted,
    /// Stable sort by the values' display form (numbers sort as strings).
    Default,
    /// Stable sort with a user comparator.
    Comparator(SortComparator),
}

impl SortSpec {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, SortSpec::Unsorted)
    }
}

impl fmt::Debug for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortSpec::Unsorted => write!(f, "Unsorted"),
            SortSpec::Default => write!(f, "Default"),
            SortSpec::Comparator(_) => write!(f, "Comparator(..)"),
        }
    }
}

/// Merge behavior configuration. All policies default to off; unknown
/// combinations are never rejected, the documented priority order decides.
#[derive(Clone, Default)]
pub struct MergeSettings {
    // Keys
    /// Exclusive list of keys to merge (applies at every nesting level).
    pub only_keys: Vec<String>,
    /// Keys to skip, applied per source object after every other filter.
    pub skip_keys: Vec<String>,
    /// Merge only keys found in more than one source object.
    pub only_common_keys: bool,
    /// Merge only keys found in all source objects.
    pub only_universal_keys: bool,
    /// Skip keys found in more than one source object.
    pub skip_common_keys: bool,
    /// Skip keys found in all source objects.
    pub skip_universal_keys: bool,
    /// Skip source objects whose matching keys differ from these values.
    pub only_object_with_key_values: Vec<KeyValueFilter>,

    // Values
    /// Replace getters with their computed values in the result.
    pub invoke_getters: bool,
    /// Drop setters instead of carrying them into the result.
    pub skip_setters: bool,

    // Arrays
    /// Concatenate a source array after an existing target array.
    pub append_arrays: bool,
    /// Concatenate a source array before an existing target array.
    pub prepend_arrays: bool,
    /// Remove duplicate array elements (structural for record elements).
    pub dedup_arrays: bool,
    /// Sort merged arrays.
    pub sort_arrays: SortSpec,

    // Prototypes
    /// Include enumerable prototype-chain keys in each source's key set.
    pub hoist_enumerable: bool,
    /// Merge the combined prototype's properties into the result's own
    /// properties instead of attaching it as a prototype.
    pub hoist_proto: bool,
    /// Leave prototypes alone entirely.
    pub skip_proto: bool,

    // Hooks
    pub filter: Option<FilterHook>,
    pub before_each: Option<OverrideHook>,
    pub after_each: Option<AfterHook>,
    pub on_circular: Option<OverrideHook>,
}

impl fmt::Debug for MergeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSettings")
            .field("only_keys", &self.only_keys)
            .field("skip_keys", &self.skip_keys)
            .field("only_common_keys", &self.only_common_keys)
            .field("only_universal_keys", &self.only_universal_keys)
            .field("skip_common_keys", &self.skip_common_keys)
            .field("skip_universal_keys", &self.skip_universal_keys)
            .field(
                "only_object_with_key_values",
                &self.only_object_with_key_values,
            )
            .field("invoke_getters", &self.invoke_getters)
            .field("skip_setters", &self.skip_setters)
            .field("append_arrays", &self.append_arrays)
            .field("prepend_arrays", &self.prepend_arrays)
            .field("dedup_arrays", &self.dedup_arrays)
            .field("sort_arrays", &self.sort_arrays)
            .field("hoist_enumerable", &self.hoist_enumerable)
            .field("hoist_proto", &self.hoist_proto)
            .field("skip_proto", &self.skip_proto)
            .field("filter", &self.filter.is_some())
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .field("on_circular", &self.on_circular.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_all_off() {
        let settings = MergeSettings::default();

        assert!(settings.only_keys.is_empty());
        assert!(settings.skip_keys.is_empty());
        assert!(!settings.only_common_keys);
        assert!(!settings.append_arrays);
        assert!(!settings.sort_arrays.is_enabled());
        assert!(settings.filter.is_none());
        assert!(settings.on_circular.is_none());
    }

    #[test]
    fn test_debug_reports_hook_presence() {
        let settings = MergeSettings {
            filter: Some(Rc::new(|_| Ok(None))),
            ..Default::default()
        };
        let rendered = format!("{:?}", settings);

        assert!(rendered.contains("filter: true"));
        assert!(rendered.contains("after_each: false"));
    }
}
