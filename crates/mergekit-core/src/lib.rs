//! Configurable deep-merge engine for record graphs
//!
//! Merges one or more records (nested key/value containers with optional
//! accessor properties and prototype-chain inheritance) into a single
//! freshly allocated record. Behavior is driven by [`MergeSettings`]: key
//! allow/deny lists and multiplicity policies, array append/prepend/dedup/
//! sort strategies, getter/setter handling, prototype merging, and four
//! per-property hooks (`filter`, `before_each`, `after_each`,
//! `on_circular`). Circular sources merge into results with the same cycle
//! topology instead of recursing forever.
//!
//! ```
//! use mergekit_core::{merge, MergeSettings, RecordBuilder, Value};
//!
//! let obj1 = RecordBuilder::new().field("a", 1).field("b", 2).build();
//! let obj2 = RecordBuilder::new().field("b", 3).field("c", 4).build();
//!
//! let merged = merge(&[obj1, obj2], &MergeSettings::default())?;
//! assert_eq!(merged.get("b"), Some(Value::from(3)));
//! # Ok::<(), mergekit_core::MergeError>(())
//! ```

mod arrays;
pub mod engine;
pub mod error;
pub mod keys;
pub mod settings;
pub mod value;

pub use engine::{merge, merge_one};
pub use error::{HookError, HookKind, MergeError};
pub use settings::{
    AfterContext, AfterHook, FilterHook, HookContext, HookOverride, KeyValueFilter, MergeSettings,
    OverrideHook, SortComparator, SortSpec,
};
pub use value::{Getter, PropertyShape, RecordBuilder, RecordRef, Setter, Slot, Value};
