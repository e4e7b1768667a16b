//! Recursive merge engine
//!
//! One [`MergeState`] lives for the duration of a top-level [`merge`] call
//! and owns the circular-reference tracker and the deferred array work;
//! neither outlives the call or is visible to concurrent calls. Each
//! recursion site runs [`MergeState::merge_step`] against an ordered list
//! of source records and produces exactly one freshly allocated target,
//! fully finalized before it is returned.

use std::collections::HashMap;

use crate::arrays::{self, DeferredArrayWork};
use crate::error::{HookError, HookKind, MergeError};
use crate::keys;
use crate::settings::{AfterContext, HookContext, HookOverride, MergeSettings};
use crate::value::{PropertyShape, RecordRef, Slot, Value};

/// Merges the given records, in order, into one freshly allocated record.
/// Later sources win on key collision, subject to the configured policies
/// and hooks. The result never aliases an input record or its nested
/// containers; accessor function pairs are the only values carried by
/// reference.
///
/// ```
/// use mergekit_core::{merge, MergeSettings, RecordBuilder, Value};
///
/// let obj1 = RecordBuilder::new().field("a", 1).field("b", 2).build();
/// let obj2 = RecordBuilder::new().field("b", 3).field("c", 4).build();
///
/// let merged = merge(&[obj1, obj2], &MergeSettings::default())?;
/// assert_eq!(merged.get("a"), Some(Value::from(1)));
/// assert_eq!(merged.get("b"), Some(Value::from(3)));
/// # Ok::<(), mergekit_core::MergeError>(())
/// ```
///
/// # Errors
///
/// Propagates [`MergeError::Hook`] when a user hook fails and
/// [`MergeError::CyclicValue`] when structural array deduplication meets a
/// cyclic record. A failed merge returns no partial result.
pub fn merge(objects: &[RecordRef], settings: &MergeSettings) -> Result<RecordRef, MergeError> {
    tracing::debug!(sources = objects.len(), "merge");
    let mut state = MergeState::new(settings);
    state.merge_step(objects)
}

/// Clones a single record through the merge pipeline.
///
/// # Errors
///
/// Same failure modes as [`merge`].
pub fn merge_one(object: &RecordRef, settings: &MergeSettings) -> Result<RecordRef, MergeError> {
    merge(std::slice::from_ref(object), settings)
}

struct MergeState<'s> {
    settings: &'s MergeSettings,
    depth: usize,
    /// Source record identity -> target under construction for it.
    circular: HashMap<usize, RecordRef>,
    deferred: DeferredArrayWork,
}

impl<'s> MergeState<'s> {
    fn new(settings: &'s MergeSettings) -> Self {
        MergeState {
            settings,
            depth: 0,
            circular: HashMap::new(),
            deferred: DeferredArrayWork::default(),
        }
    }

    /// One merge step: sources in order into one fresh target.
    fn merge_step(&mut self, sources: &[RecordRef]) -> Result<RecordRef, MergeError> {
        let target = RecordRef::new();
        tracing::trace!(sources = sources.len(), depth = self.depth, "merge step");

        let policy_keys = keys::resolve_key_policy(sources, self.settings);

        for source in sources {
            // Registered before any key is processed so cycles back into
            // this source resolve to the target even mid-construction.
            self.circular.insert(source.id(), target.clone());

            if !self.source_passes_structural_filter(source) {
                tracing::trace!("source skipped by structural filter");
                continue;
            }

            let mut key_list = match &policy_keys {
                Some(list) => list.clone(),
                None => source.keys(self.settings.hoist_enumerable),
            };
            if !self.settings.skip_keys.is_empty() {
                key_list.retain(|key| !self.settings.skip_keys.contains(key));
            }

            for key in &key_list {
                self.merge_key(source, &target, key)?;
            }
        }

        self.deferred.resolve(self.settings)?;

        // Prototype merging: combine the sources' non-default prototypes
        // and hoist or attach the result.
        if !self.settings.skip_proto {
            let protos: Vec<RecordRef> = sources.iter().filter_map(|s| s.proto()).collect();
            if !protos.is_empty() {
                let merged_proto = self.merge_step(&protos)?;
                if self.settings.hoist_proto {
                    // Prototype acts as an additional first source.
                    return self.merge_step(&[merged_proto, target]);
                }
                target.set_proto(Some(merged_proto));
            }
        }

        Ok(target)
    }

    /// `only_object_with_key_values`: every required pair must be absent
    /// from the source's own enumerable keys or strict-equal.
    fn source_passes_structural_filter(&self, source: &RecordRef) -> bool {
        self.settings
            .only_object_with_key_values
            .iter()
            .all(|required| {
                let present = source
                    .own_slot(&required.key)
                    .is_some_and(|slot| slot.enumerable);
                if !present {
                    return true;
                }
                source.get(&required.key).as_ref() == Some(&required.value)
            })
    }

    /// The per-key decision pipeline.
    fn merge_key(&mut self, source: &RecordRef, target: &RecordRef, key: &str) -> Result<(), MergeError> {
        // 1. Absent keys (prototype chain included) are skipped outright.
        if !source.has_key(key) {
            return Ok(());
        }

        let src_slot = source.own_slot(key);

        // 2. Setter-only properties copy their descriptor verbatim and
        // bypass the rest of the pipeline.
        if let Some(slot) = &src_slot {
            if slot.is_setter_only() {
                if !self.settings.skip_setters {
                    target.define(key, slot.clone());
                }
                return Ok(());
            }
        }

        let src_val = source.get(key).unwrap_or(Value::Null);
        let target_val = target.get(key);

        // 3. filter: a defined `false` skips the key entirely.
        if let Some(filter) = &self.settings.filter {
            let decision = filter(&HookContext {
                depth: self.depth,
                key,
                src_obj: source,
                src_val: &src_val,
                target_obj: target,
                target_val: target_val.as_ref(),
            })
            .map_err(|err| hook_error(HookKind::Filter, key, err))?;
            if decision == Some(false) {
                tracing::trace!(key, "filter hook skipped key");
                return Ok(());
            }
        }

        let mut override_active = false;
        let mut descriptor_override: Option<Slot> = None;
        let mut merge_val = src_val.clone();

        // 4. before_each: a defined return replaces the merge value.
        if let Some(before_each) = &self.settings.before_each {
            let decision = before_each(&HookContext {
                depth: self.depth,
                key,
                src_obj: source,
                src_val: &src_val,
                target_obj: target,
                target_val: target_val.as_ref(),
            })
            .map_err(|err| hook_error(HookKind::BeforeEach, key, err))?;
            if let Some(replacement) = decision {
                override_active = true;
                match replacement {
                    HookOverride::Value(value) => merge_val = value,
                    HookOverride::Descriptor(slot) => descriptor_override = Some(slot),
                }
            }
        }

        // 5. Cycle check, keyed on the original source value's identity.
        let merge_val_is_object = descriptor_override.is_some() || merge_val.is_object_like();
        if merge_val_is_object {
            if let Value::Record(src_record) = &src_val {
                if let Some(tracked) = self.circular.get(&src_record.id()).cloned() {
                    tracing::debug!(key, depth = self.depth, "circular reference");
                    let decision = match &self.settings.on_circular {
                        Some(on_circular) => on_circular(&HookContext {
                            depth: self.depth,
                            key,
                            src_obj: source,
                            src_val: &src_val,
                            target_obj: target,
                            target_val: target_val.as_ref(),
                        })
                        .map_err(|err| hook_error(HookKind::OnCircular, key, err))?,
                        None => None,
                    };
                    match decision {
                        None => {
                            // Resolve to the target already being built for
                            // this source; nothing else runs for this key.
                            target.set(key, Value::Record(tracked));
                            return Ok(());
                        }
                        Some(HookOverride::Value(value)) => {
                            override_active = true;
                            descriptor_override = None;
                            merge_val = value;
                        }
                        Some(HookOverride::Descriptor(slot)) => {
                            override_active = true;
                            descriptor_override = Some(slot);
                        }
                    }
                }
            }
        }

        // 6. Type dispatch (descriptor overrides skip it).
        if descriptor_override.is_none() {
            merge_val = self.dispatch(merge_val, target_val.as_ref(), target, key)?;
        }

        // 7. after_each: a defined return replaces the committed value.
        if let Some(after_each) = &self.settings.after_each {
            let committed_view = match &descriptor_override {
                Some(slot) => match &slot.shape {
                    PropertyShape::Data { value, .. } => value.clone(),
                    PropertyShape::Accessor { .. } => Value::Null,
                },
                None => merge_val.clone(),
            };
            let decision = after_each(&AfterContext {
                depth: self.depth,
                key,
                merge_val: &committed_view,
                src_obj: source,
                target_obj: target,
            })
            .map_err(|err| hook_error(HookKind::AfterEach, key, err))?;
            if let Some(replacement) = decision {
                override_active = true;
                match replacement {
                    HookOverride::Value(value) => {
                        merge_val = value;
                        descriptor_override = None;
                    }
                    HookOverride::Descriptor(slot) => descriptor_override = Some(slot),
                }
            }
        }

        // 8. Hook overrides commit directly and end the pipeline.
        if override_active {
            let slot = match descriptor_override {
                Some(slot) => slot,
                None => Slot::data(merge_val),
            };
            target.define(key, slot);
            return Ok(());
        }

        // 9. Default path: synthesize the descriptor from the source's own
        // descriptor.
        target.define(key, synthesize_slot(src_slot.as_ref(), merge_val, self.settings));
        Ok(())
    }

    /// Closed type dispatch over the merge value, in precedence order:
    /// arrays, dates, byte strings, records, then scalars as-is.
    fn dispatch(
        &mut self,
        merge_val: Value,
        target_val: Option<&Value>,
        target: &RecordRef,
        key: &str,
    ) -> Result<Value, MergeError> {
        match merge_val {
            Value::Array(items) => {
                let mut combined = arrays::combine(items, target_val, self.settings);
                if self.settings.dedup_arrays {
                    if self.settings.after_each.is_some() {
                        combined = arrays::dedup(&combined)?;
                    } else {
                        self.deferred.track_dedup(target, key);
                    }
                }
                if self.settings.sort_arrays.is_enabled() {
                    if self.settings.after_each.is_some() {
                        arrays::sort(&mut combined, &self.settings.sort_arrays);
                    } else {
                        self.deferred.track_sort(target, key);
                    }
                }
                Ok(Value::Array(combined))
            }
            Value::Date(date) => Ok(Value::Date(date)),
            Value::Bytes(bytes) => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
            Value::Record(record) => {
                self.depth += 1;
                let merged = match target_val {
                    Some(Value::Record(existing)) => {
                        self.merge_step(&[existing.clone(), record])
                    }
                    _ => self.merge_step(std::slice::from_ref(&record)),
                };
                self.depth -= 1;
                Ok(Value::Record(merged?))
            }
            scalar => Ok(scalar),
        }
    }
}

fn hook_error(hook: HookKind, key: &str, source: HookError) -> MergeError {
    MergeError::Hook {
        hook,
        key: key.to_string(),
        source,
    }
}

/// Builds the slot committed for a key when no hook override is in effect:
/// the source descriptor's flags are preserved, getters are invoked or
/// carried per `invoke_getters`, setters carried unless `skip_setters`, and
/// plain values keep the source's `writable` flag.
fn synthesize_slot(src_slot: Option<&Slot>, merge_val: Value, settings: &MergeSettings) -> Slot {
    let Some(src_slot) = src_slot else {
        // Inherited (hoisted) key with no own descriptor: standard data slot.
        return Slot::data(merge_val);
    };

    let shape = match &src_slot.shape {
        PropertyShape::Data { writable, .. } => PropertyShape::Data {
            value: merge_val,
            writable: *writable,
        },
        PropertyShape::Accessor { get, set } => {
            let kept_set = if settings.skip_setters {
                None
            } else {
                set.clone()
            };
            match get {
                Some(_) if settings.invoke_getters => PropertyShape::Data {
                    // Computed values from invoked getters end up
                    // non-writable (an accessor descriptor carries no
                    // writable flag).
                    value: merge_val,
                    writable: false,
                },
                Some(getter) => PropertyShape::Accessor {
                    get: Some(getter.clone()),
                    set: kept_set,
                },
                // Degenerate accessor with neither half; falls back to a
                // plain writable value.
                None => PropertyShape::Data {
                    value: merge_val,
                    writable: true,
                },
            }
        }
    };

    Slot {
        shape,
        enumerable: src_slot.enumerable,
        configurable: src_slot.configurable,
    }
}
