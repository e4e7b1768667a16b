//! Runtime value model for merge sources and results
//!
//! Merge inputs are graphs, not trees: a record can appear in several
//! places (including inside itself), so records are shared-identity handles
//! ([`RecordRef`]) while every other value has plain value semantics.
//! Properties are [`Slot`]s carrying either a stored value or an accessor
//! pair plus the enumerable/configurable flags, so accessor-preserving
//! merges can be expressed faithfully.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::MergeError;

/// Getter half of an accessor slot. Invoked on property reads and carried
/// by reference (`Rc` clone) across the merge boundary.
pub type Getter = Rc<dyn Fn() -> Value>;

/// Setter half of an accessor slot.
pub type Setter = Rc<dyn Fn(Value)>;

/// A single value in a record graph.
///
/// Closed sum type: the engine's type dispatch is a `match` over these
/// variants in documented precedence order (arrays before dates before byte
/// strings before records).
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Raw byte string; decoded to UTF-8 text when merged.
    Bytes(Vec<u8>),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    /// Shared-identity record handle. Cloning shares the underlying record.
    Record(RecordRef),
}

impl Value {
    /// Builds a value graph from parsed JSON. Objects become fresh records
    /// with all-default data slots.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let builder = map.iter().fold(RecordBuilder::new(), |builder, (key, value)| {
                    builder.field(key.clone(), Value::from_json(value))
                });
                Value::Record(builder.build())
            }
        }
    }

    /// Serializes the value to JSON. Getters are invoked, setter-only and
    /// non-enumerable slots are skipped, dates render as RFC 3339 strings.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::CyclicValue`] when the graph contains a
    /// reference cycle.
    pub fn to_json(&self) -> Result<serde_json::Value, MergeError> {
        serde_json::to_value(self).map_err(|_| MergeError::CyclicValue)
    }

    /// Canonical JSON text, used as the structural-equality key for array
    /// deduplication of record elements.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::CyclicValue`] when the graph contains a
    /// reference cycle.
    pub fn canonical_json(&self) -> Result<String, MergeError> {
        serde_json::to_string(self).map_err(|_| MergeError::CyclicValue)
    }

    /// Whether the value is "object-like" for circular-reference purposes
    /// (anything with reference semantics in the source model).
    pub(crate) fn is_object_like(&self) -> bool {
        matches!(
            self,
            Value::Record(_) | Value::Array(_) | Value::Date(_) | Value::Bytes(_)
        )
    }
}

/// Strict equality: primitives and dates compare by value, arrays
/// element-wise, records by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a.same_identity(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<RecordRef> for Value {
    fn from(value: RecordRef) -> Self {
        Value::Record(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

/// The shape of a property: a stored value with a mutability flag, or an
/// accessor pair.
#[derive(Clone)]
pub enum PropertyShape {
    Data { value: Value, writable: bool },
    Accessor {
        get: Option<Getter>,
        set: Option<Setter>,
    },
}

/// Full property descriptor: shape plus visibility flags.
#[derive(Clone)]
pub struct Slot {
    pub shape: PropertyShape,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Slot {
    /// Standard data slot: writable, enumerable, configurable.
    pub fn data(value: Value) -> Slot {
        Slot {
            shape: PropertyShape::Data {
                value,
                writable: true,
            },
            enumerable: true,
            configurable: true,
        }
    }

    /// Accessor slot with the given getter/setter halves, enumerable and
    /// configurable.
    pub fn accessor(get: Option<Getter>, set: Option<Setter>) -> Slot {
        Slot {
            shape: PropertyShape::Accessor { get, set },
            enumerable: true,
            configurable: true,
        }
    }

    /// A slot exposing only a setter.
    pub fn is_setter_only(&self) -> bool {
        matches!(
            &self.shape,
            PropertyShape::Accessor {
                get: None,
                set: Some(_),
            }
        )
    }

    /// Reads the slot's current value, invoking the getter for accessor
    /// slots. Setter-only slots read as [`Value::Null`].
    pub fn read(&self) -> Value {
        match &self.shape {
            PropertyShape::Data { value, .. } => value.clone(),
            PropertyShape::Accessor { get: Some(get), .. } => get(),
            PropertyShape::Accessor { get: None, .. } => Value::Null,
        }
    }
}

#[derive(Default)]
struct Record {
    slots: BTreeMap<String, Slot>,
    proto: Option<RecordRef>,
}

/// Shared-identity handle to a record: an ordered slot map plus an optional
/// prototype. Identity (pointer) equality stands in for reference equality;
/// it keys the circular-reference tracker and the deferred-array maps.
#[derive(Clone)]
pub struct RecordRef(Rc<RefCell<Record>>);

impl RecordRef {
    /// Fresh empty record with the default (absent) prototype.
    pub fn new() -> RecordRef {
        RecordRef(Rc::new(RefCell::new(Record::default())))
    }

    /// Builds a record from a JSON object. Returns `None` for non-object
    /// JSON values.
    pub fn from_json(json: &serde_json::Value) -> Option<RecordRef> {
        match Value::from_json(json) {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Stable identity token for this record.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Whether two handles refer to the same record.
    pub fn same_identity(&self, other: &RecordRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Clone of the record's own slot for `key`, without invoking accessors
    /// or consulting the prototype chain.
    pub fn own_slot(&self, key: &str) -> Option<Slot> {
        self.0.borrow().slots.get(key).cloned()
    }

    /// Whether `key` exists on the record or anywhere on its prototype
    /// chain, regardless of enumerability.
    pub fn has_key(&self, key: &str) -> bool {
        let mut seen = Vec::new();
        let mut current = Some(self.clone());
        while let Some(record) = current {
            if seen.contains(&record.id()) {
                return false;
            }
            seen.push(record.id());
            if record.0.borrow().slots.contains_key(key) {
                return true;
            }
            current = record.proto();
        }
        false
    }

    /// Reads `key` through the prototype chain, invoking getters. Returns
    /// `None` when the key is absent everywhere.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut seen = Vec::new();
        let mut current = Some(self.clone());
        while let Some(record) = current {
            if seen.contains(&record.id()) {
                return None;
            }
            seen.push(record.id());
            if let Some(slot) = record.own_slot(key) {
                return Some(slot.read());
            }
            current = record.proto();
        }
        None
    }

    /// Assigns a value to `key` with plain-assignment semantics: an own
    /// data slot keeps its flags and is updated in place when writable, an
    /// own setter is invoked, a getter-only slot swallows the write, and an
    /// absent key gets a standard data slot.
    pub fn set(&self, key: &str, value: Value) {
        let existing = self.own_slot(key);
        match existing {
            Some(slot) => match &slot.shape {
                PropertyShape::Data { writable, .. } => {
                    if *writable {
                        self.0.borrow_mut().slots.insert(
                            key.to_string(),
                            Slot {
                                shape: PropertyShape::Data {
                                    value,
                                    writable: true,
                                },
                                enumerable: slot.enumerable,
                                configurable: slot.configurable,
                            },
                        );
                    }
                }
                PropertyShape::Accessor { set: Some(set), .. } => set(value),
                PropertyShape::Accessor { set: None, .. } => {}
            },
            None => {
                self.define(key, Slot::data(value));
            }
        }
    }

    /// Installs `slot` for `key`, replacing any existing slot.
    pub fn define(&self, key: &str, slot: Slot) {
        self.0.borrow_mut().slots.insert(key.to_string(), slot);
    }

    /// All own keys (including non-enumerable ones), optionally extended
    /// with enumerable keys inherited from the prototype chain.
    pub fn keys(&self, hoist_enumerable: bool) -> Vec<String> {
        let mut keys: Vec<String> = self.0.borrow().slots.keys().cloned().collect();
        if hoist_enumerable {
            let mut seen = vec![self.id()];
            let mut current = self.proto();
            while let Some(record) = current {
                if seen.contains(&record.id()) {
                    break;
                }
                seen.push(record.id());
                for (key, slot) in record.0.borrow().slots.iter() {
                    if slot.enumerable && !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
                current = record.proto();
            }
        }
        keys
    }

    /// The record's prototype, if it has a non-default one.
    pub fn proto(&self) -> Option<RecordRef> {
        self.0.borrow().proto.clone()
    }

    /// Replaces the record's prototype.
    pub fn set_proto(&self, proto: Option<RecordRef>) {
        self.0.borrow_mut().proto = proto;
    }

    /// Number of own slots.
    pub fn len(&self) -> usize {
        self.0.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().slots.is_empty()
    }

    /// Serializes the record to a JSON object (see [`Value::to_json`]).
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::CyclicValue`] when the graph contains a
    /// reference cycle.
    pub fn to_json(&self) -> Result<serde_json::Value, MergeError> {
        Value::Record(self.clone()).to_json()
    }

    /// Own enumerable entries with getters invoked and setter-only slots
    /// dropped; the view JSON serialization operates on.
    fn enumerable_entries(&self) -> Vec<(String, Value)> {
        // Collect before invoking getters so no borrow is held while user
        // code runs.
        let slots: Vec<(String, Slot)> = self
            .0
            .borrow()
            .slots
            .iter()
            .filter(|(_, slot)| slot.enumerable)
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .filter_map(|(key, slot)| match &slot.shape {
                PropertyShape::Data { value, .. } => Some((key, value.clone())),
                PropertyShape::Accessor { get: Some(get), .. } => Some((key, get())),
                PropertyShape::Accessor { get: None, .. } => None,
            })
            .collect()
    }
}

impl Default for RecordRef {
    fn default() -> Self {
        RecordRef::new()
    }
}

/// Identity equality, matching [`Value`]'s strict-equality semantics.
impl PartialEq for RecordRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

/// Builder for records with data slots, accessors, flags, and a prototype.
pub struct RecordBuilder {
    record: RecordRef,
}

impl RecordBuilder {
    pub fn new() -> RecordBuilder {
        RecordBuilder {
            record: RecordRef::new(),
        }
    }

    /// Adds a standard data slot.
    pub fn field(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.record.define(&key.into(), Slot::data(value.into()));
        self
    }

    /// Adds a fully specified slot.
    pub fn slot(self, key: impl Into<String>, slot: Slot) -> Self {
        self.record.define(&key.into(), slot);
        self
    }

    /// Adds (or completes) an accessor slot with a getter.
    pub fn getter(self, key: impl Into<String>, get: impl Fn() -> Value + 'static) -> Self {
        self.accessor_half(key.into(), Some(Rc::new(get)), None)
    }

    /// Adds (or completes) an accessor slot with a setter.
    pub fn setter(self, key: impl Into<String>, set: impl Fn(Value) + 'static) -> Self {
        self.accessor_half(key.into(), None, Some(Rc::new(set)))
    }

    /// Sets the record's prototype.
    pub fn proto(self, proto: RecordRef) -> Self {
        self.record.set_proto(Some(proto));
        self
    }

    pub fn build(self) -> RecordRef {
        self.record
    }

    fn accessor_half(self, key: String, get: Option<Getter>, set: Option<Setter>) -> Self {
        {
            let mut record = self.record.0.borrow_mut();
            let slot = record
                .slots
                .entry(key)
                .or_insert_with(|| Slot::accessor(None, None));
            match &mut slot.shape {
                PropertyShape::Accessor {
                    get: existing_get,
                    set: existing_set,
                } => {
                    if get.is_some() {
                        *existing_get = get;
                    }
                    if set.is_some() {
                        *existing_set = set;
                    }
                }
                PropertyShape::Data { .. } => {
                    slot.shape = PropertyShape::Accessor { get, set };
                }
            }
        }
        self
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        RecordBuilder::new()
    }
}

// Serialization tracks the stack of in-flight records so reference cycles
// surface as errors instead of unbounded recursion.
thread_local! {
    static SERIALIZE_STACK: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

struct SerializeGuard;

fn enter_serialize(id: usize) -> Option<SerializeGuard> {
    SERIALIZE_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.contains(&id) {
            None
        } else {
            stack.push(id);
            Some(SerializeGuard)
        }
    })
}

impl Drop for SerializeGuard {
    fn drop(&mut self) {
        SERIALIZE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                // Integral floats render without the trailing ".0".
                if n.fract() == 0.0 && n.is_finite() && *n >= i64::MIN as f64 && *n <= i64::MAX as f64
                {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for byte in bytes {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            Value::Date(date) => serializer.serialize_str(&date.to_rfc3339()),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Record(record) => record.serialize(serializer),
        }
    }
}

impl Serialize for RecordRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let Some(_guard) = enter_serialize(self.id()) else {
            return Err(S::Error::custom("cyclic record graph"));
        };
        let entries = self.enumerable_entries();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in &entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, f, &mut Vec::new())
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_record(self, f, &mut Vec::new())
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot(")?;
        fmt_shape(&self.shape, f, &mut Vec::new())?;
        if !self.enumerable {
            write!(f, ", non-enumerable")?;
        }
        if !self.configurable {
            write!(f, ", non-configurable")?;
        }
        write!(f, ")")
    }
}

fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
    match value {
        Value::Null => write!(f, "Null"),
        Value::Bool(b) => write!(f, "Bool({})", b),
        Value::Number(n) => write!(f, "Number({})", n),
        Value::String(s) => write!(f, "String({:?})", s),
        Value::Bytes(bytes) => write!(f, "Bytes(len={})", bytes.len()),
        Value::Date(date) => write!(f, "Date({})", date.to_rfc3339()),
        Value::Array(items) => {
            write!(f, "[")?;
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                fmt_value(item, f, seen)?;
            }
            write!(f, "]")
        }
        Value::Record(record) => fmt_record(record, f, seen),
    }
}

fn fmt_record(record: &RecordRef, f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
    if seen.contains(&record.id()) {
        return write!(f, "<cycle>");
    }
    seen.push(record.id());
    let slots: Vec<(String, Slot)> = record
        .0
        .borrow()
        .slots
        .iter()
        .map(|(key, slot)| (key.clone(), slot.clone()))
        .collect();
    write!(f, "{{")?;
    for (index, (key, slot)) in slots.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: ", key)?;
        fmt_shape(&slot.shape, f, seen)?;
    }
    write!(f, "}}")?;
    seen.pop();
    Ok(())
}

fn fmt_shape(shape: &PropertyShape, f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
    match shape {
        PropertyShape::Data { value, .. } => fmt_value(value, f, seen),
        PropertyShape::Accessor { get, set } => match (get, set) {
            (Some(_), Some(_)) => write!(f, "<accessor get/set>"),
            (Some(_), None) => write!(f, "<accessor get>"),
            (None, Some(_)) => write!(f, "<accessor set>"),
            (None, None) => write!(f, "<accessor>"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_builder_and_get() {
        let record = RecordBuilder::new()
            .field("a", 1)
            .field("b", "two")
            .build();

        assert_eq!(record.get("a"), Some(Value::Number(1.0)));
        assert_eq!(record.get("b"), Some(Value::String("two".to_string())));
        assert_eq!(record.get("missing"), None);
        assert_eq!(record.keys(false), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_getter_invoked_on_read() {
        let record = RecordBuilder::new().getter("a", || Value::from(42)).build();

        assert_eq!(record.get("a"), Some(Value::Number(42.0)));
        let slot = record.own_slot("a").unwrap();
        assert!(matches!(
            slot.shape,
            PropertyShape::Accessor { get: Some(_), .. }
        ));
    }

    #[test]
    fn test_setter_only_slot() {
        let record = RecordBuilder::new().setter("s", |_| {}).build();
        let slot = record.own_slot("s").unwrap();

        assert!(slot.is_setter_only());
        assert_eq!(record.get("s"), Some(Value::Null));
    }

    #[test]
    fn test_prototype_chain_read() {
        let proto = RecordBuilder::new().field("inherited", 7).build();
        let record = RecordBuilder::new().field("own", 1).proto(proto).build();

        assert_eq!(record.get("inherited"), Some(Value::Number(7.0)));
        assert!(record.has_key("inherited"));
        assert!(record.own_slot("inherited").is_none());
        assert_eq!(record.keys(false), vec!["own".to_string()]);
        assert_eq!(
            record.keys(true),
            vec!["own".to_string(), "inherited".to_string()]
        );
    }

    #[test]
    fn test_hoisted_keys_skip_non_enumerable() {
        let proto = RecordBuilder::new()
            .slot(
                "hidden",
                Slot {
                    shape: PropertyShape::Data {
                        value: Value::from(1),
                        writable: true,
                    },
                    enumerable: false,
                    configurable: true,
                },
            )
            .field("visible", 2)
            .build();
        let record = RecordBuilder::new().proto(proto).build();

        assert_eq!(record.keys(true), vec!["visible".to_string()]);
    }

    #[test]
    fn test_json_round_trip() {
        let json = json!({"a": 1, "b": [true, null, "x"], "c": {"d": 2.5}});
        let record = RecordRef::from_json(&json).unwrap();

        assert_eq!(record.to_json().unwrap(), json);
    }

    #[test]
    fn test_cyclic_record_serialization_fails() {
        let record = RecordBuilder::new().field("a", 1).build();
        record.set("me", Value::Record(record.clone()));

        assert!(matches!(record.to_json(), Err(MergeError::CyclicValue)));
        // The guard stack unwinds, so a later serialization still works.
        let plain = RecordBuilder::new().field("a", 1).build();
        assert_eq!(plain.to_json().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_strict_equality_is_identity_for_records() {
        let a = RecordBuilder::new().field("x", 1).build();
        let b = RecordBuilder::new().field("x", 1).build();

        assert_ne!(Value::Record(a.clone()), Value::Record(b));
        assert_eq!(Value::Record(a.clone()), Value::Record(a));
    }

    #[test]
    fn test_set_invokes_setter() {
        let captured = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&captured);
        let record = RecordBuilder::new()
            .setter("s", move |value| {
                *sink.borrow_mut() = Some(value);
            })
            .build();

        record.set("s", Value::from(5));
        assert_eq!(*captured.borrow(), Some(Value::Number(5.0)));
    }

    #[test]
    fn test_set_respects_non_writable_slot() {
        let record = RecordBuilder::new()
            .slot(
                "frozen",
                Slot {
                    shape: PropertyShape::Data {
                        value: Value::from(1),
                        writable: false,
                    },
                    enumerable: true,
                    configurable: true,
                },
            )
            .build();

        record.set("frozen", Value::from(2));
        assert_eq!(record.get("frozen"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_canonical_json_collapses_integral_floats() {
        assert_eq!(Value::Number(2.0).canonical_json().unwrap(), "2");
        assert_eq!(Value::Number(2.5).canonical_json().unwrap(), "2.5");
    }
}
