//! Call arguments as seen by the key deriver.
//!
//! Rust closures carry their own captured values, so the engine never needs
//! the arguments to *call* the function. [`CallArgs`] only describes the call:
//! every argument is reduced to a canonical JSON value up front, or marked as
//! having no canonical form.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeserializationError;
use crate::finite::ensure_finite;

/// Capability for types whose methods are memoized.
///
/// The snapshot stands in for `self` in the cache key, so two instances with
/// equal state share entries. It must be deterministic: same state, same
/// snapshot.
pub trait StateSnapshot {
    type State: Serialize;

    fn state_snapshot(&self) -> Self::State;
}

/// One argument, reduced for key derivation.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Canonical JSON form of the value.
    Canonical(Value),
    /// The value exists but has no canonical form.
    Opaque { reason: String },
}

impl ArgValue {
    /// Canonicalize any serializable value.
    ///
    /// Values holding NaN or an infinity are opaque: JSON would write them as
    /// `null` and they would collide with `None`.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        if let Err(reason) = ensure_finite(value) {
            return Self::Opaque { reason };
        }
        match serde_json::to_value(value) {
            Ok(v) => Self::Canonical(canonicalize(v)),
            Err(e) => Self::Opaque {
                reason: e.to_string(),
            },
        }
    }

    pub fn canonical(&self) -> Option<&Value> {
        match self {
            Self::Canonical(v) => Some(v),
            Self::Opaque { .. } => None,
        }
    }
}

/// Snapshot of the instance a method is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct Receiver {
    pub type_name: String,
    pub state: ArgValue,
}

/// Description of one call: receiver, positional and keyword arguments.
///
/// ```
/// use memoir_core::CallArgs;
///
/// let args = CallArgs::new()
///     .arg(&"2024-01-31")
///     .kwarg("limit", &50)
///     .opaque("connection");
/// assert_eq!(args.positional().len(), 1);
/// assert_eq!(args.keyword().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    receiver: Option<Receiver>,
    positional: Vec<ArgValue>,
    keyword: BTreeMap<String, ArgValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the state of the owning instance into the call.
    pub fn bound_to<S: StateSnapshot + ?Sized>(mut self, instance: &S) -> Self {
        self.receiver = Some(Receiver {
            type_name: std::any::type_name::<S>().to_string(),
            state: ArgValue::of(&instance.state_snapshot()),
        });
        self
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.positional.push(ArgValue::of(value));
        self
    }

    /// Set a keyword argument. A repeated name replaces the earlier value.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.keyword.insert(name.into(), ArgValue::of(value));
        self
    }

    /// Declare a keyword argument that has no canonical form, such as a
    /// connection handle or a callback.
    pub fn opaque(mut self, name: impl Into<String>) -> Self {
        self.keyword.insert(
            name.into(),
            ArgValue::Opaque {
                reason: "declared opaque".to_string(),
            },
        );
        self
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.as_ref()
    }

    pub fn positional(&self) -> &[ArgValue] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, ArgValue> {
        &self.keyword
    }

    /// Inspection record persisted alongside an entry.
    pub fn input_snapshot(&self, function: &str) -> InputSnapshot {
        InputSnapshot {
            function: function.to_string(),
            receiver: self.receiver.as_ref().map(|r| ReceiverRecord {
                type_name: r.type_name.clone(),
                state: to_text(&r.state),
            }),
            args: self.positional.iter().map(to_text).collect(),
            kwargs: self
                .keyword
                .iter()
                .map(|(k, v)| (k.clone(), to_text(v)))
                .collect(),
        }
    }
}

fn to_text(value: &ArgValue) -> Option<String> {
    value.canonical().map(|v| v.to_string())
}

/// Rebuild every object with its keys in sorted order.
///
/// `serde_json::Map` only sorts when the `preserve_order` feature is off, and
/// any crate in the graph can turn it on.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Persisted receiver record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverRecord {
    pub type_name: String,
    pub state: Option<String>,
}

/// Input artifact payload.
///
/// Values are stored as canonical JSON text so every input codec can carry
/// them; `None` marks an argument without canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub function: String,
    pub receiver: Option<ReceiverRecord>,
    pub args: Vec<Option<String>>,
    pub kwargs: BTreeMap<String, Option<String>>,
}

impl InputSnapshot {
    /// Decode the positional argument at `index`.
    ///
    /// `Ok(None)` when the index is out of range or the argument was opaque.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, DeserializationError> {
        match self.args.get(index) {
            Some(Some(text)) => parse_text(text).map(Some),
            _ => Ok(None),
        }
    }

    /// Decode the keyword argument `name`.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, DeserializationError> {
        match self.kwargs.get(name) {
            Some(Some(text)) => parse_text(text).map(Some),
            _ => Ok(None),
        }
    }

    /// Decode the receiver state snapshot.
    pub fn receiver_state<T: DeserializeOwned>(&self) -> Result<Option<T>, DeserializationError> {
        match self.receiver.as_ref().and_then(|r| r.state.as_ref()) {
            Some(text) => parse_text(text).map(Some),
            None => Ok(None),
        }
    }
}

fn parse_text<T: DeserializeOwned>(text: &str) -> Result<T, DeserializationError> {
    serde_json::from_str(text).map_err(|e| DeserializationError::Decode {
        codec: "json".to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    struct Model {
        scale: f64,
        name: String,
        // Not part of the snapshot.
        _scratch: Vec<u8>,
    }

    impl StateSnapshot for Model {
        type State = (f64, String);

        fn state_snapshot(&self) -> Self::State {
            (self.scale, self.name.clone())
        }
    }

    #[test]
    fn test_arg_value_canonical() {
        let v = ArgValue::of(&Point { x: 1, y: 2 });
        assert_eq!(v.canonical(), Some(&serde_json::json!({"x": 1, "y": 2})));
    }

    #[test]
    fn test_arg_value_opaque_on_failure() {
        // Non-string map keys have no JSON form.
        let mut map = HashMap::new();
        map.insert((1, 2), "a");
        assert!(matches!(ArgValue::of(&map), ArgValue::Opaque { .. }));
    }

    #[test]
    fn test_hashmap_order_is_canonical() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..32 {
            a.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            b.insert(format!("k{i}"), i);
        }
        assert_eq!(ArgValue::of(&a), ArgValue::of(&b));
    }

    #[test]
    fn test_bound_to_uses_snapshot_not_identity() {
        let m1 = Model {
            scale: 2.0,
            name: "m".into(),
            _scratch: vec![1],
        };
        let m2 = Model {
            scale: 2.0,
            name: "m".into(),
            _scratch: vec![9, 9],
        };
        let a1 = CallArgs::new().bound_to(&m1);
        let a2 = CallArgs::new().bound_to(&m2);
        assert_eq!(a1, a2);
        assert!(a1.receiver().unwrap().type_name.ends_with("Model"));
    }

    #[test]
    fn test_kwarg_replaces_same_name() {
        let args = CallArgs::new().kwarg("n", &1).kwarg("n", &2);
        assert_eq!(args.keyword().len(), 1);
        assert_eq!(
            args.keyword()["n"].canonical(),
            Some(&serde_json::json!(2))
        );
    }

    #[test]
    fn test_input_snapshot_accessors() {
        let args = CallArgs::new()
            .arg(&vec![1, 2, 3])
            .kwarg("label", &"west")
            .opaque("conn");
        let snapshot = args.input_snapshot("m::f");

        assert_eq!(snapshot.function, "m::f");
        assert_eq!(snapshot.arg::<Vec<i32>>(0).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(snapshot.arg::<i32>(5).unwrap(), None);
        assert_eq!(
            snapshot.kwarg::<String>("label").unwrap(),
            Some("west".to_string())
        );
        assert_eq!(snapshot.kwarg::<String>("conn").unwrap(), None);
        assert!(snapshot.kwarg::<i32>("label").is_err());
    }

    #[test]
    fn test_canonicalize_nested() {
        let value = serde_json::json!({"b": {"d": 1, "c": 2}, "a": [{"z": 0, "y": 1}]});
        let text = canonicalize(value).to_string();
        assert_eq!(text, r#"{"a":[{"y":1,"z":0}],"b":{"c":2,"d":1}}"#);
    }
}
