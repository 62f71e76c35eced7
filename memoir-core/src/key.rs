//! Cache key derivation.
//!
//! The key is SHA-256 over the canonical JSON of:
//!
//! | Field | Source |
//! |-------|--------|
//! | `module`, `function`, `version` | [`FunctionId`] |
//! | `receiver` | type name + [`StateSnapshot`](crate::StateSnapshot) of the bound instance |
//! | `args` | positional arguments in call order |
//! | `kwargs` | keyword arguments sorted by name, minus excluded names |
//! | `excluded` | the configured non-hashable names, sorted |
//!
//! Excluded keyword arguments never reach the digest, so calls differing only
//! in them share a key. That loss of precision is the price of accepting
//! values with no canonical form.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::args::{ArgValue, CallArgs};
use crate::config::MemoConfig;
use crate::error::KeyDerivationError;
use crate::identity::{CacheKey, FunctionId};

#[derive(Serialize)]
struct KeyMaterial<'a> {
    module: &'a str,
    function: &'a str,
    version: Option<&'a str>,
    receiver: Option<ReceiverMaterial<'a>>,
    args: Vec<&'a Value>,
    kwargs: BTreeMap<&'a str, &'a Value>,
    excluded: Vec<&'a str>,
}

#[derive(Serialize)]
struct ReceiverMaterial<'a> {
    type_name: &'a str,
    state: &'a Value,
}

/// Derive the cache key for one call.
///
/// Pure and deterministic: the same function, arguments and excluded names
/// always give the same key, across processes.
pub fn derive_key(
    function: &FunctionId,
    args: &CallArgs,
    config: &MemoConfig,
) -> Result<CacheKey, KeyDerivationError> {
    canonical_key_bytes(function, args, &config.non_hashable_kwargs)
        .map(|bytes| CacheKey::from_canonical_bytes(&bytes))
}

/// Canonical bytes hashed into the key. Exposed for diagnostics.
pub fn canonical_key_bytes(
    function: &FunctionId,
    args: &CallArgs,
    excluded: &BTreeSet<String>,
) -> Result<Vec<u8>, KeyDerivationError> {
    function.validate()?;

    let receiver = match args.receiver() {
        None => None,
        Some(r) => match &r.state {
            ArgValue::Canonical(state) => Some(ReceiverMaterial {
                type_name: &r.type_name,
                state,
            }),
            ArgValue::Opaque { reason } => {
                return Err(KeyDerivationError::ReceiverSnapshot {
                    type_name: r.type_name.clone(),
                    reason: reason.clone(),
                })
            }
        },
    };

    let mut positional = Vec::with_capacity(args.positional().len());
    for (index, value) in args.positional().iter().enumerate() {
        match value {
            ArgValue::Canonical(v) => positional.push(v),
            ArgValue::Opaque { reason } => {
                return Err(KeyDerivationError::NoCanonicalForm {
                    argument: format!("#{index}"),
                    reason: reason.clone(),
                })
            }
        }
    }

    let mut keyword = BTreeMap::new();
    for (name, value) in args.keyword() {
        if excluded.contains(name) {
            continue;
        }
        match value {
            ArgValue::Canonical(v) => {
                keyword.insert(name.as_str(), v);
            }
            ArgValue::Opaque { reason } => {
                return Err(KeyDerivationError::NoCanonicalForm {
                    argument: name.clone(),
                    reason: format!("{reason} (add it to non_hashable_kwargs to exclude it)"),
                })
            }
        }
    }

    let material = KeyMaterial {
        module: function.module(),
        function: function.name(),
        version: function.version(),
        receiver,
        args: positional,
        kwargs: keyword,
        excluded: excluded.iter().map(String::as_str).collect(),
    };

    serde_json::to_vec(&material).map_err(|e| KeyDerivationError::NoCanonicalForm {
        argument: "<key material>".to_string(),
        reason: e.to_string(),
    })
}
