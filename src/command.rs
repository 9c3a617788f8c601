//! Parsing of `{"action": ..., ...}`-style command objects

use crate::error::{Result, TemperaError};
use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Deserialize a tagged command, reporting an unrecognised tag as
/// [`TemperaError::UnknownAction`] rather than a generic payload error.
pub(crate) fn parse_tagged<T: DeserializeOwned>(
    value: Value,
    tag: &str,
    known: &[&str],
) -> Result<T> {
    let name = value
        .get(tag)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| TemperaError::UnknownAction(format!("missing '{tag}'")))?;

    if !known.contains(&name.as_str()) {
        return Err(TemperaError::UnknownAction(name));
    }

    Ok(serde_json::from_value(value)?)
}

/// Read a `{"3": 1, ...}` object into a map with integer keys.
///
/// Tagged enums buffer their payload, and the buffered map keys stay strings.
pub(crate) fn numeric_keys<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<u8, u8>, D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<String, u8>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| {
            key.trim()
                .parse::<u8>()
                .map(|key| (key, value))
                .map_err(|_| D::Error::custom(format!("expected an integer key, got '{key}'")))
        })
        .collect()
}
