//! Field-level decoding of JSON payloads.
//!
//! External payloads are decoded field by field so that a bad item reports
//! exactly which field is missing or mistyped, and can be skipped on its own.

use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

/// A JSON object being decoded, tagged with what it represents.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
    context: &'static str,
}

impl<'a> Fields<'a> {
    /// View `value` as an object.
    pub fn of(value: &'a Value, context: &'static str) -> Result<Self> {
        match value.as_object() {
            Some(map) => Ok(Self { map, context }),
            None => Err(SyncError::Malformed(format!("{context} is not an object"))),
        }
    }

    /// The underlying map.
    pub fn map(&self) -> &'a Map<String, Value> {
        self.map
    }

    /// Present, non-null field.
    pub fn get(&self, field: &'static str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &'static str) -> Result<&'a Value> {
        self.get(field).ok_or(SyncError::MissingField {
            field,
            context: self.context,
        })
    }

    fn wrong(&self, field: &'static str, expected: &'static str) -> SyncError {
        SyncError::WrongType {
            field,
            context: self.context,
            expected,
        }
    }

    /// Required string.
    pub fn str(&self, field: &'static str) -> Result<&'a str> {
        self.required(field)?
            .as_str()
            .ok_or_else(|| self.wrong(field, "string"))
    }

    /// Optional string; a present value of another type is an error.
    pub fn opt_str(&self, field: &'static str) -> Result<Option<&'a str>> {
        match self.get(field) {
            None => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or_else(|| self.wrong(field, "string")),
        }
    }

    /// Required unsigned integer. Numeric strings are accepted, as node RPC
    /// encodes some integers as strings.
    pub fn u64(&self, field: &'static str) -> Result<u64> {
        let value = self.required(field)?;
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| self.wrong(field, "unsigned integer"))
    }

    /// Required array.
    pub fn array(&self, field: &'static str) -> Result<&'a Vec<Value>> {
        self.required(field)?
            .as_array()
            .ok_or_else(|| self.wrong(field, "array"))
    }

    /// Required nested object.
    pub fn object(&self, field: &'static str, context: &'static str) -> Result<Fields<'a>> {
        let value = self.required(field)?;
        if value.is_object() {
            Fields::of(value, context)
        } else {
            Err(self.wrong(field, "object"))
        }
    }

    /// Optional nested object, e.g. `{"address": ...}` account references.
    pub fn opt_object(&self, field: &'static str, context: &'static str) -> Result<Option<Fields<'a>>> {
        match self.get(field) {
            None => Ok(None),
            Some(v) if v.is_object() => Fields::of(v, context).map(Some),
            Some(_) => Err(self.wrong(field, "object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_and_wrong_type() {
        let value = json!({"level": "abc", "hash": 5, "nothing": null});
        let fields = Fields::of(&value, "block").unwrap();

        assert!(matches!(
            fields.str("branch"),
            Err(SyncError::MissingField { field: "branch", context: "block" })
        ));
        assert!(matches!(
            fields.str("hash"),
            Err(SyncError::WrongType { field: "hash", expected: "string", .. })
        ));
        assert!(matches!(fields.u64("level"), Err(SyncError::WrongType { .. })));
        assert!(matches!(fields.u64("nothing"), Err(SyncError::MissingField { .. })));
        assert_eq!(fields.opt_str("nothing").unwrap(), None);
    }

    #[test]
    fn test_numeric_strings() {
        let value = json!({"blocks_per_cycle": "8192", "level": 7});
        let fields = Fields::of(&value, "constants").unwrap();
        assert_eq!(fields.u64("blocks_per_cycle").unwrap(), 8192);
        assert_eq!(fields.u64("level").unwrap(), 7);
    }

    #[test]
    fn test_not_an_object() {
        assert!(matches!(
            Fields::of(&json!([1, 2]), "head"),
            Err(SyncError::Malformed(_))
        ));
    }
}
