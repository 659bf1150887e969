//! Optional-field access over untyped JSON documents.
//!
//! The RWIS API returns loosely structured GeoJSON where any level may be
//! missing. [`Field`] walks such documents without indexing panics: every
//! step yields either `Present(&Value)` or `Absent`, and `Absent` is sticky.

use serde_json::Value;

/// Result of looking up a path in a JSON document.
///
/// JSON `null` is treated as `Absent`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Present(&'a Value),
    Absent,
}

impl<'a> Field<'a> {
    /// Start a lookup at `value`.
    pub fn of(value: &'a Value) -> Self {
        if value.is_null() {
            Field::Absent
        } else {
            Field::Present(value)
        }
    }

    /// Descend into an object member.
    pub fn key(self, key: &str) -> Self {
        match self {
            Field::Present(v) => v.get(key).map_or(Field::Absent, Field::of),
            Field::Absent => Field::Absent,
        }
    }

    /// Descend into an array element.
    pub fn index(self, index: usize) -> Self {
        match self {
            Field::Present(v) => v.get(index).map_or(Field::Absent, Field::of),
            Field::Absent => Field::Absent,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Field::Present(_))
    }

    pub fn value(self) -> Option<&'a Value> {
        match self {
            Field::Present(v) => Some(v),
            Field::Absent => None,
        }
    }

    /// Array elements, or an empty slice when absent or not an array.
    pub fn items(self) -> &'a [Value] {
        self.value()
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn as_str(self) -> Option<&'a str> {
        self.value().and_then(Value::as_str)
    }

    /// Numeric value; numeric strings such as `"72.5"` are accepted.
    pub fn as_f64(self) -> Option<f64> {
        match self.value()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Scalar rendered as text. Numbers and booleans are stringified.
    pub fn as_text(self) -> Option<String> {
        match self.value()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Identifier rendered as a string. The API mixes numeric and string ids.
    pub fn as_id(self) -> Option<String> {
        match self.value()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
