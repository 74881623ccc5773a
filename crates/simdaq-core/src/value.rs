//! Signal values and their declared types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value held by a [`Signal`](crate::signal::Signal).
///
/// Variant order matters for untagged deserialization: integers are tried
/// before floats so `5` stays an `Int` while `5.0` becomes a `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Boolean flag
    Bool(bool),
    /// Integer counter or enumeration
    Int(i64),
    /// Scalar measurement
    Float(f64),
    /// Opaque text (identifiers, modes)
    Text(String),
    /// One-dimensional numeric array (spectra, wavelength axes)
    Array(Vec<f64>),
}

/// Declared type of a signal, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Array,
}

impl ValueType {
    /// Data type label used in signal descriptors.
    pub fn dtype(&self) -> &'static str {
        match self {
            ValueType::Bool => "boolean",
            ValueType::Int => "integer",
            ValueType::Float => "number",
            ValueType::Text => "string",
            ValueType::Array => "array",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Array => "array",
        };
        f.write_str(name)
    }
}

impl SignalValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            SignalValue::Bool(_) => ValueType::Bool,
            SignalValue::Int(_) => ValueType::Int,
            SignalValue::Float(_) => ValueType::Float,
            SignalValue::Text(_) => ValueType::Text,
            SignalValue::Array(_) => ValueType::Array,
        }
    }

    /// Numeric view of scalar values (`Float` and `Int`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Float(v) => Some(*v),
            SignalValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SignalValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            SignalValue::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Shape in the descriptor sense: empty for scalars, `[len]` for arrays.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            SignalValue::Array(v) => vec![v.len()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Bool(v) => write!(f, "{v}"),
            SignalValue::Int(v) => write!(f, "{v}"),
            SignalValue::Float(v) => write!(f, "{v:.4}"),
            SignalValue::Text(v) => f.write_str(v),
            SignalValue::Array(v) => write!(f, "array[{}]", v.len()),
        }
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Float(v)
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        SignalValue::Int(v)
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Bool(v)
    }
}

impl From<String> for SignalValue {
    fn from(v: String) -> Self {
        SignalValue::Text(v)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        SignalValue::Text(v.to_string())
    }
}

impl From<Vec<f64>> for SignalValue {
    fn from(v: Vec<f64>) -> Self {
        SignalValue::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json_keeps_integers_integral() {
        let int: SignalValue = serde_json::from_value(serde_json::json!(1024)).unwrap();
        assert_eq!(int, SignalValue::Int(1024));

        let float: SignalValue = serde_json::from_value(serde_json::json!(0.1)).unwrap();
        assert_eq!(float, SignalValue::Float(0.1));

        let array: SignalValue =
            serde_json::from_value(serde_json::json!([400.0, 550.0, 700.0])).unwrap();
        assert_eq!(array.shape(), vec![3]);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(SignalValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(SignalValue::Text("PG002".into()).as_f64(), None);
        assert_eq!(SignalValue::Float(2.5).value_type(), ValueType::Float);
        assert_eq!(ValueType::Array.dtype(), "array");
    }
}
