//! Values addressable by name in a checkpoint.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A property value or parameter snapshot.
///
/// Properties may hold any variant. Parameters are always surfaced as
/// [`Value::Array`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Array(ArrayD<f32>),
}

impl Value {
    /// Build an array value from a flat slice and a shape.
    ///
    /// Returns `None` if `data.len()` does not match the shape.
    pub fn array(shape: &[usize], data: Vec<f32>) -> Option<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .ok()
            .map(Value::Array)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<ArrayD<f32>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the variant, used in listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Array(v) => {
                let items: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}] shape={:?}", items.join(", "), v.shape())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ArrayD<f32>> for Value {
    fn from(v: ArrayD<f32>) -> Self {
        Value::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape_check() {
        let value = Value::array(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(value.as_array().unwrap().shape(), &[2, 2]);

        assert!(Value::array(&[3], vec![1.0, 2.0]).is_none());
    }

    #[test]
    fn test_accessors_match_variant() {
        assert_eq!(Value::from(3).as_int(), Some(3));
        assert_eq!(Value::from(0.5).as_float(), Some(0.5));
        assert_eq!(Value::from("adam").as_str(), Some("adam"));
        assert!(Value::from(3).as_float().is_none());
        assert!(Value::from("x").into_array().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::from("sgd").to_string(), "sgd");
        let arr = Value::array(&[2], vec![1.0, 2.5]).unwrap();
        assert_eq!(arr.to_string(), "[1, 2.5] shape=[2]");
    }

    #[test]
    fn test_json_encoding_keeps_variant() {
        let value = Value::Float(3.0);
        let json = serde_json::to_string(&value).unwrap();
        let restored: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, Value::Float(3.0));
    }
}
