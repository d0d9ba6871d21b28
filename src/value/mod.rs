use serde::{Deserialize, Serialize};

pub mod geometry;
pub mod ops;

pub use geometry::{Mat3, Vec2, Vec3};

use geometry::format_number;

/// A script value. Lists and geometric values have value semantics: assigning
/// one copies it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    Vec2(Vec2),
    Vec3(Vec3),
    Mat3(Mat3),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Vec2(_) => "vec2",
            Value::Vec3(_) => "vec3",
            Value::Mat3(_) => "mat3",
            Value::List(_) => "list",
        }
    }

    /// Only `nil` and `false` are false.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numbers, strings and geometric values can be copied between
    /// program instances; everything else is dropped by the merge.
    pub fn is_transferable(&self) -> bool {
        matches!(
            self,
            Value::Number(_) | Value::Str(_) | Value::Vec2(_) | Value::Vec3(_) | Value::Mat3(_)
        )
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::Vec3(v)
    }
}

impl From<Mat3> for Value {
    fn from(m: Mat3) -> Self {
        Value::Mat3(m)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{s}"),
            Value::Vec2(v) => write!(f, "{v}"),
            Value::Vec3(v) => write!(f, "{v}"),
            Value::Mat3(m) => write!(f, "{m}"),
            Value::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_lua() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::Str(String::new()).is_truthy());
        assert!(Value::List(vec![]).is_truthy());
    }

    #[test]
    fn display_numbers() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(-0.25).to_string(), "-0.25");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn display_list() {
        let v = Value::List(vec![Value::Number(1.0), Value::Nil, Value::Str("a".into())]);
        assert_eq!(v.to_string(), "{1, nil, a}");
    }

    #[test]
    fn transferable_kinds() {
        assert!(Value::Number(1.0).is_transferable());
        assert!(Value::Vec3(Vec3::ZERO).is_transferable());
        assert!(!Value::Bool(true).is_transferable());
        assert!(!Value::Nil.is_transferable());
        assert!(!Value::List(vec![]).is_transferable());
    }

    #[test]
    fn constants_serialize() {
        let v = Value::Str("x".into());
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
