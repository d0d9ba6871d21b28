//! Operator dispatch over [`Value`]: one arm per operator per operand pairing.
//! Pairings without an arm are type errors naming both operand types.

use super::geometry::format_number;
use super::{Mat3, Value, Vec2, Vec3};
use crate::vm::{VmError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl Arith {
    pub fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
            Arith::Mod => "%",
            Arith::Pow => "^",
        }
    }
}

fn number_op(op: Arith, a: f64, b: f64) -> f64 {
    match op {
        Arith::Add => a + b,
        Arith::Sub => a - b,
        Arith::Mul => a * b,
        Arith::Div => a / b,
        Arith::Mod => a - (a / b).floor() * b,
        Arith::Pow => a.powf(b),
    }
}

pub fn arith(op: Arith, a: &Value, b: &Value) -> VmResult<Value> {
    use Arith::{Add, Div, Mul, Sub};
    let out = match (op, a, b) {
        (_, Value::Number(x), Value::Number(y)) => Value::Number(number_op(op, *x, *y)),

        // Same-shape add/sub
        (Add, Value::Vec2(x), Value::Vec2(y)) => Value::Vec2(*x + *y),
        (Add, Value::Vec3(x), Value::Vec3(y)) => Value::Vec3(*x + *y),
        (Add, Value::Mat3(x), Value::Mat3(y)) => Value::Mat3(*x + *y),
        (Sub, Value::Vec2(x), Value::Vec2(y)) => Value::Vec2(*x - *y),
        (Sub, Value::Vec3(x), Value::Vec3(y)) => Value::Vec3(*x - *y),
        (Sub, Value::Mat3(x), Value::Mat3(y)) => Value::Mat3(*x - *y),

        // Scalar broadcast
        (Mul, Value::Number(s), Value::Vec2(v)) | (Mul, Value::Vec2(v), Value::Number(s)) => {
            Value::Vec2(*v * *s)
        }
        (Mul, Value::Number(s), Value::Vec3(v)) | (Mul, Value::Vec3(v), Value::Number(s)) => {
            Value::Vec3(*v * *s)
        }
        (Mul, Value::Number(s), Value::Mat3(m)) | (Mul, Value::Mat3(m), Value::Number(s)) => {
            Value::Mat3(*m * *s)
        }

        // Elementwise vector products, true matrix products
        (Mul, Value::Vec2(x), Value::Vec2(y)) => Value::Vec2(x.zip(*y, |a, b| a * b)),
        (Mul, Value::Vec3(x), Value::Vec3(y)) => Value::Vec3(x.zip(*y, |a, b| a * b)),
        (Mul, Value::Mat3(m), Value::Vec3(v)) => Value::Vec3(m.mul_vec(*v)),
        (Mul, Value::Mat3(x), Value::Mat3(y)) => Value::Mat3(x.mul_mat(*y)),

        // Division: vector by scalar or elementwise; never scalar by vector
        (Div, Value::Vec2(v), Value::Number(s)) => Value::Vec2(*v / *s),
        (Div, Value::Vec3(v), Value::Number(s)) => Value::Vec3(*v / *s),
        (Div, Value::Mat3(m), Value::Number(s)) => Value::Mat3(*m / *s),
        (Div, Value::Vec2(x), Value::Vec2(y)) => Value::Vec2(x.zip(*y, |a, b| a / b)),
        (Div, Value::Vec3(x), Value::Vec3(y)) => Value::Vec3(x.zip(*y, |a, b| a / b)),

        _ => return Err(VmError::operands(op.symbol(), a, b)),
    };
    Ok(out)
}

pub fn negate(v: &Value) -> VmResult<Value> {
    Ok(match v {
        Value::Number(n) => Value::Number(-n),
        Value::Vec2(v) => Value::Vec2(-*v),
        Value::Vec3(v) => Value::Vec3(-*v),
        Value::Mat3(m) => Value::Mat3(-*m),
        other => return Err(VmError::Type(format!("cannot negate a {} value", other.type_name()))),
    })
}

/// `#v`: string length in bytes, list length, or component count.
pub fn length(v: &Value) -> VmResult<Value> {
    let n = match v {
        Value::Str(s) => s.len(),
        Value::List(items) => items.len(),
        Value::Vec2(_) => Vec2::LEN,
        Value::Vec3(_) => Vec3::LEN,
        Value::Mat3(_) => Mat3::LEN,
        other => {
            return Err(VmError::Type(format!(
                "cannot take the length of a {} value",
                other.type_name()
            )));
        }
    };
    Ok(Value::Number(n as f64))
}

fn concat_piece(v: &Value) -> Option<String> {
    match v {
        Value::Str(s) => Some(s.clone()),
        Value::Number(n) => Some(format_number(*n)),
        Value::Vec2(_) | Value::Vec3(_) | Value::Mat3(_) => Some(v.to_string()),
        _ => None,
    }
}

pub fn concat(a: &Value, b: &Value) -> VmResult<Value> {
    match (concat_piece(a), concat_piece(b)) {
        (Some(mut left), Some(right)) => {
            left.push_str(&right);
            Ok(Value::Str(left))
        }
        _ => Err(VmError::operands("..", a, b)),
    }
}

/// `a < b`. Geometric values compare true only when every component does.
pub fn less_than(a: &Value, b: &Value) -> VmResult<bool> {
    compare(a, b, "<", |x, y| x < y)
}

/// `a <= b`, same rules as [`less_than`].
pub fn less_equal(a: &Value, b: &Value) -> VmResult<bool> {
    compare(a, b, "<=", |x, y| x <= y)
}

fn compare(a: &Value, b: &Value, symbol: &str, f: fn(f64, f64) -> bool) -> VmResult<bool> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(f(*x, *y)),
        (Value::Str(x), Value::Str(y)) => Ok(if symbol == "<" { x < y } else { x <= y }),
        (Value::Vec2(x), Value::Vec2(y)) => Ok(x.all(*y, f)),
        (Value::Vec3(x), Value::Vec3(y)) => Ok(x.all(*y, f)),
        (Value::Mat3(x), Value::Mat3(y)) => Ok(x.all(*y, f)),
        _ => Err(VmError::Type(format!(
            "cannot compare {} with {} using '{symbol}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Converts a 1-based script index into a zero-based slot, checking `1..=len`.
fn slot(type_name: &'static str, key: &Value, len: usize) -> VmResult<usize> {
    let index = match key {
        Value::Number(n) => *n,
        other => {
            return Err(VmError::Type(format!(
                "{type_name} index must be a number, got {}",
                other.type_name()
            )));
        }
    };
    if index.fract() != 0.0 || index < 1.0 || index > len as f64 {
        return Err(VmError::Index {
            type_name,
            index: format_number(index),
            len,
        });
    }
    Ok(index as usize - 1)
}

/// `object[key]`
pub fn get_index(object: &Value, key: &Value) -> VmResult<Value> {
    let component = |len: usize| slot(object.type_name(), key, len);
    Ok(match object {
        Value::Vec2(v) => Value::Number(v.to_array()[component(2)?]),
        Value::Vec3(v) => Value::Number(v.to_array()[component(3)?]),
        Value::Mat3(m) => Value::Number(m.m[component(9)?]),
        // Reading outside a list yields nil
        Value::List(items) => match key {
            Value::Number(n) if n.fract() == 0.0 && *n >= 1.0 => {
                items.get(*n as usize - 1).cloned().unwrap_or_default()
            }
            Value::Number(_) => Value::Nil,
            other => {
                return Err(VmError::Type(format!(
                    "list index must be a number, got {}",
                    other.type_name()
                )));
            }
        },
        other => return Err(VmError::Type(format!("cannot index a {} value", other.type_name()))),
    })
}

fn component_value(type_name: &str, value: &Value) -> VmResult<f64> {
    value.as_number().ok_or_else(|| {
        VmError::Type(format!(
            "cannot store a {} in a {type_name} component",
            value.type_name()
        ))
    })
}

/// `object[key] = value`. Writing one past the end of a list appends.
pub fn set_index(object: &mut Value, key: &Value, value: Value) -> VmResult<()> {
    let type_name = object.type_name();
    match object {
        Value::Vec2(v) => {
            let i = slot(type_name, key, 2)?;
            let n = component_value(type_name, &value)?;
            v.set(i, n);
        }
        Value::Vec3(v) => {
            let i = slot(type_name, key, 3)?;
            let n = component_value(type_name, &value)?;
            v.set(i, n);
        }
        Value::Mat3(m) => {
            let i = slot(type_name, key, 9)?;
            let n = component_value(type_name, &value)?;
            m.m[i] = n;
        }
        Value::List(items) => {
            let len = items.len();
            let i = slot(type_name, key, len + 1)?;
            if i == len {
                items.push(value);
            } else {
                items[i] = value;
            }
        }
        other => {
            return Err(VmError::Type(format!("cannot index a {} value", other.type_name())));
        }
    }
    Ok(())
}

/// Zero-based component for a field name (`x`, `y`, `z`).
pub fn field_component(field: &str) -> Option<u8> {
    match field {
        "x" => Some(0),
        "y" => Some(1),
        "z" => Some(2),
        _ => None,
    }
}

const FIELD_NAMES: [&str; 3] = ["x", "y", "z"];

fn no_field(object: &Value, component: u8) -> VmError {
    let name = FIELD_NAMES.get(component as usize).copied().unwrap_or("?");
    match object {
        Value::Vec2(_) | Value::Vec3(_) => {
            VmError::Type(format!("{} has no field '{name}'", object.type_name()))
        }
        other => VmError::Type(format!(
            "cannot access field '{name}' of a {} value",
            other.type_name()
        )),
    }
}

/// `object.x` / `.y` / `.z`
pub fn get_field(object: &Value, component: u8) -> VmResult<Value> {
    let n = match object {
        Value::Vec2(v) => v.get(component as usize),
        Value::Vec3(v) => v.get(component as usize),
        _ => None,
    };
    n.map(Value::Number).ok_or_else(|| no_field(object, component))
}

pub fn set_field(object: &mut Value, component: u8, value: Value) -> VmResult<()> {
    let n = component_value(object.type_name(), &value)?;
    let stored = match object {
        Value::Vec2(v) => v.set(component as usize, n),
        Value::Vec3(v) => v.set(component as usize, n),
        _ => false,
    };
    if stored { Ok(()) } else { Err(no_field(object, component)) }
}

/// Collects constructor arguments: none gives zeros, one is broadcast,
/// `N` fill the components in order.
pub fn components<const N: usize>(function: &str, args: &[Value]) -> VmResult<[f64; N]> {
    let mut out = [0.0; N];
    match args.len() {
        0 => {}
        1 => out = [number_arg(function, args, 0)?; N],
        n if n == N => {
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = number_arg(function, args, i)?;
            }
        }
        got => {
            return Err(VmError::Arity {
                function: function.to_string(),
                expected: format!("0, 1 or {N}"),
                got,
            });
        }
    }
    Ok(out)
}

/// Reads a numeric argument at zero-based position `i`.
pub fn number_arg(function: &str, args: &[Value], i: usize) -> VmResult<f64> {
    match args.get(i) {
        Some(Value::Number(n)) => Ok(*n),
        other => Err(VmError::bad_argument(function, i, "number", other)),
    }
}

pub fn vec2(args: &[Value]) -> VmResult<Value> {
    Ok(Value::Vec2(Vec2::from_array(components::<2>("vec2", args)?)))
}

pub fn vec3(args: &[Value]) -> VmResult<Value> {
    Ok(Value::Vec3(Vec3::from_array(components::<3>("vec3", args)?)))
}

pub fn mat3(args: &[Value]) -> VmResult<Value> {
    Ok(Value::Mat3(Mat3::from_array(components::<9>("mat3", args)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v3(x: f64, y: f64, z: f64) -> Value {
        Value::Vec3(Vec3::new(x, y, z))
    }

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    #[test]
    fn scalar_broadcast_both_sides() {
        let v = v3(1.0, 2.0, 3.0);
        assert_eq!(arith(Arith::Mul, &n(2.0), &v).unwrap(), v3(2.0, 4.0, 6.0));
        assert_eq!(arith(Arith::Mul, &v, &n(2.0)).unwrap(), v3(2.0, 4.0, 6.0));
    }

    #[test]
    fn elementwise_vector_ops() {
        let a = v3(1.0, 2.0, 3.0);
        let b = v3(4.0, 5.0, 6.0);
        assert_eq!(arith(Arith::Add, &a, &b).unwrap(), v3(5.0, 7.0, 9.0));
        assert_eq!(arith(Arith::Mul, &a, &b).unwrap(), v3(4.0, 10.0, 18.0));
        assert_eq!(arith(Arith::Div, &b, &a).unwrap(), v3(4.0, 2.5, 2.0));
    }

    #[test]
    fn scalar_divided_by_vector_is_type_error() {
        let err = arith(Arith::Div, &n(1.0), &v3(1.0, 1.0, 1.0)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("number") && msg.contains("vec3"), "{msg}");
    }

    #[test]
    fn mismatched_shapes_name_both_types() {
        let err = arith(Arith::Add, &Value::Vec2(Vec2::ZERO), &v3(0.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, VmError::Type(_)));
        let msg = err.to_string();
        assert!(msg.contains("vec2") && msg.contains("vec3"), "{msg}");
    }

    #[test]
    fn matrix_times_vector() {
        let m = Value::Mat3(Mat3::IDENTITY);
        assert_eq!(arith(Arith::Mul, &m, &v3(1.0, 2.0, 3.0)).unwrap(), v3(1.0, 2.0, 3.0));
        assert!(arith(Arith::Mul, &v3(1.0, 2.0, 3.0), &m).is_err());
    }

    #[test]
    fn division_by_zero_follows_ieee() {
        let Value::Number(x) = arith(Arith::Div, &n(1.0), &n(0.0)).unwrap() else { panic!() };
        assert!(x.is_infinite());
        let Value::Number(y) = arith(Arith::Div, &n(0.0), &n(0.0)).unwrap() else { panic!() };
        assert!(y.is_nan());
    }

    #[test]
    fn modulo_matches_floor_division() {
        assert_eq!(arith(Arith::Mod, &n(-3.0), &n(5.0)).unwrap(), n(2.0));
        assert_eq!(arith(Arith::Mod, &n(7.5), &n(2.0)).unwrap(), n(1.5));
    }

    #[test]
    fn ordering_all_components() {
        let a = v3(1.0, 2.0, 3.0);
        let b = v3(2.0, 3.0, 4.0);
        let c = v3(0.0, 5.0, 5.0);
        assert!(less_than(&a, &b).unwrap());
        assert!(!less_than(&a, &c).unwrap());
        assert!(!less_than(&c, &a).unwrap());
        assert!(less_equal(&a, &a).unwrap());
    }

    #[test]
    fn ordering_mixed_types_is_error() {
        assert!(less_than(&n(1.0), &Value::Str("a".into())).is_err());
        assert!(less_than(&Value::Nil, &Value::Nil).is_err());
    }

    #[test]
    fn strings_compare_lexicographically() {
        let a = Value::Str("abc".into());
        let b = Value::Str("abd".into());
        assert!(less_than(&a, &b).unwrap());
        assert!(less_equal(&a, &a).unwrap());
    }

    #[test]
    fn index_bounds_on_vec3() {
        let v = v3(1.0, 2.0, 3.0);
        assert_eq!(get_index(&v, &n(3.0)).unwrap(), n(3.0));
        assert!(matches!(get_index(&v, &n(0.0)), Err(VmError::Index { .. })));
        assert!(matches!(get_index(&v, &n(4.0)), Err(VmError::Index { .. })));
        assert!(matches!(get_index(&v, &n(1.5)), Err(VmError::Index { .. })));
    }

    #[test]
    fn set_index_on_matrix_row_major() {
        let mut m = Value::Mat3(Mat3::ZERO);
        set_index(&mut m, &n(2.0), n(7.0)).unwrap();
        let Value::Mat3(m) = m else { panic!() };
        assert_eq!(m.at(0, 1), 7.0);
    }

    #[test]
    fn list_read_past_end_is_nil_and_append() {
        let mut list = Value::List(vec![n(1.0)]);
        assert_eq!(get_index(&list, &n(5.0)).unwrap(), Value::Nil);
        set_index(&mut list, &n(2.0), n(2.0)).unwrap();
        assert_eq!(list, Value::List(vec![n(1.0), n(2.0)]));
        assert!(matches!(set_index(&mut list, &n(4.0), n(4.0)), Err(VmError::Index { .. })));
    }

    #[test]
    fn fields_by_shape() {
        let mut v = Value::Vec2(Vec2::new(1.0, 2.0));
        assert_eq!(get_field(&v, 1).unwrap(), n(2.0));
        assert!(get_field(&v, 2).unwrap_err().to_string().contains("vec2 has no field 'z'"));
        set_field(&mut v, 0, n(5.0)).unwrap();
        assert_eq!(v, Value::Vec2(Vec2::new(5.0, 2.0)));
        assert!(get_field(&n(1.0), 0).is_err());
    }

    #[test]
    fn constructor_arity() {
        assert_eq!(vec3(&[]).unwrap(), v3(0.0, 0.0, 0.0));
        assert_eq!(vec3(&[n(2.0)]).unwrap(), v3(2.0, 2.0, 2.0));
        assert_eq!(vec3(&[n(1.0), n(2.0), n(3.0)]).unwrap(), v3(1.0, 2.0, 3.0));
        assert!(matches!(vec3(&[n(1.0), n(2.0)]), Err(VmError::Arity { .. })));
        assert!(matches!(mat3(&vec![n(1.0); 4]), Err(VmError::Arity { .. })));
    }

    #[test]
    fn constructor_rejects_non_numbers() {
        let err = vec2(&[n(1.0), Value::Str("y".into())]).unwrap_err();
        assert!(err.to_string().contains("#2"), "{err}");
    }

    #[test]
    fn concat_numbers_and_vectors() {
        let out = concat(&Value::Str("v=".into()), &v3(1.0, 0.0, 0.5)).unwrap();
        assert_eq!(out, Value::Str("v=(1, 0, 0.5)".into()));
        assert_eq!(concat(&n(1.0), &n(2.0)).unwrap(), Value::Str("12".into()));
        assert!(concat(&Value::Nil, &n(1.0)).is_err());
    }

    #[test]
    fn negate_and_length() {
        assert_eq!(negate(&v3(1.0, -2.0, 0.0)).unwrap(), v3(-1.0, 2.0, -0.0));
        assert_eq!(length(&Value::Str("abc".into())).unwrap(), n(3.0));
        assert_eq!(length(&v3(0.0, 0.0, 0.0)).unwrap(), n(3.0));
        assert!(negate(&Value::Bool(true)).is_err());
    }
}
