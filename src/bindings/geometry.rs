use super::{Arity, CallContext, RegistryBuilder, number_arg, vec3_arg};
use crate::value::{Mat3, Value, ops};
use crate::vm::{VmError, VmResult};

pub(super) fn register(b: RegistryBuilder) -> RegistryBuilder {
    b.function("vec2", Arity::OneOf(&[0, 1, 2]), |_, args| ops::vec2(args))
        .function("vec3", Arity::OneOf(&[0, 1, 3]), |_, args| ops::vec3(args))
        .function("mat3", Arity::OneOf(&[0, 1, 9]), |_, args| ops::mat3(args))
        .function("identity", Arity::Exact(0), |_, _| Ok(Value::Mat3(Mat3::IDENTITY)))
        .function("transpose", Arity::Exact(1), transpose)
        .function("dot", Arity::Exact(2), dot)
        .function("cross", Arity::Exact(2), cross)
        .function("length", Arity::Exact(1), length)
        .function("normalize", Arity::Exact(1), normalize)
        .function("build_rotation_matrix", Arity::Exact(2), build_rotation_matrix)
}

fn vector_expected(function: &str, position: usize, got: &Value) -> VmError {
    VmError::bad_argument(function, position, "vec2 or vec3", Some(got))
}

fn dot(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let d = match (&args[0], &args[1]) {
        (Value::Vec2(a), Value::Vec2(b)) => a.dot(*b),
        (Value::Vec3(a), Value::Vec3(b)) => a.dot(*b),
        (Value::Vec2(_), other) => return Err(VmError::bad_argument("dot", 1, "vec2", Some(other))),
        (Value::Vec3(_), other) => return Err(VmError::bad_argument("dot", 1, "vec3", Some(other))),
        (other, _) => return Err(vector_expected("dot", 0, other)),
    };
    Ok(Value::Number(d))
}

fn cross(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let a = vec3_arg("cross", args, 0)?;
    let b = vec3_arg("cross", args, 1)?;
    Ok(Value::Vec3(a.cross(b)))
}

fn length(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::Vec2(v) => Ok(Value::Number(v.length())),
        Value::Vec3(v) => Ok(Value::Number(v.length())),
        other => Err(vector_expected("length", 0, other)),
    }
}

fn normalize(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::Vec2(v) => Ok(Value::Vec2(v.normalize())),
        Value::Vec3(v) => Ok(Value::Vec3(v.normalize())),
        other => Err(vector_expected("normalize", 0, other)),
    }
}

fn transpose(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::Mat3(m) => Ok(Value::Mat3(m.transpose())),
        other => Err(VmError::bad_argument("transpose", 0, "mat3", Some(other))),
    }
}

/// Rotation by `angle` radians about `axis` (normalized first).
fn build_rotation_matrix(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let axis = vec3_arg("build_rotation_matrix", args, 0)?;
    let angle = number_arg("build_rotation_matrix", args, 1)?;
    Ok(Value::Mat3(Mat3::rotation(axis, angle)))
}
