use super::{Arity, CallContext, RegistryBuilder, number_arg};
use crate::value::Value;
use crate::vm::VmResult;

pub(super) fn register(b: RegistryBuilder) -> RegistryBuilder {
    b.math("abs", f64::abs)
        .math("sqrt", f64::sqrt)
        .math("sin", f64::sin)
        .math("cos", f64::cos)
        .math("tan", f64::tan)
        .math("asin", f64::asin)
        .math("acos", f64::acos)
        .math("atan", f64::atan)
        .math("exp", f64::exp)
        .math("floor", f64::floor)
        .math("ceil", f64::ceil)
        .math("deg", f64::to_degrees)
        .math("rad", f64::to_radians)
        .function("atan2", Arity::Exact(2), atan2)
        .function("log", Arity::OneOf(&[1, 2]), log)
        .function("min", Arity::AtLeast(1), min)
        .function("max", Arity::AtLeast(1), max)
        .function("tostring", Arity::Exact(1), tostring)
        .function("tonumber", Arity::Exact(1), tonumber)
        .function("type", Arity::Exact(1), type_of)
        .function("print", Arity::AtLeast(0), print)
}

fn atan2(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let y = number_arg("atan2", args, 0)?;
    let x = number_arg("atan2", args, 1)?;
    Ok(Value::Number(y.atan2(x)))
}

/// `log(x)` is natural, `log(x, base)` uses the given base.
fn log(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let x = number_arg("log", args, 0)?;
    let v = match args.len() {
        1 => x.ln(),
        _ => x.log(number_arg("log", args, 1)?),
    };
    Ok(Value::Number(v))
}

fn fold_numbers(name: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> VmResult<Value> {
    let mut acc = number_arg(name, args, 0)?;
    for i in 1..args.len() {
        acc = pick(acc, number_arg(name, args, i)?);
    }
    Ok(Value::Number(acc))
}

fn min(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    fold_numbers("min", args, f64::min)
}

fn max(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    fold_numbers("max", args, f64::max)
}

fn tostring(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Str(args[0].to_string()))
}

fn tonumber(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    Ok(match &args[0] {
        Value::Number(n) => Value::Number(*n),
        Value::Str(s) => s.trim().parse::<f64>().map_or(Value::Nil, Value::Number),
        _ => Value::Nil,
    })
}

fn type_of(_: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Str(args[0].type_name().to_string()))
}

fn print(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let text = args.iter().map(Value::to_string).collect::<Vec<_>>().join("\t");
    ctx.print(text);
    Ok(Value::Nil)
}
