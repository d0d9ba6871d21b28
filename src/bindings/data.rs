use super::{Arity, CallContext, RegistryBuilder, Returns, int_arg, number_arg};
use crate::flags::OutputFlags;
use crate::value::Value;
use crate::value::geometry::format_number;
use crate::vm::{VmError, VmResult};

pub(super) fn register(b: RegistryBuilder) -> RegistryBuilder {
    b.function("datapos", Arity::Exact(0), |ctx, _| Ok(Value::Number(ctx.data.data_pos as f64)))
        .function("datasize", Arity::Exact(0), |ctx, _| Ok(Value::Number(ctx.data.data_size as f64)))
        .reduce("dataread", Arity::Exact(1), Returns::Number, dataread)
        .reduce("datawrite", Arity::Exact(2), Returns::Number, datawrite)
        .frame("rboutput", Arity::Exact(2), Returns::Number, rboutput)
}

/// Zero-based slot for a 1-based script index into a buffer of `len`.
fn buffer_slot(function: &str, kind: &'static str, args: &[Value], len: usize) -> VmResult<usize> {
    let i = int_arg(function, args, 0)?;
    if i < 1 || i as usize > len {
        return Err(VmError::Index { type_name: kind, index: format_number(i as f64), len });
    }
    Ok(i as usize - 1)
}

fn dataread(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let i = buffer_slot("dataread", "data series", args, ctx.data.series.len())?;
    Ok(Value::Number(ctx.data.series[i]))
}

fn datawrite(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let i = buffer_slot("datawrite", "data series", args, ctx.data.series.len())?;
    let v = number_arg("datawrite", args, 1)?;
    ctx.data.series[i] = v;
    ctx.data.output_flags.insert(OutputFlags::DATA_MODIFIED);
    Ok(Value::Number(v))
}

fn rboutput(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let i = buffer_slot("rboutput", "output buffer", args, ctx.data.output.len())?;
    let v = number_arg("rboutput", args, 1)?;
    ctx.data.output[i] = v;
    Ok(Value::Number(v))
}
