//! Per-frame queries against the current structure.

use super::{Arity, CallContext, RegistryBuilder, Returns, int_arg, str_arg};
use crate::structure::{AtomId, Structure};
use crate::value::geometry::{angle_deg, dihedral_deg, torsion_deg, utorsion_deg};
use crate::value::{Mat3, Value, Vec3};
use crate::vm::{VmError, VmResult};

const ATOM_BY_SERIAL_OR_NAME: Arity = Arity::OneOf(&[1, 3]);

pub(super) fn register(b: RegistryBuilder) -> RegistryBuilder {
    b.frame("numatoms", Arity::Exact(0), Returns::Number, numatoms)
        .frame("numresidues", Arity::Exact(0), Returns::Number, numresidues)
        .frame("coord", ATOM_BY_SERIAL_OR_NAME, Returns::Vec3, coord)
        .frame("radius", ATOM_BY_SERIAL_OR_NAME, Returns::Number, radius)
        .frame("serial", Arity::Exact(3), Returns::Number, serial)
        .frame("residue", Arity::Exact(1), Returns::Number, residue)
        .frame("atomflags", Arity::Exact(1), Returns::Number, atomflags)
        .frame("checkflags", Arity::Exact(2), Returns::Bool, checkflags)
        .frame("sqdev", Arity::Exact(1), Returns::Number, sqdev)
        .frame("rmsd", Arity::Exact(0), Returns::Number, rmsd)
        .frame("sas", Arity::Exact(0), Returns::Number, sas)
        .frame("distance", Arity::Exact(2), Returns::Number, distance)
        .frame("angle", Arity::Exact(3), Returns::Number, angle)
        .frame("torsion", Arity::Exact(4), Returns::Number, |ctx, args| dihedral_with(ctx, args, "torsion", torsion_deg))
        .frame("utorsion", Arity::Exact(4), Returns::Number, |ctx, args| {
            dihedral_with(ctx, args, "utorsion", utorsion_deg)
        })
        .frame("dihedral", Arity::Exact(4), Returns::Number, |ctx, args| {
            dihedral_with(ctx, args, "dihedral", dihedral_deg)
        })
        .frame("force", Arity::Exact(1), Returns::Number, force)
        .frame("resultant", Arity::Exact(2), Returns::Number, resultant)
        .frame("hbenergy", Arity::Exact(2), Returns::Number, hbenergy)
        .frame_pair("get_residue_transform", Arity::Exact(1), Returns::Transform, get_residue_transform)
}

/// Looks up an atom by serial (`f(serial)`) or by `f(chain, residue, name)`.
fn locate(ctx: &mut CallContext<'_>, function: &str, args: &[Value]) -> VmResult<Option<AtomId>> {
    if args.len() == 3 {
        let chain = str_arg(function, args, 0)?;
        let residue = int_arg(function, args, 1)?;
        let name = str_arg(function, args, 2)?;
        return Ok(ctx.structure(function)?.find_atom_by_name(chain, residue, name));
    }
    let serial = int_arg(function, args, 0)?;
    Ok(ctx.structure(function)?.find_atom(serial))
}

/// Current positions of the atoms whose serials are given, or `None` if any is missing.
fn positions<const N: usize>(ctx: &mut CallContext<'_>, function: &str, args: &[Value]) -> VmResult<Option<[Vec3; N]>> {
    let mut serials = [0; N];
    for (i, s) in serials.iter_mut().enumerate() {
        *s = int_arg(function, args, i)?;
    }
    let s = ctx.structure(function)?;
    let mut out = [Vec3::ZERO; N];
    for (slot, serial) in out.iter_mut().zip(serials) {
        match s.find_atom(serial) {
            Some(atom) => *slot = s.position(atom),
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

fn number(n: f64) -> VmResult<Value> {
    Ok(Value::Number(n))
}

fn numatoms(ctx: &mut CallContext<'_>, _: &[Value]) -> VmResult<Value> {
    number(ctx.structure("numatoms")?.atom_count() as f64)
}

fn numresidues(ctx: &mut CallContext<'_>, _: &[Value]) -> VmResult<Value> {
    number(ctx.structure("numresidues")?.residue_count() as f64)
}

fn coord(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let atom = locate(ctx, "coord", args)?;
    let s = ctx.structure("coord")?;
    Ok(Value::Vec3(atom.map_or(Vec3::ZERO, |a| s.original_position(a))))
}

fn radius(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let atom = locate(ctx, "radius", args)?;
    let s = ctx.structure("radius")?;
    number(atom.map_or(0.0, |a| s.radius(a)))
}

fn serial(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let atom = locate(ctx, "serial", args)?;
    let s = ctx.structure("serial")?;
    number(atom.map_or(0, |a| s.serial(a)) as f64)
}

fn residue(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let atom = locate(ctx, "residue", args)?;
    let s = ctx.structure("residue")?;
    number(atom.map_or(0, |a| s.residue(a)) as f64)
}

fn atom_flags(ctx: &mut CallContext<'_>, function: &str, args: &[Value]) -> VmResult<u32> {
    let atom = locate(ctx, function, &args[..1])?;
    let s = ctx.structure(function)?;
    Ok(atom.map_or(0, |a| s.flags(a)))
}

fn atomflags(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    number(atom_flags(ctx, "atomflags", args)? as f64)
}

fn checkflags(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let mask = u32::try_from(int_arg("checkflags", args, 1)?)
        .map_err(|_| VmError::bad_argument("checkflags", 1, "flag mask", args.get(1)))?;
    let flags = atom_flags(ctx, "checkflags", args)?;
    Ok(Value::Bool(flags & mask == mask))
}

fn sqdev(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    ctx.ensure_aligned("sqdev")?;
    let atom = locate(ctx, "sqdev", args)?;
    let reference = ctx.reference("sqdev")?;
    let s = ctx.structure("sqdev")?;
    number(atom.map_or(0.0, |a| s.squared_deviation(a, reference)))
}

fn rmsd(ctx: &mut CallContext<'_>, _: &[Value]) -> VmResult<Value> {
    ctx.ensure_aligned("rmsd")?;
    let reference = ctx.reference("rmsd")?;
    number(ctx.structure("rmsd")?.rmsd(reference))
}

fn sas(ctx: &mut CallContext<'_>, _: &[Value]) -> VmResult<Value> {
    let s = ctx.structure("sas")?;
    s.request_surface();
    number(s.surface_area())
}

fn distance(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let d = positions::<2>(ctx, "distance", args)?.map_or(0.0, |[a, b]| a.distance(b));
    number(d)
}

fn angle(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let d = positions::<3>(ctx, "angle", args)?.map_or(0.0, |[a, b, c]| angle_deg(a, b, c));
    number(d)
}

fn dihedral_with(
    ctx: &mut CallContext<'_>,
    args: &[Value],
    function: &str,
    measure: fn(Vec3, Vec3, Vec3, Vec3) -> f64,
) -> VmResult<Value> {
    let d = positions::<4>(ctx, function, args)?.map_or(0.0, |[a, b, c, d]| measure(a, b, c, d));
    number(d)
}

fn force(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let atom = locate(ctx, "force", args)?;
    let s = ctx.structure("force")?;
    number(atom.map_or(0.0, |a| s.force(a).length()))
}

/// Magnitude of the summed force over atoms with serials `first..=last`.
fn resultant(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let first = int_arg("resultant", args, 0)?;
    let last = int_arg("resultant", args, 1)?;
    let s: &dyn Structure = ctx.structure("resultant")?;
    let total: Vec3 = (0..s.atom_count())
        .filter(|&a| (first..=last).contains(&s.serial(a)))
        .map(|a| s.force(a))
        .sum();
    number(total.length())
}

fn hbenergy(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Value> {
    let donor = int_arg("hbenergy", args, 0)?;
    let acceptor = int_arg("hbenergy", args, 1)?;
    let s = ctx.structure("hbenergy")?;
    let energy = match (s.find_atom(donor), s.find_atom(acceptor)) {
        (Some(d), Some(a)) => s.hbond_energy(d, a),
        _ => 0.0,
    };
    number(energy)
}

fn get_residue_transform(ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<(Value, Value)> {
    let atom = locate(ctx, "get_residue_transform", args)?;
    let s = ctx.structure("get_residue_transform")?;
    let (frame, origin) = atom.and_then(|a| s.residue_transform(a)).unwrap_or((Mat3::ZERO, Vec3::ZERO));
    Ok((Value::Mat3(frame), Value::Vec3(origin)))
}

#[cfg(test)]
mod tests {
    use super::super::{Results, invoke, lookup};
    use super::*;
    use crate::flags::OutputFlags;
    use crate::state::InstanceData;
    use crate::structure::fixtures::TestStructure;
    use crate::vm::VmError;

    fn backbone() -> TestStructure {
        TestStructure::new(&[
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 1.0),
        ])
    }

    fn call_on(
        data: &mut InstanceData,
        structure: &mut TestStructure,
        reference: Option<&TestStructure>,
        name: &str,
        args: &[Value],
    ) -> VmResult<Results> {
        let mut ctx = CallContext::new(data, Some(structure), reference.map(|r| r as &dyn Structure));
        invoke(lookup(name).unwrap(), &mut ctx, args)
    }

    fn num(name: &str, args: &[f64]) -> f64 {
        let args: Vec<Value> = args.iter().copied().map(Value::Number).collect();
        let mut s = backbone();
        let r = call_on(&mut InstanceData::default(), &mut s, None, name, &args).unwrap();
        r.first().as_number().unwrap()
    }

    #[test]
    fn counts() {
        assert_eq!(num("numatoms", &[]), 4.0);
        assert_eq!(num("numresidues", &[]), 2.0);
    }

    #[test]
    fn geometry_queries() {
        assert!((num("distance", &[1.0, 3.0]) - 2f64.sqrt()).abs() < 1e-12);
        assert!((num("angle", &[1.0, 2.0, 3.0]) - 90.0).abs() < 1e-9);
        let t = num("torsion", &[1.0, 2.0, 3.0, 4.0]);
        assert!((0.0..360.0).contains(&t));
        assert!((num("utorsion", &[1.0, 2.0, 3.0, 4.0]) - 90.0).abs() < 1e-9);
        assert!((num("dihedral", &[1.0, 2.0, 3.0, 4.0]).abs() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn missing_atoms_give_zero() {
        assert_eq!(num("distance", &[1.0, 99.0]), 0.0);
        assert_eq!(num("torsion", &[1.0, 2.0, 3.0, 99.0]), 0.0);
        assert_eq!(num("radius", &[99.0]), 0.0);
        let mut s = backbone();
        let r = call_on(&mut InstanceData::default(), &mut s, None, "coord", &[Value::Number(99.0)]).unwrap();
        assert_eq!(r, Results::One(Value::Vec3(Vec3::ZERO)));
    }

    #[test]
    fn coord_by_name() {
        let mut s = backbone();
        let args = [Value::Str("A".into()), Value::Number(1.0), Value::Str("CA".into())];
        let r = call_on(&mut InstanceData::default(), &mut s, None, "coord", &args).unwrap();
        assert_eq!(r, Results::One(Value::Vec3(Vec3::ZERO)));
        let r = call_on(&mut InstanceData::default(), &mut s, None, "serial", &args).unwrap();
        assert_eq!(r, Results::One(Value::Number(2.0)));
    }

    #[test]
    fn rmsd_aligns_once_per_frame() {
        let mut data = InstanceData::default();
        let mut s = backbone();
        let mut reference = backbone();
        for atom in &mut reference.atoms {
            atom.position = atom.position + Vec3::new(3.0, 0.0, 0.0);
        }
        let r = call_on(&mut data, &mut s, Some(&reference), "rmsd", &[]).unwrap();
        assert!(r.first().as_number().unwrap() < 1e-12);
        assert!(data.output_flags.contains(OutputFlags::ALIGNED));
        call_on(&mut data, &mut s, Some(&reference), "sqdev", &[Value::Number(1.0)]).unwrap();
        assert_eq!(s.superpose_calls, 1);
    }

    #[test]
    fn rmsd_without_reference_fails() {
        let mut s = backbone();
        let err = call_on(&mut InstanceData::default(), &mut s, None, "rmsd", &[]).unwrap_err();
        assert_eq!(err, VmError::MissingReference { function: "rmsd".into() });
    }

    #[test]
    fn sas_requests_the_surface() {
        let mut s = backbone();
        let r = call_on(&mut InstanceData::default(), &mut s, None, "sas", &[]).unwrap();
        assert_eq!(r.first(), Value::Number(42.0));
        assert!(s.surface_requested);
    }

    #[test]
    fn flags_and_forces() {
        let mut s = backbone();
        s.atoms[0].flags = 0b101;
        s.atoms[0].force = Vec3::new(3.0, 4.0, 0.0);
        s.atoms[1].force = Vec3::new(-3.0, 0.0, 0.0);
        let mut data = InstanceData::default();
        let check = |data: &mut InstanceData, s: &mut TestStructure, mask: f64| {
            call_on(data, s, None, "checkflags", &[Value::Number(1.0), Value::Number(mask)]).unwrap().first()
        };
        assert_eq!(check(&mut data, &mut s, 4.0), Value::Bool(true));
        assert_eq!(check(&mut data, &mut s, 2.0), Value::Bool(false));
        let r = call_on(&mut data, &mut s, None, "force", &[Value::Number(1.0)]).unwrap();
        assert_eq!(r.first(), Value::Number(5.0));
        let r = call_on(&mut data, &mut s, None, "resultant", &[Value::Number(1.0), Value::Number(2.0)]).unwrap();
        assert_eq!(r.first(), Value::Number(4.0));
    }

    #[test]
    fn resultant_over_a_wide_serial_range() {
        let mut s = backbone();
        s.atoms[0].force = Vec3::new(3.0, 4.0, 0.0);
        s.atoms[1].force = Vec3::new(-3.0, 0.0, 0.0);
        let mut data = InstanceData::default();
        let mut call = |first: f64, last: f64| {
            call_on(&mut data, &mut s, None, "resultant", &[Value::Number(first), Value::Number(last)])
                .unwrap()
                .first()
        };
        assert_eq!(call(1.0, 3e9), Value::Number(4.0));
        assert_eq!(call(-3e9, 1.0), Value::Number(5.0));
        assert_eq!(call(2.0, 1.0), Value::Number(0.0));
    }

    #[test]
    fn checkflags_rejects_masks_outside_u32() {
        let mut s = backbone();
        s.atoms[0].flags = u32::MAX;
        let mut data = InstanceData::default();
        for mask in [-1.0, 4294967296.0] {
            let err = call_on(&mut data, &mut s, None, "checkflags", &[Value::Number(1.0), Value::Number(mask)])
                .unwrap_err();
            assert!(matches!(err, VmError::Type(_)), "{err}");
            assert!(err.to_string().contains("bad argument #2 to 'checkflags'"), "{err}");
        }
        let r = call_on(&mut data, &mut s, None, "checkflags", &[Value::Number(1.0), Value::Number(4294967295.0)])
            .unwrap();
        assert_eq!(r.first(), Value::Bool(true));
    }

    #[test]
    fn residue_transform_defaults_to_zeros() {
        let mut s = backbone();
        let r = call_on(&mut InstanceData::default(), &mut s, None, "get_residue_transform", &[Value::Number(1.0)])
            .unwrap();
        assert_eq!(r, Results::Two(Value::Mat3(Mat3::ZERO), Value::Vec3(Vec3::ZERO)));
    }
}
