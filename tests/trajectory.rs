mod common;

use common::{MemoryStructure, approx, compiled};
use trajscript::{DataSourceConfig, Frame, Mat3, OutputFlags, ProgramState, Vec3, run_trajectory};

fn rotating(n: usize) -> Vec<MemoryStructure> {
    (0..n).map(|i| MemoryStructure::dihedral(30.0 * i as f64 - 150.0)).collect()
}

#[test]
fn torsion_conventions_over_a_trajectory() {
    let program = compiled("function main() rboutput(1, utorsion(1, 2, 3, 4)) rboutput(2, dihedral(1, 2, 3, 4)) return torsion(1, 2, 3, 4) end");
    let config = DataSourceConfig::default().with_output_size(2);
    let mut frames = rotating(11);
    let outcome = run_trajectory(&program, &config, &mut frames, None, 4).unwrap();
    for (i, (value, out)) in outcome.series.iter().zip(&outcome.outputs).enumerate() {
        let degrees = 30.0 * i as f64 - 150.0;
        assert!(approx(*value, degrees.rem_euclid(360.0)), "frame {i}: {value}");
        assert!(approx(out[0], degrees.abs()), "frame {i}: {}", out[0]);
        assert!(approx(out[1], degrees), "frame {i}: {}", out[1]);
    }
}

#[test]
fn running_sum_across_workers() {
    let source = "
        sum = 0
        function main()
            sum = sum + distance(1, 3)
            return sum
        end
        function reduce()
            if type(sum) ~= 'list' then return end
            local total = 0
            for i = 1, #sum do total = total + sum[i] end
            for i = 1, datasize() do datawrite(i, dataread(i) / total) end
        end";
    let program = compiled(source);
    let mut frames: Vec<MemoryStructure> = (0..6)
        .map(|_| MemoryStructure::chain(&[Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)]))
        .collect();
    let outcome = run_trajectory(&program, &DataSourceConfig::default(), &mut frames, None, 3).unwrap();
    assert!(outcome.reduced);
    assert!(outcome.data_modified);
    // Three workers with two frames each; every worker's final sum is 4.
    let expected = [2.0, 4.0, 2.0, 4.0, 2.0, 4.0].map(|v| v / 12.0);
    for (got, want) in outcome.series.iter().zip(expected) {
        assert!(approx(*got, want), "{got} != {want}");
    }
}

#[test]
fn alignment_happens_once_per_frame() {
    let program = compiled("function main() return rmsd() + sqdev(1) + rmsd() end");
    let reference = MemoryStructure::chain(&[Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)]);
    let mut frame = MemoryStructure::chain(&[Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)]);
    frame.translate(Vec3::new(5.0, 5.0, 5.0));

    let mut state = ProgramState::new(DataSourceConfig::default());
    let value = state.execute(&program, Frame::new(&mut frame).with_reference(&reference)).unwrap();
    assert!(value.abs() < 1e-9);
    assert!(state.output_flags().contains(OutputFlags::ALIGNED));
    // Original coordinates are left alone.
    assert_eq!(frame.atoms[0].original, Vec3::new(5.0, 5.0, 5.0));
    assert_eq!(frame.atoms[0].position, Vec3::ZERO);
}

#[test]
fn lookups_by_name_and_missing_atoms() {
    let source = r#"
        function main()
            local ca = coord("A", 1, "CA")
            local missing = coord(99)
            return ca.x * 100 + length(missing) * 10 + serial("A", 2, "N") + radius(42)
        end"#;
    let program = compiled(source);
    let mut s = MemoryStructure::chain(&[
        Vec3::ZERO,
        Vec3::new(3.0, 0.0, 0.0),
        Vec3::ZERO,
        Vec3::ZERO,
    ]);
    let mut state = ProgramState::new(DataSourceConfig::default());
    assert_eq!(state.execute(&program, Frame::new(&mut s)).unwrap(), 304.0);
}

#[test]
fn host_services_reach_the_script() {
    let source = "
        function main()
            local m, o = get_residue_transform(2)
            rboutput(1, hbenergy(1, 4))
            rboutput(2, sas())
            rboutput(3, force(2) + resultant(1, 2))
            rboutput(4, numresidues())
            if checkflags(2, 5) then rboutput(5, atomflags(2)) end
            return m[5] + o.z
        end";
    let program = compiled(source);
    let mut s = MemoryStructure::chain(&[Vec3::ZERO; 6]);
    s.transforms.insert(1, (Mat3::IDENTITY, Vec3::new(0.0, 0.0, 4.0)));
    s.hbonds.insert((1, 4), -2.5);
    s.surface = 120.0;
    s.atoms[1].force = Vec3::new(3.0, 4.0, 0.0);
    s.atoms[0].force = Vec3::new(-3.0, 0.0, 0.0);
    s.atoms[1].flags = 7;

    let mut state = ProgramState::new(DataSourceConfig::default().with_output_size(5));
    assert_eq!(state.execute(&program, Frame::new(&mut s)).unwrap(), 5.0);
    assert_eq!(state.output(), [-2.5, 120.0, 9.0, 2.0, 7.0]);
    assert!(s.surface_requested);
}

#[test]
fn reference_is_shared_across_workers() {
    let program = compiled("function main() return rmsd() end");
    let reference = MemoryStructure::chain(&[Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)]);
    let mut frames: Vec<MemoryStructure> = (0..4)
        .map(|i| {
            let mut s = MemoryStructure::chain(&[Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)]);
            s.translate(Vec3::new(i as f64, 0.0, 0.0));
            s
        })
        .collect();
    let outcome = run_trajectory(&program, &DataSourceConfig::default(), &mut frames, Some(&reference), 2).unwrap();
    assert!(outcome.series.iter().all(|v| v.abs() < 1e-9));
}
