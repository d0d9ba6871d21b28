mod common;

use common::MemoryStructure;
use trajscript::compiler::compile_with;
use trajscript::diagnostic::Severity;
use trajscript::{DataSourceConfig, Frame, ProgramState, Vec3, compile};

#[test]
fn constant_main_produces_byte_code() {
    for source in [
        "function main() return 1 end",
        "function main() return -2.5 end",
        "function main() return 1e3 end",
        "-- comment\nfunction main()\n  return 0\nend\n",
    ] {
        let outcome = compile(source);
        assert!(outcome.success, "{source}: {:?}", outcome.messages);
        assert_eq!(outcome.errors().count(), 0);
        assert!(outcome.program.byte_code_size() > 0);
    }
}

#[test]
fn empty_program_is_one_error_at_line_zero() {
    let outcome = compile("");
    assert!(!outcome.success);
    assert_eq!(outcome.messages.len(), 1);
    let m = &outcome.messages[0];
    assert_eq!((m.severity, m.line, m.text.as_str()), (Severity::Error, 0, "program is empty"));
}

#[test]
fn missing_main_is_one_error_at_line_zero() {
    let outcome = compile("function reduce() end");
    assert!(!outcome.success);
    assert_eq!(outcome.messages.len(), 1);
    let m = &outcome.messages[0];
    assert_eq!((m.severity, m.line), (Severity::Error, 0));
    assert_eq!(m.text, "entry function 'main' was not defined");
    assert_eq!(m.display(), "Error: entry function 'main' was not defined");
}

#[test]
fn torsion_is_zero_in_the_probe() {
    let source = "function main() return torsion(1,2,3,4) end";
    let outcome = compile(source);
    assert!(outcome.success, "{:?}", outcome.messages);

    // The same call needs a structure outside the probe.
    let mut state = ProgramState::new(DataSourceConfig::default());
    let err = state.execute(&outcome.program, Frame::default()).unwrap_err();
    assert!(err.to_string().contains("'torsion' needs a structure"));
}

#[test]
fn every_frame_function_has_a_probe_default() {
    let source = r#"
        function main()
            local total = numatoms() + numresidues() + radius(1) + serial("A", 1, "CA")
            total = total + residue(1) + atomflags(1) + sqdev(1) + rmsd() + sas()
            total = total + distance(1, 2) + angle(1, 2, 3) + utorsion(1, 2, 3, 4)
            total = total + dihedral(1, 2, 3, 4) + force(1) + resultant(1, 4) + hbenergy(1, 2)
            local m, o = get_residue_transform(1)
            if checkflags(1, 4) then total = total + 1 end
            rboutput(1, total)
            return total + length(coord(1)) + length(coord("A", 1, "N")) + length(o) + m[1]
        end"#;
    let outcome = compile(source);
    assert!(outcome.success, "{:?}", outcome.messages);
}

#[test]
fn unknown_function_suggests_a_name() {
    let outcome = compile("function main()\n  return numatom()\nend");
    assert!(!outcome.success);
    let m = &outcome.messages[0];
    assert_eq!(m.line, 2);
    assert_eq!(m.text, "undefined function 'numatom'");
    assert_eq!(m.suggestion.as_deref(), Some("did you mean 'numatoms'?"));
}

#[test]
fn runtime_type_error_is_reported_with_line() {
    let outcome = compile("function main()\n  local v = vec3(1, 2, 3)\n  return v .. nil\nend");
    assert!(!outcome.success);
    assert_eq!(outcome.messages[0].line, 3);
}

#[test]
fn runtime_arity_error_through_expansion() {
    let source = "function two() return 1, 2 end\nfunction main()\n  return vec3(two()).x\nend";
    let outcome = compile(source);
    assert!(!outcome.success);
    let m = &outcome.messages[0];
    assert_eq!(m.line, 3);
    assert_eq!(m.text, "wrong number of arguments to 'vec3' (expected 0, 1 or 3, got 2)");
}

#[test]
fn messages_escape_markup_for_display() {
    let outcome = compile("function main()\n  print('<b>')\n  return 0\nend");
    assert!(outcome.success);
    assert_eq!(outcome.messages[0].display(), "Message (2): &lt;b&gt;");
}

#[test]
fn phase_errors_are_tolerated_while_compiling() {
    let outcome = compile("function main() return dataread(1) end\nfunction reduce() rboutput(1, 2) end");
    assert!(outcome.success, "{:?}", outcome.messages);
}

#[test]
fn probe_sees_configured_arguments() {
    let source = "function main() local v = vec3(arg2) return 10 / arg2 + v[1] end";
    let config = DataSourceConfig::default().with_arguments(vec![0, 5]);
    let outcome = compile_with(source, &config);
    assert!(outcome.success, "{:?}", outcome.messages);
    let mut state = ProgramState::new(config);
    assert_eq!(state.execute(&outcome.program, Frame::default()).unwrap(), 7.0);
}

#[test]
fn recompiling_yields_an_equal_program() {
    let source = "total = 0\nfunction main() total = total + 1 return total end";
    assert_eq!(compile(source).program, compile(source).program);
    assert_ne!(compile(source).program, compile("function main() return 1 end").program);
}

#[test]
fn deep_nesting_is_a_diagnostic() {
    let depth = 100_000;
    let source = format!("function main()\n  return {}1{}\nend", "(".repeat(depth), ")".repeat(depth));
    let outcome = compile(&source);
    assert!(!outcome.success);
    let errors: Vec<_> = outcome.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].line, 2);
    assert!(errors[0].text.contains("too many nested levels"), "{}", errors[0].text);
}

#[test]
fn zero_argument_entry_calls_run() {
    let outcome = compile("function main() return numatoms() end");
    assert!(outcome.success, "{:?}", outcome.messages);
    let mut structure = MemoryStructure::chain(&[Vec3::ZERO; 3]);
    let mut state = ProgramState::new(DataSourceConfig::default());
    assert_eq!(state.execute(&outcome.program, Frame::new(&mut structure)).unwrap(), 3.0);
}
