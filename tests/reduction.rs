mod common;

use common::compiled;
use trajscript::reduce::reduce;
use trajscript::{DataSourceConfig, Frame, GlobalTable, PhaseFlags, ProgramState, Value, merge_globals};

const SOURCE: &str = "
    function main()
        if datapos() == 1 then x = 1 elseif datapos() == 2 then x = 2 end
        label = 'frame ' .. datapos()
        arg1 = 99
        _VERSION = 'mine'
        return 0
    end
    function reduce()
        if type(x) == 'list' then datawrite(1, #x) end
    end";

/// One state per frame, each having executed its own frame.
fn executed(n: usize) -> Vec<ProgramState> {
    let program = compiled(SOURCE);
    (0..n)
        .map(|i| {
            let mut state = ProgramState::new(DataSourceConfig::default());
            state.execute(&program, Frame::default().at(i + 1, n)).unwrap();
            state
        })
        .collect()
}

#[test]
fn three_instances_merge_with_placeholder() {
    let mut states = executed(3);
    merge_globals(&mut states);
    assert_eq!(
        states[0].global("x"),
        Some(Value::List(vec![Value::Number(1.0), Value::Number(2.0), Value::Nil]))
    );
    assert_eq!(
        states[0].global("label"),
        Some(Value::List(vec![
            Value::Str("frame 1".into()),
            Value::Str("frame 2".into()),
            Value::Str("frame 3".into()),
        ]))
    );
    assert!(states[0].phase().contains(PhaseFlags::REDUCING));
    // Only the target instance changes.
    assert_eq!(states[1].global("x"), Some(Value::Number(2.0)));
}

#[test]
fn reserved_names_are_never_merged() {
    let mut states = executed(2);
    merge_globals(&mut states);
    assert_eq!(states[0].global("arg1"), Some(Value::Number(99.0)));
    assert_eq!(states[0].global("_VERSION"), Some(Value::Str("mine".into())));
}

#[test]
fn uninitialized_instances_contribute_placeholders() {
    let mut states = executed(1);
    states.push(ProgramState::new(DataSourceConfig::default()));
    merge_globals(&mut states);
    assert_eq!(states[0].global("x"), Some(Value::List(vec![Value::Number(1.0), Value::Nil])));
}

#[test]
fn reduce_runs_after_merge() {
    let mut states = executed(3);
    let mut series = vec![0.0; 3];
    assert!(reduce(&mut states, &mut series).unwrap());
    assert_eq!(series, [3.0, 0.0, 0.0]);
}

#[test]
fn reduce_over_nothing_is_a_no_op() {
    let mut states: Vec<ProgramState> = Vec::new();
    let mut series = Vec::new();
    assert!(!reduce(&mut states, &mut series).unwrap());
}

#[test]
fn per_frame_functions_fail_while_reducing() {
    let program = compiled("function main() return 0 end\nfunction reduce() datawrite(1, numatoms()) end");
    let mut state = ProgramState::new(DataSourceConfig::default());
    state.execute(&program, Frame::default()).unwrap();
    let err = state.run_reduce(&mut vec![0.0]).unwrap_err();
    assert_eq!(err.to_string(), "line 2: 'numatoms' cannot be called while reducing");
}

#[test]
fn reduce_functions_fail_per_frame() {
    let program = compiled("function main()\n  return dataread(1)\nend");
    let mut state = ProgramState::new(DataSourceConfig::default());
    let err = state.execute(&program, Frame::default()).unwrap_err();
    assert_eq!(err.to_string(), "line 2: 'dataread' cannot be called during per-frame execution");
}
