//! Cross-instance merge of global bindings, and the reduce pass that follows.

use tracing::debug;

use crate::state::ProgramState;
use crate::value::Value;
use crate::vm::{ScriptError, is_reserved_global};

/// Read/write access to an instance's globals, independent of how the
/// instance stores them.
pub trait GlobalTable {
    /// False for an instance that never loaded a program.
    fn is_initialized(&self) -> bool;

    /// Names of every global currently bound to a non-nil value.
    fn global_names(&self) -> Vec<String>;

    fn global(&self, name: &str) -> Option<Value>;

    fn set_global(&mut self, name: &str, value: Value) -> bool;

    fn mark_reducing(&mut self);
}

/// Replaces each mergeable global of `tables[0]` with a list holding that
/// global's value from every table, in table order. Tables lacking the name,
/// or holding a value that cannot be transferred, contribute `nil`.
///
/// Returns the number of globals merged.
pub fn merge_globals<G: GlobalTable>(tables: &mut [G]) -> usize {
    let n = tables.len();
    let Some((first, rest)) = tables.split_first_mut() else {
        return 0;
    };
    let mut names = first.global_names();
    names.sort();

    let mut merged = 0;
    for name in names {
        if is_reserved_global(&name) {
            continue;
        }
        let Some(own) = first.global(&name).filter(Value::is_transferable) else {
            continue;
        };
        let mut items = Vec::with_capacity(n);
        items.push(own);
        for other in rest.iter() {
            let value = other
                .is_initialized()
                .then(|| other.global(&name))
                .flatten()
                .filter(Value::is_transferable);
            items.push(value.unwrap_or_default());
        }
        first.set_global(&name, Value::List(items));
        merged += 1;
    }
    first.mark_reducing();
    debug!(merged, instances = n, "merged globals");
    merged
}

/// Merges globals into `states[0]` and runs its `reduce` entry point over
/// `series`. Returns whether a reduce pass ran.
pub fn reduce(states: &mut [ProgramState], series: &mut Vec<f64>) -> Result<bool, ScriptError> {
    if states.is_empty() {
        return Ok(false);
    }
    merge_globals(states);
    let first = &mut states[0];
    if !first.is_initialized() {
        return Ok(false);
    }
    first.run_reduce(series)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    /// Globals as a plain map, for exercising the merge on its own.
    #[derive(Default)]
    struct MapTable {
        initialized: bool,
        globals: BTreeMap<String, Value>,
        reducing: bool,
    }

    impl MapTable {
        fn with(pairs: &[(&str, Value)]) -> Self {
            MapTable {
                initialized: true,
                globals: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                reducing: false,
            }
        }
    }

    impl GlobalTable for MapTable {
        fn is_initialized(&self) -> bool {
            self.initialized
        }

        fn global_names(&self) -> Vec<String> {
            self.globals.keys().cloned().collect()
        }

        fn global(&self, name: &str) -> Option<Value> {
            self.globals.get(name).cloned()
        }

        fn set_global(&mut self, name: &str, value: Value) -> bool {
            self.globals.insert(name.to_string(), value);
            true
        }

        fn mark_reducing(&mut self) {
            self.reducing = true;
        }
    }

    #[test]
    fn merges_into_first_table() {
        let mut tables = vec![
            MapTable::with(&[("x", Value::Number(1.0))]),
            MapTable::with(&[("x", Value::Number(2.0))]),
            MapTable::with(&[]),
        ];
        assert_eq!(merge_globals(&mut tables), 1);
        assert_eq!(
            tables[0].global("x"),
            Some(Value::List(vec![Value::Number(1.0), Value::Number(2.0), Value::Nil]))
        );
        assert!(tables[0].reducing);
        assert!(!tables[1].reducing);
    }

    #[test]
    fn skips_reserved_and_untransferable() {
        let mut tables = vec![
            MapTable::with(&[
                ("arg1", Value::Number(1.0)),
                ("_VERSION", Value::Str("v".into())),
                ("flag", Value::Bool(true)),
                ("items", Value::List(vec![])),
                ("name", Value::Str("a".into())),
            ]),
            MapTable::with(&[("name", Value::Bool(false))]),
        ];
        assert_eq!(merge_globals(&mut tables), 1);
        assert_eq!(tables[0].global("arg1"), Some(Value::Number(1.0)));
        assert_eq!(tables[0].global("flag"), Some(Value::Bool(true)));
        assert_eq!(
            tables[0].global("name"),
            Some(Value::List(vec![Value::Str("a".into()), Value::Nil]))
        );
    }

    #[test]
    fn uninitialized_tables_contribute_placeholders() {
        let mut ghost = MapTable::with(&[("x", Value::Number(9.0))]);
        ghost.initialized = false;
        let mut tables = vec![MapTable::with(&[("x", Value::Number(1.0))]), ghost];
        merge_globals(&mut tables);
        assert_eq!(tables[0].global("x"), Some(Value::List(vec![Value::Number(1.0), Value::Nil])));
    }

    #[test]
    fn geometric_values_are_copied() {
        use crate::value::Vec3;
        let v = Value::Vec3(Vec3::new(1.0, 2.0, 3.0));
        let mut tables = vec![MapTable::with(&[("v", v.clone())]), MapTable::with(&[("v", v.clone())])];
        merge_globals(&mut tables);
        assert_eq!(tables[0].global("v"), Some(Value::List(vec![v.clone(), v])));
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let mut tables: Vec<MapTable> = Vec::new();
        assert_eq!(merge_globals(&mut tables), 0);
    }
}
