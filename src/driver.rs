//! Runs a compiled program over a whole trajectory.
//!
//! Frames are split into contiguous runs, one per worker thread. Each worker
//! owns one [`ProgramState`] for the whole run. After every worker has been
//! joined the states are merged and `reduce` runs once on the calling thread.

use tracing::{debug, trace};

use crate::config::DataSourceConfig;
use crate::flags::OutputFlags;
use crate::program::Program;
use crate::reduce::reduce;
use crate::state::{Frame, ProgramState};
use crate::structure::Structure;
use crate::vm::{ScriptError, VmError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// `main`'s result per frame, possibly rewritten by `reduce`.
    pub series: Vec<f64>,
    /// The output buffer after each frame.
    pub outputs: Vec<Vec<f64>>,
    /// Whether `reduce` wrote to the series.
    pub data_modified: bool,
    /// Whether a `reduce` entry point ran.
    pub reduced: bool,
}

struct WorkerResult {
    state: ProgramState,
    series: Vec<f64>,
    outputs: Vec<Vec<f64>>,
}

/// Executes `program` once per frame on up to `workers` threads, then merges
/// and reduces. The first error from any worker aborts the run.
pub fn run_trajectory<S: Structure>(
    program: &Program,
    config: &DataSourceConfig,
    frames: &mut [S],
    reference: Option<&(dyn Structure + Sync)>,
    workers: usize,
) -> Result<RunOutcome, ScriptError> {
    let count = frames.len();
    if count == 0 {
        return Ok(RunOutcome::default());
    }
    let per_worker = count.div_ceil(workers.max(1));
    debug!(frames = count, workers = count.div_ceil(per_worker), per_worker, "partitioned trajectory");

    let results: Vec<Result<WorkerResult, ScriptError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = frames
            .chunks_mut(per_worker)
            .enumerate()
            .map(|(worker, part)| {
                let config = config.clone();
                let first = worker * per_worker;
                scope.spawn(move || run_worker(program, config, part, reference, first, count))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(VmError::Runtime("worker thread panicked".into()).into()))
            })
            .collect()
    });

    let mut states = Vec::with_capacity(results.len());
    let mut outcome = RunOutcome { series: Vec::with_capacity(count), ..RunOutcome::default() };
    for result in results {
        let worker = result?;
        outcome.series.extend(worker.series);
        outcome.outputs.extend(worker.outputs);
        states.push(worker.state);
    }

    outcome.reduced = reduce(&mut states, &mut outcome.series)?;
    outcome.data_modified = states
        .first()
        .is_some_and(|s| s.output_flags().contains(OutputFlags::DATA_MODIFIED));
    Ok(outcome)
}

fn run_worker<S: Structure>(
    program: &Program,
    config: DataSourceConfig,
    part: &mut [S],
    reference: Option<&(dyn Structure + Sync)>,
    first: usize,
    count: usize,
) -> Result<WorkerResult, ScriptError> {
    let mut state = ProgramState::new(config);
    state.load(program)?;
    let mut series = Vec::with_capacity(part.len());
    let mut outputs = Vec::with_capacity(part.len());
    for (i, structure) in part.iter_mut().enumerate() {
        let position = first + i + 1;
        trace!(position, "executing frame");
        let mut frame = Frame::new(structure).at(position, count);
        if let Some(reference) = reference {
            frame = frame.with_reference(reference);
        }
        series.push(state.execute(program, frame)?);
        outputs.push(state.output().to_vec());
    }
    Ok(WorkerResult { state, series, outputs })
}
