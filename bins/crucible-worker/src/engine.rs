/// Process Orchestrator
///
/// **Core Responsibility:**
/// Drive one test case through its stages and hand the observations to the
/// evaluator.
///
/// **Stage Order:**
/// - Comparison: generator → reference ∥ solution
/// - Validation: generator → solution → validator `<input-file> <output-file>`
/// - Benchmark:  generator → solution (∥ reference when one is bound)
///
/// The generator stage is skipped for supplied inputs. No stage is retried;
/// the first timeout or crash ends the case. Every stage runs inside its own
/// role subdirectory of a per-case scratch directory that is removed when the
/// case finishes.
///
/// **Cancellation:**
/// A cancelled stage is killed and the whole case is discarded (`None`).

use crucible_common::config::EngineConfig;
use crucible_common::types::{Artifact, CaseResult, Role, StageResult, TestType};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::evaluator::{self, CaseExecution};
use crate::process::{run_process, ProcessSpec};

/// Where a case's input comes from.
#[derive(Debug, Clone)]
pub enum CaseInput {
    Generate,
    Supplied(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseState {
    Pending,
    GeneratorRunning,
    ReferenceRunning,
    SolutionRunning,
    ValidatorRunning,
    Done,
    Failed,
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaseState::Pending => "pending",
            CaseState::GeneratorRunning => "generator-running",
            CaseState::ReferenceRunning => "reference-running",
            CaseState::SolutionRunning => "solution-running",
            CaseState::ValidatorRunning => "validator-running",
            CaseState::Done => "done",
            CaseState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct CaseTracker {
    index: u32,
    state: CaseState,
}

impl CaseTracker {
    fn advance(&mut self, next: CaseState) {
        debug!(index = self.index, from = %self.state, to = %next, "Case state transition");
        self.state = next;
    }
}

pub struct CaseOrchestrator {
    config: Arc<EngineConfig>,
    test_type: TestType,
    artifacts: BTreeMap<Role, Artifact>,
}

impl CaseOrchestrator {
    pub fn new(config: Arc<EngineConfig>, test_type: TestType, artifacts: BTreeMap<Role, Artifact>) -> Self {
        Self {
            config,
            test_type,
            artifacts,
        }
    }

    /// Run one case to a verdict. Returns `None` if the suite was cancelled
    /// while the case was in flight.
    #[instrument(skip(self, input, cancel), fields(test_type = %self.test_type))]
    pub async fn run_case(&self, index: u32, input: CaseInput, cancel: &CancellationToken) -> Option<CaseResult> {
        if cancel.is_cancelled() {
            return None;
        }

        let started = Instant::now();
        let mut tracker = CaseTracker {
            index,
            state: CaseState::Pending,
        };

        let scratch = match tempfile::Builder::new().prefix("crucible-case-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(index, error = %e, "Failed to create case scratch directory");
                return Some(evaluator::internal_error(index, format!("scratch directory: {}", e)));
            }
        };
        let cwd = scratch.path();
        if let Err(e) = create_stage_dirs(cwd) {
            warn!(index, error = %e, "Failed to create stage directories");
            return Some(evaluator::internal_error(index, format!("stage directories: {}", e)));
        }
        let mut stages = Vec::new();

        let input = match input {
            CaseInput::Supplied(bytes) => bytes,
            CaseInput::Generate => {
                tracker.advance(CaseState::GeneratorRunning);
                let generator = self
                    .run_stage(Role::Generator, None, &[], self.config.generator_timeout(), cwd, cancel)
                    .await?;
                let usable = !generator.failed() && !generator.stdout_truncated;
                let generated = generator.stdout.clone();
                stages.push(generator);
                if !usable {
                    tracker.advance(CaseState::Failed);
                    return Some(self.finish(index, None, stages, started));
                }
                generated
            }
        };

        let paired = self.test_type == TestType::Comparison
            || (self.test_type == TestType::Benchmark && self.artifacts.contains_key(&Role::Reference));

        let solution = if paired {
            tracker.advance(CaseState::ReferenceRunning);
            let (reference, solution) = tokio::join!(
                self.run_stage(Role::Reference, Some(&input), &[], self.config.time_limit(), cwd, cancel),
                self.run_stage(Role::Solution, Some(&input), &[], self.config.time_limit(), cwd, cancel),
            );
            stages.push(reference?);
            solution?
        } else {
            tracker.advance(CaseState::SolutionRunning);
            self.run_stage(Role::Solution, Some(&input), &[], self.config.time_limit(), cwd, cancel)
                .await?
        };
        self.persist_io(index, &input, &solution.stdout);

        let solution_failed = solution.failed();
        let solution_output = solution.stdout.clone();
        stages.push(solution);

        if self.test_type == TestType::Validation {
            if solution_failed {
                tracker.advance(CaseState::Failed);
                return Some(self.finish(index, Some(input), stages, started));
            }

            tracker.advance(CaseState::ValidatorRunning);
            let (input_path, output_path) = match write_validator_files(cwd, &input, &solution_output) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(index, error = %e, "Failed to write validator files");
                    return Some(evaluator::internal_error(index, format!("validator files: {}", e)));
                }
            };
            let args = [
                input_path.to_string_lossy().into_owned(),
                output_path.to_string_lossy().into_owned(),
            ];
            let validator = self
                .run_stage(Role::Validator, None, &args, self.config.validator_timeout(), cwd, cancel)
                .await?;
            stages.push(validator);
        }

        tracker.advance(if solution_failed { CaseState::Failed } else { CaseState::Done });
        Some(self.finish(index, Some(input), stages, started))
    }

    fn finish(&self, index: u32, input: Option<Vec<u8>>, stages: Vec<StageResult>, started: Instant) -> CaseResult {
        let result = evaluator::evaluate(
            self.test_type,
            CaseExecution {
                index,
                input,
                stages,
                total_time: started.elapsed(),
            },
            self.config.comparison,
        );
        debug!(index, verdict = %result.verdict, "Case evaluated");
        result
    }

    /// Run `role`'s artifact once. `None` means the suite was cancelled.
    async fn run_stage(
        &self,
        role: Role,
        stdin: Option<&[u8]>,
        extra_args: &[String],
        timeout: Duration,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Option<StageResult> {
        let Some(artifact) = self.artifacts.get(&role) else {
            return Some(missing_artifact(role));
        };

        let mut argv = artifact.run_command.clone();
        argv.extend_from_slice(extra_args);
        let stage_dir = stage_dir(cwd, role);
        let spec = ProcessSpec {
            argv: &argv,
            cwd: Some(&stage_dir),
            stdin,
            timeout,
            output_limit: self.config.output_limit_bytes,
            memory_limit_mb: self.config.memory_limit_mb,
        };

        let outcome = run_process(&spec, cancel).await;
        if outcome.cancelled {
            return None;
        }
        Some(outcome.into_stage(role))
    }

    /// Save the case input and solution output under `io_dir`, if configured.
    fn persist_io(&self, index: u32, input: &[u8], output: &[u8]) {
        let Some(io_dir) = &self.config.io_dir else {
            return;
        };
        let root = io_dir.join(self.test_type.dir_name());
        let writes = [
            (root.join("inputs"), format!("input_{}.txt", index), input),
            (root.join("outputs"), format!("output_{}.txt", index), output),
        ];
        for (dir, name, bytes) in writes {
            if let Err(e) = fs::create_dir_all(&dir).and_then(|_| fs::write(dir.join(&name), bytes)) {
                warn!(index, file = %name, error = %e, "Failed to persist test I/O");
            }
        }
    }
}

fn missing_artifact(role: Role) -> StageResult {
    StageResult {
        role,
        exit_code: None,
        stdout: Vec::new(),
        stderr: format!("no artifact bound to {}", role).into_bytes(),
        stdout_truncated: false,
        stderr_truncated: false,
        wall_time_ms: 0,
        timed_out: false,
        crashed: role != Role::Validator,
    }
}

/// Each role works in its own subdirectory of the case scratch dir, so
/// concurrent stages writing fixed file names do not collide.
fn stage_dir(scratch: &Path, role: Role) -> PathBuf {
    scratch.join(role.as_str())
}

fn create_stage_dirs(scratch: &Path) -> std::io::Result<()> {
    for role in Role::ALL {
        fs::create_dir(stage_dir(scratch, role))?;
    }
    Ok(())
}

fn write_validator_files(dir: &Path, input: &[u8], output: &[u8]) -> std::io::Result<(PathBuf, PathBuf)> {
    let input_path = dir.join("input.txt");
    let output_path = dir.join("output.txt");
    fs::write(&input_path, input)?;
    fs::write(&output_path, output)?;
    Ok((input_path, output_path))
}
