/// Suite Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Run a whole suite for one snapshot and aggregate the case verdicts.
///
/// **Architecture:**
/// 1. Resolve roles (resolver.rs) or take a frozen snapshot
/// 2. Compile every needed role once (compiler.rs)
/// 3. Run cases on a bounded pool (engine.rs), judge them (evaluator.rs)
/// 4. Collect results keyed by index into a `SuiteReport`
///
/// Only prerequisites abort a suite: role resolution and compilation. A case
/// that fails in any other way, including a panicked case task, is reported
/// as an Internal Error and the suite continues.

use chrono::Utc;
use crucible_common::config::EngineConfig;
use crucible_common::toolchain::ToolchainTable;
use crucible_common::types::{Artifact, CaseResult, Role, Snapshot, SuiteReport, TestType, Verdict};
use futures_util::future::try_join_all;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::compiler::CompilationManager;
use crate::engine::{CaseInput, CaseOrchestrator};
use crate::error::{EngineError, EngineResult};
use crate::evaluator;
use crate::resolver;
use crate::workspace::Workspace;

/// Where test case inputs come from.
#[derive(Debug, Clone)]
pub enum CaseSource {
    /// Run the generator for cases `1..=count`
    Generated(u32),
    /// Use these inputs as cases `1..=len`; the generator is not run
    Supplied(Vec<Vec<u8>>),
}

impl CaseSource {
    fn len(&self) -> usize {
        match self {
            CaseSource::Generated(count) => *count as usize,
            CaseSource::Supplied(inputs) => inputs.len(),
        }
    }

    fn into_cases(self) -> Vec<(u32, CaseInput)> {
        match self {
            CaseSource::Generated(count) => (1..=count).map(|i| (i, CaseInput::Generate)).collect(),
            CaseSource::Supplied(inputs) => inputs
                .into_iter()
                .enumerate()
                .map(|(i, input)| (i as u32 + 1, CaseInput::Supplied(input)))
                .collect(),
        }
    }
}

pub struct SuiteExecutor {
    config: Arc<EngineConfig>,
    compiler: CompilationManager,
}

impl SuiteExecutor {
    pub fn new(config: EngineConfig, toolchains: Arc<ToolchainTable>) -> Self {
        Self {
            compiler: CompilationManager::new(config.clone(), toolchains),
            config: Arc::new(config),
        }
    }

    pub fn compiler(&self) -> &CompilationManager {
        &self.compiler
    }

    /// Resolve `workspace` for `test_type` and run the suite on the result.
    pub async fn run_workspace(
        &self,
        workspace: &Workspace,
        test_type: TestType,
        source: CaseSource,
        cancel: &CancellationToken,
    ) -> EngineResult<SuiteReport> {
        let snapshot = resolver::resolve(&workspace.files(), test_type)?.into_snapshot();
        self.run_snapshot(&snapshot, workspace, source, cancel).await
    }

    /// Run a suite for `snapshot`, taking source bytes from `workspace`.
    ///
    /// ## Returns
    /// A report ordered by case index. When `cancel` fires, the report is
    /// marked cancelled and holds only the cases that finished.
    pub async fn run_snapshot(
        &self,
        snapshot: &Snapshot,
        workspace: &Workspace,
        source: CaseSource,
        cancel: &CancellationToken,
    ) -> EngineResult<SuiteReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let test_type = snapshot.test_type;

        let missing: Vec<Role> = test_type
            .required_roles()
            .iter()
            .filter(|r| !snapshot.has_role(**r))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::RoleResolution { missing });
        }

        info!(
            snapshot_id = %snapshot.id,
            test_type = %test_type,
            cases = source.len(),
            workers = self.config.workers,
            "Starting test suite"
        );

        let skip_generator = matches!(source, CaseSource::Supplied(_));
        let artifacts = tokio::select! {
            artifacts = self.compile_roles(snapshot, workspace, skip_generator) => artifacts?,
            _ = cancel.cancelled() => {
                warn!(snapshot_id = %snapshot.id, "Suite cancelled during compilation");
                return Ok(build_report(snapshot, started_at, BTreeMap::new(), true, clock));
            }
        };

        let orchestrator = Arc::new(CaseOrchestrator::new(Arc::clone(&self.config), test_type, artifacts));
        let mut results = BTreeMap::new();

        let mut pending = stream::iter(source.into_cases())
            .map(|(index, input)| {
                let orchestrator = Arc::clone(&orchestrator);
                let cancel = cancel.clone();
                async move {
                    let task = tokio::spawn(async move { orchestrator.run_case(index, input, &cancel).await });
                    match task.await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(index, error = %e, "Case task failed");
                            Some(evaluator::internal_error(index, format!("case task failed: {}", e)))
                        }
                    }
                }
            })
            .buffer_unordered(self.config.workers.max(1));

        while let Some(result) = pending.next().await {
            if let Some(result) = result {
                info!(
                    index = result.index,
                    verdict = %result.verdict,
                    elapsed_ms = result.solution_time_ms,
                    "Case finished"
                );
                results.insert(result.index, result);
            }
        }

        let cancelled = cancel.is_cancelled();
        let report = build_report(snapshot, started_at, results, cancelled, clock);
        info!(
            snapshot_id = %snapshot.id,
            passed = report.passed,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = report.total_time_ms,
            "Test suite finished"
        );
        Ok(report)
    }

    async fn compile_roles(
        &self,
        snapshot: &Snapshot,
        workspace: &Workspace,
        skip_generator: bool,
    ) -> EngineResult<BTreeMap<Role, Artifact>> {
        let jobs = snapshot
            .files
            .iter()
            .filter(|(role, _)| !(skip_generator && **role == Role::Generator))
            .map(|(role, file)| async move {
                let source = workspace.content_of(file).ok_or_else(|| EngineError::MissingSource {
                    role: *role,
                    path: file.path.clone(),
                })?;
                let artifact = self.compiler.ensure(*role, file, source).await?;
                Ok::<_, EngineError>((*role, artifact))
            });
        Ok(try_join_all(jobs).await?.into_iter().collect())
    }
}

/// Aggregate case results into a report ordered by index.
pub fn build_report(
    snapshot: &Snapshot,
    started_at: chrono::DateTime<Utc>,
    results: BTreeMap<u32, CaseResult>,
    cancelled: bool,
    clock: Instant,
) -> SuiteReport {
    let results: Vec<CaseResult> = results.into_values().collect();

    let mut verdict_counts: BTreeMap<Verdict, usize> = BTreeMap::new();
    for result in &results {
        *verdict_counts.entry(result.verdict).or_insert(0) += 1;
    }
    let passed = results.iter().filter(|r| r.verdict.is_pass()).count();
    let worst_time_ms = results.iter().map(|r| r.solution_time_ms).max().unwrap_or(0);

    SuiteReport {
        id: Uuid::new_v4(),
        snapshot_id: snapshot.id,
        test_type: snapshot.test_type,
        started_at,
        finished_at: Utc::now(),
        cancelled,
        passed,
        failed: results.len() - passed,
        verdict_counts,
        worst_time_ms,
        total_time_ms: clock.elapsed().as_millis() as u64,
        results,
    }
}
