/// End-to-end tests for the suite execution path
///
/// These tests run real processes through the whole pipeline:
/// 1. Role resolution and compilation
/// 2. Stage orchestration with timeouts and cancellation
/// 3. Verdicts, ordering and report aggregation
///
/// Programs are `sh` scripts so the tests run anywhere a POSIX shell exists.
/// Scenarios that need g++ and python3 are ignored by default.

#[cfg(all(test, unix))]
mod suite_tests {
    use crate::error::EngineError;
    use crate::executor::{CaseSource, SuiteExecutor};
    use crate::snapshot::SnapshotStore;
    use crate::test_support::{copy_toolchains, test_config, workspace};
    use crate::workspace::Workspace;
    use crucible_common::config::EngineConfig;
    use crucible_common::toolchain::{ToolchainProfile, ToolchainTable};
    use crucible_common::types::{Role, TestType, Verdict};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    const VALIDATOR: &str = r#"
expected=$(cat "$1")
actual=$(cat "$2")
case "$actual" in
    ''|*[!0-9]*) echo "not a number" >&2; exit 2 ;;
esac
if [ "$actual" = "$expected" ]; then exit 0; fi
echo "expected $expected, got $actual"
exit 1
"#;

    fn executor_with(config: EngineConfig) -> SuiteExecutor {
        SuiteExecutor::new(config, Arc::new(copy_toolchains()))
    }

    fn executor(cache: &tempfile::TempDir) -> SuiteExecutor {
        executor_with(test_config(cache.path()))
    }

    async fn single_verdict(executor: &SuiteExecutor, ws: &Workspace, test_type: TestType) -> Verdict {
        let report = executor
            .run_workspace(ws, test_type, CaseSource::Generated(1), &CancellationToken::new())
            .await
            .expect("suite should run");
        assert_eq!(report.results.len(), 1);
        report.results[0].verdict
    }

    #[tokio::test]
    async fn test_validator_round_trip() {
        let cache = tempfile::tempdir().unwrap();
        let executor = executor(&cache);

        let solutions = [
            ("read n; echo $n", Verdict::Correct),
            ("echo 6", Verdict::WrongAnswer),
            ("echo five", Verdict::PresentationError),
        ];
        for (solution, expected) in solutions {
            let ws = workspace(&[
                ("generator.sh", "echo 5"),
                ("solution.sh", solution),
                ("validator.sh", VALIDATOR),
            ]);
            let verdict = single_verdict(&executor, &ws, TestType::Validation).await;
            assert_eq!(verdict, expected, "solution: {solution}");
        }

        let ws = workspace(&[
            ("generator.sh", "echo 5"),
            ("solution.sh", "read n; echo $n"),
            ("validator.sh", "exit 4"),
        ]);
        assert_eq!(
            single_verdict(&executor, &ws, TestType::Validation).await,
            Verdict::InternalError
        );
    }

    #[tokio::test]
    async fn test_validator_receives_file_paths() {
        let cache = tempfile::tempdir().unwrap();
        let ws = workspace(&[
            ("generator.sh", "echo 5"),
            ("solution.sh", "read n; echo $((n + 1))"),
            ("validator.sh", VALIDATOR),
        ]);
        let report = executor(&cache)
            .run_workspace(&ws, TestType::Validation, CaseSource::Generated(1), &CancellationToken::new())
            .await
            .unwrap();

        let case = &report.results[0];
        assert_eq!(case.verdict, Verdict::WrongAnswer);
        assert!(case.detail.contains("expected 5, got 6"));
        assert_eq!(case.input_preview, "5\n");
        assert_eq!(case.output_preview, "6\n");
        let stages: Vec<Role> = case.stages.iter().map(|s| s.role).collect();
        assert_eq!(stages, vec![Role::Generator, Role::Solution, Role::Validator]);
    }

    #[tokio::test]
    async fn test_slow_solution_is_time_limit_exceeded() {
        let cache = tempfile::tempdir().unwrap();
        let executor = executor_with(EngineConfig {
            time_limit_ms: 300,
            ..test_config(cache.path())
        });
        let ws = workspace(&[("generator.sh", "echo 1"), ("solution.sh", "sleep 10; echo 1")]);

        let started = Instant::now();
        let verdict = single_verdict(&executor, &ws, TestType::Benchmark).await;
        assert_eq!(verdict, Verdict::TimeLimitExceeded);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_report_ordered_by_index() {
        let cache = tempfile::tempdir().unwrap();
        // Early cases sleep longest, so they complete last.
        let solution = r#"
read n
case $n in
    1|2|3) sleep 0.6 ;;
    4|5|6) sleep 0.4 ;;
    7|8|9) sleep 0.2 ;;
esac
echo $n
"#;
        let ws = workspace(&[
            ("generator.sh", "echo 0"),
            ("correct.sh", "read n; echo $n"),
            ("solution.sh", solution),
        ]);
        let inputs = (1..=12).map(|n| format!("{}\n", n).into_bytes()).collect();

        let report = executor(&cache)
            .run_workspace(&ws, TestType::Comparison, CaseSource::Supplied(inputs), &CancellationToken::new())
            .await
            .unwrap();

        let order: Vec<u32> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(order, (1..=12).collect::<Vec<_>>());
        assert_eq!(report.passed, 12);
        // Supplied inputs never run the generator
        assert!(report.results.iter().all(|r| r.stage(Role::Generator).is_none()));
    }

    #[tokio::test]
    async fn test_ten_case_comparison_all_correct() {
        let cache = tempfile::tempdir().unwrap();
        let ws = workspace(&[
            ("generator.sh", "awk 'BEGIN { srand(); print int(rand() * 1000) }'"),
            ("reference.sh", "read n; echo $((n * n))"),
            ("solution.sh", "read n; printf '%d\\n\\n' $((n * n))"),
        ]);

        let report = executor(&cache)
            .run_workspace(&ws, TestType::Comparison, CaseSource::Generated(10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 10);
        assert_eq!(report.verdict_counts.get(&Verdict::Correct), Some(&10));
        assert!(report.all_passed());
    }

    #[tokio::test]
    async fn test_background_child_does_not_swallow_output() {
        let cache = tempfile::tempdir().unwrap();
        let ws = workspace(&[
            ("generator.sh", "echo 4"),
            ("reference.sh", "read n; echo $n"),
            ("solution.sh", "read n; echo $n; sleep 30 &"),
        ]);

        let started = Instant::now();
        let report = executor(&cache)
            .run_workspace(&ws, TestType::Comparison, CaseSource::Generated(2), &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        for case in &report.results {
            assert_eq!(case.verdict, Verdict::Correct, "detail: {}", case.detail);
            let solution = case.stage(Role::Solution).unwrap();
            assert_eq!(solution.stdout, b"4\n");
            assert!(!solution.stdout_truncated);
        }
    }

    #[tokio::test]
    async fn test_paired_stages_do_not_share_files() {
        let cache = tempfile::tempdir().unwrap();
        let ws = workspace(&[
            ("generator.sh", "echo 10"),
            ("reference.sh", "read n; echo $n > out.txt; sleep 0.3; cat out.txt"),
            ("solution.sh", "read n; echo $((n + 1)) > out.txt; sleep 0.3; echo $(( $(cat out.txt) - 1 ))"),
        ]);

        let report = executor(&cache)
            .run_workspace(&ws, TestType::Comparison, CaseSource::Generated(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.results[0].verdict, Verdict::Correct, "detail: {}", report.results[0].detail);
    }

    #[tokio::test]
    async fn test_wrong_answer_carries_mismatch() {
        let cache = tempfile::tempdir().unwrap();
        let ws = workspace(&[
            ("generator.sh", "echo 3"),
            ("correct.sh", "read n; echo $n; echo $((n * 2))"),
            ("solution.sh", "read n; echo $n; echo $((n * 3))"),
        ]);
        let report = executor(&cache)
            .run_workspace(&ws, TestType::Comparison, CaseSource::Generated(2), &CancellationToken::new())
            .await
            .unwrap();

        for case in &report.results {
            assert_eq!(case.verdict, Verdict::WrongAnswer);
            let mismatch = case.mismatch.as_ref().unwrap();
            assert_eq!(mismatch.first_line, 2);
            assert_eq!(mismatch.expected_line, "6");
            assert_eq!(mismatch.actual_line, "9");
        }
        assert_eq!(report.failed, 2);
    }

    #[tokio::test]
    async fn test_compiled_roles_are_cached_across_suites() {
        let cache = tempfile::tempdir().unwrap();
        let executor = executor(&cache);
        let cancel = CancellationToken::new();

        let ws = workspace(&[
            ("generator.sh", "echo 4"),
            ("correct.cp", "read n; echo $((n + 1))"),
            ("solution.cp", "read n; echo $((n + 1))"),
        ]);
        let first = executor
            .run_workspace(&ws, TestType::Comparison, CaseSource::Generated(5), &cancel)
            .await
            .unwrap();
        assert!(first.all_passed());
        assert_eq!(executor.compiler().compile_count(), 2);

        executor
            .run_workspace(&ws, TestType::Comparison, CaseSource::Generated(5), &cancel)
            .await
            .unwrap();
        assert_eq!(executor.compiler().compile_count(), 2);

        // One changed byte in the solution recompiles only that role.
        let changed = workspace(&[
            ("generator.sh", "echo 4"),
            ("correct.cp", "read n; echo $((n + 1))"),
            ("solution.cp", "read n; echo $((n + 2))"),
        ]);
        let report = executor
            .run_workspace(&changed, TestType::Comparison, CaseSource::Generated(1), &cancel)
            .await
            .unwrap();
        assert_eq!(executor.compiler().compile_count(), 3);
        assert_eq!(report.results[0].verdict, Verdict::WrongAnswer);
    }

    #[tokio::test]
    async fn test_compilation_failure_aborts_suite() {
        let cache = tempfile::tempdir().unwrap();
        let mut table = copy_toolchains();
        table
            .insert(ToolchainProfile {
                language: "broken".to_string(),
                extensions: vec!["brk".to_string()],
                needs_compile: true,
                compile: vec!["sh".into(), "-c".into(), "echo 'fatal: bad token' >&2; exit 1".into()],
                run: vec!["{output}".into()],
                artifact: "{output}".into(),
            })
            .unwrap();
        let executor = SuiteExecutor::new(test_config(cache.path()), Arc::new(table.clone()));

        let ws = Workspace::from_sources(
            vec![
                ("generator.sh".to_string(), b"echo 1".to_vec()),
                ("solution.brk".to_string(), b"???".to_vec()),
            ],
            &table,
        )
        .unwrap();
        let err = executor
            .run_workspace(&ws, TestType::Benchmark, CaseSource::Generated(3), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            EngineError::Compilation { role, diagnostic } => {
                assert_eq!(role, Role::Solution);
                assert!(diagnostic.contains("fatal: bad token"));
            }
            other => panic!("expected Compilation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_role_aborts_before_execution() {
        let cache = tempfile::tempdir().unwrap();
        let executor = executor(&cache);
        let ws = workspace(&[("generator.sh", "echo 1"), ("solution.sh", "cat")]);

        match executor
            .run_workspace(&ws, TestType::Validation, CaseSource::Generated(1), &CancellationToken::new())
            .await
        {
            Err(EngineError::RoleResolution { missing }) => assert_eq!(missing, vec![Role::Validator]),
            other => panic!("expected RoleResolution, got {other:?}"),
        }
        assert_eq!(executor.compiler().compile_count(), 0);
    }

    #[tokio::test]
    async fn test_generator_crash_does_not_abort_suite() {
        let cache = tempfile::tempdir().unwrap();
        let ws = workspace(&[("generator.sh", "echo boom >&2; exit 3"), ("solution.sh", "cat")]);
        let report = executor(&cache)
            .run_workspace(&ws, TestType::Benchmark, CaseSource::Generated(3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 3);
        for case in &report.results {
            assert_eq!(case.verdict, Verdict::InternalError);
            assert!(case.detail.contains("boom"));
            assert!(case.stage(Role::Solution).is_none());
        }
    }

    #[tokio::test]
    async fn test_solution_crash_is_runtime_error() {
        let cache = tempfile::tempdir().unwrap();
        let ws = workspace(&[
            ("generator.sh", "echo 1"),
            ("solution.sh", "echo partial; exit 139"),
            ("validator.sh", VALIDATOR),
        ]);
        let report = executor(&cache)
            .run_workspace(&ws, TestType::Validation, CaseSource::Generated(1), &CancellationToken::new())
            .await
            .unwrap();

        let case = &report.results[0];
        assert_eq!(case.verdict, Verdict::RuntimeError);
        // The validator never runs after a failed solution
        assert!(case.stage(Role::Validator).is_none());
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_report() {
        let cache = tempfile::tempdir().unwrap();
        let executor = executor(&cache);
        let ws = workspace(&[("generator.sh", "echo 1"), ("solution.sh", "sleep 30")]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = executor
            .run_workspace(&ws, TestType::Benchmark, CaseSource::Generated(8), &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert!(!report.all_passed());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_io_persistence() {
        let cache = tempfile::tempdir().unwrap();
        let io_dir = tempfile::tempdir().unwrap();
        let executor = executor_with(EngineConfig {
            io_dir: Some(io_dir.path().to_path_buf()),
            ..test_config(cache.path())
        });
        let ws = workspace(&[("generator.sh", "echo 21"), ("solution.sh", "read n; echo $((n * 2))")]);

        executor
            .run_workspace(&ws, TestType::Benchmark, CaseSource::Generated(2), &CancellationToken::new())
            .await
            .unwrap();

        let root = io_dir.path().join("benchmarker");
        for n in 1..=2 {
            let input = std::fs::read_to_string(root.join("inputs").join(format!("input_{n}.txt"))).unwrap();
            let output = std::fs::read_to_string(root.join("outputs").join(format!("output_{n}.txt"))).unwrap();
            assert_eq!(input, "21\n");
            assert_eq!(output, "42\n");
        }
    }

    #[tokio::test]
    async fn test_benchmark_with_reference_compares_outputs() {
        let cache = tempfile::tempdir().unwrap();
        let executor = executor(&cache);

        let agreeing = workspace(&[
            ("generator.sh", "echo 2"),
            ("brute.sh", "read n; echo $((n * 10))"),
            ("solution.sh", "read n; echo $((n * 10))"),
        ]);
        assert_eq!(single_verdict(&executor, &agreeing, TestType::Benchmark).await, Verdict::Correct);

        let disagreeing = workspace(&[
            ("generator.sh", "echo 2"),
            ("brute.sh", "read n; echo $((n * 10))"),
            ("solution.sh", "read n; echo $((n * 11))"),
        ]);
        assert_eq!(
            single_verdict(&executor, &disagreeing, TestType::Benchmark).await,
            Verdict::WrongAnswer
        );
    }

    #[tokio::test]
    async fn test_rerun_from_snapshot() {
        let cache = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(store_dir.path()).unwrap();

        let ws = workspace(&[
            ("generator.sh", "echo 9"),
            ("correct.sh", "read n; echo $((n - 1))"),
            ("solution.sh", "read n; echo $((n - 1))"),
            ("notes.sh", "echo unrelated"),
        ]);
        let snapshot = store.create(&ws, TestType::Comparison).unwrap();

        let restored = store.materialize(&store.load(snapshot.id).unwrap()).unwrap();
        assert_eq!(restored.len(), 3);
        let report = executor(&cache)
            .run_snapshot(&snapshot, &restored, CaseSource::Generated(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.snapshot_id, snapshot.id);
        assert!(report.all_passed());
    }

    /// The canonical mixed-language scenario: C++ generator and reference,
    /// Python solution.
    #[tokio::test]
    #[ignore] // Requires g++ and python3
    async fn test_cpp_and_python_comparison() {
        let cache = tempfile::tempdir().unwrap();
        let table = ToolchainTable::builtin();
        let executor = SuiteExecutor::new(test_config(cache.path()), Arc::new(table.clone()));

        let ws = Workspace::from_sources(
            vec![
                (
                    "generator.cpp",
                    br#"#include <cstdio>
#include <cstdlib>
#include <ctime>
int main() { srand(time(nullptr) ^ clock()); printf("%d %d\n", rand() % 1000, rand() % 1000); }
"#
                    .to_vec(),
                ),
                (
                    "reference.cpp",
                    br#"#include <cstdio>
int main() { long long a, b; scanf("%lld %lld", &a, &b); printf("%lld\n", a + b); }
"#
                    .to_vec(),
                ),
                ("solution.py", b"a, b = map(int, input().split())\nprint(a + b)\n".to_vec()),
            ],
            &table,
        )
        .unwrap();

        let report = executor
            .run_workspace(&ws, TestType::Comparison, CaseSource::Generated(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.verdict_counts.get(&Verdict::Correct), Some(&10));
        assert_eq!(executor.compiler().compile_count(), 2);
    }
}
