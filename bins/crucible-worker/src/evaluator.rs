/// Verdict Evaluator
///
/// **Core Responsibility:**
/// Turn the stage results of one test case into a single verdict.
///
/// **Critical Properties:**
/// - Never spawns a process and never touches the filesystem
/// - Pure function: (test type, stage results, comparison mode) → CaseResult
///
/// **Precedence Rules:**
/// 1. Missing input (generator crashed, timed out or overflowed) → Internal Error
/// 2. Timeout before crash, solution before reference
/// 3. Truncated output cannot be judged → Internal Error
/// 4. Output comparison, or the validator's exit code
///
/// **Validator Exit Codes:**
/// - 0 → Correct
/// - 1 → Wrong Answer
/// - 2 → Presentation Error
/// - anything else, a signal or a timeout → Internal Error

use crucible_common::config::ComparisonMode;
use crucible_common::types::{CaseResult, MismatchSummary, Role, StageResult, TestType, Verdict};
use std::time::Duration;

/// Characters kept in input/output previews.
pub const PREVIEW_CHARS: usize = 500;

/// Everything the orchestrator observed for one case.
#[derive(Debug, Clone)]
pub struct CaseExecution {
    pub index: u32,
    /// None when the generator produced no usable input
    pub input: Option<Vec<u8>>,
    pub stages: Vec<StageResult>,
    pub total_time: Duration,
}

impl CaseExecution {
    fn stage(&self, role: Role) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.role == role)
    }
}

struct Judgement {
    verdict: Verdict,
    detail: String,
    mismatch: Option<MismatchSummary>,
}

impl Judgement {
    fn new(verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            verdict,
            detail: detail.into(),
            mismatch: None,
        }
    }
}

/// Evaluate one case.
///
/// ## Arguments
/// * `test_type` - Protocol the stages were run under
/// * `execution` - Stage results in execution order, plus the case input
/// * `mode` - Output comparison rule for reference/solution pairs
pub fn evaluate(test_type: TestType, execution: CaseExecution, mode: ComparisonMode) -> CaseResult {
    let judgement = judge(test_type, &execution, mode);

    let solution = execution.stage(Role::Solution);
    let solution_time_ms = solution.map(|s| s.wall_time_ms).unwrap_or(0);
    let output_preview = solution.map(|s| preview(&s.stdout)).unwrap_or_default();
    let input_preview = execution.input.as_deref().map(preview).unwrap_or_default();

    CaseResult {
        index: execution.index,
        verdict: judgement.verdict,
        detail: judgement.detail,
        solution_time_ms,
        total_time_ms: execution.total_time.as_millis() as u64,
        input_preview,
        output_preview,
        mismatch: judgement.mismatch,
        stages: execution.stages,
    }
}

/// A case that could not be carried out at all.
pub fn internal_error(index: u32, detail: impl Into<String>) -> CaseResult {
    CaseResult {
        index,
        verdict: Verdict::InternalError,
        detail: detail.into(),
        stages: Vec::new(),
        solution_time_ms: 0,
        total_time_ms: 0,
        input_preview: String::new(),
        output_preview: String::new(),
        mismatch: None,
    }
}

fn judge(test_type: TestType, execution: &CaseExecution, mode: ComparisonMode) -> Judgement {
    if let Some(generator) = execution.stage(Role::Generator) {
        if generator.timed_out {
            return Judgement::new(Verdict::InternalError, "generator timed out");
        }
        if generator.crashed {
            return Judgement::new(
                Verdict::InternalError,
                format!("generator failed: {}", excerpt(&generator.stderr)),
            );
        }
        if generator.stdout_truncated {
            return Judgement::new(
                Verdict::InternalError,
                "generator output exceeded the capture limit",
            );
        }
    }
    if execution.input.is_none() {
        return Judgement::new(Verdict::InternalError, "no input available for this case");
    }

    let Some(solution) = execution.stage(Role::Solution) else {
        return Judgement::new(Verdict::InternalError, "solution stage did not run");
    };

    match test_type {
        TestType::Comparison => match execution.stage(Role::Reference) {
            Some(reference) => judge_comparison(solution, reference, mode),
            None => Judgement::new(Verdict::InternalError, "reference stage did not run"),
        },
        TestType::Validation => match execution.stage(Role::Validator) {
            Some(validator) => judge_validation(solution, validator),
            None => check_solution(solution)
                .unwrap_or_else(|| Judgement::new(Verdict::InternalError, "validator stage did not run")),
        },
        TestType::Benchmark => match execution.stage(Role::Reference) {
            Some(reference) => judge_comparison(solution, reference, mode),
            None => check_solution(solution).unwrap_or_else(|| {
                Judgement::new(
                    Verdict::Correct,
                    format!("completed in {}ms", solution.wall_time_ms),
                )
            }),
        },
    }
}

/// Timeout or crash of the solution, if any.
fn check_solution(solution: &StageResult) -> Option<Judgement> {
    if solution.timed_out {
        Some(Judgement::new(
            Verdict::TimeLimitExceeded,
            format!("solution exceeded the time limit ({}ms)", solution.wall_time_ms),
        ))
    } else if solution.crashed {
        Some(Judgement::new(Verdict::RuntimeError, crash_detail("solution", solution)))
    } else {
        None
    }
}

fn judge_comparison(solution: &StageResult, reference: &StageResult, mode: ComparisonMode) -> Judgement {
    if solution.timed_out {
        return Judgement::new(
            Verdict::TimeLimitExceeded,
            format!("solution exceeded the time limit ({}ms)", solution.wall_time_ms),
        );
    }
    if reference.timed_out {
        return Judgement::new(
            Verdict::TimeLimitExceeded,
            format!("reference exceeded the time limit ({}ms)", reference.wall_time_ms),
        );
    }
    if solution.crashed {
        return Judgement::new(Verdict::RuntimeError, crash_detail("solution", solution));
    }
    if reference.crashed {
        return Judgement::new(Verdict::RuntimeError, crash_detail("reference", reference));
    }
    if solution.stdout_truncated || reference.stdout_truncated {
        return Judgement::new(
            Verdict::InternalError,
            "output exceeded the capture limit and cannot be compared",
        );
    }

    if outputs_match(&reference.stdout, &solution.stdout, mode) {
        return Judgement::new(Verdict::Correct, "outputs match");
    }

    let mismatch = summarize_mismatch(&reference.stdout, &solution.stdout);
    Judgement {
        verdict: Verdict::WrongAnswer,
        detail: format!(
            "line {}: expected '{}', got '{}'",
            mismatch.first_line, mismatch.expected_line, mismatch.actual_line
        ),
        mismatch: Some(mismatch),
    }
}

fn judge_validation(solution: &StageResult, validator: &StageResult) -> Judgement {
    if let Some(failure) = check_solution(solution) {
        return failure;
    }
    if solution.stdout_truncated {
        return Judgement::new(
            Verdict::InternalError,
            "solution output exceeded the capture limit and cannot be validated",
        );
    }
    if validator.timed_out {
        return Judgement::new(Verdict::InternalError, "validator timed out");
    }

    let verdict = match validator.exit_code {
        Some(0) => Verdict::Correct,
        Some(1) => Verdict::WrongAnswer,
        Some(2) => Verdict::PresentationError,
        _ => Verdict::InternalError,
    };

    let code = validator
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let mut detail = format!("validator exit code {}", code);
    let message = validator_message(validator);
    if !message.is_empty() {
        detail.push_str(": ");
        detail.push_str(&message);
    }
    Judgement::new(verdict, detail)
}

/// Validator stdout and stderr, advisory text only.
fn validator_message(validator: &StageResult) -> String {
    [&validator.stdout, &validator.stderr]
        .iter()
        .map(|stream| excerpt(stream))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

fn crash_detail(who: &str, stage: &StageResult) -> String {
    let code = match stage.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit status".to_string(),
    };
    let stderr = excerpt(&stage.stderr);
    if stderr.is_empty() {
        format!("{} crashed ({})", who, code)
    } else {
        format!("{} crashed ({}): {}", who, code, stderr)
    }
}

/// Compare expected and actual output under `mode`.
pub fn outputs_match(expected: &[u8], actual: &[u8], mode: ComparisonMode) -> bool {
    match mode {
        ComparisonMode::Exact => expected == actual,
        ComparisonMode::Trimmed => expected.trim_ascii() == actual.trim_ascii(),
        ComparisonMode::Tokens => tokens(expected).eq(tokens(actual)),
    }
}

fn tokens(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
}

/// Line-by-line diff of trimmed outputs. Trailing whitespace and `\r` on a
/// line are ignored.
pub fn summarize_mismatch(expected: &[u8], actual: &[u8]) -> MismatchSummary {
    let expected_text = String::from_utf8_lossy(expected.trim_ascii());
    let actual_text = String::from_utf8_lossy(actual.trim_ascii());
    let expected_lines: Vec<&str> = expected_text.lines().map(str::trim_end).collect();
    let actual_lines: Vec<&str> = actual_text.lines().map(str::trim_end).collect();

    let total = expected_lines.len().max(actual_lines.len());
    let mut first_line = None;
    let mut differing_lines = 0;
    for i in 0..total {
        let e = expected_lines.get(i);
        let a = actual_lines.get(i);
        if e != a {
            differing_lines += 1;
            first_line.get_or_insert(i);
        }
    }

    // Same lines after normalization: the difference is whitespace only.
    let first = first_line.unwrap_or(0);
    MismatchSummary {
        first_line: first + 1,
        expected_line: expected_lines.get(first).map(|s| s.to_string()).unwrap_or_default(),
        actual_line: actual_lines.get(first).map(|s| s.to_string()).unwrap_or_default(),
        differing_lines,
        expected_lines: expected_lines.len(),
        actual_lines: actual_lines.len(),
    }
}

/// First `PREVIEW_CHARS` characters, with `...` appended when cut.
pub fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(200) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
