use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::Digest;

/// Semantic slot a workspace file can fill.
///
/// Declaration order is also the ordering used for report keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Generator,
    Reference,
    Validator,
    Solution,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Generator, Role::Reference, Role::Validator, Role::Solution];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Generator => "generator",
            Role::Reference => "reference",
            Role::Validator => "validator",
            Role::Solution => "solution",
        }
    }

    /// Keyword synonyms matched against case-folded base names, in priority order.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Role::Generator => &["generator", "gen"],
            Role::Reference => &["reference", "correct", "brute"],
            Role::Validator => &["validator", "checker"],
            Role::Solution => &["solution", "test", "sol"],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generator" | "gen" => Ok(Role::Generator),
            "reference" | "correct" => Ok(Role::Reference),
            "validator" | "checker" => Ok(Role::Validator),
            "solution" | "test" => Ok(Role::Solution),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Testing protocol, which fixes the role set and the stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Comparison,
    Validation,
    Benchmark,
}

impl TestType {
    /// Required roles in resolution priority order.
    pub fn required_roles(&self) -> &'static [Role] {
        match self {
            TestType::Comparison => &[Role::Generator, Role::Reference, Role::Solution],
            TestType::Validation => &[Role::Generator, Role::Validator, Role::Solution],
            TestType::Benchmark => &[Role::Generator, Role::Solution],
        }
    }

    /// Roles bound when a matching file exists, checked after the required ones.
    pub fn optional_roles(&self) -> &'static [Role] {
        match self {
            TestType::Benchmark => &[Role::Reference],
            _ => &[],
        }
    }

    /// Full resolution priority: required roles first, then optional.
    pub fn priority(&self) -> Vec<Role> {
        self.required_roles()
            .iter()
            .chain(self.optional_roles())
            .copied()
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Comparison => "comparison",
            TestType::Validation => "validation",
            TestType::Benchmark => "benchmark",
        }
    }

    /// Directory name used for persisted test I/O.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TestType::Comparison => "comparator",
            TestType::Validation => "validator",
            TestType::Benchmark => "benchmarker",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "comparison" | "comparator" | "stress" => Ok(TestType::Comparison),
            "validation" | "validator" => Ok(TestType::Validation),
            "benchmark" | "benchmarker" | "tle" => Ok(TestType::Benchmark),
            other => Err(format!("unknown test type: {}", other)),
        }
    }
}

/// A source file as seen by the engine. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    pub language: String,
    pub content_hash: Digest,
}

impl WorkspaceFile {
    /// File name without directories.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Case-folded file name with everything after the first `.` removed.
    pub fn base_name(&self) -> String {
        let name = self.file_name();
        name.split('.').next().unwrap_or(name).to_lowercase()
    }
}

/// Immutable binding of workspace files to roles for one test type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub test_type: TestType,
    pub created_at: DateTime<Utc>,
    pub files: BTreeMap<Role, WorkspaceFile>,
}

impl Snapshot {
    pub fn new(test_type: TestType, files: BTreeMap<Role, WorkspaceFile>) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_type,
            created_at: Utc::now(),
            files,
        }
    }

    pub fn file(&self, role: Role) -> Option<&WorkspaceFile> {
        self.files.get(&role)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.files.contains_key(&role)
    }
}

/// Runnable unit produced from a role's source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub role: Role,
    pub language: String,
    /// Compiled binary, class file, or (for interpreted languages) the source copy.
    pub executable: PathBuf,
    /// Fully expanded run command, program first.
    pub run_command: Vec<String>,
    /// Scoped directory owning the executable.
    pub workdir: PathBuf,
    pub compiled_at: DateTime<Utc>,
    pub source_hash: Digest,
    /// False for pass-through artifacts of interpreted languages.
    pub compiled: bool,
}

/// One test case. Lives only for the duration of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub index: u32,
    pub input: Vec<u8>,
}

/// Captured outcome of one stage process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub role: Role,
    /// None when the process never produced an exit status (spawn failure, kill).
    pub exit_code: Option<i32>,
    #[serde(with = "lossy_bytes")]
    pub stdout: Vec<u8>,
    #[serde(with = "lossy_bytes")]
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub wall_time_ms: u64,
    pub timed_out: bool,
    pub crashed: bool,
}

impl StageResult {
    pub fn failed(&self) -> bool {
        self.timed_out || self.crashed
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Final per-test-case judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verdict {
    Correct,
    WrongAnswer,
    PresentationError,
    RuntimeError,
    TimeLimitExceeded,
    InternalError,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Correct)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Correct => "Correct",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::PresentationError => "Presentation Error",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::InternalError => "Internal Error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Line-level summary of an output mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchSummary {
    /// 1-based line number of the first difference.
    pub first_line: usize,
    pub expected_line: String,
    pub actual_line: String,
    pub differing_lines: usize,
    pub expected_lines: usize,
    pub actual_lines: usize,
}

/// Verdict for one test case plus the stage results that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub index: u32,
    pub verdict: Verdict,
    pub detail: String,
    pub stages: Vec<StageResult>,
    pub solution_time_ms: u64,
    pub total_time_ms: u64,
    pub input_preview: String,
    pub output_preview: String,
    pub mismatch: Option<MismatchSummary>,
}

impl CaseResult {
    pub fn stage(&self, role: Role) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.role == role)
    }
}

/// Suite-level report, ordered by test case index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub test_type: TestType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub results: Vec<CaseResult>,
    pub passed: usize,
    pub failed: usize,
    pub verdict_counts: BTreeMap<Verdict, usize>,
    /// Slowest solution stage across all cases.
    pub worst_time_ms: u64,
    pub total_time_ms: u64,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        !self.cancelled && self.failed == 0
    }
}

/// Serializes captured stream bytes as lossy UTF-8 text.
mod lossy_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}
