// Shared fixtures for unit and engine tests.

use crucible_common::config::EngineConfig;
use crucible_common::toolchain::{ToolchainProfile, ToolchainTable};
use std::path::Path;

use crate::workspace::Workspace;

/// Built-in table plus a `copy` language (`.cp`): "compiling" copies the
/// source with `cp`, running feeds the copy to `sh`. Lets tests count
/// compiler invocations without a real compiler.
pub fn copy_toolchains() -> ToolchainTable {
    let mut table = ToolchainTable::builtin();
    table
        .insert(ToolchainProfile {
            language: "copy".to_string(),
            extensions: vec!["cp".to_string()],
            needs_compile: true,
            compile: vec!["cp".into(), "{source}".into(), "{output}".into()],
            run: vec!["sh".into(), "{output}".into()],
            artifact: "{output}".into(),
        })
        .unwrap();
    table
}

pub fn test_config(cache_dir: &Path) -> EngineConfig {
    EngineConfig {
        time_limit_ms: 5_000,
        generator_timeout_ms: 5_000,
        validator_timeout_ms: 5_000,
        compile_timeout_ms: 10_000,
        workers: 4,
        cache_dir: cache_dir.to_path_buf(),
        ..EngineConfig::default()
    }
}

pub fn workspace(files: &[(&str, &str)]) -> Workspace {
    Workspace::from_sources(
        files.iter().map(|(path, body)| (path.to_string(), body.as_bytes().to_vec())),
        &copy_toolchains(),
    )
    .unwrap()
}
