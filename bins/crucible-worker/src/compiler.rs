/// Compilation Manager
///
/// **Core Responsibility:**
/// Turn a role's source into a runnable `Artifact`, compiling at most once per
/// `(role, language, content hash)`.
///
/// **Cache:**
/// - In memory: one `OnceCell` per key, so concurrent misses share one compile
/// - On disk: `<cache_dir>/<role>-<hash12>-<file name>/`, staged in a temp dir
///   and renamed into place, so a directory that exists is complete
///
/// An entry whose executable has disappeared from disk is dropped and rebuilt.
/// Compile failures are returned as-is and never retried.

use crucible_common::config::EngineConfig;
use crucible_common::digest::Digest;
use crucible_common::toolchain::{TemplateVars, ToolchainProfile, ToolchainTable};
use crucible_common::types::{Artifact, Role, WorkspaceFile};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::process::{run_process, ProcessSpec};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    role: Role,
    language: String,
    hash: Digest,
}

pub struct CompilationManager {
    config: EngineConfig,
    toolchains: Arc<ToolchainTable>,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<Artifact>>>>,
    compile_count: AtomicU64,
}

impl CompilationManager {
    pub fn new(config: EngineConfig, toolchains: Arc<ToolchainTable>) -> Self {
        Self {
            config,
            toolchains,
            cache: Mutex::new(HashMap::new()),
            compile_count: AtomicU64::new(0),
        }
    }

    /// Number of compiler processes actually started.
    pub fn compile_count(&self) -> u64 {
        self.compile_count.load(Ordering::SeqCst)
    }

    /// Return a runnable artifact for `file`, compiling only on a cache miss.
    ///
    /// ## Arguments
    /// * `role` - Role the file is bound to (part of the cache key)
    /// * `file` - Workspace file; its language selects the toolchain
    /// * `source` - Source bytes; hashed again so a stale `file` cannot poison the cache
    ///
    /// ## Returns
    /// The cached or freshly built artifact, or `EngineError::Compilation`
    /// carrying the compiler diagnostic verbatim
    #[instrument(skip(self, file, source), fields(path = %file.path, language = %file.language))]
    pub async fn ensure(&self, role: Role, file: &WorkspaceFile, source: &[u8]) -> EngineResult<Artifact> {
        let key = CacheKey {
            role,
            language: file.language.clone(),
            hash: Digest::compute(source),
        };
        let cell = self.cell_for(&key).await;

        let artifact = cell
            .get_or_try_init(|| self.build(&key, file, source))
            .await?;
        Ok(artifact.clone())
    }

    async fn cell_for(&self, key: &CacheKey) -> Arc<OnceCell<Artifact>> {
        let mut cache = self.cache.lock().await;
        let stale = cache
            .get(key)
            .and_then(|cell| cell.get())
            .is_some_and(|artifact| !artifact.executable.exists());
        if stale {
            warn!(
                role = %key.role,
                hash = %key.hash.short(),
                "Cached artifact vanished from disk, rebuilding"
            );
            cache.remove(key);
        }
        Arc::clone(cache.entry(key.clone()).or_default())
    }

    /// `<cache_dir>/<role>-<hash12>-<file name>`; the file name keeps
    /// class-named languages and extensions apart on disk.
    fn artifact_dir(&self, key: &CacheKey, file_name: &str) -> PathBuf {
        let name: String = file_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        self.config
            .cache_dir
            .join(format!("{}-{}-{}", key.role, key.hash.short(), name))
    }

    async fn build(&self, key: &CacheKey, file: &WorkspaceFile, source: &[u8]) -> EngineResult<Artifact> {
        let profile = self.toolchains.get(&key.language)?;
        let file_name = file.file_name();
        let final_dir = self.artifact_dir(key, file_name);

        let final_vars = TemplateVars::for_source(&final_dir, file_name);
        let executable = PathBuf::from(final_vars.expand_arg(&profile.artifact));
        if executable.exists() {
            debug!(role = %key.role, hash = %key.hash.short(), "Reusing on-disk artifact");
            return Ok(make_artifact(key, profile, &final_vars, executable));
        }

        fs::create_dir_all(&self.config.cache_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.config.cache_dir)?;
        fs::write(staging.path().join(file_name), source)?;

        if profile.needs_compile {
            self.compile(key, profile, staging.path(), file_name).await?;
        }

        if final_dir.exists() {
            // Leftover directory whose executable is gone; it would block the rename.
            debug!(dir = %final_dir.display(), "Removing incomplete artifact directory");
            if let Err(e) = fs::remove_dir_all(&final_dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(EngineError::Io(e));
                }
            }
        }

        let staged = staging.into_path();
        if let Err(e) = fs::rename(&staged, &final_dir) {
            // Another process may have published the same artifact first.
            let _ = fs::remove_dir_all(&staged);
            if !executable.exists() {
                return Err(EngineError::Io(e));
            }
        }

        Ok(make_artifact(key, profile, &final_vars, executable))
    }

    async fn compile(
        &self,
        key: &CacheKey,
        profile: &ToolchainProfile,
        dir: &Path,
        file_name: &str,
    ) -> EngineResult<()> {
        let vars = TemplateVars::for_source(dir, file_name);
        let argv = vars.expand(&profile.compile);

        self.compile_count.fetch_add(1, Ordering::SeqCst);
        info!(role = %key.role, language = %key.language, hash = %key.hash.short(), "Compiling");

        let spec = ProcessSpec {
            argv: &argv,
            cwd: Some(dir),
            stdin: None,
            timeout: self.config.compile_timeout(),
            output_limit: self.config.output_limit_bytes,
            memory_limit_mb: None,
        };
        let outcome = run_process(&spec, &CancellationToken::new()).await;

        if !outcome.success() {
            let diagnostic = if outcome.timed_out {
                format!("compiler timed out after {}ms", self.config.compile_timeout_ms)
            } else if !outcome.stderr.is_empty() {
                String::from_utf8_lossy(&outcome.stderr).into_owned()
            } else {
                String::from_utf8_lossy(&outcome.stdout).into_owned()
            };
            warn!(role = %key.role, exit_code = ?outcome.exit_code, "Compilation failed");
            return Err(EngineError::Compilation {
                role: key.role,
                diagnostic,
            });
        }

        let produced = PathBuf::from(vars.expand_arg(&profile.artifact));
        if !produced.exists() {
            return Err(EngineError::Compilation {
                role: key.role,
                diagnostic: format!("compiler exited cleanly but produced no {}", produced.display()),
            });
        }

        info!(
            role = %key.role,
            elapsed_ms = outcome.wall_time.as_millis() as u64,
            "Compilation succeeded"
        );
        Ok(())
    }
}

fn make_artifact(
    key: &CacheKey,
    profile: &ToolchainProfile,
    vars: &TemplateVars,
    executable: PathBuf,
) -> Artifact {
    Artifact {
        role: key.role,
        language: key.language.clone(),
        executable,
        run_command: vars.expand(&profile.run),
        workdir: vars.dir.clone(),
        compiled_at: Utc::now(),
        source_hash: key.hash,
        compiled: profile.needs_compile,
    }
}
