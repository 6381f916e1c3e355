// Live workspace: source files with their bytes, as handed to the engine.
// The engine only reads it; nothing here writes back to the workspace directory.

use crucible_common::digest::Digest;
use crucible_common::toolchain::ToolchainTable;
use crucible_common::types::WorkspaceFile;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct WorkspaceEntry {
    pub file: WorkspaceFile,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    entries: Vec<WorkspaceEntry>,
}

impl Workspace {
    /// Build a workspace from `(path, bytes)` pairs.
    ///
    /// Every path must have a known extension; the first unknown one fails
    /// with `UnsupportedLanguage`.
    pub fn from_sources<I, P>(sources: I, table: &ToolchainTable) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (P, Vec<u8>)>,
        P: Into<String>,
    {
        let mut entries = Vec::new();
        for (path, content) in sources {
            let path = path.into().replace('\\', "/");
            let profile = table.detect(&path)?;
            entries.push(WorkspaceEntry {
                file: WorkspaceFile {
                    language: profile.language.clone(),
                    content_hash: Digest::compute(&content),
                    path,
                },
                content,
            });
        }
        Ok(Self { entries })
    }

    /// Read the regular files directly inside `dir`.
    ///
    /// Files without a toolchain (inputs, notes, build leftovers) are skipped.
    pub fn load_dir(dir: &Path, table: &ToolchainTable) -> EngineResult<Self> {
        let read_dir = fs::read_dir(dir).map_err(|source| EngineError::Workspace {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut sources = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| EngineError::Workspace {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !table.supports(&name) {
                debug!(file = %name, "Skipping non-source workspace file");
                continue;
            }
            let content = fs::read(&path).map_err(|source| EngineError::Workspace {
                path: path.clone(),
                source,
            })?;
            sources.push((name, content));
        }

        Self::from_sources(sources, table)
    }

    pub fn files(&self) -> Vec<WorkspaceFile> {
        self.entries.iter().map(|e| e.file.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes for `file`, only if the workspace still holds the same content.
    pub fn content_of(&self, file: &WorkspaceFile) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.file.path == file.path && e.file.content_hash == file.content_hash)
            .map(|e| e.content.as_slice())
    }

    pub(crate) fn push(&mut self, entry: WorkspaceEntry) {
        self.entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_common::toolchain::ToolchainError;

    #[test]
    fn test_from_sources_detects_language_and_hash() {
        let table = ToolchainTable::builtin();
        let ws = Workspace::from_sources(
            vec![("generator.cpp", b"int main(){}".to_vec()), ("solution.py", b"print(1)".to_vec())],
            &table,
        )
        .unwrap();

        let files = ws.files();
        assert_eq!(files[0].language, "cpp");
        assert_eq!(files[1].language, "python");
        assert_eq!(files[1].content_hash, Digest::compute(b"print(1)"));
        assert_eq!(ws.content_of(&files[1]), Some(&b"print(1)"[..]));
    }

    #[test]
    fn test_unknown_extension_fails_detection() {
        let table = ToolchainTable::builtin();
        let err = Workspace::from_sources(vec![("input.txt", Vec::new())], &table).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Toolchain(ToolchainError::UnsupportedLanguage { .. })
        ));
    }

    #[test]
    fn test_load_dir_skips_non_sources_and_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("generator.py"), "print(5)").unwrap();
        fs::write(dir.path().join("notes.txt"), "todo").unwrap();
        fs::write(dir.path().join(".hidden.py"), "").unwrap();
        fs::create_dir(dir.path().join("inputs")).unwrap();
        fs::write(dir.path().join("inputs").join("input_1.py"), "").unwrap();

        let ws = Workspace::load_dir(dir.path(), &ToolchainTable::builtin()).unwrap();
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.files()[0].path, "generator.py");
    }

    #[test]
    fn test_content_of_rejects_stale_hash() {
        let table = ToolchainTable::builtin();
        let ws = Workspace::from_sources(vec![("a.py", b"1".to_vec())], &table).unwrap();
        let mut stale = ws.files()[0].clone();
        stale.content_hash = Digest::compute(b"2");
        assert!(ws.content_of(&stale).is_none());
    }
}
