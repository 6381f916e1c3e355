/// Snapshot Store
///
/// **Core Responsibility:**
/// Freeze a role binding into an immutable, versioned record and keep the
/// bytes of every bound file so a run can be reproduced later.
///
/// **Layout:**
/// - `<root>/objects/ab/cdef...`   content-addressed blobs (SHA-256, 2-char shards)
/// - `<root>/snapshots/<uuid>.json` one record per snapshot, created exclusively
///
/// Blobs are deduplicated across snapshots. Records are never rewritten.

use crucible_common::digest::Digest;
use crucible_common::types::{Role, Snapshot, TestType};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::resolver;
use crate::workspace::{Workspace, WorkspaceEntry};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(Uuid),

    #[error("snapshot already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("blob not found: {0}")]
    BlobNotFound(Digest),

    #[error("corrupt blob: expected {expected}, found {actual}")]
    CorruptBlob { expected: Digest, actual: Digest },

    #[error("snapshot {id} has no file bound to {role}")]
    RoleNotBound { id: Uuid, role: Role },

    #[error("snapshot store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot record error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

/// Per-role differences between a snapshot and the live workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub added: Vec<Role>,
    pub removed: Vec<Role>,
    pub modified: Vec<Role>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Sharded blob directory. Writes go through a temp file in the shard and
/// are renamed into place.
struct BlobStore {
    objects_dir: PathBuf,
}

impl BlobStore {
    fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn put(&self, data: &[u8]) -> SnapshotResult<Digest> {
        let digest = Digest::compute(data);
        let path = self.blob_path(&digest);
        if path.exists() {
            return Ok(digest);
        }

        let shard_dir = self.objects_dir.join(&digest.to_hex()[..2]);
        fs::create_dir_all(&shard_dir)?;
        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| SnapshotError::Io(e.error))?;
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> SnapshotResult<Vec<u8>> {
        let data = fs::read(self.blob_path(digest)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SnapshotError::BlobNotFound(*digest)
            } else {
                SnapshotError::Io(e)
            }
        })?;

        let actual = Digest::compute(&data);
        if actual != *digest {
            return Err(SnapshotError::CorruptBlob {
                expected: *digest,
                actual,
            });
        }
        Ok(data)
    }
}

pub struct SnapshotStore {
    blobs: BlobStore,
    snapshots_dir: PathBuf,
}

impl SnapshotStore {
    /// Open (or initialize) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> SnapshotResult<Self> {
        let root = root.as_ref();
        let objects_dir = root.join("objects");
        let snapshots_dir = root.join("snapshots");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&snapshots_dir)?;
        Ok(Self {
            blobs: BlobStore { objects_dir },
            snapshots_dir,
        })
    }

    fn record_path(&self, id: &Uuid) -> PathBuf {
        self.snapshots_dir.join(format!("{}.json", id))
    }

    /// Resolve `workspace` for `test_type` and persist the binding.
    ///
    /// Fails with `RoleResolution` when a required role is missing; nothing
    /// is written in that case.
    pub fn create(&self, workspace: &Workspace, test_type: TestType) -> EngineResult<Snapshot> {
        let resolution = resolver::resolve(&workspace.files(), test_type)?;
        let snapshot = resolution.into_snapshot();

        for (role, file) in &snapshot.files {
            let content = workspace
                .content_of(file)
                .ok_or_else(|| EngineError::MissingSource {
                    role: *role,
                    path: file.path.clone(),
                })?;
            let digest = self.blobs.put(content)?;
            debug!(role = %role, path = %file.path, hash = %digest.short(), "Stored blob");
        }

        self.write_record(&snapshot)?;
        info!(
            snapshot_id = %snapshot.id,
            test_type = %test_type,
            roles = snapshot.files.len(),
            "Snapshot created"
        );
        Ok(snapshot)
    }

    fn write_record(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        let path = self.record_path(&snapshot.id);
        let mut tmp = NamedTempFile::new_in(&self.snapshots_dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.flush()?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                SnapshotError::AlreadyExists(snapshot.id)
            } else {
                SnapshotError::Io(e.error)
            }
        })?;
        Ok(())
    }

    pub fn load(&self, id: Uuid) -> SnapshotResult<Snapshot> {
        let content = fs::read(self.record_path(&id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SnapshotError::NotFound(id)
            } else {
                SnapshotError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// All snapshots, oldest first. Unreadable records are skipped with a warning.
    pub fn list(&self) -> SnapshotResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.snapshots_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path)
                .map_err(SnapshotError::from)
                .and_then(|bytes| serde_json::from_slice::<Snapshot>(&bytes).map_err(Into::into))
            {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot record"),
            }
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    /// Stored bytes of the file bound to `role`.
    pub fn read_file(&self, snapshot: &Snapshot, role: Role) -> SnapshotResult<Vec<u8>> {
        let file = snapshot.file(role).ok_or(SnapshotError::RoleNotBound {
            id: snapshot.id,
            role,
        })?;
        self.blobs.get(&file.content_hash)
    }

    /// Rebuild a live workspace holding exactly the snapshot's bound files.
    pub fn materialize(&self, snapshot: &Snapshot) -> SnapshotResult<Workspace> {
        let mut workspace = Workspace::default();
        for file in snapshot.files.values() {
            let content = self.blobs.get(&file.content_hash)?;
            workspace.push(WorkspaceEntry {
                file: file.clone(),
                content,
            });
        }
        Ok(workspace)
    }

    /// Compare a snapshot with what the live workspace would bind today.
    pub fn diff(&self, snapshot: &Snapshot, workspace: &Workspace) -> SnapshotDiff {
        let live = resolver::resolve_lenient(&workspace.files(), snapshot.test_type);
        let mut diff = SnapshotDiff::default();

        for role in Role::ALL {
            match (snapshot.file(role), live.bindings.get(&role)) {
                (Some(_), None) => diff.removed.push(role),
                (None, Some(_)) => diff.added.push(role),
                (Some(old), Some(new)) if old.content_hash != new.content_hash => {
                    diff.modified.push(role)
                }
                _ => {}
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_common::toolchain::ToolchainTable;

    fn make_store() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn workspace(files: &[(&str, &str)]) -> Workspace {
        Workspace::from_sources(
            files.iter().map(|(p, c)| (p.to_string(), c.as_bytes().to_vec())),
            &ToolchainTable::builtin(),
        )
        .unwrap()
    }

    fn comparison_workspace() -> Workspace {
        workspace(&[
            ("generator.py", "print(5)"),
            ("correct.py", "print(input())"),
            ("solution.py", "print(input())"),
        ])
    }

    #[test]
    fn test_create_then_load() {
        let (_dir, store) = make_store();
        let snapshot = store.create(&comparison_workspace(), TestType::Comparison).unwrap();
        let loaded = store.load(snapshot.id).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.files[&Role::Reference].path, "correct.py");
    }

    #[test]
    fn test_identical_bodies_stored_once() {
        let (dir, store) = make_store();
        store.create(&comparison_workspace(), TestType::Comparison).unwrap();
        store.create(&comparison_workspace(), TestType::Comparison).unwrap();

        // correct.py and solution.py share a body: two distinct blobs in total
        let mut blobs = 0;
        for shard in fs::read_dir(dir.path().join("objects")).unwrap() {
            blobs += fs::read_dir(shard.unwrap().path()).unwrap().count();
        }
        assert_eq!(blobs, 2);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_create_fails_without_required_roles() {
        let (_dir, store) = make_store();
        let ws = workspace(&[("generator.py", "print(5)")]);
        assert!(store.create(&ws, TestType::Validation).is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_records_are_write_once() {
        let (_dir, store) = make_store();
        let snapshot = store.create(&comparison_workspace(), TestType::Comparison).unwrap();
        match store.write_record(&snapshot) {
            Err(SnapshotError::AlreadyExists(id)) => assert_eq!(id, snapshot.id),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[test]
    fn test_load_unknown_id() {
        let (_dir, store) = make_store();
        let id = Uuid::new_v4();
        assert!(matches!(store.load(id), Err(SnapshotError::NotFound(got)) if got == id));
    }

    #[test]
    fn test_materialize_and_read_file() {
        let (_dir, store) = make_store();
        let snapshot = store.create(&comparison_workspace(), TestType::Comparison).unwrap();

        assert_eq!(store.read_file(&snapshot, Role::Generator).unwrap(), b"print(5)");
        assert!(matches!(
            store.read_file(&snapshot, Role::Validator),
            Err(SnapshotError::RoleNotBound { .. })
        ));

        let ws = store.materialize(&snapshot).unwrap();
        assert_eq!(ws.len(), 3);
        assert!(store.diff(&snapshot, &ws).is_empty());
    }

    #[test]
    fn test_corrupt_blob_detected() {
        let (_dir, store) = make_store();
        let snapshot = store.create(&comparison_workspace(), TestType::Comparison).unwrap();
        let hash = snapshot.files[&Role::Generator].content_hash;
        fs::write(store.blobs.blob_path(&hash), "print(6)").unwrap();

        assert!(matches!(
            store.read_file(&snapshot, Role::Generator),
            Err(SnapshotError::CorruptBlob { expected, .. }) if expected == hash
        ));
    }

    #[test]
    fn test_diff_reports_added_removed_modified() {
        let (_dir, store) = make_store();
        let ws = workspace(&[("generator.py", "print(5)"), ("solution.py", "print(input())")]);
        let snapshot = store.create(&ws, TestType::Benchmark).unwrap();

        let live = workspace(&[
            ("solution.py", "print(int(input()))"),
            ("brute.py", "print(input())"),
        ]);
        let diff = store.diff(&snapshot, &live);
        assert_eq!(diff.added, vec![Role::Reference]);
        assert_eq!(diff.removed, vec![Role::Generator]);
        assert_eq!(diff.modified, vec![Role::Solution]);
    }
}
