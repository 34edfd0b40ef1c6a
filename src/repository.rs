//! [`ObjectStore`] backed by a `git2::Repository`.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Oid, ReferenceType, Repository};
use tracing::{debug, info, warn};

use crate::commit::CommitRecord;
use crate::error::StoreError;
use crate::store::{ObjectStore, RefTip, RefUpdate, backup_ref_name, is_rewritten_ref};

const REFLOG_MESSAGE: &str = "git-identity-migrate: rewrite identities";

/// A working clone opened through libgit2.
pub struct GitStore {
    repo: Repository,
    path: PathBuf,
}

impl GitStore {
    /// Opens the repository (bare or not) at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening repository");
        let repo = Repository::open(path)?;
        Ok(GitStore {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Resolves the object a ref should point at after `update`.
    ///
    /// Lightweight refs take the rewritten commit directly. Annotated tags get
    /// a copy of their tag object aimed at the rewritten commit; everything
    /// else in the tag is left as it was.
    fn new_ref_target(&self, direct: Oid, update: &RefUpdate) -> Result<Option<Oid>, StoreError> {
        if direct == update.original {
            return Ok(Some(update.rewritten));
        }
        let odb = self.repo.odb()?;
        let object = odb.read(direct)?;
        if object.kind() != ObjectType::Tag {
            return Ok(None);
        }
        match retarget_tag(object.data(), update.original, update.rewritten) {
            Some(data) => Ok(Some(odb.write(ObjectType::Tag, &data)?)),
            None => Ok(None),
        }
    }
}

impl ObjectStore for GitStore {
    fn list_refs(&self) -> Result<Vec<RefTip>, StoreError> {
        let mut tips = Vec::new();
        for reference in self.repo.references()? {
            let reference = reference?;
            let name = match reference.name() {
                Some(n) => n.to_string(),
                None => continue,
            };
            if !is_rewritten_ref(&name) || reference.kind() == Some(ReferenceType::Symbolic) {
                continue;
            }
            match reference.peel(ObjectType::Commit) {
                Ok(object) => tips.push(RefTip {
                    name,
                    commit: object.id(),
                }),
                Err(e) => warn!(%name, error = %e, "ref does not resolve to a commit, leaving it alone"),
            }
        }
        tips.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = tips.len(), "listed refs");
        Ok(tips)
    }

    fn read_commit(&self, id: Oid) -> Result<CommitRecord, StoreError> {
        let odb = self.repo.odb()?;
        let object = odb.read(id).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Git2(e)
            }
        })?;
        if object.kind() != ObjectType::Commit {
            return Err(StoreError::NotACommit {
                id: id.to_string(),
                kind: object.kind().str().to_string(),
            });
        }
        CommitRecord::parse(id, object.data())
    }

    fn write_commit(&mut self, commit: &CommitRecord) -> Result<Oid, StoreError> {
        let odb = self.repo.odb()?;
        Ok(odb.write(ObjectType::Commit, &commit.to_bytes())?)
    }

    fn update_refs(&mut self, updates: &[RefUpdate]) -> Result<(), StoreError> {
        // Resolve every new target (writing retargeted tag objects) up front so
        // the ref transaction itself only moves pointers.
        let mut planned = Vec::new();
        for update in updates {
            let reference = self.repo.find_reference(&update.name)?;
            let direct = match reference.target() {
                Some(oid) => oid,
                None => continue,
            };
            match self.new_ref_target(direct, update)? {
                Some(target) => planned.push((update.name.as_str(), direct, target)),
                None => warn!(
                    name = %update.name,
                    "nested or unusual tag, leaving it pointing at the original history"
                ),
            }
        }

        let mut tx = self.repo.transaction()?;
        for (name, direct, target) in &planned {
            let backup = backup_ref_name(name);
            tx.lock_ref(&backup)?;
            tx.lock_ref(name)?;
            tx.set_target(&backup, *direct, None, REFLOG_MESSAGE)?;
            tx.set_target(name, *target, None, REFLOG_MESSAGE)?;
        }
        tx.commit().map_err(|e| StoreError::RefUpdate {
            name: planned
                .iter()
                .map(|(n, _, _)| *n)
                .collect::<Vec<_>>()
                .join(", "),
            detail: e.to_string(),
        })?;
        info!(count = planned.len(), "refs redirected");
        Ok(())
    }
}

/// Rewrites the `object` line of a raw tag object from `from` to `to`.
///
/// Returns `None` when the tag does not point directly at `from`.
pub(crate) fn retarget_tag(data: &[u8], from: Oid, to: Oid) -> Option<Vec<u8>> {
    let expected = format!("object {from}\n");
    let rest = data.strip_prefix(expected.as_bytes())?;
    let mut out = format!("object {to}\n").into_bytes();
    out.extend_from_slice(rest);
    Some(out)
}
