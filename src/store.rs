//! The object-store contract the rewrite engine runs against.
//!
//! [`ObjectStore`] is the seam between the history rewrite and whatever holds
//! the objects: [`crate::repository::GitStore`] for a real clone and
//! [`MemoryStore`] for a content-addressed in-memory graph.

use std::collections::{BTreeMap, HashMap};

use git2::{ObjectType, Oid};

use crate::commit::CommitRecord;
use crate::error::StoreError;

/// Namespaces whose refs take part in a migration.
pub const REWRITTEN_NAMESPACES: [&str; 2] = ["refs/heads/", "refs/tags/"];

/// Namespace holding the pre-rewrite target of every redirected ref.
pub const BACKUP_NAMESPACE: &str = "refs/original/";

/// A branch or tag and the commit it ultimately points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTip {
    pub name: String,
    pub commit: Oid,
}

/// A ref redirection from its original commit to the rewritten one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub original: Oid,
    pub rewritten: Oid,
}

/// Content-addressed commit storage plus a ref namespace.
pub trait ObjectStore {
    /// Every branch and tag that resolves to a commit.
    fn list_refs(&self) -> Result<Vec<RefTip>, StoreError>;

    fn read_commit(&self, id: Oid) -> Result<CommitRecord, StoreError>;

    /// Stores `commit` and returns its content hash. Writing the same record
    /// twice yields the same id.
    fn write_commit(&mut self, commit: &CommitRecord) -> Result<Oid, StoreError>;

    /// Redirects each ref, first saving its previous target under
    /// [`BACKUP_NAMESPACE`]. An existing backup is overwritten.
    fn update_refs(&mut self, updates: &[RefUpdate]) -> Result<(), StoreError>;
}

pub(crate) fn is_rewritten_ref(name: &str) -> bool {
    REWRITTEN_NAMESPACES.iter().any(|ns| name.starts_with(ns))
}

pub(crate) fn backup_ref_name(name: &str) -> String {
    let short = name.strip_prefix("refs/").unwrap_or(name);
    format!("{BACKUP_NAMESPACE}{short}")
}

/// Hashes a commit exactly as a git object database would.
pub fn commit_id(commit: &CommitRecord) -> Result<Oid, StoreError> {
    Ok(Oid::hash_object(ObjectType::Commit, &commit.to_bytes())?)
}

/// In-memory [`ObjectStore`] keyed by real commit hashes.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: HashMap<Oid, Vec<u8>>,
    refs: BTreeMap<String, Oid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn set_ref(&mut self, name: &str, target: Oid) {
        self.refs.insert(name.to_string(), target);
    }

    pub fn ref_target(&self, name: &str) -> Option<Oid> {
        self.refs.get(name).copied()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl ObjectStore for MemoryStore {
    fn list_refs(&self) -> Result<Vec<RefTip>, StoreError> {
        Ok(self
            .refs
            .iter()
            .filter(|(name, _)| is_rewritten_ref(name))
            .map(|(name, commit)| RefTip {
                name: name.clone(),
                commit: *commit,
            })
            .collect())
    }

    fn read_commit(&self, id: Oid) -> Result<CommitRecord, StoreError> {
        match self.objects.get(&id) {
            Some(data) => CommitRecord::parse(id, data),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn write_commit(&mut self, commit: &CommitRecord) -> Result<Oid, StoreError> {
        let data = commit.to_bytes();
        let id = Oid::hash_object(ObjectType::Commit, &data)?;
        self.objects.entry(id).or_insert(data);
        Ok(id)
    }

    fn update_refs(&mut self, updates: &[RefUpdate]) -> Result<(), StoreError> {
        // Check every target before touching the namespace.
        for update in updates {
            if !self.objects.contains_key(&update.rewritten) {
                return Err(StoreError::RefUpdate {
                    name: update.name.clone(),
                    detail: format!("target {} does not exist", update.rewritten),
                });
            }
        }
        for update in updates {
            self.refs
                .insert(backup_ref_name(&update.name), update.original);
            self.refs.insert(update.name.clone(), update.rewritten);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{Actor, Timestamp};
    use crate::identity::Identity;

    fn sample(message: &str) -> CommitRecord {
        let actor = Actor::new(Identity::new("A", "a@x"), Timestamp::new(1, 0));
        CommitRecord {
            tree: Oid::from_str("4b825dc642cb6eb9a060e54bf8d69288fbee4904").expect("oid"),
            parents: vec![],
            author: actor.clone(),
            committer: actor,
            extra_headers: vec![],
            signatures: vec![],
            message: message.into(),
        }
    }

    #[test]
    fn write_is_content_addressed() {
        let mut store = MemoryStore::new();
        let a = store.write_commit(&sample("one\n")).expect("write");
        let b = store.write_commit(&sample("one\n")).expect("write");
        let c = store.write_commit(&sample("two\n")).expect("write");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.object_count(), 2);
        assert_eq!(a, commit_id(&sample("one\n")).expect("hash"));
    }

    #[test]
    fn read_returns_written_record() {
        let mut store = MemoryStore::new();
        let id = store.write_commit(&sample("hello\n")).expect("write");
        assert_eq!(store.read_commit(id).expect("read"), sample("hello\n"));
        assert!(store.read_commit(Oid::zero()).is_err());
    }

    #[test]
    fn list_refs_skips_other_namespaces() {
        let mut store = MemoryStore::new();
        let id = store.write_commit(&sample("x\n")).expect("write");
        store.set_ref("refs/heads/main", id);
        store.set_ref("refs/tags/v1", id);
        store.set_ref("refs/original/heads/main", id);
        store.set_ref("refs/remotes/origin/main", id);
        let names: Vec<String> = store
            .list_refs()
            .expect("refs")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["refs/heads/main", "refs/tags/v1"]);
    }

    #[test]
    fn update_refs_overwrites_prior_backup() {
        let mut store = MemoryStore::new();
        let old = store.write_commit(&sample("old\n")).expect("write");
        let new = store.write_commit(&sample("new\n")).expect("write");
        let stale = store.write_commit(&sample("stale\n")).expect("write");
        store.set_ref("refs/heads/main", old);
        store.set_ref("refs/original/heads/main", stale);

        let update = RefUpdate {
            name: "refs/heads/main".into(),
            original: old,
            rewritten: new,
        };
        store.update_refs(&[update]).expect("update");

        assert_eq!(store.ref_target("refs/heads/main"), Some(new));
        assert_eq!(store.ref_target("refs/original/heads/main"), Some(old));
    }

    #[test]
    fn update_refs_is_all_or_nothing() {
        let mut store = MemoryStore::new();
        let old = store.write_commit(&sample("old\n")).expect("write");
        let new = store.write_commit(&sample("new\n")).expect("write");
        store.set_ref("refs/heads/a", old);
        store.set_ref("refs/heads/b", old);

        let updates = [
            RefUpdate {
                name: "refs/heads/a".into(),
                original: old,
                rewritten: new,
            },
            RefUpdate {
                name: "refs/heads/b".into(),
                original: old,
                rewritten: Oid::zero(),
            },
        ];
        assert!(store.update_refs(&updates).is_err());
        assert_eq!(store.ref_target("refs/heads/a"), Some(old));
        assert_eq!(store.ref_target("refs/original/heads/a"), None);
    }
}
