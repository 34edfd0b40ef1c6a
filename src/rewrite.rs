//! The history rewrite engine.
//!
//! [`History::load`] reads every commit reachable from a set of ref tips and
//! orders them parents-first. [`rewrite_history`] then walks that order once,
//! rewriting parent links through a remap table and handing each commit to a
//! [`CommitTransform`] before writing it back. Each call produces one
//! [`Generation`]; identity rewriting and signing are two generations composed
//! one after the other.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use git2::Oid;
use tracing::{debug, info, warn};

use crate::commit::CommitRecord;
use crate::error::{RewriteError, StoreError};
use crate::policy::{DecisionMap, RewriteDecision};
use crate::store::{ObjectStore, RefTip, RefUpdate};

/// Every commit reachable from a set of tips, in topological order.
#[derive(Debug, Clone)]
pub struct History {
    tips: Vec<RefTip>,
    order: Vec<Oid>,
    commits: HashMap<Oid, CommitRecord>,
    /// Parents referenced but absent from the store (shallow boundary).
    external: BTreeSet<Oid>,
}

impl History {
    /// Reads the commit graph below `tips`.
    ///
    /// Commits are ordered so that every parent precedes its children; ties
    /// are broken by committer time and then by hash, which keeps the order
    /// stable across runs.
    pub fn load<S: ObjectStore + ?Sized>(store: &S, tips: Vec<RefTip>) -> Result<Self, RewriteError> {
        let mut commits: HashMap<Oid, CommitRecord> = HashMap::new();
        let mut external = BTreeSet::new();
        let mut stack: Vec<Oid> = tips.iter().map(|t| t.commit).collect();

        while let Some(id) = stack.pop() {
            if commits.contains_key(&id) || external.contains(&id) {
                continue;
            }
            match store.read_commit(id) {
                Ok(record) => {
                    stack.extend(record.parents.iter().copied());
                    commits.insert(id, record);
                }
                Err(StoreError::NotFound(_)) if !tips.iter().any(|t| t.commit == id) => {
                    warn!(commit = %id, "parent missing from the object store, treating it as a fixed boundary");
                    external.insert(id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let order = topological_order(&commits)?;
        debug!(commits = order.len(), tips = tips.len(), "loaded history");
        Ok(History {
            tips,
            order,
            commits,
            external,
        })
    }

    pub fn tips(&self) -> &[RefTip] {
        &self.tips
    }

    /// Commit ids, parents before children.
    pub fn order(&self) -> &[Oid] {
        &self.order
    }

    pub fn get(&self, id: Oid) -> Option<&CommitRecord> {
        self.commits.get(&id)
    }

    /// `(id, record)` pairs in topological order.
    pub fn iter(&self) -> impl Iterator<Item = (Oid, &CommitRecord)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.commits.get(id).map(|c| (*id, c)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn topological_order(commits: &HashMap<Oid, CommitRecord>) -> Result<Vec<Oid>, RewriteError> {
    let mut pending: HashMap<Oid, usize> = HashMap::new();
    let mut children: HashMap<Oid, Vec<Oid>> = HashMap::new();

    for (id, record) in commits {
        let mut unique_parents: Vec<Oid> = record
            .parents
            .iter()
            .copied()
            .filter(|p| commits.contains_key(p))
            .collect();
        unique_parents.sort();
        unique_parents.dedup();
        pending.insert(*id, unique_parents.len());
        for parent in unique_parents {
            children.entry(parent).or_default().push(*id);
        }
    }

    let key = |id: Oid| (commits[&id].committer.when.seconds, id);
    let mut ready: BTreeSet<(i64, Oid)> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| key(*id))
        .collect();

    let mut order = Vec::with_capacity(commits.len());
    while let Some(next) = ready.pop_first() {
        let id = next.1;
        order.push(id);
        if let Some(kids) = children.get(&id) {
            for kid in kids {
                if let Some(n) = pending.get_mut(kid) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(key(*kid));
                    }
                }
            }
        }
    }

    if order.len() != commits.len() {
        return Err(RewriteError::Cycle {
            remaining: commits.len() - order.len(),
        });
    }
    Ok(order)
}

/// A per-commit edit applied during a rewrite pass.
///
/// `commit` arrives with its parents already pointing at rewritten ids; the
/// transform may change any other field.
pub trait CommitTransform {
    fn transform(&mut self, original: Oid, commit: &mut CommitRecord) -> Result<(), RewriteError>;
}

impl<F> CommitTransform for F
where
    F: FnMut(Oid, &mut CommitRecord) -> Result<(), RewriteError>,
{
    fn transform(&mut self, original: Oid, commit: &mut CommitRecord) -> Result<(), RewriteError> {
        self(original, commit)
    }
}

/// The result of one rewrite pass: old id to new id for every commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub remap: BTreeMap<Oid, Oid>,
    pub tips: Vec<RefTip>,
    /// Commits whose id changed in this pass.
    pub changed: usize,
}

impl Generation {
    pub fn new_id(&self, original: Oid) -> Option<Oid> {
        self.remap.get(&original).copied()
    }

    /// Follows `self` and then `next`, giving original ids to final ids.
    pub fn then(&self, next: &Generation) -> Generation {
        let remap = self
            .remap
            .iter()
            .map(|(old, mid)| (*old, next.new_id(*mid).unwrap_or(*mid)))
            .collect::<BTreeMap<_, _>>();
        let changed = remap.iter().filter(|(old, new)| old != new).count();
        Generation {
            remap,
            tips: next.tips.clone(),
            changed,
        }
    }

    /// Ref redirections from `original` tips to this generation's tips.
    pub fn ref_updates(&self, original: &[RefTip]) -> Vec<RefUpdate> {
        original
            .iter()
            .filter_map(|tip| {
                let rewritten = self.new_id(tip.commit)?;
                (rewritten != tip.commit).then(|| RefUpdate {
                    name: tip.name.clone(),
                    original: tip.commit,
                    rewritten,
                })
            })
            .collect()
    }
}

/// Rewrites every commit of `history` into `store`.
///
/// Commits are visited parents-first, so each parent's new id is known before
/// its children are written. A commit that comes out of the transform
/// unchanged and whose parents kept their ids keeps its own id.
pub fn rewrite_history<S, T>(
    store: &mut S,
    history: &History,
    transform: &mut T,
) -> Result<Generation, RewriteError>
where
    S: ObjectStore + ?Sized,
    T: CommitTransform + ?Sized,
{
    let mut remap: BTreeMap<Oid, Oid> = BTreeMap::new();
    let mut changed = 0usize;

    for (id, original) in history.iter() {
        let mut commit = original.clone();
        commit.parents = original
            .parents
            .iter()
            .map(|parent| match remap.get(parent) {
                Some(new) => Ok(*new),
                None if history.external.contains(parent) => Ok(*parent),
                None => Err(RewriteError::ForwardReference {
                    child: id.to_string(),
                    parent: parent.to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        transform.transform(id, &mut commit)?;

        let new_id = if commit == *original {
            id
        } else {
            store.write_commit(&commit)?
        };
        if new_id != id {
            changed += 1;
            debug!(old = %id, new = %new_id, "rewrote commit");
        }
        remap.insert(id, new_id);
    }

    let tips = history
        .tips()
        .iter()
        .map(|tip| RefTip {
            name: tip.name.clone(),
            commit: remap.get(&tip.commit).copied().unwrap_or(tip.commit),
        })
        .collect();

    info!(commits = history.len(), changed, "rewrite pass complete");
    Ok(Generation {
        remap,
        tips,
        changed,
    })
}

/// Counters gathered while applying a [`DecisionMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityStats {
    pub authors_changed: usize,
    pub committers_changed: usize,
    pub messages_changed: usize,
}

/// Applies resolved decisions: new author/committer identity and message.
/// Timestamps are never touched.
pub struct DecisionTransform<'a> {
    decisions: &'a DecisionMap,
    stats: IdentityStats,
}

impl<'a> DecisionTransform<'a> {
    pub fn new(decisions: &'a DecisionMap) -> Self {
        DecisionTransform {
            decisions,
            stats: IdentityStats::default(),
        }
    }

    pub fn stats(&self) -> IdentityStats {
        self.stats
    }
}

impl CommitTransform for DecisionTransform<'_> {
    fn transform(&mut self, original: Oid, commit: &mut CommitRecord) -> Result<(), RewriteError> {
        let rewrite = match self.decisions.get(original) {
            Some(RewriteDecision::Rewrite(r)) => r,
            Some(RewriteDecision::Skip) | None => return Ok(()),
        };
        if let Some(author) = &rewrite.author {
            if commit.author.identity != *author {
                commit.author.identity = author.clone();
                self.stats.authors_changed += 1;
            }
        }
        if let Some(committer) = &rewrite.committer {
            if commit.committer.identity != *committer {
                commit.committer.identity = committer.clone();
                self.stats.committers_changed += 1;
            }
        }
        if let Some(message) = &rewrite.message {
            if commit.message != *message {
                commit.message = message.clone();
                self.stats.messages_changed += 1;
            }
        }
        Ok(())
    }
}
