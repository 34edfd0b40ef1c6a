//! Rewrite policy resolution.
//!
//! Both resolvers produce a [`DecisionMap`] before the graph walk starts; the
//! rewrite engine only ever reads it.

use std::collections::BTreeMap;

use bstr::BString;
use git2::Oid;
use tracing::{debug, info, warn};

use crate::commit::{CommitRecord, Timestamp};
use crate::error::PromptError;
use crate::identity::{Identity, IdentityMatcher};
use crate::rewrite::History;

/// Replacement fields for a single commit. `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub author: Option<Identity>,
    pub committer: Option<Identity>,
    pub message: Option<BString>,
}

impl Rewrite {
    /// Sets `identity` on whichever sides of `commit` match.
    pub fn for_matching_sides(
        commit: &CommitRecord,
        matcher: &IdentityMatcher,
        identity: &Identity,
    ) -> Self {
        Rewrite {
            author: matcher
                .matches(&commit.author.identity.name)
                .then(|| identity.clone()),
            committer: matcher
                .matches(&commit.committer.identity.name)
                .then(|| identity.clone()),
            message: None,
        }
    }
}

/// Outcome for one original commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteDecision {
    /// Leave the commit as it is; it may still get a new id if an ancestor
    /// was rewritten.
    Skip,
    Rewrite(Rewrite),
}

/// Immutable table of decisions keyed by original commit id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionMap {
    decisions: BTreeMap<Oid, RewriteDecision>,
}

impl DecisionMap {
    pub fn get(&self, id: Oid) -> Option<&RewriteDecision> {
        self.decisions.get(&id)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Number of `Rewrite` entries.
    pub fn rewrite_count(&self) -> usize {
        self.decisions
            .values()
            .filter(|d| matches!(d, RewriteDecision::Rewrite(_)))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Oid, &RewriteDecision)> {
        self.decisions.iter()
    }
}

impl FromIterator<(Oid, RewriteDecision)> for DecisionMap {
    fn from_iter<I: IntoIterator<Item = (Oid, RewriteDecision)>>(iter: I) -> Self {
        DecisionMap {
            decisions: iter.into_iter().collect(),
        }
    }
}

/// Batch mode: every commit whose author or committer name matches gets
/// `new_identity` on the matching side(s).
pub fn resolve_batch(history: &History, matcher: &IdentityMatcher, new_identity: &Identity) -> DecisionMap {
    let map: DecisionMap = history
        .iter()
        .filter(|(_, c)| {
            matcher.matches(&c.author.identity.name) || matcher.matches(&c.committer.identity.name)
        })
        .map(|(id, c)| {
            (
                id,
                RewriteDecision::Rewrite(Rewrite::for_matching_sides(c, matcher, new_identity)),
            )
        })
        .collect();
    info!(matched = map.len(), "batch policy resolved");
    map
}

/// Operator response to a presented commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// `E`: enter a custom identity (and optionally a message).
    Edit,
    /// `A`: apply the configured identity.
    ApplyDefault,
    /// `S`: leave this commit alone.
    Skip,
    /// `D`: apply the configured identity here and to every commit not yet seen.
    DefaultForRest,
    /// `Q`: stop, keeping the decisions made so far.
    Quit,
}

impl Choice {
    /// Parses a single key, case-insensitively.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_uppercase() {
            'E' => Some(Choice::Edit),
            'A' => Some(Choice::ApplyDefault),
            'S' => Some(Choice::Skip),
            'D' => Some(Choice::DefaultForRest),
            'Q' => Some(Choice::Quit),
            _ => None,
        }
    }
}

/// What the operator sees for one candidate commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: Oid,
    pub author: Identity,
    pub committer: Identity,
    pub authored: Timestamp,
    pub subject: String,
}

impl Candidate {
    fn new(id: Oid, commit: &CommitRecord) -> Self {
        Candidate {
            id,
            author: commit.author.identity.clone(),
            committer: commit.committer.identity.clone(),
            authored: commit.author.when,
            subject: commit.subject().to_string(),
        }
    }
}

/// Values collected for an `E` choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRewrite {
    pub identity: Identity,
    pub message: Option<BString>,
}

/// The channel the interactive resolver talks to an operator through.
pub trait DecisionPrompter {
    /// Presents `candidate` (number `position` of `total`) and returns the key
    /// pressed.
    fn choose(&mut self, candidate: &Candidate, position: usize, total: usize) -> Result<char, PromptError>;

    /// Collects the identity (and optional message) for an `E` choice.
    fn custom_rewrite(&mut self, candidate: &Candidate, default: &Identity) -> Result<CustomRewrite, PromptError>;

    /// Called when a key does not map to a [`Choice`].
    fn invalid_key(&mut self, _key: char) {}
}

/// Result of an interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveOutcome {
    pub decisions: DecisionMap,
    /// Distinct commits authored by an old name.
    pub candidates: usize,
    /// Commits the operator answered for individually.
    pub visited: usize,
    /// The operator pressed `Q`.
    pub aborted: bool,
}

/// Interactive mode: presents each commit authored by an old name and
/// records the operator's choice.
///
/// Candidates are visited in history order (parents first). Commits never
/// reached because of `Q` stay out of the map and are therefore skipped.
pub fn resolve_interactive<P: DecisionPrompter + ?Sized>(
    history: &History,
    matcher: &IdentityMatcher,
    default_identity: &Identity,
    prompter: &mut P,
) -> Result<InteractiveOutcome, PromptError> {
    let candidates: Vec<(Oid, &CommitRecord)> = history
        .iter()
        .filter(|(_, c)| matcher.matches(&c.author.identity.name))
        .collect();
    let total = candidates.len();
    if total == 0 {
        warn!("no commits authored by the configured names");
    }

    let mut decisions: BTreeMap<Oid, RewriteDecision> = BTreeMap::new();
    let mut visited = 0usize;
    let mut aborted = false;

    let mut index = 0usize;
    while index < total {
        let (id, commit) = candidates[index];
        let candidate = Candidate::new(id, commit);

        let choice = loop {
            let key = prompter.choose(&candidate, index + 1, total)?;
            match Choice::from_key(key) {
                Some(choice) => break choice,
                None => prompter.invalid_key(key),
            }
        };
        debug!(commit = %id, ?choice, "operator decision");

        match choice {
            Choice::Edit => {
                let custom = prompter.custom_rewrite(&candidate, default_identity)?;
                let mut rewrite = Rewrite::for_matching_sides(commit, matcher, &custom.identity);
                rewrite.message = custom.message;
                decisions.insert(id, RewriteDecision::Rewrite(rewrite));
                visited += 1;
            }
            Choice::ApplyDefault => {
                decisions.insert(
                    id,
                    RewriteDecision::Rewrite(Rewrite::for_matching_sides(commit, matcher, default_identity)),
                );
                visited += 1;
            }
            Choice::Skip => {
                decisions.insert(id, RewriteDecision::Skip);
                visited += 1;
            }
            Choice::DefaultForRest => {
                for (rest_id, rest) in &candidates[index..] {
                    decisions.insert(
                        *rest_id,
                        RewriteDecision::Rewrite(Rewrite::for_matching_sides(rest, matcher, default_identity)),
                    );
                }
                visited += 1;
                break;
            }
            Choice::Quit => {
                aborted = true;
                break;
            }
        }
        index += 1;
    }

    let decisions = DecisionMap { decisions };
    info!(
        candidates = total,
        visited,
        rewrites = decisions.rewrite_count(),
        aborted,
        "interactive policy resolved"
    );
    Ok(InteractiveOutcome {
        decisions,
        candidates: total,
        visited,
        aborted,
    })
}
