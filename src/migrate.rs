//! One migration run over an already-cloned repository.
//!
//! The sequence is fixed: resolve decisions, rewrite identities, run the
//! signature pass, then redirect refs once. Refs are untouched until both
//! passes have finished writing objects.

use tracing::{info, warn};

use crate::config::ValidatedConfig;
use crate::error::{MigrateError, PromptError};
use crate::policy::{DecisionMap, DecisionPrompter, resolve_batch, resolve_interactive};
use crate::rewrite::{DecisionTransform, Generation, History, rewrite_history};
use crate::signing::{
    SignatureStage, SignatureTransform, Signer, SigningOutcome, invalidated_signatures,
};
use crate::store::ObjectStore;

/// Counts reported back to the caller's display layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Commits reachable from any branch or tag.
    pub commits_scanned: usize,
    /// Commits with a `Rewrite` decision.
    pub commits_matched: usize,
    /// Commits whose id changed in the final history.
    pub commits_rewritten: usize,
    pub authors_changed: usize,
    pub committers_changed: usize,
    pub messages_changed: usize,
    pub refs_updated: usize,
    pub signing: SigningOutcome,
    /// No commit matched the configured names.
    pub no_matches: bool,
    /// The operator stopped the interactive session early.
    pub interactive_aborted: bool,
}

impl MigrationSummary {
    fn empty() -> Self {
        MigrationSummary {
            commits_scanned: 0,
            commits_matched: 0,
            commits_rewritten: 0,
            authors_changed: 0,
            committers_changed: 0,
            messages_changed: 0,
            refs_updated: 0,
            signing: SigningOutcome::Kept { invalidated: 0 },
            no_matches: true,
            interactive_aborted: false,
        }
    }
}

/// A configured run, ready to be applied to a store.
pub struct Migration<'a> {
    config: &'a ValidatedConfig,
    stage: SignatureStage,
    prompter: Option<&'a mut dyn DecisionPrompter>,
}

impl<'a> Migration<'a> {
    /// Uses the signers named by the configuration's signing policy.
    pub fn new(config: &'a ValidatedConfig) -> Self {
        Migration {
            config,
            stage: SignatureStage::from_policy(config.signing()),
            prompter: None,
        }
    }

    /// Replaces the signer for GPG/SSH policies.
    pub fn with_signer(mut self, signer: Box<dyn Signer>) -> Self {
        if matches!(self.stage, SignatureStage::Sign(_)) {
            self.stage = SignatureStage::Sign(signer);
        }
        self
    }

    /// Operator channel for interactive mode.
    pub fn with_prompter(mut self, prompter: &'a mut dyn DecisionPrompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Rewrites the history in `store` and redirects its refs.
    pub fn run<S: ObjectStore + ?Sized>(self, store: &mut S) -> Result<MigrationSummary, MigrateError> {
        let Migration {
            config,
            stage,
            prompter,
        } = self;

        let tips = store.list_refs()?;
        if tips.is_empty() {
            warn!("repository has no branches or tags, nothing to migrate");
            return Ok(MigrationSummary::empty());
        }
        let history = History::load(&*store, tips.clone())?;
        info!(commits = history.len(), refs = tips.len(), "history loaded");

        let mut interactive_aborted = false;
        let decisions: DecisionMap = if config.interactive() {
            let prompter = prompter.ok_or_else(|| {
                PromptError::Input("interactive mode needs an operator channel".into())
            })?;
            let outcome = resolve_interactive(
                &history,
                config.matcher(),
                config.new_identity(),
                prompter,
            )?;
            interactive_aborted = outcome.aborted;
            outcome.decisions
        } else {
            resolve_batch(&history, config.matcher(), config.new_identity())
        };

        let commits_matched = decisions.rewrite_count();
        let no_matches = commits_matched == 0;
        if no_matches {
            warn!(
                names = ?config.matcher().old_names(),
                "no commits matched the configured names"
            );
        }

        let mut identity = DecisionTransform::new(&decisions);
        let identity_pass = rewrite_history(store, &history, &mut identity)?;
        let stats = identity.stats();

        let (total, signing) = match &stage {
            SignatureStage::Keep => {
                let invalidated = invalidated_signatures(
                    history
                        .iter()
                        .filter(|(id, _)| identity_pass.new_id(*id) != Some(*id))
                        .map(|(_, c)| c),
                );
                (identity_pass, SigningOutcome::Kept { invalidated })
            }
            SignatureStage::Strip => {
                let mut transform = SignatureTransform::strip();
                let pass = signature_pass(store, &identity_pass, &mut transform)?;
                (identity_pass.then(&pass), transform.outcome())
            }
            SignatureStage::Sign(signer) => {
                let mut transform = SignatureTransform::sign(signer.as_ref());
                let pass = signature_pass(store, &identity_pass, &mut transform)?;
                (identity_pass.then(&pass), transform.outcome())
            }
        };

        let updates = total.ref_updates(&tips);
        store.update_refs(&updates)?;
        info!(refs = updates.len(), rewritten = total.changed, "migration applied");

        Ok(MigrationSummary {
            commits_scanned: history.len(),
            commits_matched,
            commits_rewritten: total.changed,
            authors_changed: stats.authors_changed,
            committers_changed: stats.committers_changed,
            messages_changed: stats.messages_changed,
            refs_updated: updates.len(),
            signing,
            no_matches,
            interactive_aborted,
        })
    }
}

fn signature_pass<S: ObjectStore + ?Sized>(
    store: &mut S,
    previous: &Generation,
    transform: &mut SignatureTransform<'_>,
) -> Result<Generation, MigrateError> {
    let history = History::load(&*store, previous.tips.clone())?;
    Ok(rewrite_history(store, &history, transform)?)
}

/// Convenience wrapper: validated config in, summary out.
pub fn migrate_history<S: ObjectStore + ?Sized>(
    store: &mut S,
    config: &ValidatedConfig,
    prompter: Option<&mut dyn DecisionPrompter>,
) -> Result<MigrationSummary, MigrateError> {
    let migration = Migration::new(config);
    match prompter {
        Some(p) => migration.with_prompter(p).run(store),
        None => migration.run(store),
    }
}
