//! Error types for the migration core.
//!
//! Each stage has its own error enum derived with `thiserror`; [`MigrateError`]
//! unifies them for callers that drive a whole run.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type returned by [`crate::migrate::migrate_history`] and the
/// orchestrator.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Invalid or incomplete configuration. Raised before any mutation.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// The requested GPG key is not in the local secret keyring.
    #[error("gpg key '{0}' not found in the secret keyring")]
    KeyNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// An external command (`git clone`, `git push`, ...) failed.
    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },
}

/// Errors detected while validating a [`crate::config::MigrationConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a new author email is required")]
    MissingEmail,

    #[error("no old author names configured and no default available")]
    MissingOldNames,

    #[error("ssh signing key not found at '{0}'")]
    SigningKeyMissing(PathBuf),

    #[error("signing policy '{policy}' requires {what}")]
    MissingKeyMaterial { policy: String, what: String },

    #[error("required tool `{0}` not found in PATH")]
    ToolMissing(String),
}

/// Errors from the underlying object store (odb, refs).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    #[error("object {0} not found")]
    NotFound(String),

    #[error("object {id} is a {kind}, expected a commit")]
    NotACommit { id: String, kind: String },

    #[error("malformed commit {id}: {detail}")]
    Malformed { id: String, detail: String },

    #[error("ref update failed for '{name}': {detail}")]
    RefUpdate { name: String, detail: String },
}

/// Errors raised by the graph walk itself.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// A child was about to be written before one of its parents.
    #[error("commit {child} references parent {parent} which has not been rewritten")]
    ForwardReference { child: String, parent: String },

    /// The commit graph contains a cycle, which a content-addressed store
    /// cannot produce unless it is corrupt.
    #[error("commit graph is not acyclic ({remaining} commits could not be ordered)")]
    Cycle { remaining: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Errors from producing signatures.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("failed to run `{program}`: {detail}")]
    Spawn { program: String, detail: String },

    #[error("`{program}` exited with non-zero status: {stderr}")]
    Failed { program: String, stderr: String },

    #[error("signing I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signer produced an empty signature")]
    Empty,
}

/// Errors collecting operator input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt failed: {0}")]
    Input(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = ConfigError::SigningKeyMissing(PathBuf::from("/tmp/id_ed25519"));
        assert_eq!(
            err.to_string(),
            "ssh signing key not found at '/tmp/id_ed25519'"
        );

        let err = MigrateError::KeyNotFound("ABCD1234".into());
        assert!(err.to_string().contains("ABCD1234"));

        let err = RewriteError::ForwardReference {
            child: "c".into(),
            parent: "p".into(),
        };
        assert!(err.to_string().contains("has not been rewritten"));
    }

    #[test]
    fn config_error_converts_to_migrate_error() {
        let err: MigrateError = ConfigError::MissingEmail.into();
        assert!(matches!(
            err,
            MigrateError::Configuration(ConfigError::MissingEmail)
        ));
    }
}
