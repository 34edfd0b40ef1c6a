//! # git-identity-migrate
//!
//! Rewrites commit author and committer identities across the full history
//! of a Git repository: every branch and every tag.
//!
//! A run clones the source repository (or works on the current one in
//! place), decides per commit whether to rewrite it, rebuilds the commit
//! graph with the new identities, optionally strips or re-creates commit
//! signatures, redirects refs (keeping backups under `refs/original/`) and
//! force-pushes the result.
//!
//! ## Usage
//!
//! ```bash
//! # Rewrite "Alice" commits in the current repository
//! git-identity-migrate --old-name Alice --name "Alice Doe" --email alice@new.example
//!
//! # Clone, rewrite, re-sign with SSH and push elsewhere, choosing per commit
//! git-identity-migrate --source https://old/repo.git --destination https://new/repo.git \
//!     --old-name Alice --email alice@new.example --interactive \
//!     --sign ssh --ssh-key ~/.ssh/id_ed25519
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface and main entry point
//! - [`config`] - Migration settings and validation
//! - [`identity`] - Identities and old-name matching
//! - [`commit`] - Commit object parsing and serialization
//! - [`store`] - Object store abstraction and an in-memory store
//! - [`repository`] - `git2`-backed object store
//! - [`rewrite`] - History loading and graph rewriting
//! - [`policy`] - Batch and interactive rewrite decisions
//! - [`signing`] - Signature keep / strip / re-sign
//! - [`migrate`] - One migration run over a store
//! - [`orchestrator`] - Clone, migrate, push
//! - [`git`] - Git command wrappers
//! - [`prompt`] - User input abstractions
//! - [`banner`] - Plan and summary display
//! - [`error`] - Error types

pub mod banner;
pub mod cli;
pub mod commit;
pub mod config;
pub mod error;
pub mod git;
pub mod identity;
pub mod migrate;
pub mod orchestrator;
pub mod policy;
pub mod prompt;
pub mod repository;
pub mod rewrite;
pub mod signing;
pub mod store;
