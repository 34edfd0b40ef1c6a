//! Clone → migrate → push, around a workspace that lives for one run.

use std::path::{Path, PathBuf};

use git2::Repository;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::ValidatedConfig;
use crate::error::MigrateError;
use crate::git;
use crate::migrate::{Migration, MigrationSummary};
use crate::policy::DecisionPrompter;
use crate::repository::GitStore;

/// Name of the mirror clone inside the workspace.
const CLONE_DIR: &str = "repo.git";

/// Where the working clone lives.
enum Workspace {
    /// Removed when the run ends.
    Temporary(TempDir),
    /// Kept after the run for inspection.
    Persistent(PathBuf),
}

impl Workspace {
    fn create(dir: Option<&Path>) -> Result<Self, MigrateError> {
        match dir {
            Some(d) => {
                std::fs::create_dir_all(d).map_err(|e| MigrateError::Command {
                    command: format!("mkdir {}", d.display()),
                    detail: e.to_string(),
                })?;
                Ok(Workspace::Persistent(d.to_path_buf()))
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("git-identity-migrate-")
                    .tempdir()
                    .map_err(|e| MigrateError::Command {
                        command: "create temporary workspace".into(),
                        detail: e.to_string(),
                    })?;
                Ok(Workspace::Temporary(tmp))
            }
        }
    }

    fn root(&self) -> &Path {
        match self {
            Workspace::Temporary(t) => t.path(),
            Workspace::Persistent(p) => p,
        }
    }
}

/// Source and destination of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub source: String,
    /// `None` leaves the rewritten clone unpushed.
    pub destination: Option<String>,
}

/// What happened on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub branches_pushed: bool,
    pub tags_pushed: bool,
    /// Tag push failure message; a warning, not an error.
    pub tag_warning: Option<String>,
}

/// Result of a full orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub summary: MigrationSummary,
    pub push: PushReport,
    /// Path of the working clone when it was kept.
    pub kept_clone: Option<PathBuf>,
}

/// Drives one migration from `endpoints.source` to `endpoints.destination`.
pub struct Orchestrator<'a> {
    config: &'a ValidatedConfig,
    workspace_dir: Option<PathBuf>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a ValidatedConfig) -> Self {
        Orchestrator {
            config,
            workspace_dir: None,
        }
    }

    /// Clones into `dir` instead of a temporary directory and keeps it.
    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = Some(dir.into());
        self
    }

    pub fn run(
        &self,
        endpoints: &Endpoints,
        prompter: Option<&mut dyn DecisionPrompter>,
    ) -> Result<RunReport, MigrateError> {
        let workspace = Workspace::create(self.workspace_dir.as_deref())?;
        let clone_path = workspace.root().join(CLONE_DIR);
        if clone_path.exists() {
            remove_previous_clone(&clone_path)?;
        }

        info!(source = %endpoints.source, path = %clone_path.display(), "cloning source");
        git::clone_mirror(&endpoints.source, &clone_path).map_err(|detail| MigrateError::Command {
            command: "git clone --mirror".into(),
            detail,
        })?;

        let mut store = GitStore::open(&clone_path)?;
        let migration = Migration::new(self.config);
        let summary = match prompter {
            Some(p) => migration.with_prompter(p).run(&mut store)?,
            None => migration.run(&mut store)?,
        };

        let push = match &endpoints.destination {
            Some(url) => push_all(&clone_path, url)?,
            None => PushReport {
                branches_pushed: false,
                tags_pushed: false,
                tag_warning: None,
            },
        };

        let kept_clone = match &workspace {
            Workspace::Persistent(_) => Some(clone_path),
            Workspace::Temporary(_) => None,
        };
        Ok(RunReport {
            summary,
            push,
            kept_clone,
        })
    }
}

/// Clears the mirror a previous run left in a persistent workspace, so every
/// run starts again from the source. Anything that is not a bare repository
/// is left alone.
fn remove_previous_clone(path: &Path) -> Result<(), MigrateError> {
    let command = format!("remove {}", path.display());
    if let Err(e) = Repository::open_bare(path) {
        return Err(MigrateError::Command {
            command,
            detail: format!("not a clone from an earlier run: {}", e.message()),
        });
    }
    info!(path = %path.display(), "replacing clone from an earlier run");
    std::fs::remove_dir_all(path).map_err(|e| MigrateError::Command {
        command,
        detail: e.to_string(),
    })
}

/// Pushes branches (fatal on failure) and then tags (warning on failure).
fn push_all(repo: &Path, url: &str) -> Result<PushReport, MigrateError> {
    info!(destination = %url, "pushing branches");
    git::push_branches(repo, url).map_err(|detail| MigrateError::Command {
        command: "git push --all".into(),
        detail,
    })?;

    info!(destination = %url, "pushing tags");
    let (tags_pushed, tag_warning) = match git::push_tags(repo, url) {
        Ok(()) => (true, None),
        Err(e) => {
            warn!(error = %e, "tag push failed");
            (false, Some(e))
        }
    };
    Ok(PushReport {
        branches_pushed: true,
        tags_pushed,
        tag_warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::config::tests::FakeKeyring;
    use crate::signing::SigningPolicy;
    use git2::{Signature, Time};

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    fn source_repo() -> (tempfile::TempDir, git2::Oid) {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Repository::init(dir.path()).expect("init");
        let tree_id = repo.treebuilder(None).expect("tb").write().expect("tree");
        let tree = repo.find_tree(tree_id).expect("tree");
        let alice = Signature::new("Alice", "alice@old.example", &Time::new(1_600_000_000, 0))
            .expect("sig");
        let carol = Signature::new("Carol", "carol@example.com", &Time::new(1_600_000_100, 0))
            .expect("sig");
        let root = repo
            .commit(Some("refs/heads/main"), &alice, &alice, "root\n", &tree, &[])
            .expect("root");
        let root_commit = repo.find_commit(root).expect("root commit");
        let tip = repo
            .commit(Some("refs/heads/main"), &carol, &carol, "tip\n", &tree, &[&root_commit])
            .expect("tip");
        let tip_object = repo.find_object(tip, None).expect("object");
        repo.tag_lightweight("v1", &tip_object, false).expect("tag");
        (dir, tip)
    }

    fn config() -> ValidatedConfig {
        MigrationConfig {
            old_names: vec!["Alice".into()],
            new_name: Some("Bob".into()),
            new_email: "bob@example.com".into(),
            interactive: false,
            signing: SigningPolicy::Keep,
        }
        .validate(None, &FakeKeyring(vec![]))
        .expect("valid")
    }

    #[test]
    fn clone_migrate_push() {
        if !git_available() {
            return;
        }
        let (src, original_tip) = source_repo();
        let dest = tempfile::tempdir().expect("dest");
        Repository::init_bare(dest.path()).expect("bare");

        let cfg = config();
        let endpoints = Endpoints {
            source: src.path().to_string_lossy().into_owned(),
            destination: Some(dest.path().to_string_lossy().into_owned()),
        };
        let report = Orchestrator::new(&cfg).run(&endpoints, None).expect("run");

        assert_eq!(report.summary.commits_matched, 1);
        assert!(report.push.branches_pushed);
        assert!(report.push.tags_pushed);
        assert!(report.kept_clone.is_none());

        let pushed = Repository::open(dest.path()).expect("open");
        let main = pushed
            .find_reference("refs/heads/main")
            .expect("main")
            .peel_to_commit()
            .expect("commit");
        assert_ne!(main.id(), original_tip);
        assert_eq!(main.author().name(), Some("Carol"));
        let root = main.parent(0).expect("parent");
        assert_eq!(root.author().name(), Some("Bob"));
        assert_eq!(root.author().email(), Some("bob@example.com"));
        assert_eq!(root.author().when().seconds(), 1_600_000_000);

        let tag = pushed
            .find_reference("refs/tags/v1")
            .expect("tag")
            .peel_to_commit()
            .expect("commit");
        assert_eq!(tag.id(), main.id());

        // The source is never modified.
        let source = Repository::open(src.path()).expect("source");
        let source_main = source.find_reference("refs/heads/main").expect("main");
        assert_eq!(source_main.target(), Some(original_tip));
    }

    #[test]
    fn persistent_workspace_keeps_the_clone() {
        if !git_available() {
            return;
        }
        let (src, _) = source_repo();
        let work = tempfile::tempdir().expect("work");
        let cfg = config();
        let endpoints = Endpoints {
            source: src.path().to_string_lossy().into_owned(),
            destination: None,
        };
        let report = Orchestrator::new(&cfg)
            .with_workspace(work.path().join("ws"))
            .run(&endpoints, None)
            .expect("run");

        let kept = report.kept_clone.expect("kept");
        assert!(kept.exists());
        assert!(!report.push.branches_pushed);
        let repo = Repository::open(&kept).expect("open kept clone");
        assert!(repo.find_reference("refs/original/heads/main").is_ok());
    }

    #[test]
    fn persistent_workspace_can_be_reused() {
        if !git_available() {
            return;
        }
        let (src, _) = source_repo();
        let work = tempfile::tempdir().expect("work");
        let cfg = config();
        let endpoints = Endpoints {
            source: src.path().to_string_lossy().into_owned(),
            destination: None,
        };
        let orchestrator = Orchestrator::new(&cfg).with_workspace(work.path().join("ws"));

        let first = orchestrator.run(&endpoints, None).expect("first run");
        let second = orchestrator.run(&endpoints, None).expect("second run");

        // The second run starts from a fresh clone of the source, not from
        // the already rewritten history.
        assert_eq!(second.summary.commits_matched, 1);
        assert_eq!(first.summary, second.summary);
        let tip = |path: &Path| {
            Repository::open(path)
                .expect("open kept clone")
                .refname_to_id("refs/heads/main")
                .expect("main")
        };
        let kept = second.kept_clone.expect("kept");
        assert_eq!(tip(&kept), tip(&first.kept_clone.expect("kept")));
    }

    #[test]
    fn foreign_directory_in_workspace_is_not_removed() {
        let work = tempfile::tempdir().expect("work");
        let stray = work.path().join(CLONE_DIR);
        std::fs::create_dir_all(&stray).expect("mkdir");
        std::fs::write(stray.join("notes.txt"), "keep me").expect("write");

        let err = remove_previous_clone(&stray).unwrap_err();
        assert!(matches!(err, MigrateError::Command { .. }));
        assert!(stray.join("notes.txt").exists());
    }

    #[test]
    fn failed_clone_is_a_command_error() {
        if !git_available() {
            return;
        }
        let cfg = config();
        let endpoints = Endpoints {
            source: "/nonexistent/source/repository".into(),
            destination: None,
        };
        let err = Orchestrator::new(&cfg).run(&endpoints, None).unwrap_err();
        assert!(matches!(err, MigrateError::Command { .. }));
        let message = err.to_string();
        assert!(message.starts_with("`git clone --mirror` failed: "));
        assert_eq!(message.matches("failed:").count(), 1, "{message}");
    }
}
