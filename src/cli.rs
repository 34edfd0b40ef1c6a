use crate::{
    banner::{print_plan, print_summary},
    config::{MigrationConfig, ValidatedConfig},
    error::{ConfigError, MigrateError},
    git,
    migrate::{Migration, MigrationSummary},
    orchestrator::{Endpoints, Orchestrator, PushReport},
    policy::DecisionPrompter,
    prompt,
    repository::GitStore,
    signing::{GpgKeyring, SigningPolicy},
};

use clap::{Parser, ValueEnum};
use console::style;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Migrate commit author and committer identities across a repository's
/// full history.
#[derive(Parser, Debug)]
#[command(name = "git-identity-migrate", version)]
struct Args {
    /// Repository to clone and migrate. Without it, the current repository
    /// is migrated in place.
    #[arg(long)]
    source: Option<String>,

    /// Where the rewritten history is force-pushed.
    #[arg(long)]
    destination: Option<String>,

    /// Author name to migrate. Repeat for several names.
    #[arg(long = "old-name", value_name = "NAME")]
    old_names: Vec<String>,

    /// New author name. Defaults to the first old name.
    #[arg(long)]
    name: Option<String>,

    /// New author email. Prompted for when omitted.
    #[arg(long)]
    email: Option<String>,

    /// Decide commit by commit instead of rewriting every match.
    #[arg(short, long)]
    interactive: bool,

    /// What to do with commit signatures.
    #[arg(long, value_enum, default_value_t = SignMode::Keep, value_name = "POLICY")]
    sign: SignMode,

    /// Secret key id used with `--sign gpg`.
    #[arg(long, value_name = "KEY_ID")]
    gpg_key: Option<String>,

    /// Private key file used with `--sign ssh`.
    #[arg(long, value_name = "PATH")]
    ssh_key: Option<PathBuf>,

    /// Keep the working clone in this directory instead of a temporary one.
    #[arg(long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Rewrite the clone but do not push it.
    #[arg(long)]
    no_push: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,

    /// More log output (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Values accepted by `--sign`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum SignMode {
    /// Copy signatures unchanged.
    #[default]
    Keep,
    /// Drop every signature.
    Strip,
    /// Re-sign with `--gpg-key`.
    Gpg,
    /// Re-sign with `--ssh-key`.
    Ssh,
}

/// Installs the `tracing` subscriber on stderr.
fn init_logging(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Maps `--sign` and its key flags to a [`SigningPolicy`].
fn signing_policy(
    mode: SignMode,
    gpg_key: Option<&str>,
    ssh_key: Option<&PathBuf>,
) -> Result<SigningPolicy, ConfigError> {
    match mode {
        SignMode::Keep => Ok(SigningPolicy::Keep),
        SignMode::Strip => Ok(SigningPolicy::Strip),
        SignMode::Gpg => match gpg_key {
            Some(key) => Ok(SigningPolicy::Gpg {
                key_id: key.to_string(),
            }),
            None => Err(ConfigError::MissingKeyMaterial {
                policy: "gpg".into(),
                what: "--gpg-key".into(),
            }),
        },
        SignMode::Ssh => match ssh_key {
            Some(path) => Ok(SigningPolicy::Ssh {
                key_path: path.clone(),
            }),
            None => Err(ConfigError::MissingKeyMaterial {
                policy: "ssh".into(),
                what: "--ssh-key".into(),
            }),
        },
    }
}

/// Where the run reads from and writes to.
#[derive(Debug)]
enum Target {
    /// Root of the repository containing the current directory.
    InPlace(PathBuf),
    Remote(Endpoints),
}

/// Endpoints for a clone-and-push run, or `None` for an in-place run.
fn endpoints(
    source: Option<&str>,
    destination: Option<&str>,
    no_push: bool,
) -> Result<Option<Endpoints>, String> {
    match (source, destination) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err("--destination needs --source".into()),
        (Some(src), dest) => {
            if dest.is_none() && !no_push {
                return Err("--destination is required unless --no-push is given".into());
            }
            Ok(Some(Endpoints {
                source: src.to_string(),
                destination: if no_push {
                    None
                } else {
                    dest.map(str::to_string)
                },
            }))
        }
    }
}

/// Short name for prompts: the last path segment of a URL or directory,
/// without a trailing `.git`.
pub(crate) fn repo_label(location: &str) -> String {
    let trimmed = location.trim_end_matches(['/', '\\']);
    let last = trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(trimmed);
    let last = last.strip_suffix(".git").unwrap_or(last);
    if last.is_empty() {
        "repository".to_string()
    } else {
        last.to_string()
    }
}

/// Verifies that `git` and whatever the signing policy needs are on `PATH`.
fn verify_tools(policy: &SigningPolicy) -> Result<(), ConfigError> {
    let tools = std::iter::once("git").chain(policy.required_tool());
    for tool in tools {
        if which::which(tool).is_err() {
            return Err(ConfigError::ToolMissing(tool.to_string()));
        }
    }
    Ok(())
}

/// Resolves the root of the repository containing the current directory.
fn verify_environment() -> Result<PathBuf, ()> {
    match git::rev_parse("--show-toplevel") {
        Ok(s) => Ok(PathBuf::from(s)),
        Err(e) => {
            eprintln!(
                "{}",
                style(format!("Error: not inside a git repo ({})", e))
                    .red()
                    .bold()
            );
            Err(())
        }
    }
}

/// Uses `--email` when given, otherwise prompts with the `git config` default.
fn get_email(given: Option<&str>, repo_name: &str) -> Result<String, ()> {
    if let Some(email) = given {
        return Ok(email.trim().to_string());
    }
    let default_email = git::config_get("user.email").unwrap_or_default();
    let mut string_prompter = prompt::DialoguerStringPrompter;
    match prompt::ask(&mut string_prompter, "New author email", repo_name, &default_email) {
        Ok(v) => Ok(v.trim().to_string()),
        Err(e) => {
            eprintln!("{}", style(format!("Prompt error: {}", e)).red().bold());
            Err(())
        }
    }
}

fn fail(err: &MigrateError) {
    eprintln!("{}", style(format!("❌ {}", err)).red().bold());
}

fn run_in_place(
    root: &Path,
    config: &ValidatedConfig,
    prompter: Option<&mut dyn DecisionPrompter>,
) -> Result<MigrationSummary, MigrateError> {
    let mut store = GitStore::open(root)?;
    let migration = Migration::new(config);
    match prompter {
        Some(p) => migration.with_prompter(p).run(&mut store),
        None => migration.run(&mut store),
    }
}

/// Main CLI entry point for `git-identity-migrate`.
///
/// This function:
/// 1. Parses CLI flags and installs logging.
/// 2. Verifies that `git` (and `gpg` / `ssh-keygen` when signing) is installed.
/// 3. Resolves the source: a URL to clone, or the current repository.
/// 4. Prompts for the new email if it was not given.
/// 5. Validates the configuration, including signing keys.
/// 6. Displays the plan and asks for confirmation unless `--yes`.
/// 7. Rewrites history, pushes when a destination is set, and prints a summary.
///
/// Returns `Ok(exit_code)` on success, or `Err(())` on error.
///
/// # Exit Codes
///
/// * `0` – Successful execution (including cancellation at the prompt).
/// * Non-zero – Any failure along the way.
pub fn entry() -> Result<i32, ()> {
    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            let _ = e.print();
            return Ok(e.exit_code());
        }
    };
    init_logging(args.verbose);

    let policy = match signing_policy(args.sign, args.gpg_key.as_deref(), args.ssh_key.as_ref()) {
        Ok(p) => p,
        Err(e) => {
            fail(&e.into());
            return Err(());
        }
    };
    if let Err(e) = verify_tools(&policy) {
        fail(&e.into());
        return Err(());
    }

    let target = match endpoints(
        args.source.as_deref(),
        args.destination.as_deref(),
        args.no_push,
    ) {
        Ok(Some(e)) => Target::Remote(e),
        Ok(None) => Target::InPlace(verify_environment()?),
        Err(msg) => {
            eprintln!("{}", style(format!("Error: {}", msg)).red().bold());
            return Err(());
        }
    };

    let label = match &target {
        Target::InPlace(root) => root.display().to_string(),
        Target::Remote(endpoints) => endpoints.source.clone(),
    };
    let repo_name = repo_label(&label);
    debug!(run = ?target, repo = %repo_name, "resolved target");

    let email = get_email(args.email.as_deref(), &repo_name)?;
    let default_old_name = git::config_get("user.name").unwrap_or_default();

    let config = MigrationConfig {
        old_names: args.old_names.clone(),
        new_name: args.name.clone(),
        new_email: email,
        interactive: args.interactive,
        signing: policy,
    };
    let validated = match config.validate(Some(&default_old_name), &GpgKeyring) {
        Ok(v) => v,
        Err(e) => {
            fail(&e);
            return Err(());
        }
    };

    let destination = match &target {
        Target::Remote(endpoints) => endpoints.destination.as_deref(),
        Target::InPlace(_) => None,
    };
    print_plan(&validated, &label, destination);

    if !args.yes {
        let mut confirm_prompter = prompt::DialoguerConfirmPrompter;
        match prompt::confirm_start(&mut confirm_prompter) {
            Ok(true) => {}
            Ok(false) => {
                println!(
                    "{}",
                    style("Canceled by user. No changes made.").yellow().bold()
                );
                return Ok(0);
            }
            Err(e) => {
                eprintln!("{}", style(format!("Prompt error: {}", e)).red().bold());
                return Err(());
            }
        }
    }

    let mut terminal = prompt::TerminalDecisionPrompter::new();
    let prompter: Option<&mut dyn DecisionPrompter> = if validated.interactive() {
        Some(&mut terminal)
    } else {
        None
    };

    let (summary, push): (MigrationSummary, Option<PushReport>) = match &target {
        Target::InPlace(root) => match run_in_place(root, &validated, prompter) {
            Ok(s) => (s, None),
            Err(e) => {
                fail(&e);
                return Err(());
            }
        },
        Target::Remote(endpoints) => {
            let mut orchestrator = Orchestrator::new(&validated);
            if let Some(dir) = &args.workspace {
                orchestrator = orchestrator.with_workspace(dir);
            }
            match orchestrator.run(endpoints, prompter) {
                Ok(report) => {
                    if let Some(path) = &report.kept_clone {
                        println!(
                            "{}",
                            style(format!("Working clone kept at {}", path.display())).cyan()
                        );
                    }
                    (report.summary, Some(report.push))
                }
                Err(e) => {
                    fail(&e);
                    return Err(());
                }
            }
        }
    };

    print_summary(&summary, push.as_ref());
    Ok(0)
}
