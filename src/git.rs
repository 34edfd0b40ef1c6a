use std::path::Path;
use std::process::{Command, Stdio};

/// Runs `cmd` for its exit status only; stdout is discarded.
///
/// A non-zero exit yields the trimmed stderr (or `"non-zero exit"` when the
/// command printed nothing); a spawn failure yields the I/O error text.
fn run_status(mut cmd: Command) -> Result<(), String> {
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    match cmd.output() {
        Ok(out) => {
            if out.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                if stderr.is_empty() {
                    Err(String::from("non-zero exit"))
                } else {
                    Err(stderr)
                }
            }
        }
        Err(e) => Err(format!("{}", e)),
    }
}

/// Runs `cmd` and returns its trimmed stdout, or its trimmed stderr as the
/// error when it exits non-zero.
fn run_output(mut cmd: Command) -> Result<String, String> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    match cmd.output() {
        Ok(out) => {
            if out.status.success() {
                Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
            } else {
                Err(String::from_utf8_lossy(&out.stderr).trim().to_string())
            }
        }
        Err(e) => Err(format!("{}", e)),
    }
}

/// Runs `git rev-parse <flag>` in the current directory.
///
/// Typically used to locate the repository root (`--show-toplevel`) or the
/// `.git` directory (`--git-dir`) when migrating in place.
///
/// # Examples
///
/// ```ignore
/// // Ignored because it depends on being inside a Git repository.
/// match rev_parse("--show-toplevel") {
///     Ok(path) => println!("Repository root: {}", path),
///     Err(err) => eprintln!("Git error: {}", err),
/// }
/// ```
pub fn rev_parse(flag: &str) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("rev-parse").arg(flag);
    run_output(cmd)
}

/// Runs `git config --get <key>` and returns the trimmed value.
///
/// Missing keys and failures are reported as an empty string; this is used
/// only for defaults (`user.name`, `user.email`).
pub fn config_get(key: &str) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("config").arg("--get").arg(key);
    match run_output(cmd) {
        Ok(s) => Ok(s),
        Err(_) => Ok(String::new()),
    }
}

/// Clones every ref of `url` into a bare mirror at `dest`.
///
/// Runs:
///
/// ```text
/// git clone --mirror <url> <dest>
/// ```
///
/// A mirror carries all branches and tags, which is what the rewrite walks.
/// The error is git's stderr alone; callers name the command.
pub fn clone_mirror(url: &str, dest: &Path) -> Result<(), String> {
    let mut cmd = Command::new("git");
    cmd.arg("clone").arg("--mirror").arg(url).arg(dest);
    cmd.stdin(Stdio::null());
    run_status(cmd)
}

/// Force-pushes every branch of the repository at `repo` to `url`.
///
/// ```text
/// git -C <repo> push --force --all <url>
/// ```
pub fn push_branches(repo: &Path, url: &str) -> Result<(), String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(repo)
        .arg("push")
        .arg("--force")
        .arg("--all")
        .arg(url);
    cmd.stdin(Stdio::null());
    run_status(cmd)
}

/// Force-pushes every tag of the repository at `repo` to `url`.
///
/// ```text
/// git -C <repo> push --force --tags <url>
/// ```
pub fn push_tags(repo: &Path, url: &str) -> Result<(), String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(repo)
        .arg("push")
        .arg("--force")
        .arg("--tags")
        .arg(url);
    cmd.stdin(Stdio::null());
    run_status(cmd)
}

#[cfg(test)]
mod tests {
    use super::{clone_mirror, push_branches, run_output, run_status};
    use std::process::Command;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    #[test]
    fn run_output_reports_stderr_on_failure() {
        if !git_available() {
            return;
        }
        let mut cmd = Command::new("git");
        cmd.arg("definitely-not-a-subcommand");
        let res = run_output(cmd);
        assert!(res.is_err());
    }

    #[test]
    fn run_status_reports_spawn_errors() {
        let cmd = Command::new("/nonexistent/binary/for/test");
        assert!(run_status(cmd).is_err());
    }

    #[test]
    fn clone_failure_is_git_stderr_only() {
        if !git_available() {
            return;
        }
        let work = tempfile::tempdir().expect("work");
        let err = clone_mirror("/nonexistent/source/repository", &work.path().join("m.git"))
            .unwrap_err();
        assert!(!err.contains("failed:"), "unexpected prefix in {err:?}");
    }

    #[test]
    fn clone_and_push_round_trip() {
        if !git_available() {
            return;
        }
        let src = tempfile::tempdir().expect("src");
        let repo = git2::Repository::init(src.path()).expect("init");
        let sig = git2::Signature::new("A", "a@x", &git2::Time::new(1, 0)).expect("sig");
        let tree_id = repo.treebuilder(None).expect("tb").write().expect("tree");
        let tree = repo.find_tree(tree_id).expect("tree");
        let head = repo
            .commit(Some("refs/heads/main"), &sig, &sig, "init\n", &tree, &[])
            .expect("commit");

        let work = tempfile::tempdir().expect("work");
        let mirror = work.path().join("mirror.git");
        clone_mirror(src.path().to_str().expect("utf8 path"), &mirror).expect("clone");

        let dest = tempfile::tempdir().expect("dest");
        git2::Repository::init_bare(dest.path()).expect("bare");
        push_branches(&mirror, dest.path().to_str().expect("utf8 path")).expect("push");

        let pushed = git2::Repository::open(dest.path()).expect("open");
        let main = pushed.find_reference("refs/heads/main").expect("main");
        assert_eq!(main.target(), Some(head));
    }
}
