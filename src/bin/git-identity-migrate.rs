/// Entry point for the `git-identity-migrate` binary.
///
/// Delegates to the CLI entry function and exits with its code, or with
/// status 1 when the run failed.
fn main() {
    match git_identity_migrate::cli::entry() {
        Ok(code) => std::process::exit(code),
        Err(_) => std::process::exit(1),
    }
}
