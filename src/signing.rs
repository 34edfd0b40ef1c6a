//! Commit signature handling.
//!
//! Signing runs as its own rewrite pass after identities are rewritten, since
//! a signature has to cover the final commit payload.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use git2::Oid;
use tracing::{debug, warn};

use crate::commit::{CommitRecord, CommitSignature};
use crate::error::{RewriteError, SigningError};
use crate::rewrite::CommitTransform;

/// What happens to commit signatures during a migration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SigningPolicy {
    /// Copy signatures unchanged. Any rewritten commit's signature no longer
    /// verifies.
    #[default]
    Keep,
    /// Drop every signature.
    Strip,
    /// Re-sign every commit with a key from the local GPG keyring.
    Gpg { key_id: String },
    /// Re-sign every commit with an SSH private key.
    Ssh { key_path: PathBuf },
}

impl SigningPolicy {
    /// External program this policy needs on `PATH`, if any.
    pub fn required_tool(&self) -> Option<&'static str> {
        match self {
            SigningPolicy::Keep | SigningPolicy::Strip => None,
            SigningPolicy::Gpg { .. } => Some(GPG_PROGRAM),
            SigningPolicy::Ssh { .. } => Some(SSH_KEYGEN_PROGRAM),
        }
    }
}

impl fmt::Display for SigningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningPolicy::Keep => write!(f, "keep existing signatures"),
            SigningPolicy::Strip => write!(f, "strip signatures"),
            SigningPolicy::Gpg { key_id } => write!(f, "sign with GPG key {key_id}"),
            SigningPolicy::Ssh { key_path } => {
                write!(f, "sign with SSH key {}", key_path.display())
            }
        }
    }
}

const GPG_PROGRAM: &str = "gpg";
const SSH_KEYGEN_PROGRAM: &str = "ssh-keygen";

/// Produces an armored signature over a commit payload.
pub trait Signer {
    fn sign(&self, payload: &[u8]) -> Result<String, SigningError>;

    /// Short label used in logs and the summary.
    fn method(&self) -> &'static str;
}

/// Answers whether a secret key is available for signing.
pub trait KeyringProbe {
    fn has_secret_key(&self, key_id: &str) -> Result<bool, SigningError>;
}

/// Queries the local GPG secret keyring.
pub struct GpgKeyring;

impl KeyringProbe for GpgKeyring {
    fn has_secret_key(&self, key_id: &str) -> Result<bool, SigningError> {
        let status = Command::new(GPG_PROGRAM)
            .arg("--batch")
            .arg("--list-secret-keys")
            .arg(key_id)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SigningError::Spawn {
                program: GPG_PROGRAM.to_string(),
                detail: e.to_string(),
            })?;
        Ok(status.success())
    }
}

/// Signs with `gpg --detach-sign --armor --local-user <key>`.
pub struct GpgSigner {
    key_id: String,
}

impl GpgSigner {
    pub fn new(key_id: impl Into<String>) -> Self {
        GpgSigner {
            key_id: key_id.into(),
        }
    }
}

impl Signer for GpgSigner {
    fn sign(&self, payload: &[u8]) -> Result<String, SigningError> {
        let mut cmd = Command::new(GPG_PROGRAM);
        cmd.arg("--batch")
            .arg("--status-fd=2")
            .arg("-bsau")
            .arg(&self.key_id);
        run_with_stdin(cmd, GPG_PROGRAM, payload)
    }

    fn method(&self) -> &'static str {
        "gpg"
    }
}

/// Signs with `ssh-keygen -Y sign -n git -f <key>`, the way git does for
/// `gpg.format=ssh`.
pub struct SshSigner {
    key_path: PathBuf,
}

impl SshSigner {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        SshSigner {
            key_path: key_path.into(),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl Signer for SshSigner {
    fn sign(&self, payload: &[u8]) -> Result<String, SigningError> {
        let mut buffer = tempfile::NamedTempFile::new()?;
        buffer.write_all(payload)?;
        buffer.flush()?;

        let out = Command::new(SSH_KEYGEN_PROGRAM)
            .arg("-Y")
            .arg("sign")
            .arg("-n")
            .arg("git")
            .arg("-f")
            .arg(&self.key_path)
            .arg(buffer.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| SigningError::Spawn {
                program: SSH_KEYGEN_PROGRAM.to_string(),
                detail: e.to_string(),
            })?;
        if !out.status.success() {
            return Err(SigningError::Failed {
                program: SSH_KEYGEN_PROGRAM.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        let mut sig_path = buffer.path().as_os_str().to_owned();
        sig_path.push(".sig");
        take_signature_file(Path::new(&sig_path))
    }

    fn method(&self) -> &'static str {
        "ssh"
    }
}

/// Reads the `.sig` file `ssh-keygen` wrote next to the payload and removes
/// it, whether or not the read succeeded.
fn take_signature_file(path: &Path) -> Result<String, SigningError> {
    let read = std::fs::read_to_string(path);
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove signature file");
        }
    }
    normalize_signature(&read?)
}

fn run_with_stdin(mut cmd: Command, program: &str, payload: &[u8]) -> Result<String, SigningError> {
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| SigningError::Spawn {
        program: program.to_string(),
        detail: e.to_string(),
    })?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(payload)?;
    }
    let out = child.wait_with_output()?;
    if !out.status.success() {
        return Err(SigningError::Failed {
            program: program.to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    normalize_signature(&String::from_utf8_lossy(&out.stdout))
}

fn normalize_signature(raw: &str) -> Result<String, SigningError> {
    let trimmed = raw.trim_end_matches(['\n', '\r']);
    if trimmed.trim().is_empty() {
        return Err(SigningError::Empty);
    }
    Ok(trimmed.to_string())
}

/// The signature pass to run, built from a validated [`SigningPolicy`].
pub enum SignatureStage {
    Keep,
    Strip,
    Sign(Box<dyn Signer>),
}

impl SignatureStage {
    /// Builds the stage with the real external signers.
    pub fn from_policy(policy: &SigningPolicy) -> Self {
        match policy {
            SigningPolicy::Keep => SignatureStage::Keep,
            SigningPolicy::Strip => SignatureStage::Strip,
            SigningPolicy::Gpg { key_id } => SignatureStage::Sign(Box::new(GpgSigner::new(key_id.clone()))),
            SigningPolicy::Ssh { key_path } => SignatureStage::Sign(Box::new(SshSigner::new(key_path.clone()))),
        }
    }
}

impl fmt::Debug for SignatureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureStage::Keep => write!(f, "Keep"),
            SignatureStage::Strip => write!(f, "Strip"),
            SignatureStage::Sign(signer) => write!(f, "Sign({})", signer.method()),
        }
    }
}

/// What the signature pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningOutcome {
    /// Signatures were copied; `invalidated` of them sit on commits whose
    /// content changed.
    Kept { invalidated: usize },
    Stripped { removed: usize },
    Signed { method: &'static str, signed: usize },
}

impl fmt::Display for SigningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningOutcome::Kept { invalidated: 0 } => write!(f, "signatures kept"),
            SigningOutcome::Kept { invalidated } => {
                write!(f, "signatures kept ({invalidated} no longer valid)")
            }
            SigningOutcome::Stripped { removed } => write!(f, "{removed} signatures stripped"),
            SigningOutcome::Signed { method, signed } => {
                write!(f, "{signed} commits signed ({method})")
            }
        }
    }
}

/// Strips or regenerates the signature of every commit it sees.
pub struct SignatureTransform<'a> {
    signer: Option<&'a dyn Signer>,
    count: usize,
}

impl<'a> SignatureTransform<'a> {
    pub fn strip() -> Self {
        SignatureTransform {
            signer: None,
            count: 0,
        }
    }

    pub fn sign(signer: &'a dyn Signer) -> Self {
        SignatureTransform {
            signer: Some(signer),
            count: 0,
        }
    }

    pub fn outcome(&self) -> SigningOutcome {
        match self.signer {
            None => SigningOutcome::Stripped {
                removed: self.count,
            },
            Some(signer) => SigningOutcome::Signed {
                method: signer.method(),
                signed: self.count,
            },
        }
    }
}

impl CommitTransform for SignatureTransform<'_> {
    fn transform(&mut self, original: Oid, commit: &mut CommitRecord) -> Result<(), RewriteError> {
        match self.signer {
            None => {
                if !std::mem::take(&mut commit.signatures).is_empty() {
                    self.count += 1;
                }
            }
            Some(signer) => {
                commit.signatures.clear();
                let value = signer.sign(&commit.signing_payload())?;
                commit.signatures.push(CommitSignature {
                    header: "gpgsig".to_string(),
                    value: value.into(),
                });
                self.count += 1;
                debug!(commit = %original, "signed");
            }
        }
        Ok(())
    }
}

/// Counts signatures carried over onto commits that were rewritten.
pub(crate) fn invalidated_signatures<'c>(rewritten: impl Iterator<Item = &'c CommitRecord>) -> usize {
    let count = rewritten.filter(|c| c.is_signed()).count();
    if count > 0 {
        warn!(
            count,
            "kept signatures no longer match their rewritten commits"
        );
    }
    count
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rewrite::tests::Fixture;
    use crate::rewrite::{History, rewrite_history};
    use crate::store::ObjectStore;
    use bstr::ByteSlice;
    use std::cell::RefCell;

    /// Signs by echoing a digest-like marker of the payload length.
    pub(crate) struct StubSigner {
        pub payloads: RefCell<Vec<Vec<u8>>>,
    }

    impl StubSigner {
        pub(crate) fn new() -> Self {
            StubSigner {
                payloads: RefCell::new(Vec::new()),
            }
        }
    }

    impl Signer for StubSigner {
        fn sign(&self, payload: &[u8]) -> Result<String, SigningError> {
            self.payloads.borrow_mut().push(payload.to_vec());
            Ok(format!(
                "-----BEGIN SSH SIGNATURE-----\nstub-{}\n-----END SSH SIGNATURE-----",
                payload.len()
            ))
        }

        fn method(&self) -> &'static str {
            "stub"
        }
    }

    struct FailingSigner;

    impl Signer for FailingSigner {
        fn sign(&self, _payload: &[u8]) -> Result<String, SigningError> {
            Err(SigningError::Failed {
                program: "stub".into(),
                stderr: "no key".into(),
            })
        }

        fn method(&self) -> &'static str {
            "failing"
        }
    }

    fn signed_chain(count: usize) -> (Fixture, History) {
        let mut fx = Fixture::new();
        let mut parents = Vec::new();
        for i in 0..count {
            let id = fx.commit_as("Alice", "Alice", &parents, &format!("c{i}"), true);
            parents = vec![id];
        }
        fx.store.set_ref("refs/heads/main", parents[0]);
        let history = History::load(&fx.store, fx.store.list_refs().expect("refs")).expect("load");
        (fx, history)
    }

    #[test]
    fn strip_removes_every_signature() {
        let (mut fx, history) = signed_chain(5);
        let mut transform = SignatureTransform::strip();
        let generation = rewrite_history(&mut fx.store, &history, &mut transform).expect("rewrite");

        assert_eq!(transform.outcome(), SigningOutcome::Stripped { removed: 5 });
        for (old, _) in history.iter() {
            let new = fx.store.read_commit(generation.new_id(old).expect("mapped")).expect("read");
            assert!(!new.is_signed());
        }
        assert_eq!(generation.changed, 5);
    }

    #[test]
    fn signer_sees_final_payload_without_signature() {
        let (mut fx, history) = signed_chain(2);
        let signer = StubSigner::new();
        let mut transform = SignatureTransform::sign(&signer);
        let generation = rewrite_history(&mut fx.store, &history, &mut transform).expect("rewrite");

        let payloads = signer.payloads.borrow();
        assert_eq!(payloads.len(), 2);
        for payload in payloads.iter() {
            assert!(!String::from_utf8_lossy(payload).contains("gpgsig"));
        }

        let tip = generation.tips[0].commit;
        let record = fx.store.read_commit(tip).expect("read");
        assert_eq!(record.signatures.len(), 1);
        assert_eq!(record.signatures[0].header, "gpgsig");
        assert!(record.signatures[0].value.contains_str("stub-"));
        // The tip's payload names the re-signed parent, not the original.
        let parent = fx.store.read_commit(record.parents[0]).expect("parent");
        assert!(parent.signatures[0].value.contains_str("stub-"));
        assert_eq!(payloads[1], record.signing_payload());
    }

    fn dual_signed_root() -> (Fixture, History) {
        let mut fx = Fixture::new();
        let single = fx.commit_as("Alice", "Alice", &[], "dual", true);
        let mut record = fx.store.read_commit(single).expect("read");
        record.signatures.push(CommitSignature {
            header: "gpgsig-sha256".into(),
            value: "-----BEGIN PGP SIGNATURE-----\n\nsha256\n-----END PGP SIGNATURE-----".into(),
        });
        let dual = fx.store.write_commit(&record).expect("write");
        fx.store.set_ref("refs/heads/main", dual);
        let history = History::load(&fx.store, fx.store.list_refs().expect("refs")).expect("load");
        (fx, history)
    }

    #[test]
    fn strip_clears_both_signature_headers() {
        let (mut fx, history) = dual_signed_root();
        let mut transform = SignatureTransform::strip();
        let generation = rewrite_history(&mut fx.store, &history, &mut transform).expect("rewrite");

        let record = fx.store.read_commit(generation.tips[0].commit).expect("read");
        assert!(record.signatures.is_empty());
        assert!(!record.to_bytes().contains_str("gpgsig"));
        assert_eq!(transform.outcome(), SigningOutcome::Stripped { removed: 1 });
    }

    #[test]
    fn resigning_replaces_both_signature_headers() {
        let (mut fx, history) = dual_signed_root();
        let signer = StubSigner::new();
        let mut transform = SignatureTransform::sign(&signer);
        let generation = rewrite_history(&mut fx.store, &history, &mut transform).expect("rewrite");

        let record = fx.store.read_commit(generation.tips[0].commit).expect("read");
        let headers: Vec<&str> = record.signatures.iter().map(|s| s.header.as_str()).collect();
        assert_eq!(headers, ["gpgsig"]);
        assert!(!record.to_bytes().contains_str("gpgsig-sha256"));
        assert_eq!(signer.payloads.borrow()[0], record.signing_payload());
    }

    #[test]
    fn signature_file_is_removed_after_reading() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("payload.sig");
        std::fs::write(&path, "-----BEGIN SSH SIGNATURE-----\nabc\n-----END SSH SIGNATURE-----\n").expect("write");

        let sig = take_signature_file(&path).expect("read");
        assert!(sig.ends_with("-----END SSH SIGNATURE-----"));
        assert!(!path.exists());
    }

    #[test]
    fn unreadable_signature_file_is_still_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("payload.sig");
        std::fs::write(&path, b"\xff\xfe not utf-8").expect("write");

        let err = take_signature_file(&path).unwrap_err();
        assert!(matches!(err, SigningError::Io(_)));
        assert!(!path.exists());
    }

    #[test]
    fn signer_failure_aborts_the_pass() {
        let (mut fx, history) = signed_chain(2);
        let signer = FailingSigner;
        let mut transform = SignatureTransform::sign(&signer);
        let err = rewrite_history(&mut fx.store, &history, &mut transform).unwrap_err();
        assert!(matches!(err, RewriteError::Signing(_)));
    }

    #[test]
    fn normalize_trims_trailing_newlines_only() {
        assert_eq!(
            normalize_signature("-----BEGIN-----\nabc\n-----END-----\n\n").expect("sig"),
            "-----BEGIN-----\nabc\n-----END-----"
        );
        assert!(matches!(normalize_signature("\n"), Err(SigningError::Empty)));
    }

    #[test]
    fn required_tools() {
        assert_eq!(SigningPolicy::Keep.required_tool(), None);
        assert_eq!(SigningPolicy::Strip.required_tool(), None);
        assert_eq!(
            SigningPolicy::Gpg { key_id: "X".into() }.required_tool(),
            Some("gpg")
        );
        assert_eq!(
            SigningPolicy::Ssh { key_path: "/k".into() }.required_tool(),
            Some("ssh-keygen")
        );
    }
}
