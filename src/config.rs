//! Migration configuration and its validation.
//!
//! Everything that can be checked without touching history is checked in
//! [`MigrationConfig::validate`], so a bad key or a missing email aborts the
//! run before any commit is rewritten.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{ConfigError, MigrateError};
use crate::identity::{Identity, IdentityMatcher};
use crate::signing::{KeyringProbe, SigningPolicy};

/// Settings supplied by the caller, before defaults and checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Author names to migrate. Empty means "use the caller's default".
    pub old_names: Vec<String>,
    /// New author name. Falls back to the first old name.
    pub new_name: Option<String>,
    pub new_email: String,
    pub interactive: bool,
    pub signing: SigningPolicy,
}

/// A configuration that passed [`MigrationConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    matcher: IdentityMatcher,
    new_identity: Identity,
    interactive: bool,
    signing: SigningPolicy,
}

impl ValidatedConfig {
    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    pub fn new_identity(&self) -> &Identity {
        &self.new_identity
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn signing(&self) -> &SigningPolicy {
        &self.signing
    }
}

impl MigrationConfig {
    /// Applies defaults and checks key material.
    ///
    /// `default_old_name` is used when no old names were given. The GPG
    /// keyring is consulted through `keyring` so the check happens here and
    /// not halfway through signing.
    pub fn validate(
        &self,
        default_old_name: Option<&str>,
        keyring: &dyn KeyringProbe,
    ) -> Result<ValidatedConfig, MigrateError> {
        let email = self.new_email.trim();
        if email.is_empty() {
            return Err(ConfigError::MissingEmail.into());
        }

        let mut ordered: Vec<String> = self
            .old_names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if ordered.is_empty() {
            match default_old_name.map(str::trim).filter(|n| !n.is_empty()) {
                Some(name) => ordered.push(name.to_string()),
                None => return Err(ConfigError::MissingOldNames.into()),
            }
        }

        let name = match self.new_name.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => ordered[0].clone(),
        };

        let signing = validate_signing(&self.signing, keyring)?;

        let old_names: BTreeSet<String> = ordered.into_iter().collect();
        debug!(old_names = ?old_names, new = %name, "configuration validated");
        Ok(ValidatedConfig {
            matcher: IdentityMatcher::new(old_names),
            new_identity: Identity::new(name, email),
            interactive: self.interactive,
            signing,
        })
    }
}

fn validate_signing(policy: &SigningPolicy, keyring: &dyn KeyringProbe) -> Result<SigningPolicy, MigrateError> {
    match policy {
        SigningPolicy::Keep | SigningPolicy::Strip => Ok(policy.clone()),
        SigningPolicy::Gpg { key_id } => {
            let key_id = key_id.trim();
            if key_id.is_empty() {
                return Err(ConfigError::MissingKeyMaterial {
                    policy: "gpg".into(),
                    what: "a key id".into(),
                }
                .into());
            }
            if !keyring.has_secret_key(key_id)? {
                return Err(MigrateError::KeyNotFound(key_id.to_string()));
            }
            Ok(SigningPolicy::Gpg {
                key_id: key_id.to_string(),
            })
        }
        SigningPolicy::Ssh { key_path } => {
            if key_path.as_os_str().is_empty() {
                return Err(ConfigError::MissingKeyMaterial {
                    policy: "ssh".into(),
                    what: "a private key path".into(),
                }
                .into());
            }
            if !key_path.is_file() {
                return Err(ConfigError::SigningKeyMissing(key_path.clone()).into());
            }
            Ok(policy.clone())
        }
    }
}
