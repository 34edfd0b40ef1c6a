use std::collections::BTreeSet;
use std::fmt;

use bstr::{BStr, BString};

/// A `(name, email)` pair as recorded on a commit's author or committer line.
///
/// Both parts are raw bytes in whatever encoding the commit declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub name: BString,
    pub email: BString,
}

impl Identity {
    pub fn new(name: impl Into<BString>, email: impl Into<BString>) -> Self {
        Identity {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Decides whether an identity belongs to the set of names being migrated.
///
/// Matching is exact and case-sensitive on the *name* only. The email never
/// participates, so a name recorded under several addresses is caught by a
/// single entry, and two people sharing a display name are treated as one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMatcher {
    old_names: BTreeSet<BString>,
}

impl IdentityMatcher {
    pub fn new<I, S>(old_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BString>,
    {
        IdentityMatcher {
            old_names: old_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` when `name` equals one of the configured old names,
    /// compared byte for byte.
    pub fn matches(&self, name: impl AsRef<[u8]>) -> bool {
        self.old_names.contains(BStr::new(name.as_ref()))
    }

    pub fn old_names(&self) -> &BTreeSet<BString> {
        &self.old_names
    }

    pub fn is_empty(&self) -> bool {
        self.old_names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Identity, IdentityMatcher};

    #[test]
    fn exact_name_matches() {
        let m = IdentityMatcher::new(["Alice", "alice-old"]);
        assert!(m.matches("Alice"));
        assert!(m.matches("alice-old"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let m = IdentityMatcher::new(["Alice"]);
        assert!(!m.matches("alice"));
        assert!(!m.matches("ALICE"));
    }

    #[test]
    fn no_partial_or_whitespace_matches() {
        let m = IdentityMatcher::new(["Alice"]);
        assert!(!m.matches("Alice Smith"));
        assert!(!m.matches(" Alice"));
        assert!(!m.matches(""));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let m = IdentityMatcher::default();
        assert!(m.is_empty());
        assert!(!m.matches("Alice"));
    }

    #[test]
    fn non_utf8_names_match_by_bytes() {
        let m = IdentityMatcher::new([&b"Ren\xE9"[..]]);
        assert!(m.matches(b"Ren\xE9"));
        assert!(!m.matches("Ren\u{e9}"));
    }

    #[test]
    fn identity_display_format() {
        let id = Identity::new("Bob", "bob@example.com");
        assert_eq!(id.to_string(), "Bob <bob@example.com>");
    }
}
