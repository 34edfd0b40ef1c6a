//! Typed commit records and the canonical commit object encoding.
//!
//! A [`CommitRecord`] holds every field that contributes to a commit's hash.
//! [`CommitRecord::parse`] and [`CommitRecord::to_bytes`] convert between the
//! record and the raw object body, so the same encoding is used when reading
//! the source history, when hashing in memory and when writing new objects.
//!
//! Header values and the message are kept as raw bytes. A commit may declare
//! any `encoding`, and names or messages in that encoding must be written
//! back exactly as they were read.

use std::borrow::Cow;
use std::fmt;

use bstr::{BString, ByteSlice};
use git2::Oid;

use crate::error::StoreError;
use crate::identity::Identity;

/// Header names that carry a commit signature.
pub const SIGNATURE_HEADERS: [&str; 2] = ["gpgsig", "gpgsig-sha256"];

/// Seconds since the epoch plus the recorded timezone offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    /// Signed offset from UTC in minutes.
    pub offset_minutes: i32,
    /// `'+'` or `'-'`; kept separately so `-0000` survives a round trip.
    pub sign: char,
}

impl Timestamp {
    pub fn new(seconds: i64, offset_minutes: i32) -> Self {
        let sign = if offset_minutes < 0 { '-' } else { '+' };
        Timestamp {
            seconds,
            offset_minutes,
            sign,
        }
    }

    fn parse(raw: &[u8]) -> Option<Self> {
        let raw = std::str::from_utf8(raw).ok()?;
        let mut parts = raw.split_whitespace();
        let seconds = parts.next()?.parse::<i64>().ok()?;
        let tz = parts.next()?;
        if tz.len() != 5 || !tz.is_ascii() {
            return None;
        }
        let sign = tz.chars().next()?;
        if sign != '+' && sign != '-' {
            return None;
        }
        let hours = tz[1..3].parse::<i32>().ok()?;
        let minutes = tz[3..5].parse::<i32>().ok()?;
        let magnitude = hours * 60 + minutes;
        let offset_minutes = if sign == '-' { -magnitude } else { magnitude };
        Some(Timestamp {
            seconds,
            offset_minutes,
            sign,
        })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.offset_minutes.unsigned_abs();
        write!(
            f,
            "{} {}{:02}{:02}",
            self.seconds,
            self.sign,
            magnitude / 60,
            magnitude % 60
        )
    }
}

/// An author or committer line: identity plus timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub identity: Identity,
    pub when: Timestamp,
}

impl Actor {
    pub fn new(identity: Identity, when: Timestamp) -> Self {
        Actor { identity, when }
    }

    fn parse(raw: &[u8]) -> Option<Self> {
        let open = raw.find_byte(b'<')?;
        let close = open + raw[open..].find_byte(b'>')?;
        let name = raw[..open].trim_ascii_end();
        let email = &raw[open + 1..close];
        let when = Timestamp::parse(&raw[close + 1..])?;
        Some(Actor {
            identity: Identity::new(name, email),
            when,
        })
    }

    /// The header value exactly as it is hashed.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.identity.name.len() + self.identity.email.len() + 24);
        out.extend_from_slice(&self.identity.name);
        out.extend_from_slice(b" <");
        out.extend_from_slice(&self.identity.email);
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.when.to_string().as_bytes());
        out
    }
}

/// A signature header and its (possibly multi-line) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSignature {
    pub header: String,
    pub value: BString,
}

/// Every hashed field of a commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Actor,
    pub committer: Actor,
    /// Headers other than tree/parent/author/committer/signature, in order.
    pub extra_headers: Vec<(BString, BString)>,
    /// Every signature header, in order. A commit signed with both hash
    /// algorithms carries `gpgsig` and `gpgsig-sha256`.
    pub signatures: Vec<CommitSignature>,
    pub message: BString,
}

impl CommitRecord {
    /// Parses a raw commit object body. `id` is only used in error messages.
    pub fn parse(id: Oid, data: &[u8]) -> Result<Self, StoreError> {
        let malformed = |detail: &str| StoreError::Malformed {
            id: id.to_string(),
            detail: detail.to_string(),
        };

        let (head, message) = match data.find("\n\n") {
            Some(pos) => (&data[..pos], &data[pos + 2..]),
            None => (data, &[][..]),
        };

        let mut headers: Vec<(&[u8], Vec<u8>)> = Vec::new();
        for line in head.split_str("\n") {
            if let Some(cont) = line.strip_prefix(b" ") {
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push(b'\n');
                        value.extend_from_slice(cont);
                    }
                    None => return Err(malformed("continuation line before any header")),
                }
                continue;
            }
            match line.split_once_str(" ") {
                Some((key, value)) => headers.push((key, value.to_vec())),
                None if line.is_empty() => {}
                None => return Err(malformed("header line without a value")),
            }
        }

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut extra_headers = Vec::new();
        let mut signatures = Vec::new();

        for (key, value) in headers {
            match key {
                b"tree" => tree = Some(parse_oid(&value).ok_or_else(|| malformed("bad tree id"))?),
                b"parent" => {
                    parents.push(parse_oid(&value).ok_or_else(|| malformed("bad parent id"))?)
                }
                b"author" => {
                    author = Some(Actor::parse(&value).ok_or_else(|| malformed("bad author line"))?)
                }
                b"committer" => {
                    committer =
                        Some(Actor::parse(&value).ok_or_else(|| malformed("bad committer line"))?)
                }
                _ => match SIGNATURE_HEADERS.iter().find(|h| h.as_bytes() == key) {
                    Some(header) => signatures.push(CommitSignature {
                        header: header.to_string(),
                        value: value.into(),
                    }),
                    None => extra_headers.push((BString::from(key), BString::from(value))),
                },
            }
        }

        Ok(CommitRecord {
            tree: tree.ok_or_else(|| malformed("missing tree"))?,
            parents,
            author: author.ok_or_else(|| malformed("missing author"))?,
            committer: committer.ok_or_else(|| malformed("missing committer"))?,
            extra_headers,
            signatures,
            message: BString::from(message),
        })
    }

    /// Encodes the full object body, signatures included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header_lines();
        for sig in &self.signatures {
            push_header(&mut out, sig.header.as_bytes(), &sig.value);
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    /// The bytes a signature is computed over: the object without any
    /// signature header.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut out = self.header_lines();
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// First line of the message, decoded lossily for display.
    pub fn subject(&self) -> Cow<'_, str> {
        self.message
            .lines()
            .next()
            .map(|line| line.to_str_lossy())
            .unwrap_or(Cow::Borrowed(""))
    }

    fn header_lines(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_header(&mut out, b"tree", self.tree.to_string().as_bytes());
        for parent in &self.parents {
            push_header(&mut out, b"parent", parent.to_string().as_bytes());
        }
        push_header(&mut out, b"author", &self.author.to_bytes());
        push_header(&mut out, b"committer", &self.committer.to_bytes());
        for (key, value) in &self.extra_headers {
            push_header(&mut out, key, value);
        }
        out
    }
}

fn parse_oid(raw: &[u8]) -> Option<Oid> {
    Oid::from_str(raw.to_str().ok()?).ok()
}

fn push_header(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.extend_from_slice(key);
    out.push(b' ');
    for &byte in value {
        out.push(byte);
        if byte == b'\n' {
            out.push(b' ');
        }
    }
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
    const PARENT: &str = "1111111111111111111111111111111111111111";

    fn raw_signed() -> String {
        format!(
            "tree {TREE}\n\
             parent {PARENT}\n\
             author Alice <alice@old.example> 1700000000 +0130\n\
             committer Carol <carol@example.com> 1700000100 -0500\n\
             encoding ISO-8859-1\n\
             gpgsig -----BEGIN PGP SIGNATURE-----\n \n iQEzBAABCAAdFiEE\n -----END PGP SIGNATURE-----\n\
             \n\
             Fix the thing\n\nLonger body.\n"
        )
    }

    #[test]
    fn parses_all_fields() {
        let raw = raw_signed();
        let c = CommitRecord::parse(Oid::zero(), raw.as_bytes()).expect("parse failed");

        assert_eq!(c.tree.to_string(), TREE);
        assert_eq!(c.parents.len(), 1);
        assert_eq!(c.author.identity, Identity::new("Alice", "alice@old.example"));
        assert_eq!(c.author.when.seconds, 1_700_000_000);
        assert_eq!(c.author.when.offset_minutes, 90);
        assert_eq!(c.committer.when.offset_minutes, -300);
        assert_eq!(
            c.extra_headers,
            vec![(BString::from("encoding"), BString::from("ISO-8859-1"))]
        );
        assert_eq!(c.signatures.len(), 1);
        assert_eq!(c.signatures[0].header, "gpgsig");
        assert!(c.signatures[0].value.starts_with(b"-----BEGIN PGP SIGNATURE-----\n\niQ"));
        assert_eq!(c.subject(), "Fix the thing");
    }

    #[test]
    fn serialization_reproduces_the_raw_object() {
        let raw = raw_signed();
        let c = CommitRecord::parse(Oid::zero(), raw.as_bytes()).expect("parse failed");
        assert_eq!(String::from_utf8(c.to_bytes()).expect("utf8"), raw);
    }

    #[test]
    fn signing_payload_omits_signature() {
        let raw = raw_signed();
        let c = CommitRecord::parse(Oid::zero(), raw.as_bytes()).expect("parse failed");
        let payload = String::from_utf8(c.signing_payload()).expect("utf8");
        assert!(!payload.contains("gpgsig"));
        assert!(payload.contains("encoding ISO-8859-1\n\nFix the thing"));
    }

    #[test]
    fn latin1_name_and_message_round_trip_byte_for_byte() {
        let mut raw = format!("tree {TREE}\nauthor Ren").into_bytes();
        raw.extend_from_slice(b"\xE9 <r@x> 1700000000 +0000\ncommitter Ren\xE9 <r@x> 1700000000 +0000\n");
        raw.extend_from_slice(b"encoding ISO-8859-1\n\ncaf\xE9\n");

        let c = CommitRecord::parse(Oid::zero(), &raw).expect("parse failed");
        assert_eq!(c.author.identity.name.as_slice(), b"Ren\xE9");
        assert_eq!(c.message.as_slice(), b"caf\xE9\n");
        assert_eq!(c.subject(), "caf\u{FFFD}");
        assert_eq!(c.to_bytes(), raw);
    }

    #[test]
    fn every_signature_header_is_collected() {
        let raw = format!(
            "tree {TREE}\n\
             author A <a@x> 0 +0000\n\
             committer A <a@x> 0 +0000\n\
             gpgsig -----BEGIN PGP SIGNATURE-----\n sha1\n -----END PGP SIGNATURE-----\n\
             gpgsig-sha256 -----BEGIN PGP SIGNATURE-----\n sha256\n -----END PGP SIGNATURE-----\n\
             \n\
             dual\n"
        );
        let c = CommitRecord::parse(Oid::zero(), raw.as_bytes()).expect("parse failed");

        let headers: Vec<&str> = c.signatures.iter().map(|s| s.header.as_str()).collect();
        assert_eq!(headers, ["gpgsig", "gpgsig-sha256"]);
        assert!(c.extra_headers.is_empty());
        assert!(!c.signing_payload().contains_str("gpgsig"));
        assert_eq!(String::from_utf8(c.to_bytes()).expect("utf8"), raw);
    }

    #[test]
    fn negative_zero_offset_survives() {
        let raw = format!(
            "tree {TREE}\nauthor A <a@x> 0 -0000\ncommitter A <a@x> 0 -0000\n\nroot\n"
        );
        let c = CommitRecord::parse(Oid::zero(), raw.as_bytes()).expect("parse failed");
        assert!(c.parents.is_empty());
        assert_eq!(c.author.when.sign, '-');
        assert_eq!(String::from_utf8(c.to_bytes()).expect("utf8"), raw);
    }

    #[test]
    fn missing_author_is_malformed() {
        let raw = format!("tree {TREE}\ncommitter A <a@x> 0 +0000\n\nmsg\n");
        let err = CommitRecord::parse(Oid::zero(), raw.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("missing author"));
    }

    #[test]
    fn timestamp_display() {
        assert_eq!(Timestamp::new(42, 330).to_string(), "42 +0530");
        assert_eq!(Timestamp::new(42, -420).to_string(), "42 -0700");
    }
}
