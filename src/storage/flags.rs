//! Flag tokens encoded in processed filenames.
//!
//! The vocabulary is open: any token that can be written into a filename is
//! accepted. Only `S` (Seen) carries meaning to the storage engine.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::StorageError;

/// Longest accepted flag token, in bytes.
pub const MAX_FLAG_LEN: usize = 64;

/// Tokens must survive the `:2,a,b,c` suffix encoding and stay a single path
/// component.
static FLAG_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^,:/\\\s\x00]+$").unwrap());

/// A single validated flag token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Flag(String);

impl Flag {
    /// The mandatory "Seen" flag carried by every processed record.
    pub const SEEN: &'static str = "S";

    /// Validate a token.
    pub fn new(token: impl Into<String>) -> Result<Self, StorageError> {
        let token = token.into();
        if token.is_empty() {
            return Err(StorageError::decode(token, "empty flag"));
        }
        if token.len() > MAX_FLAG_LEN {
            return Err(StorageError::decode(
                token,
                format!("flag longer than {MAX_FLAG_LEN} bytes"),
            ));
        }
        if !FLAG_TOKEN.is_match(&token) {
            return Err(StorageError::decode(
                token,
                "flag contains a separator, path character or whitespace",
            ));
        }
        Ok(Self(token))
    }

    /// The "Seen" flag.
    pub fn seen() -> Self {
        Self(Self::SEEN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_seen(&self) -> bool {
        self.0 == Self::SEEN
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Flag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unordered set of flags. Iteration and encoding are in sorted order so the
/// same set always produces the same filename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet(BTreeSet<Flag>);

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only the mandatory "Seen" flag.
    pub fn seen() -> Self {
        let mut set = Self::new();
        set.insert(Flag::seen());
        set
    }

    /// Returns `true` if the flag was not already present.
    pub fn insert(&mut self, flag: Flag) -> bool {
        self.0.insert(flag)
    }

    /// Validate and insert a raw token.
    pub fn insert_token(&mut self, token: &str) -> Result<bool, StorageError> {
        Ok(self.insert(Flag::new(token)?))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|f| f.as_str() == token)
    }

    pub fn is_seen(&self) -> bool {
        self.contains(Flag::SEEN)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }

    /// Encode as the comma-joined list used after `:2,`.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(Flag::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Decode a comma-joined list. An empty string is the empty set.
    pub fn decode(raw: &str) -> Result<Self, StorageError> {
        let mut set = Self::new();
        if raw.is_empty() {
            return Ok(set);
        }
        for token in raw.split(',') {
            set.insert(Flag::new(token).map_err(|_| {
                StorageError::decode(raw, format!("invalid flag token {token:?}"))
            })?);
        }
        Ok(set)
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Flag> for FlagSet {
    fn extend<I: IntoIterator<Item = Flag>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}
