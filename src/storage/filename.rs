//! Filename codec.
//!
//! A stored record's name is `<token>` while in `new` and
//! `<token>:2,<flag>,<flag>,...` once in `cur`. The token is
//! `<unix_secs>.<micros>_<seq>_<pid>_<rand>`:
//!
//! - `micros` is zero-padded to six digits,
//! - `seq` is a process-wide counter, strictly increasing within a process,
//! - `rand` is eight lowercase hex digits.
//!
//! Tokens order by `(secs, micros, seq, pid, rand)`, which is arrival order
//! for a single producer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use super::flags::FlagSet;
use crate::error::StorageError;

/// Separator between the token and the info section.
const INFO_SEPARATOR: char = ':';

/// Info-section prefix. Only version 2 (flag list) is understood.
const INFO_PREFIX: &str = "2,";

/// Longest name a single path component may have (`NAME_MAX`).
pub const MAX_FILENAME_LEN: usize = 255;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Uniqueness component of a stored filename.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueToken {
    secs: u64,
    micros: u32,
    seq: u64,
    pid: u32,
    rand: String,
}

impl UniqueToken {
    /// Draw a fresh token from the clock, the process counter and `rand`.
    pub fn generate() -> Self {
        let now = Utc::now();
        Self {
            secs: now.timestamp().max(0) as u64,
            micros: now.timestamp_subsec_micros().min(999_999),
            seq: SEQUENCE.fetch_add(1, Ordering::Relaxed),
            pid: std::process::id(),
            rand: format!("{:08x}", rand::random::<u32>()),
        }
    }

    /// Parse a bare token (no info section).
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let bad = |reason: &str| StorageError::decode(raw, reason);

        let (secs, rest) = raw.split_once('.').ok_or_else(|| bad("missing '.' after seconds"))?;
        let mut parts = rest.split('_');
        let (Some(micros), Some(seq), Some(pid), Some(rand), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(bad("expected <secs>.<micros>_<seq>_<pid>_<rand>"));
        };

        if micros.len() != 6 {
            return Err(bad("microseconds must be six digits"));
        }
        if rand.len() != 8 || !rand.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(bad("random suffix must be eight lowercase hex digits"));
        }

        Ok(Self {
            secs: parse_digits(secs).ok_or_else(|| bad("seconds are not a number"))?,
            micros: parse_digits(micros).ok_or_else(|| bad("microseconds are not a number"))?,
            seq: parse_digits(seq).ok_or_else(|| bad("sequence is not a number"))?,
            pid: parse_digits(pid).ok_or_else(|| bad("pid is not a number"))?,
            rand: rand.to_string(),
        })
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Strict decimal parse: ASCII digits only, no sign.
fn parse_digits<T: std::str::FromStr>(raw: &str) -> Option<T> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

impl fmt::Display for UniqueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}_{}_{}_{}",
            self.secs, self.micros, self.seq, self.pid, self.rand
        )
    }
}

/// A decoded stored-record filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub token: UniqueToken,
    /// `None` for inbox names; `Some` (possibly empty) when an info section is present.
    pub flags: Option<FlagSet>,
}

impl ParsedFilename {
    /// Flags as an encoded string, empty when there is no info section.
    pub fn flags_str(&self) -> String {
        self.flags.as_ref().map(FlagSet::encode).unwrap_or_default()
    }
}

/// Decode a filename into its token and optional flag set.
pub fn parse_filename(name: &str) -> Result<ParsedFilename, StorageError> {
    match name.split_once(INFO_SEPARATOR) {
        None => Ok(ParsedFilename {
            token: UniqueToken::parse(name)?,
            flags: None,
        }),
        Some((token, info)) => {
            let flags = info.strip_prefix(INFO_PREFIX).ok_or_else(|| {
                StorageError::decode(name, format!("info section must start with '{INFO_PREFIX}'"))
            })?;
            Ok(ParsedFilename {
                token: UniqueToken::parse(token)?,
                flags: Some(FlagSet::decode(flags)?),
            })
        }
    }
}

/// Encode a filename. `None` flags yields an inbox name.
pub fn encode_filename(token: &UniqueToken, flags: Option<&FlagSet>) -> String {
    match flags {
        None => token.to_string(),
        Some(flags) => format!("{token}{}", info_suffix(flags)),
    }
}

/// The `:2,<flags>` info section for a flag set.
pub fn info_suffix(flags: &FlagSet) -> String {
    format!("{INFO_SEPARATOR}{INFO_PREFIX}{}", flags.encode())
}

/// Bytes left for the encoded flag list once `name` is moved to `cur`.
pub fn flag_budget(name: &str) -> usize {
    let fixed = base_name(name).len() + INFO_SEPARATOR.len_utf8() + INFO_PREFIX.len();
    MAX_FILENAME_LEN.saturating_sub(fixed)
}

/// The token part of a filename, without any info section.
pub fn base_name(name: &str) -> &str {
    name.split_once(INFO_SEPARATOR).map_or(name, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_budget_fills_name_max() {
        let name = UniqueToken::generate().to_string();
        let budget = flag_budget(&name);
        assert_eq!(name.len() + ":2,".len() + budget, MAX_FILENAME_LEN);
        // Any existing info section is ignored
        assert_eq!(flag_budget(&format!("{name}:2,S,Old")), budget);
    }

    #[test]
    fn generated_tokens_parse_back() {
        let token = UniqueToken::generate();
        let parsed = UniqueToken::parse(&token.to_string()).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn generated_tokens_are_increasing() {
        let tokens: Vec<UniqueToken> = (0..50).map(|_| UniqueToken::generate()).collect();
        for pair in tokens.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
            assert_ne!(pair[0].to_string(), pair[1].to_string());
        }
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        let a = UniqueToken::parse("999.000001_9_100_0000000a").unwrap();
        let b = UniqueToken::parse("1000.000000_10_100_0000000a").unwrap();
        assert!(a < b);
        let c = UniqueToken::parse("1000.000000_2_100_0000000a").unwrap();
        let d = UniqueToken::parse("1000.000000_10_100_0000000a").unwrap();
        assert!(c < d);
    }

    #[test]
    fn parse_inbox_name() {
        let parsed = parse_filename("1700000000.123456_7_4242_deadbeef").unwrap();
        assert_eq!(parsed.token.secs(), 1_700_000_000);
        assert_eq!(parsed.token.seq(), 7);
        assert!(parsed.flags.is_none());
        assert_eq!(parsed.flags_str(), "");
    }

    #[test]
    fn parse_processed_name() {
        let parsed =
            parse_filename("1700000000.123456_7_4242_deadbeef:2,S,Flag_X,Symbol_AAPL").unwrap();
        let flags = parsed.flags.as_ref().unwrap();
        assert!(flags.is_seen());
        assert!(flags.contains("Flag_X"));
        assert!(flags.contains("Symbol_AAPL"));
        assert_eq!(parsed.flags_str(), "Flag_X,S,Symbol_AAPL");
    }

    #[test]
    fn encode_then_parse_preserves_flags() {
        let token = UniqueToken::generate();
        let mut flags = FlagSet::seen();
        flags.insert_token("Status_Success").unwrap();
        let name = encode_filename(&token, Some(&flags));
        assert!(name.ends_with(":2,S,Status_Success"));
        let parsed = parse_filename(&name).unwrap();
        assert_eq!(parsed.token, token);
        assert_eq!(parsed.flags.unwrap(), flags);
        assert_eq!(encode_filename(&token, None), token.to_string());
        assert_eq!(base_name(&name), token.to_string());
    }

    #[test]
    fn malformed_names_rejected() {
        for bad in [
            "",
            "does_not_exist.json",
            "1700000000",
            "1700000000.123_1_1_deadbeef",
            "1700000000.123456_1_1_DEADBEEF",
            "1700000000.123456_1_1_deadbeef_extra",
            "-1.123456_1_1_deadbeef",
            "1700000000.123456_x_1_deadbeef",
            "1700000000.123456_1_1_deadbeef:1,S",
            "1700000000.123456_1_1_deadbeef:2,S,,X",
        ] {
            assert!(parse_filename(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
