//! Etags: the total order every migration run is built on.
//!
//! An etag is a 128-bit value made of a restart counter (bumped each time a
//! store instance is opened) and a change counter (bumped on every write).
//! Ordering is lexicographic over `(restarts, changes)`, so any etag issued
//! after a restart sorts after every etag issued before it.
//!
//! The text form is 32 hex digits grouped `8-4-4-4-12`:
//!
//! ```text
//! 00000000-0000-0001-0000-000000000007
//! \______restarts_/ \____changes_____/
//! ```

use crate::error::{SmugglerError, SmugglerResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Totally ordered change identifier assigned by a store to each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Etag {
    restarts: u64,
    changes: u64,
}

impl Etag {
    /// The empty etag. Sorts before every etag a store can assign.
    pub const EMPTY: Etag = Etag {
        restarts: 0,
        changes: 0,
    };

    /// Creates an etag from its two counters.
    #[must_use]
    pub const fn new(restarts: u64, changes: u64) -> Self {
        Self { restarts, changes }
    }

    /// Returns the restart counter segment.
    #[must_use]
    pub const fn restarts(self) -> u64 {
        self.restarts
    }

    /// Returns the change counter segment.
    #[must_use]
    pub const fn changes(self) -> u64 {
        self.changes
    }

    /// Returns true for [`Etag::EMPTY`].
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.restarts == 0 && self.changes == 0
    }

    /// Returns the etag that follows this one within the same restart.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            restarts: self.restarts,
            changes: self.changes.saturating_add(1),
        }
    }

    /// Moves the change counter by a signed delta, saturating at its bounds.
    ///
    /// Only meant for bookkeeping and tests; stores never assign etags
    /// this way.
    #[must_use]
    pub fn increment_by(self, delta: i64) -> Self {
        let changes = if delta >= 0 {
            self.changes.saturating_add(delta.unsigned_abs())
        } else {
            self.changes.saturating_sub(delta.unsigned_abs())
        };
        Self {
            restarts: self.restarts,
            changes,
        }
    }

    /// Returns true if `low <= self <= high`. A `None` high bound is unbounded.
    #[must_use]
    pub fn is_within(self, low: Etag, high: Option<Etag>) -> bool {
        self >= low && high.map_or(true, |high| self <= high)
    }

    /// Returns the 16-byte big-endian representation.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.restarts.to_be_bytes());
        bytes[8..].copy_from_slice(&self.changes.to_be_bytes());
        bytes
    }

    /// Builds an etag from its 16-byte big-endian representation.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut restarts = [0u8; 8];
        let mut changes = [0u8; 8];
        restarts.copy_from_slice(&bytes[..8]);
        changes.copy_from_slice(&bytes[8..]);
        Self {
            restarts: u64::from_be_bytes(restarts),
            changes: u64::from_be_bytes(changes),
        }
    }

    /// Parses the text form. Accepts the hyphenated and the bare 32-digit form.
    pub fn parse(input: &str) -> SmugglerResult<Self> {
        let trimmed = input.trim();
        if !trimmed.is_ascii() {
            return Err(SmugglerError::format(input, "non-ASCII characters"));
        }
        let digits: String = if trimmed.len() == 36 {
            for (i, ch) in trimmed.char_indices() {
                let expect_hyphen = matches!(i, 8 | 13 | 18 | 23);
                if expect_hyphen != (ch == '-') {
                    return Err(SmugglerError::format(input, "misplaced group separator"));
                }
            }
            trimmed.chars().filter(|c| *c != '-').collect()
        } else if trimmed.len() == 32 {
            trimmed.to_string()
        } else {
            return Err(SmugglerError::format(
                input,
                format!("expected 32 hex digits, got {} characters", trimmed.len()),
            ));
        };

        if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(SmugglerError::format(input, format!("'{bad}' is not a hex digit")));
        }

        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &digits[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| SmugglerError::format(input, format!("'{pair}' is not hex")))?;
        }
        Ok(Self::from_bytes(bytes))
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: String = self
            .to_bytes()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect();
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl FromStr for Etag {
    type Err = SmugglerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Etag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Etag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Etag::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Positions in the two independent etag streams: documents and deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EtagPair {
    /// Position in the document stream.
    pub documents: Etag,
    /// Position in the deletion stream.
    pub deletions: Etag,
}

impl EtagPair {
    /// Both streams at the start.
    pub const EMPTY: EtagPair = EtagPair {
        documents: Etag::EMPTY,
        deletions: Etag::EMPTY,
    };

    /// Creates a pair.
    #[must_use]
    pub const fn new(documents: Etag, deletions: Etag) -> Self {
        Self {
            documents,
            deletions,
        }
    }

    /// Returns true if both streams have reached at least `other`.
    #[must_use]
    pub fn covers(&self, other: &EtagPair) -> bool {
        self.documents >= other.documents && self.deletions >= other.deletions
    }

    /// Returns the per-stream maximum.
    #[must_use]
    pub fn max(self, other: EtagPair) -> Self {
        Self {
            documents: self.documents.max(other.documents),
            deletions: self.deletions.max(other.deletions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pair_covers_per_stream() {
        let applied = EtagPair::new(Etag::new(1, 10), Etag::new(1, 4));
        assert!(applied.covers(&EtagPair::new(Etag::new(1, 10), Etag::new(1, 4))));
        assert!(applied.covers(&EtagPair::EMPTY));
        assert!(!applied.covers(&EtagPair::new(Etag::new(1, 9), Etag::new(1, 5))));
        assert_eq!(
            applied.max(EtagPair::new(Etag::new(1, 2), Etag::new(1, 8))),
            EtagPair::new(Etag::new(1, 10), Etag::new(1, 8))
        );
    }

    #[test]
    fn empty_sorts_first() {
        assert!(Etag::EMPTY < Etag::new(0, 1));
        assert!(Etag::EMPTY < Etag::new(1, 0));
        assert!(Etag::EMPTY.is_empty());
        assert_eq!(Etag::default(), Etag::EMPTY);
    }

    #[test]
    fn restart_counter_dominates() {
        assert!(Etag::new(1, 999) < Etag::new(2, 0));
        assert!(Etag::new(2, 1) > Etag::new(2, 0));
    }

    #[test]
    fn display_format() {
        let etag = Etag::new(1, 7);
        assert_eq!(etag.to_string(), "00000000-0000-0001-0000-000000000007");
        assert_eq!(
            Etag::new(0x0100_0000_0000_0001, 0xB).to_string(),
            "01000000-0000-0001-0000-00000000000B"
        );
    }

    #[test]
    fn parse_accepts_both_forms() {
        let hyphenated: Etag = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        assert_eq!(hyphenated, Etag::new(0, 1));

        let bare = Etag::parse("0000000000000001000000000000000a").unwrap();
        assert_eq!(bare, Etag::new(1, 10));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Etag::parse("not-an-etag"),
            Err(SmugglerError::Format { .. })
        ));
        assert!(Etag::parse("0000000-00000-0000-0000-000000000001").is_err());
        assert!(Etag::parse("00000000-0000-0000-0000-00000000000G").is_err());
        assert!(Etag::parse("").is_err());
        assert!(matches!(
            Etag::parse("+0+0+0+0+0+0+0+0+0+0+0+0+0+0+0+1"),
            Err(SmugglerError::Format { .. })
        ));
        assert!(Etag::parse("+0000000-0000-0000-0000-000000000001").is_err());
    }

    #[test]
    fn increment_by_moves_change_counter() {
        let etag = Etag::new(1, 11);
        assert_eq!(etag.increment_by(-5), Etag::new(1, 6));
        assert_eq!(etag.increment_by(2), Etag::new(1, 13));
        assert_eq!(Etag::new(1, 2).increment_by(-10), Etag::new(1, 0));
        assert_eq!(Etag::new(1, u64::MAX).increment_by(1), Etag::new(1, u64::MAX));
    }

    #[test]
    fn within_bounds() {
        let low = Etag::new(1, 5);
        let high = Etag::new(1, 7);
        assert!(Etag::new(1, 5).is_within(low, Some(high)));
        assert!(Etag::new(1, 7).is_within(low, Some(high)));
        assert!(!Etag::new(1, 8).is_within(low, Some(high)));
        assert!(!Etag::new(1, 4).is_within(low, Some(high)));
        assert!(Etag::new(9, 0).is_within(low, None));
    }

    #[test]
    fn serde_uses_text_form() {
        let json = serde_json::to_string(&Etag::new(1, 7)).unwrap();
        assert_eq!(json, "\"00000000-0000-0001-0000-000000000007\"");
        let back: Etag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Etag::new(1, 7));
        assert!(serde_json::from_str::<Etag>("\"bogus\"").is_err());
    }

    proptest! {
        #[test]
        fn text_form_preserves_order(a in any::<(u64, u64)>(), b in any::<(u64, u64)>()) {
            let ea = Etag::new(a.0, a.1);
            let eb = Etag::new(b.0, b.1);
            let parsed_a = Etag::parse(&ea.to_string()).unwrap();
            prop_assert_eq!(parsed_a, ea);
            prop_assert_eq!(ea.cmp(&eb), ea.to_string().cmp(&eb.to_string()));
        }
    }
}
