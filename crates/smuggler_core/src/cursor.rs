//! Per-run position over an etag-ordered stream.

use crate::etag::Etag;

/// Tracks how far a run has read through an etag-ordered stream.
///
/// The lower bound is exclusive: the next batch starts strictly after it.
/// The ceiling, when present, is inclusive. A run without a ceiling follows
/// the store's high-water etag, which is re-read at the start of every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCursor {
    after: Etag,
    ceiling: Option<Etag>,
}

impl SequenceCursor {
    /// Creates a cursor starting after `after`, bounded by `ceiling`.
    #[must_use]
    pub fn new(after: Etag, ceiling: Option<Etag>) -> Self {
        Self { after, ceiling }
    }

    /// Creates an unbounded cursor starting from the beginning.
    #[must_use]
    pub fn from_start() -> Self {
        Self::new(Etag::EMPTY, None)
    }

    /// Returns the exclusive lower bound.
    #[must_use]
    pub fn position(&self) -> Etag {
        self.after
    }

    /// Returns the inclusive ceiling, if any.
    #[must_use]
    pub fn ceiling(&self) -> Option<Etag> {
        self.ceiling
    }

    /// Computes the ceiling for the next batch given the store's current
    /// high-water etag.
    #[must_use]
    pub fn batch_ceiling(&self, high_water: Etag) -> Etag {
        match self.ceiling {
            Some(ceiling) => ceiling.min(high_water),
            None => high_water,
        }
    }

    /// Moves the lower bound to `etag`.
    ///
    /// Returns `false`, leaving the cursor where it was, if `etag` does not
    /// move it forward.
    pub fn advance(&mut self, etag: Etag) -> bool {
        if etag <= self.after {
            return false;
        }
        self.after = etag;
        true
    }

    /// Returns true if `etag` lies after the lower bound and within `batch_ceiling`.
    #[must_use]
    pub fn admits(&self, etag: Etag, batch_ceiling: Etag) -> bool {
        etag > self.after && etag <= batch_ceiling
    }

    /// Returns true once the lower bound has reached the ceiling.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.ceiling.is_some_and(|ceiling| self.after >= ceiling)
    }
}

impl Default for SequenceCursor {
    fn default() -> Self {
        Self::from_start()
    }
}
