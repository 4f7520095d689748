//! Change Filter
//!
//! Suppresses redundant snapshot emissions. A candidate passes only when
//! it differs (by `PartialEq`) from the last value that passed. The filter
//! is owned by a single monitor, so it needs no synchronization. Rejections
//! are counted by the owning monitor, not here.

/// Remembers the last emitted value and rejects exact repeats.
///
/// # Example
///
/// ```rust
/// use market_data_ingest::domain::filter::ChangeFilter;
///
/// let mut filter = ChangeFilter::new();
/// assert!(filter.admit(&1));
/// assert!(!filter.admit(&1));
/// assert!(filter.admit(&2));
/// assert!(filter.admit(&1));
/// ```
#[derive(Debug, Clone)]
pub struct ChangeFilter<T> {
    last: Option<T>,
}

impl<T> Default for ChangeFilter<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: PartialEq + Clone> ChangeFilter<T> {
    /// Create an empty filter; the first candidate always passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate. Returns `true` (and remembers it) when it differs
    /// from the last admitted value.
    pub fn admit(&mut self, candidate: &T) -> bool {
        if self.last.as_ref() == Some(candidate) {
            return false;
        }
        self.last = Some(candidate.clone());
        true
    }

    /// Last admitted value.
    #[must_use]
    pub const fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }
}
