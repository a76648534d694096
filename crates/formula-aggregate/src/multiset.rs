//! Ordered multiset backing order-statistic and frequency aggregates (MODE, MEDIAN, ...).
//!
//! The multiset has two phases:
//! - **Open**: values may be added and removed; each distinct value is kept once together with
//!   its number of occurrences, in ascending comparator order.
//! - **Ready**: after [`OrderedMultiset::finalize_collection`], the counted entries are expanded
//!   into a positional view (`extrapolated_get`) and the mode is resolved. No further
//!   modification is accepted.
//!
//! Between the two sits a short *Finalizing* phase while the extrapolation task runs.

use crate::error::{AggregateError, AggregateResult};
use crate::extrapolate::{self, Extrapolated, ExtrapolationIndex};
use crate::ordering::search_sorted;
use crate::value::{ScalarValue, ValueError};
use std::iter::FusedIterator;

/// A distinct value and its number of occurrences (always at least 1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountedEntry<V> {
    value: V,
    count: usize,
}

impl<V> CountedEntry<V> {
    pub(crate) fn with_count(value: V, count: usize) -> Self {
        debug_assert!(count >= 1);
        Self { value, count }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Clone, Debug)]
enum Phase {
    Open,
    Finalizing,
    Ready(ExtrapolationIndex),
}

#[derive(Clone, Debug)]
pub struct OrderedMultiset<V> {
    len: usize,
    entries: Vec<CountedEntry<V>>,
    phase: Phase,
}

impl<V> Default for OrderedMultiset<V> {
    fn default() -> Self {
        Self {
            len: 0,
            entries: Vec::new(),
            phase: Phase::Open,
        }
    }
}

impl<V: ScalarValue> OrderedMultiset<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of occurrences (sum of all counts).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct values.
    pub fn distinct_len(&self) -> usize {
        self.entries.len()
    }

    /// Counted entries in ascending value order.
    pub fn entries(&self) -> impl Iterator<Item = &CountedEntry<V>> + '_ {
        self.entries.iter()
    }

    pub fn contains(&self, value: &V) -> bool {
        matches!(self.search(value), Ok(Ok(_)))
    }

    /// Number of occurrences of `value` (0 when absent or not comparable).
    pub fn count_of(&self, value: &V) -> usize {
        match self.search(value) {
            Ok(Ok(idx)) => self.entries[idx].count,
            _ => 0,
        }
    }

    pub fn contains_all<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        values.into_iter().all(|value| self.contains(value))
    }

    /// Adds one occurrence of `value`.
    ///
    /// Returns `Ok(false)` without changing anything if the value cannot be ordered against the
    /// values already present.
    pub fn add(&mut self, value: &V) -> AggregateResult<bool> {
        self.ensure_open()?;

        match self.search(value) {
            Ok(Ok(idx)) => self.entries[idx].count += 1,
            Ok(Err(idx)) => self
                .entries
                .insert(idx, CountedEntry::with_count(value.clone(), 1)),
            Err(err) => {
                log::debug!("rejecting {value:?} from ordered multiset: {err}");
                return Ok(false);
            }
        }

        self.len += 1;
        Ok(true)
    }

    /// Removes one occurrence of `value`; the entry disappears once its count reaches zero.
    ///
    /// Returns `Ok(false)` if the value is absent or cannot be compared.
    pub fn remove(&mut self, value: &V) -> AggregateResult<bool> {
        self.ensure_open()?;

        if self.len == 0 {
            return Ok(false);
        }

        let idx = match self.search(value) {
            Ok(Ok(idx)) => idx,
            Ok(Err(_)) => return Ok(false),
            Err(err) => {
                log::debug!("cannot remove {value:?} from ordered multiset: {err}");
                return Ok(false);
            }
        };

        if self.entries[idx].count > 1 {
            self.entries[idx].count -= 1;
        } else {
            self.entries.remove(idx);
        }

        self.len -= 1;
        Ok(true)
    }

    /// Adds every value, continuing past soft failures. Returns whether all were added.
    pub fn add_all<'a, I>(&mut self, values: I) -> AggregateResult<bool>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        self.ensure_open()?;
        let mut all = true;
        for value in values {
            all &= self.add(value)?;
        }
        Ok(all)
    }

    /// Removes one occurrence of every value, continuing past misses. Returns whether all were
    /// removed.
    pub fn remove_all<'a, I>(&mut self, values: I) -> AggregateResult<bool>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        self.ensure_open()?;
        let mut all = true;
        for value in values {
            all &= self.remove(value)?;
        }
        Ok(all)
    }

    /// Resets to an empty, open multiset, discarding any extrapolated view.
    pub fn clear(&mut self) {
        self.len = 0;
        self.entries.clear();
        self.phase = Phase::Open;
    }

    /// Ends the modification phase and builds the positional view.
    ///
    /// Modification is rejected as soon as this is called. The call blocks until extrapolation
    /// has completed; afterwards `extrapolated_get`, `extrapolated_mode` and `cursor` are
    /// available. Finalizing twice is an error.
    pub fn finalize_collection(&mut self) -> AggregateResult<()>
    where
        V: Send + 'static,
    {
        if !matches!(self.phase, Phase::Open) {
            return Err(AggregateError::InvalidState(
                "duplicate finalization attempt; collection has already been finalized",
            ));
        }
        self.phase = Phase::Finalizing;

        log::debug!(
            "finalizing ordered multiset: {} values, {} distinct",
            self.len,
            self.entries.len()
        );

        let entries = std::mem::take(&mut self.entries);
        let Extrapolated { entries, index } = extrapolate::extrapolate(entries)?;

        log::debug!("extrapolation complete; mode entry {:?}", index.mode());

        self.entries = entries;
        self.phase = Phase::Ready(index);
        Ok(())
    }

    /// Whether the modification phase has ended (finalizing or ready).
    pub fn is_finalized(&self) -> bool {
        !matches!(self.phase, Phase::Open)
    }

    pub fn is_extrapolate_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready(_))
    }

    /// Value at natural position `index` of the sorted, expanded sequence.
    pub fn extrapolated_get(&self, index: usize) -> AggregateResult<&V> {
        let extrapolation = self.ready_index()?;
        let entry = extrapolation
            .entry_at(index)
            .ok_or(AggregateError::IndexOutOfRange {
                index,
                len: self.len,
            })?;
        Ok(&self.entries[entry].value)
    }

    /// Most frequent value; ties resolve to the smallest value. NULL when empty.
    pub fn extrapolated_mode(&self) -> AggregateResult<V> {
        let extrapolation = self.ready_index()?;
        Ok(extrapolation
            .mode()
            .map_or_else(V::null, |idx| self.entries[idx].value.clone()))
    }

    /// Discrete percentile: the first value whose cumulative share reaches `fraction`.
    pub fn extrapolated_percentile_disc(&self, fraction: f64) -> AggregateResult<V> {
        self.ready_index()?;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(AggregateError::InvalidArgument(format!(
                "percentile fraction must be within [0, 1], got {fraction}"
            )));
        }
        if self.len == 0 {
            return Ok(V::null());
        }

        let position = ((fraction * self.len as f64).ceil() as usize)
            .saturating_sub(1)
            .min(self.len - 1);
        self.extrapolated_get(position).cloned()
    }

    /// Lower median of the expanded sequence. NULL when empty.
    pub fn extrapolated_median(&self) -> AggregateResult<V> {
        self.ready_index()?;
        if self.len == 0 {
            return Ok(V::null());
        }
        self.extrapolated_get((self.len - 1) / 2).cloned()
    }

    /// Forward cursor over the extrapolated positions `[0, len)`.
    pub fn cursor(&mut self) -> AggregateResult<ExtrapolatedCursor<'_, V>> {
        self.ready_index()?;
        Ok(ExtrapolatedCursor {
            multiset: self,
            position: 0,
            last: None,
        })
    }

    /// Not supported; callers read through `extrapolated_get` or `cursor` instead.
    pub fn to_array(&self) -> AggregateResult<Vec<V>> {
        Err(AggregateError::Unsupported("to_array"))
    }

    /// Not supported.
    pub fn retain_all<'a, I>(&mut self, _values: I) -> AggregateResult<bool>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        Err(AggregateError::Unsupported("retain_all"))
    }

    fn search(&self, value: &V) -> Result<Result<usize, usize>, ValueError> {
        search_sorted(&self.entries, value, |entry| &entry.value)
    }

    fn ensure_open(&self) -> AggregateResult<()> {
        if self.is_finalized() {
            return Err(AggregateError::InvalidState(
                "modifying a finalized collection is not permitted",
            ));
        }
        Ok(())
    }

    fn ready_index(&self) -> AggregateResult<&ExtrapolationIndex> {
        match &self.phase {
            Phase::Ready(index) => Ok(index),
            Phase::Open | Phase::Finalizing => Err(AggregateError::InvalidState(
                "cannot read extrapolated values before extrapolation has completed",
            )),
        }
    }
}

/// One-pass cursor over the extrapolated view of an [`OrderedMultiset`].
///
/// The cursor holds the multiset it was created from so that [`ExtrapolatedCursor::remove`] can
/// forward to [`OrderedMultiset::remove`]. A cursor only exists once the multiset is ready, and a
/// ready multiset rejects modification, so removal through a cursor always fails.
#[derive(Debug)]
pub struct ExtrapolatedCursor<'a, V> {
    multiset: &'a mut OrderedMultiset<V>,
    position: usize,
    last: Option<V>,
}

impl<V: ScalarValue> ExtrapolatedCursor<'_, V> {
    /// Removes the last yielded value from the underlying multiset.
    pub fn remove(&mut self) -> AggregateResult<bool> {
        match self.last.clone() {
            Some(value) => self.multiset.remove(&value),
            None => Err(AggregateError::InvalidState(
                "cursor has not yielded a value to remove",
            )),
        }
    }
}

impl<V: ScalarValue> Iterator for ExtrapolatedCursor<'_, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let value = self.multiset.extrapolated_get(self.position).ok()?.clone();
        self.position += 1;
        self.last = Some(value.clone());
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.multiset.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl<V: ScalarValue> ExactSizeIterator for ExtrapolatedCursor<'_, V> {}

impl<V: ScalarValue> FusedIterator for ExtrapolatedCursor<'_, V> {}
