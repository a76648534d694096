use crate::value::{ScalarValue, ValueError};
use std::cmp::Ordering;

/// Binary search over a slice kept in ascending comparator order.
///
/// Mirrors [`slice::binary_search_by`] but surfaces the first comparator failure instead of
/// guessing an order: `Ok(Ok(idx))` is a hit, `Ok(Err(idx))` the insertion point.
pub(crate) fn search_sorted<T, V, F>(
    items: &[T],
    key: &V,
    value_of: F,
) -> Result<Result<usize, usize>, ValueError>
where
    V: ScalarValue,
    F: Fn(&T) -> &V,
{
    let mut failure = None;
    let found = items.binary_search_by(|item| match value_of(item).compare(key) {
        Ok(ord) => ord,
        Err(err) => {
            failure = Some(err);
            // Stop the search; the result is discarded below.
            Ordering::Equal
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(found),
    }
}

/// Inserts `value` keeping ascending order; an equal key is overwritten (last write wins).
pub(crate) fn upsert_sorted<V: ScalarValue>(items: &mut Vec<V>, value: &V) -> Result<(), ValueError> {
    match search_sorted(items, value, |v| v)? {
        Ok(idx) => items[idx] = value.clone(),
        Err(idx) => items.insert(idx, value.clone()),
    }
    Ok(())
}
