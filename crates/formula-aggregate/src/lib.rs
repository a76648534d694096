#![forbid(unsafe_code)]

mod accumulator;
mod error;
mod extrapolate;
mod multiset;
mod ordering;
mod value;

pub use crate::accumulator::{Accumulator, AggregateKind, ConfidenceLevel, NULL_SENTINEL};
pub use crate::error::{AggregateError, AggregateResult};
pub use crate::multiset::{CountedEntry, ExtrapolatedCursor, OrderedMultiset};
pub use crate::value::{ScalarValue, Value, ValueError, ValueType};
