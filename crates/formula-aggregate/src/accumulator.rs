//! Streaming aggregate state for a single group.
//!
//! An [`Accumulator`] is fed one value per contributing row and produces the aggregate result
//! once the group is complete. Supported aggregates:
//! - SUM / AVG / MIN / MAX
//! - BOOL_AND / BOOL_OR and BIT_AND / BIT_OR folds
//! - population/sample variance and standard deviation (Welford's online algorithm)
//! - confidence intervals of the mean (CONF_INT_80 .. CONF_INT_99_9)
//! - geometric and harmonic means
//!
//! Each aggregate can run over a DISTINCT input: values are buffered in comparator order and
//! replayed through the regular update path when the group is finalized.

use crate::error::{AggregateError, AggregateResult};
use crate::ordering::upsert_sorted;
use crate::value::{render_double, ScalarValue, ValueError, ValueType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Text returned by CONF_INT_*, GEOMEAN and HARMEAN when no row contributed.
///
/// This is a literal string rather than the NULL marker.
pub const NULL_SENTINEL: &str = "null";

/// Confidence level of a CONF_INT_* aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfidenceLevel {
    P80,
    P85,
    P90,
    P95,
    P99,
    P99_5,
    P99_9,
}

impl ConfidenceLevel {
    pub const ALL: [ConfidenceLevel; 7] = [
        ConfidenceLevel::P80,
        ConfidenceLevel::P85,
        ConfidenceLevel::P90,
        ConfidenceLevel::P95,
        ConfidenceLevel::P99,
        ConfidenceLevel::P99_5,
        ConfidenceLevel::P99_9,
    ];

    /// Two-sided z critical value for this level.
    pub fn z_score(self) -> f64 {
        match self {
            ConfidenceLevel::P80 => 1.282,
            ConfidenceLevel::P85 => 1.440,
            ConfidenceLevel::P90 => 1.645,
            ConfidenceLevel::P95 => 1.960,
            ConfidenceLevel::P99 => 2.576,
            ConfidenceLevel::P99_5 => 2.807,
            ConfidenceLevel::P99_9 => 3.291,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            ConfidenceLevel::P80 => "80",
            ConfidenceLevel::P85 => "85",
            ConfidenceLevel::P90 => "90",
            ConfidenceLevel::P95 => "95",
            ConfidenceLevel::P99 => "99",
            ConfidenceLevel::P99_5 => "99_5",
            ConfidenceLevel::P99_9 => "99_9",
        }
    }
}

/// Aggregate function computed by an [`Accumulator`].
///
/// Serialized by SQL name (`"SUM"`, `"CONF_INT_99_5"`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AggregateKind {
    Sum,
    Avg,
    Min,
    Max,
    BoolAnd,
    BoolOr,
    BitAnd,
    BitOr,
    StddevPop,
    StddevSamp,
    VarPop,
    VarSamp,
    ConfidenceInterval(ConfidenceLevel),
    GeoMean,
    HarMean,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 21] = [
        AggregateKind::Sum,
        AggregateKind::Avg,
        AggregateKind::Min,
        AggregateKind::Max,
        AggregateKind::BoolAnd,
        AggregateKind::BoolOr,
        AggregateKind::BitAnd,
        AggregateKind::BitOr,
        AggregateKind::StddevPop,
        AggregateKind::StddevSamp,
        AggregateKind::VarPop,
        AggregateKind::VarSamp,
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P80),
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P85),
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P90),
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P95),
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P99),
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P99_5),
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P99_9),
        AggregateKind::GeoMean,
        AggregateKind::HarMean,
    ];

    /// SQL name of the aggregate.
    pub fn name(self) -> String {
        let name = match self {
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::BoolAnd => "BOOL_AND",
            AggregateKind::BoolOr => "BOOL_OR",
            AggregateKind::BitAnd => "BIT_AND",
            AggregateKind::BitOr => "BIT_OR",
            AggregateKind::StddevPop => "STDDEV_POP",
            AggregateKind::StddevSamp => "STDDEV_SAMP",
            AggregateKind::VarPop => "VAR_POP",
            AggregateKind::VarSamp => "VAR_SAMP",
            AggregateKind::ConfidenceInterval(level) => {
                return format!("CONF_INT_{}", level.suffix())
            }
            AggregateKind::GeoMean => "GEOMEAN",
            AggregateKind::HarMean => "HARMEAN",
        };
        name.to_string()
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for AggregateKind {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let kind = match upper.as_str() {
            "SUM" => AggregateKind::Sum,
            "AVG" => AggregateKind::Avg,
            "MIN" => AggregateKind::Min,
            "MAX" => AggregateKind::Max,
            "BOOL_AND" => AggregateKind::BoolAnd,
            "BOOL_OR" => AggregateKind::BoolOr,
            "BIT_AND" => AggregateKind::BitAnd,
            "BIT_OR" => AggregateKind::BitOr,
            "STDDEV_POP" => AggregateKind::StddevPop,
            "STDDEV_SAMP" => AggregateKind::StddevSamp,
            "VAR_POP" => AggregateKind::VarPop,
            "VAR_SAMP" => AggregateKind::VarSamp,
            "GEOMEAN" => AggregateKind::GeoMean,
            "HARMEAN" => AggregateKind::HarMean,
            other => {
                let level = other.strip_prefix("CONF_INT_").and_then(|suffix| {
                    ConfidenceLevel::ALL
                        .into_iter()
                        .find(|level| level.suffix() == suffix)
                });
                match level {
                    Some(level) => AggregateKind::ConfidenceInterval(level),
                    None => return Err(AggregateError::UnknownAggregate(s.to_string())),
                }
            }
        };
        Ok(kind)
    }
}

impl From<AggregateKind> for String {
    fn from(kind: AggregateKind) -> Self {
        kind.name()
    }
}

impl TryFrom<String> for AggregateKind {
    type Error = AggregateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Running state of one aggregate over one group.
#[derive(Clone, Debug)]
pub struct Accumulator<V> {
    kind: AggregateKind,
    data_type: ValueType,
    count: u64,
    value: Option<V>,
    mean: f64,
    m2: f64,
    product: f64,
    reciprocal_sum: f64,
    distinct: Option<Vec<V>>,
}

impl<V: ScalarValue> Accumulator<V> {
    /// Creates an accumulator whose running value is seeded in `data_type`.
    pub fn new(kind: AggregateKind, data_type: ValueType) -> Self {
        Self {
            kind,
            data_type,
            count: 0,
            value: None,
            mean: 0.0,
            m2: 0.0,
            product: 0.0,
            reciprocal_sum: 0.0,
            distinct: None,
        }
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    /// Number of rows folded into the running state so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Feeds one row. NULL values are ignored.
    ///
    /// With `distinct`, the value is only buffered; it is folded in by [`Accumulator::finalize`].
    pub fn add(&mut self, value: &V, distinct: bool) -> AggregateResult<()> {
        if value.is_null() {
            return Ok(());
        }
        if distinct {
            upsert_sorted(self.distinct.get_or_insert_with(Vec::new), value)?;
            return Ok(());
        }
        self.fold(value)
    }

    /// Produces the aggregate result converted to `target_type`.
    ///
    /// CONF_INT_*, GEOMEAN and HARMEAN return the text [`NULL_SENTINEL`] (unconverted) when no
    /// row contributed; every other aggregate returns the NULL marker.
    pub fn finalize(&mut self, target_type: ValueType, distinct: bool) -> AggregateResult<V> {
        if distinct {
            self.replay_distinct()?;
        }

        let count = self.count as f64;
        let result = match self.kind {
            AggregateKind::Sum
            | AggregateKind::Min
            | AggregateKind::Max
            | AggregateKind::BitAnd
            | AggregateKind::BitOr
            | AggregateKind::BoolAnd
            | AggregateKind::BoolOr => self.value.clone(),
            AggregateKind::Avg => match &self.value {
                Some(sum) => divide_by_count(sum, self.count)?,
                None => None,
            },
            AggregateKind::VarPop => (self.count >= 1).then(|| V::from_f64(self.m2 / count)),
            AggregateKind::StddevPop => {
                (self.count >= 1).then(|| V::from_f64((self.m2 / count).sqrt()))
            }
            AggregateKind::VarSamp => {
                (self.count >= 2).then(|| V::from_f64(self.m2 / (count - 1.0)))
            }
            AggregateKind::StddevSamp => {
                (self.count >= 2).then(|| V::from_f64((self.m2 / (count - 1.0)).sqrt()))
            }
            AggregateKind::ConfidenceInterval(level) => {
                if self.count == 0 {
                    return Ok(V::from_text(NULL_SENTINEL));
                }
                let (low, high) = confidence_bounds(self.mean, self.m2, count, level.z_score());
                Some(V::from_text(&format!(
                    "({}, {})",
                    render_double(low),
                    render_double(high)
                )))
            }
            AggregateKind::GeoMean => {
                if self.count == 0 {
                    return Ok(V::from_text(NULL_SENTINEL));
                }
                Some(V::from_f64(round3(self.product.powf(1.0 / count))))
            }
            AggregateKind::HarMean => {
                if self.count == 0 {
                    return Ok(V::from_text(NULL_SENTINEL));
                }
                Some(V::from_f64(round3(count / self.reciprocal_sum)))
            }
        };

        match result {
            Some(value) => Ok(value.convert_to(target_type)?),
            None => Ok(V::null()),
        }
    }

    /// Folds one non-NULL value into the running state.
    fn fold(&mut self, value: &V) -> AggregateResult<()> {
        let n = self.count + 1;
        match self.kind {
            AggregateKind::Sum | AggregateKind::Avg => {
                let next = match &self.value {
                    None => {
                        let seed_type = if self.kind == AggregateKind::Avg {
                            self.data_type.add_proof()
                        } else {
                            self.data_type
                        };
                        value.convert_to(seed_type)?
                    }
                    Some(running) => {
                        let ty = running.value_type().unwrap_or(self.data_type);
                        running.add(&value.convert_to(ty)?)?
                    }
                };
                self.value = Some(next);
            }
            AggregateKind::Min => self.keep_if(value, Ordering::Less)?,
            AggregateKind::Max => self.keep_if(value, Ordering::Greater)?,
            AggregateKind::BoolAnd | AggregateKind::BoolOr => {
                let incoming = value.convert_to(ValueType::Boolean)?;
                let next = match &self.value {
                    None => incoming,
                    Some(running) => {
                        let (a, b) = (running.to_bool()?, incoming.to_bool()?);
                        V::from_bool(if self.kind == AggregateKind::BoolAnd {
                            a && b
                        } else {
                            a || b
                        })
                    }
                };
                self.value = Some(next);
            }
            AggregateKind::BitAnd | AggregateKind::BitOr => {
                let next = match &self.value {
                    None => value.convert_to(self.data_type)?,
                    Some(running) => {
                        let (a, b) = (running.to_i64()?, value.to_i64()?);
                        let bits = if self.kind == AggregateKind::BitAnd {
                            a & b
                        } else {
                            a | b
                        };
                        V::from_i64(bits).convert_to(self.data_type)?
                    }
                };
                self.value = Some(next);
            }
            AggregateKind::StddevPop
            | AggregateKind::StddevSamp
            | AggregateKind::VarPop
            | AggregateKind::VarSamp
            | AggregateKind::ConfidenceInterval(_) => {
                // Welford's method.
                let x = value.to_f64()?;
                if n == 1 {
                    self.mean = x;
                    self.m2 = 0.0;
                } else {
                    let delta = x - self.mean;
                    self.mean += delta / n as f64;
                    self.m2 += delta * (x - self.mean);
                }
            }
            AggregateKind::GeoMean => {
                let x = value.to_f64()?;
                if n == 1 {
                    self.product = x;
                } else {
                    self.product *= x;
                }
            }
            AggregateKind::HarMean => {
                let x = value.to_f64()?;
                if n == 1 {
                    self.reciprocal_sum = 1.0 / x;
                } else {
                    self.reciprocal_sum += 1.0 / x;
                }
            }
        }
        self.count = n;
        Ok(())
    }

    /// Replaces the running value when `value` compares as `wanted` against it.
    fn keep_if(&mut self, value: &V, wanted: Ordering) -> Result<(), ValueError> {
        let replace = match &self.value {
            None => true,
            Some(running) => value.compare(running)? == wanted,
        };
        if replace {
            self.value = Some(value.clone());
        }
        Ok(())
    }

    /// Re-runs the buffered DISTINCT values through the regular update path.
    fn replay_distinct(&mut self) -> AggregateResult<()> {
        self.count = 0;
        let Some(buffered) = self.distinct.take() else {
            return Ok(());
        };
        log::trace!("replaying {} distinct values for {}", buffered.len(), self.kind);
        for value in &buffered {
            self.fold(value)?;
        }
        Ok(())
    }
}

/// `sum / count` in the wider of the sum's representation and `Integer`; `None` when empty.
fn divide_by_count<V: ScalarValue>(sum: &V, count: u64) -> AggregateResult<Option<V>> {
    if count == 0 {
        return Ok(None);
    }
    let ty = sum
        .value_type()
        .map_or(ValueType::Integer, |ty| ty.higher_order(ValueType::Integer));
    let count = i64::try_from(count).map_err(|_| ValueError::Overflow)?;
    let divisor = V::from_i64(count).convert_to(ty)?;
    Ok(Some(sum.convert_to(ty)?.divide(&divisor)?))
}

/// Bounds of `mean ∓ z·s/√n`, each rounded to three decimals.
///
/// `s` is the sample standard deviation `sqrt(m2 / (n - 1))`; a single row makes that `0 / 0`,
/// which [`round3`] turns into a `0.0` bound.
fn confidence_bounds(mean: f64, m2: f64, n: f64, z: f64) -> (f64, f64) {
    let std_dev = (m2 / (n - 1.0)).sqrt();
    let margin = z * (std_dev / n.sqrt());
    (round3(mean - margin), round3(mean + margin))
}

/// Rounds to three decimals, ties toward positive infinity.
///
/// The scaled value goes through an `i64`: NaN becomes `0.0` and infinities saturate at
/// `i64::MAX / 1000` (or `i64::MIN / 1000`).
fn round3(x: f64) -> f64 {
    ((x * 1000.0 + 0.5).floor() as i64) as f64 / 1000.0
}
