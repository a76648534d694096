//! Scalar values consumed by the aggregate machinery.
//!
//! Aggregates only need a narrow set of capabilities from the value layer: a total order,
//! conversion between representations, addition/division and scalar extraction. Those are
//! captured by [`ScalarValue`]; [`Value`] is the in-crate implementation used by Formula
//! drivers and by the tests.

use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Representation a value can be converted into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Boolean,
    Integer,
    Double,
    Text,
}

impl ValueType {
    /// Representation used to accumulate running sums without overflowing (AVG).
    ///
    /// Every input representation widens to `Double`; text inputs are parsed as numbers.
    pub fn add_proof(self) -> ValueType {
        ValueType::Double
    }

    /// The wider of two representations.
    pub fn higher_order(self, other: ValueType) -> ValueType {
        self.max(other)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Boolean => "BOOLEAN",
            ValueType::Integer => "INTEGER",
            ValueType::Double => "DOUBLE",
            ValueType::Text => "TEXT",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime failure raised by the value layer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("cannot compare {left} with {right}")]
    Incomparable { left: String, right: String },

    #[error("cannot convert {value} to {target}")]
    Conversion { value: String, target: ValueType },

    #[error("unsupported operands for `{op}`: {left} and {right}")]
    Arithmetic {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("numeric overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,
}

/// Capabilities the aggregate machinery needs from a scalar value.
pub trait ScalarValue: Clone + fmt::Debug {
    /// The distinguished NULL marker.
    fn null() -> Self;

    fn is_null(&self) -> bool;

    /// Representation of a non-NULL value; `None` for the NULL marker.
    fn value_type(&self) -> Option<ValueType>;

    /// Total order used by ordered aggregates. Values that cannot be ordered relative to each
    /// other fail instead of picking an arbitrary order.
    fn compare(&self, other: &Self) -> Result<Ordering, ValueError>;

    fn convert_to(&self, target: ValueType) -> Result<Self, ValueError>;

    fn add(&self, other: &Self) -> Result<Self, ValueError>;

    fn divide(&self, other: &Self) -> Result<Self, ValueError>;

    fn to_f64(&self) -> Result<f64, ValueError>;

    fn to_i64(&self) -> Result<i64, ValueError>;

    fn to_bool(&self) -> Result<bool, ValueError>;

    fn from_f64(value: f64) -> Self;

    fn from_i64(value: i64) -> Self;

    fn from_bool(value: bool) -> Self;

    fn from_text(value: &str) -> Self;
}

/// Scalar value flowing through the aggregate machinery.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(OrderedFloat<f64>),
    Text(Arc<str>),
}

impl Value {
    pub fn double(value: f64) -> Self {
        Value::Double(OrderedFloat(value))
    }

    pub fn text(value: impl Into<Arc<str>>) -> Self {
        Value::Text(value.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(d.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    fn type_label(&self) -> String {
        match self.value_type() {
            Some(ty) => ty.to_string(),
            None => "NULL".to_string(),
        }
    }

    fn conversion_error(&self, target: ValueType) -> ValueError {
        ValueError::Conversion {
            value: self.to_string(),
            target,
        }
    }

    fn arithmetic_error(&self, op: &'static str, other: &Value) -> ValueError {
        ValueError::Arithmetic {
            op,
            left: self.type_label(),
            right: other.type_label(),
        }
    }
}

/// Rounds half away from zero and checks the result fits in an `i64`.
fn f64_to_i64(value: f64) -> Result<i64, ValueError> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(ValueError::Overflow);
    }
    Ok(rounded as i64)
}

/// Exact order between an integer and a double, consistent with `OrderedFloat` (NaN sorts last).
///
/// Casting the integer to `f64` alone is lossy above 2^53, so ties are settled on exact values.
fn cmp_integer_double(int: i64, double: f64) -> Ordering {
    if double.is_nan() {
        return Ordering::Less;
    }
    match (int as f64).partial_cmp(&double) {
        // Equal means `double` is integral and within +-2^63, so the i128 cast is exact.
        Some(Ordering::Equal) | None => i128::from(int).cmp(&(double as i128)),
        Some(ordering) => ordering,
    }
}

/// Renders a double the way the engine prints numbers: plain decimal with at least one
/// fractional digit for magnitudes in `[1e-3, 1e7)`, `d.dddE<n>` otherwise.
pub(crate) fn render_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        return text.to_string();
    }
    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        return format!("{value:?}");
    }
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    if mantissa.contains('.') {
        format!("{mantissa}E{exponent}")
    } else {
        format!("{mantissa}.0E{exponent}")
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_uppercase().as_str() {
        "TRUE" | "T" | "YES" | "Y" | "1" => Some(true),
        "FALSE" | "F" | "NO" | "N" | "0" => Some(false),
        _ => None,
    }
}

impl ScalarValue for Value {
    fn null() -> Self {
        Value::Null
    }

    fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Double(_) => Some(ValueType::Double),
            Value::Text(_) => Some(ValueType::Text),
        }
    }

    fn compare(&self, other: &Self) -> Result<Ordering, ValueError> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => Ok(a.cmp(b)),
            (Value::Integer(a), Value::Double(b)) => Ok(cmp_integer_double(*a, b.0)),
            (Value::Double(a), Value::Integer(b)) => Ok(cmp_integer_double(*b, a.0).reverse()),
            (Value::Text(a), Value::Text(b)) => Ok(a.as_ref().cmp(b.as_ref())),
            _ => Err(ValueError::Incomparable {
                left: self.type_label(),
                right: other.type_label(),
            }),
        }
    }

    fn convert_to(&self, target: ValueType) -> Result<Self, ValueError> {
        if self.value_type() == Some(target) {
            return Ok(self.clone());
        }
        match (self, target) {
            (Value::Null, _) => Ok(Value::Null),
            (_, ValueType::Boolean) => self.to_bool().map(Value::Boolean),
            (_, ValueType::Integer) => self.to_i64().map(Value::Integer),
            (_, ValueType::Double) => self.to_f64().map(Value::double),
            (_, ValueType::Text) => Ok(Value::text(self.to_string())),
        }
    }

    fn add(&self, other: &Self) -> Result<Self, ValueError> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Integer(a), Value::Integer(b)) => {
                a.checked_add(*b).map(Value::Integer).ok_or(ValueError::Overflow)
            }
            (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => Ok(Value::double(a + b)),
                    _ => Err(self.arithmetic_error("+", other)),
                }
            }
            _ => Err(self.arithmetic_error("+", other)),
        }
    }

    fn divide(&self, other: &Self) -> Result<Self, ValueError> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Integer(_), Value::Integer(0)) => Err(ValueError::DivisionByZero),
            (Value::Integer(a), Value::Integer(b)) => {
                a.checked_div(*b).map(Value::Integer).ok_or(ValueError::Overflow)
            }
            (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(_), Some(b)) if b == 0.0 => Err(ValueError::DivisionByZero),
                    (Some(a), Some(b)) => Ok(Value::double(a / b)),
                    _ => Err(self.arithmetic_error("/", other)),
                }
            }
            _ => Err(self.arithmetic_error("/", other)),
        }
    }

    fn to_f64(&self) -> Result<f64, ValueError> {
        match self {
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Integer(i) => Ok(*i as f64),
            Value::Double(d) => Ok(d.0),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| self.conversion_error(ValueType::Double)),
            Value::Null => Err(self.conversion_error(ValueType::Double)),
        }
    }

    fn to_i64(&self) -> Result<i64, ValueError> {
        match self {
            Value::Boolean(b) => Ok(i64::from(*b)),
            Value::Integer(i) => Ok(*i),
            Value::Double(d) => f64_to_i64(d.0),
            Value::Text(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<i64>() {
                    Ok(i) => Ok(i),
                    Err(_) => trimmed
                        .parse::<f64>()
                        .map_err(|_| self.conversion_error(ValueType::Integer))
                        .and_then(f64_to_i64),
                }
            }
            Value::Null => Err(self.conversion_error(ValueType::Integer)),
        }
    }

    fn to_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Integer(i) => Ok(*i != 0),
            Value::Double(d) => Ok(d.0 != 0.0),
            Value::Text(s) => parse_bool(s).ok_or_else(|| self.conversion_error(ValueType::Boolean)),
            Value::Null => Err(self.conversion_error(ValueType::Boolean)),
        }
    }

    fn from_f64(value: f64) -> Self {
        Value::double(value)
    }

    fn from_i64(value: i64) -> Self {
        Value::Integer(value)
    }

    fn from_bool(value: bool) -> Self {
        Value::Boolean(value)
    }

    fn from_text(value: &str) -> Self {
        Value::text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::double(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(true) => f.write_str("TRUE"),
            Value::Boolean(false) => f.write_str("FALSE"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => f.write_str(&render_double(d.0)),
            Value::Text(s) => f.write_str(s),
        }
    }
}
