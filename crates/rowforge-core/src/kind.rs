//! Column kind lattice and value-kind detection.
//!
//! A [`KindDetector`] observes untyped JSON values and converges on the
//! narrowest column kind that can hold everything it has seen. Widening is
//! monotone: `Int → Float → Text`, `Bool → Text`, `Date|Time|Datetime →
//! Text`. Text is a sink.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

use crate::errors::KindError;

/// Canonical abstract type assigned to a column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Unknown,
    Null,
    Text,
    Int,
    Float,
    Bool,
    Date,
    Time,
    Datetime,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Unknown => "unknown",
            Kind::Null => "null",
            Kind::Text => "text",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Bool => "bool",
            Kind::Date => "date",
            Kind::Time => "time",
            Kind::Datetime => "datetime",
        };
        f.write_str(s)
    }
}

/// Transforms a value into the canonical representation for a detected
/// kind, e.g. normalizing datetime strings to RFC 3339. Null passes
/// through untouched.
pub type MungeFn = fn(&Value) -> Result<Value, KindError>;

/// Stateful value sampler that converges on a column kind.
///
/// Null samples are ignored. Once `sample_cap` non-null values have been
/// observed the verdict freezes and further samples are dropped.
#[derive(Debug, Clone)]
pub struct KindDetector {
    sample_cap: usize,
    samples_seen: usize,
    running: Kind,
    frozen: bool,
}

impl KindDetector {
    pub fn new(sample_cap: usize) -> Self {
        Self {
            sample_cap,
            samples_seen: 0,
            running: Kind::Unknown,
            frozen: false,
        }
    }

    /// Observe one value. Nulls are ignored.
    pub fn sample(&mut self, val: &Value) {
        if self.frozen || val.is_null() {
            return;
        }

        self.samples_seen += 1;
        if self.samples_seen > self.sample_cap {
            self.frozen = true;
            return;
        }

        let observed = observe_kind(val);
        self.running = widen(self.running, observed);
    }

    /// The detector's current verdict plus an optional munging function.
    ///
    /// Idempotent; may be called many times. Returns [`Kind::Null`] only
    /// when every sample so far was null - the caller is expected to
    /// substitute [`Kind::Text`].
    pub fn detect(&self) -> (Kind, Option<MungeFn>) {
        let kind = match self.running {
            Kind::Unknown => Kind::Null,
            k => k,
        };

        let munger: Option<MungeFn> = match kind {
            Kind::Int => Some(munge_int),
            Kind::Date => Some(munge_date),
            Kind::Time => Some(munge_time),
            Kind::Datetime => Some(munge_datetime),
            _ => None,
        };

        (kind, munger)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Classify a single non-null JSON value.
fn observe_kind(val: &Value) -> Kind {
    match val {
        Value::Bool(_) => Kind::Bool,
        Value::Number(n) => {
            // JSON has a single numeric type; an integer-valued float must
            // not force Float onto an integer column.
            if n.is_i64() || n.is_u64() || is_integral_float(n) {
                Kind::Int
            } else {
                Kind::Float
            }
        }
        Value::String(s) => probe_temporal(s).unwrap_or(Kind::Text),
        // Objects and arrays never reach a detector; the processor routes
        // them to entities.
        _ => Kind::Text,
    }
}

fn is_integral_float(n: &Number) -> bool {
    n.as_f64()
        .map(|f| f.is_finite() && f.fract() == 0.0)
        .unwrap_or(false)
}

/// Probe a string for date/time patterns. Datetime is checked first so an
/// ambiguous value lands on the broader kind.
fn probe_temporal(s: &str) -> Option<Kind> {
    if parse_datetime(s).is_some() {
        return Some(Kind::Datetime);
    }
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return Some(Kind::Date);
    }
    if parse_time(s).is_some() {
        return Some(Kind::Time);
    }
    None
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    for fmt in ["%H:%M:%S%.f", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    None
}

/// One widening step along the kind lattice.
fn widen(current: Kind, observed: Kind) -> Kind {
    match (current, observed) {
        (Kind::Unknown, k) => k,
        (c, o) if c == o => c,
        (Kind::Int, Kind::Float) | (Kind::Float, Kind::Int) => Kind::Float,
        _ => Kind::Text,
    }
}

fn not_representable(kind: Kind, val: &Value) -> KindError {
    KindError::ValueNotRepresentable {
        kind,
        value: val.to_string(),
    }
}

pub fn munge_int(val: &Value) -> Result<Value, KindError> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(val.clone()),
        Value::Number(n) if is_integral_float(n) => {
            let f = n.as_f64().expect("checked integral float");
            Ok(Value::Number(Number::from(f as i64)))
        }
        other => Err(not_representable(Kind::Int, other)),
    }
}

pub fn munge_date(val: &Value) -> Result<Value, KindError> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| not_representable(Kind::Date, val)),
        other => Err(not_representable(Kind::Date, other)),
    }
}

pub fn munge_time(val: &Value) -> Result<Value, KindError> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::String(s) => parse_time(s)
            .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
            .ok_or_else(|| not_representable(Kind::Time, val)),
        other => Err(not_representable(Kind::Time, other)),
    }
}

pub fn munge_datetime(val: &Value) -> Result<Value, KindError> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::String(s) => parse_datetime(s)
            .map(|dt| {
                Value::String(dt.to_rfc3339_opts(
                    chrono::SecondsFormat::Secs,
                    true,
                ))
            })
            .ok_or_else(|| not_representable(Kind::Datetime, val)),
        other => Err(not_representable(Kind::Datetime, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detect_all(vals: &[Value]) -> Kind {
        let mut d = KindDetector::new(64);
        for v in vals {
            d.sample(v);
        }
        d.detect().0
    }

    #[test]
    fn int_stays_int() {
        assert_eq!(detect_all(&[json!(1), json!(2), json!(-3)]), Kind::Int);
    }

    #[test]
    fn integral_float_coerces_to_int() {
        assert_eq!(detect_all(&[json!(1.0), json!(2.0)]), Kind::Int);
    }

    #[test]
    fn int_widens_to_float() {
        assert_eq!(detect_all(&[json!(1), json!(2.5)]), Kind::Float);
    }

    #[test]
    fn int_widens_to_text_on_string() {
        assert_eq!(detect_all(&[json!(1), json!("x")]), Kind::Text);
    }

    #[test]
    fn bool_widens_to_text() {
        assert_eq!(detect_all(&[json!(true), json!(1)]), Kind::Text);
    }

    #[test]
    fn temporal_strings() {
        assert_eq!(detect_all(&[json!("2023-04-01")]), Kind::Date);
        assert_eq!(detect_all(&[json!("13:45:10")]), Kind::Time);
        assert_eq!(
            detect_all(&[json!("2023-04-01T13:45:10Z")]),
            Kind::Datetime
        );
        assert_eq!(
            detect_all(&[json!("2023-04-01 13:45:10")]),
            Kind::Datetime
        );
    }

    #[test]
    fn mixed_temporal_widens_to_text() {
        assert_eq!(
            detect_all(&[json!("2023-04-01"), json!("13:45:10")]),
            Kind::Text
        );
    }

    #[test]
    fn null_only_detects_null() {
        assert_eq!(detect_all(&[json!(null), json!(null)]), Kind::Null);
        assert_eq!(detect_all(&[]), Kind::Null);
    }

    #[test]
    fn nulls_do_not_disturb_verdict() {
        assert_eq!(detect_all(&[json!(1), json!(null), json!(2)]), Kind::Int);
    }

    #[test]
    fn text_is_a_sink() {
        assert_eq!(
            detect_all(&[json!("x"), json!(1), json!(true), json!(2.5)]),
            Kind::Text
        );
    }

    #[test]
    fn verdict_freezes_at_sample_cap() {
        let mut d = KindDetector::new(2);
        d.sample(&json!(1));
        d.sample(&json!(2));
        assert!(!d.is_frozen());
        d.sample(&json!("late evidence"));
        assert!(d.is_frozen());
        assert_eq!(d.detect().0, Kind::Int);
    }

    #[test]
    fn detect_is_idempotent() {
        let mut d = KindDetector::new(8);
        d.sample(&json!(1));
        assert_eq!(d.detect().0, Kind::Int);
        assert_eq!(d.detect().0, Kind::Int);
    }

    #[test]
    fn int_munger_normalizes_integral_float() {
        let (kind, munger) = {
            let mut d = KindDetector::new(8);
            d.sample(&json!(1.0));
            d.detect()
        };
        assert_eq!(kind, Kind::Int);
        let munger = munger.unwrap();
        assert_eq!(munger(&json!(7.0)).unwrap(), json!(7));
        assert_eq!(munger(&json!(null)).unwrap(), json!(null));
        assert!(munger(&json!("nope")).is_err());
    }

    #[test]
    fn datetime_munger_normalizes_to_rfc3339() {
        let out = munge_datetime(&json!("2023-04-01 13:45:10")).unwrap();
        assert_eq!(out, json!("2023-04-01T13:45:10Z"));
    }
}
