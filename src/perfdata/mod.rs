//! Parser for plugin performance data.
//!
//! Turns strings such as `rta=0.083000ms;10.000000;15.000000;0.000000`
//! into metric points. Parsing never fails: fields that cannot be read are
//! dropped and the result may be empty.

mod tokenizer;

pub use tokenizer::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffixes of the points derived from the optional trailing tokens.
const THRESHOLD_SUFFIXES: [&str; 4] = ["warning", "critical", "min", "max"];

/// A numeric value that remembers whether it was written as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{}", v),
            // Keep a decimal point so the value reads back as a float
            MetricValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// A single named measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: MetricValue,
    /// Unit of measure, empty when the plugin gave none.
    pub uom: String,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: MetricValue, uom: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            uom: uom.into(),
        }
    }
}

/// Points extracted from one check result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointSet {
    points: Vec<MetricPoint>,
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: MetricPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricPoint> {
        self.points.iter()
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// Render the set back to perfdata, one `name=valueUOM` field per point.
    pub fn to_perfdata(&self) -> String {
        self.points
            .iter()
            .map(|p| format!("{}={}{}", p.name, p.value, p.uom))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<Vec<MetricPoint>> for PointSet {
    fn from(points: Vec<MetricPoint>) -> Self {
        Self { points }
    }
}

impl IntoIterator for PointSet {
    type Item = MetricPoint;
    type IntoIter = std::vec::IntoIter<MetricPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a MetricPoint;
    type IntoIter = std::slice::Iter<'a, MetricPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Parse a perfdata string into a point set.
pub fn parse(raw: &str) -> PointSet {
    let mut set = PointSet::new();

    for field in tokenize(raw) {
        let name = normalize_name(&field.label);
        if name.is_empty() {
            tracing::debug!(label = %field.label, "Skipping perfdata field with empty name");
            continue;
        }

        let mut tokens = field.value.split(';');
        let Some((value, uom)) = tokens.next().and_then(split_numeric) else {
            tracing::debug!(field = %name, value = field.value, "Skipping non-numeric perfdata field");
            continue;
        };
        let has_thresholds = field.value.contains(';');
        let percent = uom == "%";

        set.push(MetricPoint::new(name.clone(), value, uom));

        for suffix in THRESHOLD_SUFFIXES {
            let token = tokens.next().map(str::trim).unwrap_or("");
            let threshold = if token.is_empty() {
                percent_bound(suffix, percent && has_thresholds)
            } else {
                threshold_value(token)
            };

            if let Some(threshold) = threshold {
                set.push(MetricPoint::new(format!("{}_{}", name, suffix), threshold, uom));
            }
        }
    }

    set
}

/// Implicit bounds of a percentage: `min` is 0 and `max` is 100.
fn percent_bound(suffix: &str, percent: bool) -> Option<MetricValue> {
    match (percent, suffix) {
        (true, "min") => Some(MetricValue::Int(0)),
        (true, "max") => Some(MetricValue::Int(100)),
        _ => None,
    }
}

/// Read a warning/critical/min/max token.
///
/// Nagios ranges (`@10:20`, `10:`, `~:10`) yield their first numeric bound.
fn threshold_value(token: &str) -> Option<MetricValue> {
    let token = token.strip_prefix('@').unwrap_or(token);
    match token.split_once(':') {
        Some((start, end)) => split_numeric(start)
            .or_else(|| split_numeric(end))
            .map(|(v, _)| v),
        None => split_numeric(token).map(|(v, _)| v),
    }
}

/// Split a token into its leading numeric literal and the rest (the unit).
///
/// Returns `None` when the token does not start with a number.
fn split_numeric(token: &str) -> Option<(MetricValue, &str)> {
    let bytes = token.as_bytes();
    let mut end = 0;
    let mut is_float = false;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if digits > 0 || frac_end > frac_start {
            digits += frac_end - frac_start;
            end = frac_end;
            is_float = true;
        }
    }

    if digits == 0 {
        return None;
    }

    // Exponent only when digits follow, so units such as `EB` survive
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
            is_float = true;
        }
    }

    let literal = &token[..end];
    let value = if is_float {
        MetricValue::Float(literal.parse().ok()?)
    } else {
        match literal.parse::<i64>() {
            Ok(v) => MetricValue::Int(v),
            Err(_) => MetricValue::Float(literal.parse().ok()?),
        }
    };

    Some((value, &token[end..]))
}
