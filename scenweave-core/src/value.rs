//! Parameter value language: per-cell encoded expressions.
//!
//! A cell can hold a bare literal, an enumeration (`30/50/70`), a range
//! (`10*5*80` with exactly two separators: min, step, max), an optional unit
//! suffix (`60km/h`) and an optional pairing marker (`30/50/70&`). Parsing is
//! a pure function; malformed input falls back to the original text silently
//! and callers validate downstream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A fully resolved scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view; integers widen to floats.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Multiply a numeric scalar by a unit factor; text passes through.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        if (factor - 1.0).abs() < f64::EPSILON {
            return self;
        }
        match self {
            Self::Int(v) => number(v as f64 * factor),
            Self::Float(v) => Self::Float(v * factor),
            Self::Text(_) => self,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// A parsed cell before generalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Single value, broadcast unchanged during expansion.
    Scalar(Scalar),
    /// Independent alternatives, exploded cartesian-style.
    Enum(Vec<Scalar>),
    /// Inclusive numeric range; expands to `floor((max-min)/step)+1` values.
    Range { min: f64, step: f64, max: f64 },
    /// Alternatives marked for lock-step expansion within their group.
    Paired(Vec<Scalar>),
}

impl ParamValue {
    /// Number of concrete values this cell contributes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Enum(values) | Self::Paired(values) => values.len(),
            Self::Range { min, step, max } => range_count(*min, *step, *max),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn is_paired(&self) -> bool {
        matches!(self, Self::Paired(_))
    }

    /// Materialize the cell as a list of scalars.
    #[must_use]
    pub fn values(&self) -> Vec<Scalar> {
        match self {
            Self::Scalar(value) => vec![value.clone()],
            Self::Enum(values) | Self::Paired(values) => values.clone(),
            Self::Range { min, step, max } => expand_range(*min, *step, *max),
        }
    }
}

/// Inclusive range cardinality. Degenerate steps collapse to a single value.
fn range_count(min: f64, step: f64, max: f64) -> usize {
    if step == 0.0 {
        return 1;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = ((max - min) / step).abs().floor() as usize + 1;
    count
}

/// Evenly spaced expansion between min and max, inclusive of both ends.
/// Values are interpolated rather than accumulated so a fractional step
/// cannot drift the count.
fn expand_range(min: f64, step: f64, max: f64) -> Vec<Scalar> {
    let count = range_count(min, step, max);
    if count == 1 {
        return vec![number(min)];
    }
    let span = max - min;
    (0..count)
        .map(|i| number(min + span * (i as f64) / ((count - 1) as f64)))
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn number(value: f64) -> Scalar {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Scalar::Int(value as i64)
    } else {
        Scalar::Float(value)
    }
}

/// The configurable marker set of the cell language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Markers {
    /// Suffix marking one-to-one pairing within a structural group.
    #[serde(default = "Markers::default_pairing")]
    pub pairing: String,
    /// Separator between enumeration alternatives.
    #[serde(default = "Markers::default_enumeration")]
    pub enumeration: String,
    /// Separator of the min/step/max triple.
    #[serde(default = "Markers::default_range")]
    pub range: String,
    /// Unit suffix table: matched at the end of a cell, stripped, factor
    /// recorded.
    #[serde(default = "Markers::default_units")]
    pub units: BTreeMap<String, f64>,
}

impl Markers {
    fn default_pairing() -> String {
        "&".to_string()
    }

    fn default_enumeration() -> String {
        "/".to_string()
    }

    fn default_range() -> String {
        "*".to_string()
    }

    fn default_units() -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("km/h".to_string(), 1.0 / 3.6),
            ("kph".to_string(), 1.0 / 3.6),
            ("m/s".to_string(), 1.0),
            ("km".to_string(), 1000.0),
            ("m".to_string(), 1.0),
            ("min".to_string(), 60.0),
            ("s".to_string(), 1.0),
            ("ms".to_string(), 0.001),
        ])
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            pairing: Self::default_pairing(),
            enumeration: Self::default_enumeration(),
            range: Self::default_range(),
            units: Self::default_units(),
        }
    }
}

/// One parsed cell: the value plus the factor of any stripped unit suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct CellValue {
    pub value: ParamValue,
    pub unit_factor: f64,
}

impl CellValue {
    #[must_use]
    pub fn scalar(value: Scalar) -> Self {
        Self {
            value: ParamValue::Scalar(value),
            unit_factor: 1.0,
        }
    }
}

/// Parse one raw cell.
///
/// Recognition order: unit suffix, pairing marker, range triple, enumeration,
/// bare literal. The bare-literal precedence integer → float → structured
/// literal → string is a hard contract; malformed literals stay text.
#[must_use]
pub fn parse_cell(raw: &str, markers: &Markers) -> CellValue {
    let mut text = raw.trim().to_string();

    let unit_factor = strip_unit(&mut text, markers);

    let mut paired = false;
    if !markers.pairing.is_empty()
        && text.len() > markers.pairing.len()
        && text.ends_with(&markers.pairing)
    {
        text.truncate(text.len() - markers.pairing.len());
        paired = true;
    }

    let value = parse_body(&text, markers);
    let value = if paired {
        ParamValue::Paired(value.values())
    } else {
        value
    };

    CellValue { value, unit_factor }
}

/// Strip a known unit suffix, longest match first, and return its factor.
/// A suffix only counts when something parseable remains in front of it.
fn strip_unit(text: &mut String, markers: &Markers) -> f64 {
    let mut candidates: Vec<(&String, &f64)> = markers.units.iter().collect();
    candidates.sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));

    for (suffix, factor) in candidates {
        if let Some(stripped) = text.strip_suffix(suffix.as_str()) {
            let head = stripped.trim_end();
            if !head.is_empty() && head.ends_with(|c: char| c.is_ascii_digit()) {
                *text = head.to_string();
                return *factor;
            }
        }
    }
    1.0
}

fn parse_body(text: &str, markers: &Markers) -> ParamValue {
    if !markers.range.is_empty() {
        let parts: Vec<&str> = text.split(markers.range.as_str()).collect();
        if parts.len() == 3 {
            if let (Some(min), Some(step), Some(max)) = (
                parse_number(parts[0]),
                parse_number(parts[1]),
                parse_number(parts[2]),
            ) {
                return ParamValue::Range { min, step, max };
            }
        }
    }

    if !markers.enumeration.is_empty() && text.contains(markers.enumeration.as_str()) {
        let values = text
            .split(markers.enumeration.as_str())
            .map(parse_literal)
            .collect();
        return ParamValue::Enum(values);
    }

    match parse_structured(text) {
        Some(value) => value,
        None => ParamValue::Scalar(parse_literal(text)),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

/// Bare literal: integer, then float, then the caller tries structured.
fn parse_literal(text: &str) -> Scalar {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Scalar::Int(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Scalar::Float(value);
    }
    Scalar::Text(trimmed.to_string())
}

/// Structured-literal fallback: a JSON array of scalars becomes an
/// enumeration. Anything else (objects, malformed JSON) is left for the
/// string fallback.
fn parse_structured(text: &str) -> Option<ParamValue> {
    let trimmed = text.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let items = parsed.as_array()?;
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        values.push(match item {
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Scalar::Int(v)
                } else {
                    Scalar::Float(n.as_f64()?)
                }
            }
            serde_json::Value::String(s) => parse_literal(s),
            _ => return None,
        });
    }
    Some(ParamValue::Enum(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Markers {
        Markers::default()
    }

    #[test]
    fn range_expands_inclusive_of_both_ends() {
        let cell = parse_cell("10*5*80", &markers());
        assert_eq!(
            cell.value,
            ParamValue::Range {
                min: 10.0,
                step: 5.0,
                max: 80.0
            }
        );
        let values = cell.value.values();
        assert_eq!(values.len(), 15);
        assert_eq!(values.first(), Some(&Scalar::Int(10)));
        assert_eq!(values.get(1), Some(&Scalar::Int(15)));
        assert_eq!(values.last(), Some(&Scalar::Int(80)));
    }

    #[test]
    fn fractional_step_does_not_drift_count() {
        let cell = parse_cell("0*0.1*1", &markers());
        let values = cell.value.values();
        assert_eq!(values.len(), 11);
        assert_eq!(values.last(), Some(&Scalar::Int(1)));
    }

    #[test]
    fn enumeration_splits_on_separator() {
        let cell = parse_cell("30/50/70", &markers());
        assert_eq!(
            cell.value,
            ParamValue::Enum(vec![Scalar::Int(30), Scalar::Int(50), Scalar::Int(70)])
        );
    }

    #[test]
    fn pairing_marker_is_stripped_and_recorded() {
        let cell = parse_cell("30/50/70&", &markers());
        assert_eq!(
            cell.value,
            ParamValue::Paired(vec![Scalar::Int(30), Scalar::Int(50), Scalar::Int(70)])
        );
    }

    #[test]
    fn paired_scalar_becomes_single_element_list() {
        let cell = parse_cell("42&", &markers());
        assert_eq!(cell.value, ParamValue::Paired(vec![Scalar::Int(42)]));
    }

    #[test]
    fn unit_suffix_is_stripped_and_factor_recorded() {
        let cell = parse_cell("60km/h", &markers());
        assert_eq!(cell.value, ParamValue::Scalar(Scalar::Int(60)));
        assert!((cell.unit_factor - 1.0 / 3.6).abs() < 1e-12);
    }

    #[test]
    fn unit_suffix_requires_a_numeric_head() {
        let cell = parse_cell("vkm", &markers());
        assert_eq!(
            cell.value,
            ParamValue::Scalar(Scalar::Text("vkm".to_string()))
        );
        assert!((cell.unit_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn literal_precedence_int_then_float_then_text() {
        assert_eq!(
            parse_cell("7", &markers()).value,
            ParamValue::Scalar(Scalar::Int(7))
        );
        assert_eq!(
            parse_cell("7.5", &markers()).value,
            ParamValue::Scalar(Scalar::Float(7.5))
        );
        assert_eq!(
            parse_cell("vehicle.car", &markers()).value,
            ParamValue::Scalar(Scalar::Text("vehicle.car".to_string()))
        );
    }

    #[test]
    fn structured_array_literal_becomes_enum() {
        let cell = parse_cell("[1, 2, 3]", &markers());
        assert_eq!(
            cell.value,
            ParamValue::Enum(vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)])
        );
    }

    #[test]
    fn malformed_structured_literal_falls_back_to_text() {
        let cell = parse_cell("[1, 2", &markers());
        assert_eq!(
            cell.value,
            ParamValue::Scalar(Scalar::Text("[1, 2".to_string()))
        );
    }

    #[test]
    fn malformed_range_falls_back_silently() {
        let cell = parse_cell("a*b*c", &markers());
        // Three parts but non-numeric: the enum separator does not match,
        // so the whole cell stays a text scalar.
        assert_eq!(
            cell.value,
            ParamValue::Scalar(Scalar::Text("a*b*c".to_string()))
        );
    }

    #[test]
    fn scaled_keeps_integers_integral_when_possible() {
        assert_eq!(Scalar::Int(2).scaled(1000.0), Scalar::Int(2000));
        assert_eq!(Scalar::Int(10).scaled(1.0 / 3.6), Scalar::Float(10.0 / 3.6));
        assert_eq!(
            Scalar::Text("x".into()).scaled(2.0),
            Scalar::Text("x".into())
        );
    }
}
