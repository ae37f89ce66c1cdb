//! Pure stage functions.
//!
//! Nothing in here touches shared state, so every function is safe to call
//! concurrently from any number of partition workers. Malformed input is
//! reported as a value ([`ValidationOutcome::Rejected`] or [`ParseFailure`]),
//! never as a panic.

use thiserror::Error;

use crate::record::{AggregateState, ParsedEvent, RejectReason, ValidationOutcome};

/// Default delimiter for weather readings (`station,temperature,humidity`)
pub const DEFAULT_DELIMITER: &str = ",";

/// Minimum number of fields a reading needs: station plus two metrics
pub const MIN_FIELD_COUNT: usize = 3;

/// Why a delimited value could not be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("expected at least {expected} fields, found {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("station field is empty")]
    EmptyStation,
    #[error("field {index} is not a finite number: {value:?}")]
    InvalidNumber { index: usize, value: String },
}

/// Trim, collapse whitespace runs into a single space and upper-case.
///
/// `clean(clean(x)) == clean(x)` for every input.
pub fn clean(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Validate an already cleaned value.
///
/// Checks run in a fixed order and the first failing one wins: empty, then
/// forbidden word (case-sensitive substring), then length in characters.
pub fn validate(
    cleaned: &str,
    forbidden_words: &[String],
    max_length: usize,
) -> ValidationOutcome {
    if cleaned.trim().is_empty() {
        return ValidationOutcome::Rejected(RejectReason::Empty);
    }

    if forbidden_words
        .iter()
        .any(|word| !word.is_empty() && cleaned.contains(word.as_str()))
    {
        return ValidationOutcome::Rejected(RejectReason::ForbiddenWord);
    }

    if cleaned.chars().count() > max_length {
        return ValidationOutcome::Rejected(RejectReason::TooLong);
    }

    ValidationOutcome::Valid(cleaned.to_string())
}

/// Parse `station,temperature,humidity` with the default delimiter.
pub fn parse_delimited(raw: &str, field_count: usize) -> Result<ParsedEvent, ParseFailure> {
    parse_delimited_with(raw, DEFAULT_DELIMITER, field_count)
}

/// Parse a delimited reading. Fields beyond the first three are ignored, but
/// at least `field_count` of them must be present.
pub fn parse_delimited_with(
    raw: &str,
    delimiter: &str,
    field_count: usize,
) -> Result<ParsedEvent, ParseFailure> {
    let fields: Vec<&str> = raw.split(delimiter).map(str::trim).collect();
    let expected = field_count.max(MIN_FIELD_COUNT);

    if fields.len() < expected {
        return Err(ParseFailure::MissingFields {
            expected,
            found: fields.len(),
        });
    }

    let station = fields[0];
    if station.is_empty() {
        return Err(ParseFailure::EmptyStation);
    }

    Ok(ParsedEvent {
        station: station.to_string(),
        temperature_c: parse_metric(fields[1], 1)?,
        humidity: parse_metric(fields[2], 2)?,
    })
}

fn parse_metric(field: &str, index: usize) -> Result<f64, ParseFailure> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseFailure::InvalidNumber {
            index,
            value: field.to_string(),
        }),
    }
}

/// Celsius to Fahrenheit.
pub fn convert_unit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Labels and units used when rendering an aggregate result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLabels {
    pub metric_a_label: String,
    pub metric_a_unit: String,
    pub metric_b_label: String,
    pub metric_b_unit: String,
}

impl Default for ResultLabels {
    fn default() -> Self {
        Self {
            metric_a_label: "Température Moyenne".to_string(),
            metric_a_unit: "°F".to_string(),
            metric_b_label: "Humidité Moyenne".to_string(),
            metric_b_unit: "%".to_string(),
        }
    }
}

/// Render `"<key> : <A label> = <avgA><unit>, <B label> = <avgB><unit>"` with
/// two decimal places.
pub fn format_result(key: &str, state: &AggregateState, labels: &ResultLabels) -> String {
    let (avg_a, avg_b) = state.average();
    format!(
        "{key} : {} = {avg_a:.2}{}, {} = {avg_b:.2}{}",
        labels.metric_a_label, labels.metric_a_unit, labels.metric_b_label, labels.metric_b_unit
    )
}
