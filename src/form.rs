//! Validation of the observation form filled in after counting.
//!
//! The front-end sends every field as optional raw text. Validation collects
//! one [`FieldError`] per bad field instead of stopping at the first, so the
//! form can highlight all of them at once.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{CongestionCause, Locality, ObservationDetails, Rating};

/// Raw observation form as submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsSubmission {
    pub human_flow: Option<String>,
    pub jams: Option<String>,
    pub delays: Option<String>,
    pub signals: Option<String>,
    pub wrong_direction: Option<String>,
    pub locality: Option<String>,
    pub congestion_cause: Option<String>,
    pub remarks: Option<String>,
}

/// A single invalid form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// camelCase field name as used on the wire.
    pub field: &'static str,
    pub message: String,
}

/// All field errors from one submission. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|e| e.field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "invalid observation details ({})", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl DetailsSubmission {
    /// The values the survey form starts with.
    pub fn defaults() -> Self {
        Self {
            human_flow: Some(Rating::Normal.to_string()),
            jams: Some(Rating::Normal.to_string()),
            delays: Some(Rating::Normal.to_string()),
            signals: Some(Rating::Normal.to_string()),
            wrong_direction: Some(Rating::Less.to_string()),
            locality: Some(Locality::MixedUse.to_string()),
            congestion_cause: Some(CongestionCause::PeakHourRush.to_string()),
            remarks: None,
        }
    }

    pub fn validate(&self) -> Result<ObservationDetails, ValidationErrors> {
        let mut errors = Vec::new();

        let human_flow = required::<Rating>("humanFlow", &self.human_flow, &mut errors);
        let jams = required::<Rating>("jams", &self.jams, &mut errors);
        let delays = required::<Rating>("delays", &self.delays, &mut errors);
        let signals = required::<Rating>("signals", &self.signals, &mut errors);
        let wrong_direction =
            required::<Rating>("wrongDirection", &self.wrong_direction, &mut errors);
        let locality = required::<Locality>("locality", &self.locality, &mut errors);
        let congestion_cause =
            required::<CongestionCause>("congestionCause", &self.congestion_cause, &mut errors);

        match (
            human_flow,
            jams,
            delays,
            signals,
            wrong_direction,
            locality,
            congestion_cause,
        ) {
            (
                Some(human_flow),
                Some(jams),
                Some(delays),
                Some(signals),
                Some(wrong_direction),
                Some(locality),
                Some(congestion_cause),
            ) if errors.is_empty() => Ok(ObservationDetails {
                human_flow,
                jams,
                delays,
                signals,
                wrong_direction,
                locality,
                congestion_cause,
                remarks: normalize_remarks(self.remarks.as_deref()),
            }),
            _ => Err(ValidationErrors(errors)),
        }
    }
}

fn required<T>(field: &'static str, raw: &Option<String>, errors: &mut Vec<FieldError>) -> Option<T>
where
    T: FromStr<Err = crate::model::UnknownVariant>,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push(FieldError {
                field,
                message: "Please select a value.".to_string(),
            });
            None
        }
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                errors.push(FieldError {
                    field,
                    message: e.to_string(),
                });
                None
            }
        },
    }
}

fn normalize_remarks(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
