//! Error types for the survey lifecycle.

use thiserror::Error;

use crate::controller::Phase;
use crate::form::ValidationErrors;

/// Errors returned by the survey controller and session.
///
/// None of these are fatal: the state is left unchanged and the caller can
/// simply try again.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SurveyError {
    #[error("cannot {command} while the survey is {phase}")]
    InvalidTransition { phase: Phase, command: &'static str },

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("survey session has shut down")]
    SessionClosed,
}
