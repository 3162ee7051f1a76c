//! The survey lifecycle state machine.
//!
//! # Phases
//!
//! ```text
//! Idle -> Running -> Details -> Analyzing -> Complete
//!                       ^           |
//!                       +-----------+  (insight failure)
//! any -> Idle                          (reset)
//! ```
//!
//! [`SurveyState::apply`] is a pure transition function: it never modifies
//! the state it is called on. It returns the next state together with the
//! [`Effect`]s a driver must carry out (start or stop the ticker, request or
//! cancel insights). [`crate::session`] is the async driver used in
//! production; tests drive the state machine directly.
//!
//! # Policies
//!
//! - Resubmitting after an insight failure **replaces** the survey's
//!   unanalyzed record instead of adding a second one.
//! - Every insight request carries a ticket. Completions whose ticket is not
//!   the one in flight (for example after a reset) are ignored.
//! - Whether reset clears the history is a [`ResetPolicy`].
//! - An invalid submission keeps the survey in Details and stores the
//!   per-field errors on the state, so they show up in the snapshot. They are
//!   cleared by the next valid submission, a new start, or a reset.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::SurveyError;
use crate::form::{DetailsSubmission, ValidationErrors};
use crate::insight::InsightRequest;
use crate::model::{AnalysisResult, SurveyRecord, VehicleCategory, VehicleCounts};
use crate::tally::{DistributionRow, VehicleTally};
use crate::timer::{SurveyTimer, clamp_duration, format_clock};

/// One state of the survey lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Waiting for the surveyor to start.
    Idle,
    /// Counting vehicles while the timer runs.
    Running,
    /// Counts frozen; entering observations.
    Details,
    /// Waiting for the insight service.
    Analyzing,
    /// Analysis available.
    Complete,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Details => "details",
            Phase::Analyzing => "analyzing",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What happens to the survey history on reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Reset discards every recorded survey.
    #[default]
    ClearHistory,
    /// Reset only abandons the survey in progress.
    KeepHistory,
}

impl FromStr for ResetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" | "clear_history" => Ok(ResetPolicy::ClearHistory),
            "keep" | "keep_history" => Ok(ResetPolicy::KeepHistory),
            other => Err(format!("unknown reset policy '{}'", other)),
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone)]
pub enum Command {
    /// Declare the duration of the next survey.
    SetDuration { minutes: i64 },
    /// Start counting. `None` uses the declared duration.
    Start { minutes: Option<i64> },
    /// One second elapsed.
    Tick,
    FinishEarly,
    Increment(VehicleCategory),
    Decrement(VehicleCategory),
    SetCount { category: VehicleCategory, raw: String },
    Submit {
        submission: DetailsSubmission,
        submitted_at: DateTime<FixedOffset>,
    },
    InsightReady { ticket: u64, result: AnalysisResult },
    InsightFailed { ticket: u64, message: String },
    Reset,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetDuration { .. } => "set the duration",
            Command::Start { .. } => "start a survey",
            Command::Tick => "tick the timer",
            Command::FinishEarly => "finish counting",
            Command::Increment(_) | Command::Decrement(_) | Command::SetCount { .. } => {
                "change vehicle counts"
            }
            Command::Submit { .. } => "submit details",
            Command::InsightReady { .. } | Command::InsightFailed { .. } => "accept insights",
            Command::Reset => "reset",
        }
    }
}

/// Work the driver must do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Begin the one-second tick.
    StartTicker,
    /// Cancel the tick.
    StopTicker,
    /// Fetch insights for `record_id` and report back with `ticket`.
    RequestInsight {
        ticket: u64,
        record_id: String,
        request: InsightRequest,
    },
    /// Abandon the in-flight insight request.
    CancelInsight,
}

/// Result of [`SurveyState::apply`].
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SurveyState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: SurveyState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Complete state of one survey session.
#[derive(Debug, Clone)]
pub struct SurveyState {
    phase: Phase,
    reset_policy: ResetPolicy,
    duration_minutes: u32,
    timer: Option<SurveyTimer>,
    tally: VehicleTally,
    /// Most recent first. Replaced wholesale, never mutated in place.
    history: Arc<[SurveyRecord]>,
    analysis: Option<AnalysisResult>,
    /// Record of the current survey that has no analysis yet.
    pending_record: Option<String>,
    last_error: Option<String>,
    /// Field errors of the last rejected submission.
    field_errors: Option<ValidationErrors>,
    in_flight: Option<u64>,
    next_ticket: u64,
}

impl Default for SurveyState {
    fn default() -> Self {
        Self::new(ResetPolicy::default(), 1)
    }
}

impl SurveyState {
    pub fn new(reset_policy: ResetPolicy, default_duration_minutes: i64) -> Self {
        Self {
            phase: Phase::Idle,
            reset_policy,
            duration_minutes: clamp_duration(default_duration_minutes),
            timer: None,
            tally: VehicleTally::new(),
            history: Arc::from(Vec::new()),
            analysis: None,
            pending_record: None,
            last_error: None,
            field_errors: None,
            in_flight: None,
            next_ticket: 1,
        }
    }

    /// Compute the transition for `command`.
    ///
    /// Commands that make no sense in the current phase are rejected with
    /// [`SurveyError::InvalidTransition`]. Insight completions that are no
    /// longer awaited are accepted and ignored.
    pub fn apply(&self, command: Command) -> Result<Transition, SurveyError> {
        let mut next = self.clone();

        match (self.phase, command) {
            (Phase::Idle, Command::SetDuration { minutes }) => {
                next.duration_minutes = clamp_duration(minutes);
                Ok(Transition::to(next))
            }

            (Phase::Idle, Command::Start { minutes }) => {
                let timer = SurveyTimer::start(minutes.unwrap_or(i64::from(self.duration_minutes)));
                next.duration_minutes = timer.duration_minutes();
                next.timer = Some(timer);
                next.tally = VehicleTally::new();
                next.analysis = None;
                next.pending_record = None;
                next.last_error = None;
                next.field_errors = None;
                next.phase = Phase::Running;
                Ok(Transition::to(next).with(Effect::StartTicker))
            }

            (Phase::Running, Command::Tick) => {
                let expired = next.timer.as_mut().is_some_and(SurveyTimer::tick);
                if expired {
                    next.phase = Phase::Details;
                    return Ok(Transition::to(next).with(Effect::StopTicker));
                }
                Ok(Transition::to(next))
            }

            (Phase::Running, Command::FinishEarly) => {
                if let Some(timer) = next.timer.as_mut() {
                    timer.finish_early();
                }
                next.phase = Phase::Details;
                Ok(Transition::to(next).with(Effect::StopTicker))
            }

            // Expiry already fired
            (Phase::Details, Command::FinishEarly) => Ok(Transition::to(next)),

            (Phase::Running, Command::Increment(category)) => {
                next.tally.increment(category);
                Ok(Transition::to(next))
            }

            (Phase::Running, Command::Decrement(category)) => {
                next.tally.decrement(category);
                Ok(Transition::to(next))
            }

            (Phase::Running, Command::SetCount { category, raw }) => {
                next.tally.set_direct(category, &raw);
                Ok(Transition::to(next))
            }

            (
                Phase::Details,
                Command::Submit {
                    submission,
                    submitted_at,
                },
            ) => {
                let details = match submission.validate() {
                    Ok(details) => details,
                    Err(errors) => {
                        next.field_errors = Some(errors);
                        return Ok(Transition::to(next));
                    }
                };
                let record = SurveyRecord::new(
                    self.tally.counts(),
                    details,
                    self.duration_minutes,
                    submitted_at,
                );

                next.history = self.history_with(record.clone());
                next.pending_record = Some(record.id.clone());
                next.analysis = None;
                next.last_error = None;
                next.field_errors = None;

                let ticket = self.next_ticket;
                next.next_ticket = ticket + 1;
                next.in_flight = Some(ticket);
                next.phase = Phase::Analyzing;

                Ok(Transition::to(next).with(Effect::RequestInsight {
                    ticket,
                    request: InsightRequest::from(&record),
                    record_id: record.id,
                }))
            }

            (_, Command::InsightReady { ticket, result }) => {
                if !self.awaiting(ticket) {
                    return Ok(Transition::to(next));
                }
                next.analysis = Some(result);
                next.pending_record = None;
                next.in_flight = None;
                next.phase = Phase::Complete;
                Ok(Transition::to(next))
            }

            (_, Command::InsightFailed { ticket, message }) => {
                if !self.awaiting(ticket) {
                    return Ok(Transition::to(next));
                }
                next.last_error = Some(message);
                next.in_flight = None;
                next.phase = Phase::Details;
                Ok(Transition::to(next))
            }

            (phase, Command::Reset) => {
                next.phase = Phase::Idle;
                next.timer = None;
                next.tally = VehicleTally::new();
                next.analysis = None;
                next.pending_record = None;
                next.last_error = None;
                next.field_errors = None;
                next.in_flight = None;
                if self.reset_policy == ResetPolicy::ClearHistory {
                    next.history = Arc::from(Vec::new());
                }

                let mut transition = Transition::to(next);
                match phase {
                    Phase::Running => transition = transition.with(Effect::StopTicker),
                    Phase::Analyzing => transition = transition.with(Effect::CancelInsight),
                    _ => {}
                }
                Ok(transition)
            }

            (phase, command) => Err(SurveyError::InvalidTransition {
                phase,
                command: command.name(),
            }),
        }
    }

    /// New history with `record` at the front.
    ///
    /// The current survey's unanalyzed record, if any, is superseded.
    fn history_with(&self, record: SurveyRecord) -> Arc<[SurveyRecord]> {
        let superseded = self.pending_record.as_deref();
        std::iter::once(record)
            .chain(
                self.history
                    .iter()
                    .filter(|r| Some(r.id.as_str()) != superseded)
                    .cloned(),
            )
            .collect()
    }

    fn awaiting(&self, ticket: u64) -> bool {
        self.phase == Phase::Analyzing && self.in_flight == Some(ticket)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reset_policy(&self) -> ResetPolicy {
        self.reset_policy
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn timer(&self) -> Option<&SurveyTimer> {
        self.timer.as_ref()
    }

    pub fn tally(&self) -> &VehicleTally {
        &self.tally
    }

    pub fn history(&self) -> &[SurveyRecord] {
        &self.history
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn pending_record(&self) -> Option<&str> {
        self.pending_record.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn field_errors(&self) -> Option<&ValidationErrors> {
        self.field_errors.as_ref()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Whether the latest analysis describes `record_id`.
    pub fn is_analyzed(&self, record_id: &str) -> bool {
        self.analysis
            .as_ref()
            .is_some_and(|a| a.record_id == record_id)
    }

    pub fn snapshot(&self) -> SurveySnapshot {
        let remaining_secs = self.timer.map(|t| t.remaining_secs()).unwrap_or(0);
        SurveySnapshot {
            phase: self.phase,
            duration_minutes: self.duration_minutes,
            remaining_secs,
            remaining_label: format_clock(remaining_secs),
            counts: self.tally.counts(),
            total: self.tally.total(),
            distribution: self.tally.distribution(),
            history: Arc::clone(&self.history),
            analysis: self.analysis.clone(),
            pending_record: self.pending_record.clone(),
            last_error: self.last_error.clone(),
            field_errors: self.field_errors.clone(),
            controls: Controls::for_phase(self.phase),
        }
    }
}

/// Which user actions the current phase allows.
///
/// Reset stays available while analyzing; it cancels the outstanding
/// insight request and any late answer is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Controls {
    pub can_set_duration: bool,
    pub can_start: bool,
    pub can_count: bool,
    pub can_finish: bool,
    pub can_submit: bool,
    pub can_export: bool,
    pub can_reset: bool,
}

impl Controls {
    fn for_phase(phase: Phase) -> Self {
        Self {
            can_set_duration: phase == Phase::Idle,
            can_start: phase == Phase::Idle,
            can_count: phase == Phase::Running,
            can_finish: phase == Phase::Running,
            can_submit: phase == Phase::Details,
            can_export: phase == Phase::Complete,
            can_reset: phase != Phase::Idle,
        }
    }
}

/// Read-only view of a [`SurveyState`] for rendering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySnapshot {
    pub phase: Phase,
    pub duration_minutes: u32,
    pub remaining_secs: u32,
    /// `MM:SS`.
    pub remaining_label: String,
    pub counts: VehicleCounts,
    pub total: u64,
    pub distribution: Vec<DistributionRow>,
    pub history: Arc<[SurveyRecord]>,
    pub analysis: Option<AnalysisResult>,
    pub pending_record: Option<String>,
    pub last_error: Option<String>,
    /// Per-field problems of the last rejected submission.
    pub field_errors: Option<ValidationErrors>,
    pub controls: Controls,
}
