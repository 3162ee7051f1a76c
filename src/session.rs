//! Async driver for the survey state machine.
//!
//! A session is a single tokio task that owns a [`SurveyState`]. Callers talk
//! to it through a cloneable [`SurveyHandle`]; every command is applied in
//! arrival order, so the state machine never sees concurrent updates.
//!
//! The task also owns the two background activities of a survey:
//!
//! - the one-second [`Ticker`], stopped whenever counting ends or the survey
//!   is reset;
//! - the insight request, spawned on submit and aborted on reset.
//!
//! After every transition the new [`SurveySnapshot`] is published on a
//! `watch` channel, so renderers can read consistent state at any time,
//! including while the insight call is outstanding.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::controller::{Command, Effect, Phase, SurveySnapshot, SurveyState};
use crate::error::SurveyError;
use crate::form::DetailsSubmission;
use crate::insight::{InsightRequest, InsightService};
use crate::model::VehicleCategory;
use crate::timer::Ticker;

/// Tick period of the counting timer.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Capacity of the command queue.
const COMMAND_BUFFER: usize = 64;

type Reply = oneshot::Sender<Result<SurveySnapshot, SurveyError>>;

enum Message {
    Command { command: Command, reply: Reply },
    Shutdown,
}

/// Messages from the session's own background tasks.
enum Event {
    /// A tick from the ticker started in `epoch`.
    Tick { epoch: u64 },
    /// Outcome of an insight request.
    Insight(Command),
}

/// Cloneable handle to a running survey session.
#[derive(Clone)]
pub struct SurveyHandle {
    commands: mpsc::Sender<Message>,
    snapshots: watch::Receiver<SurveySnapshot>,
}

/// Spawn a session task and return its handle.
pub fn spawn_session(service: Arc<dyn InsightService>, state: SurveyState) -> SurveyHandle {
    let (commands, requests) = mpsc::channel(COMMAND_BUFFER);
    let (events_tx, events) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshots) = watch::channel(state.snapshot());

    let session = Session {
        state,
        service,
        events_tx,
        snapshot_tx,
        ticker: None,
        ticker_epoch: 0,
        insight: None,
    };
    tokio::spawn(session.run(requests, events));

    SurveyHandle {
        commands,
        snapshots,
    }
}

impl SurveyHandle {
    async fn send(&self, command: Command) -> Result<SurveySnapshot, SurveyError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Message::Command { command, reply })
            .await
            .map_err(|_| SurveyError::SessionClosed)?;
        response.await.map_err(|_| SurveyError::SessionClosed)?
    }

    pub async fn set_duration(&self, minutes: i64) -> Result<SurveySnapshot, SurveyError> {
        self.send(Command::SetDuration { minutes }).await
    }

    /// Start counting; `None` uses the declared duration.
    pub async fn start(&self, minutes: Option<i64>) -> Result<SurveySnapshot, SurveyError> {
        self.send(Command::Start { minutes }).await
    }

    pub async fn increment(&self, category: VehicleCategory) -> Result<SurveySnapshot, SurveyError> {
        self.send(Command::Increment(category)).await
    }

    pub async fn decrement(&self, category: VehicleCategory) -> Result<SurveySnapshot, SurveyError> {
        self.send(Command::Decrement(category)).await
    }

    pub async fn set_count(
        &self,
        category: VehicleCategory,
        raw: &str,
    ) -> Result<SurveySnapshot, SurveyError> {
        self.send(Command::SetCount {
            category,
            raw: raw.to_string(),
        })
        .await
    }

    pub async fn finish_early(&self) -> Result<SurveySnapshot, SurveyError> {
        self.send(Command::FinishEarly).await
    }

    /// Submit observations, timestamped with the local wall clock.
    pub async fn submit(&self, submission: DetailsSubmission) -> Result<SurveySnapshot, SurveyError> {
        self.submit_at(submission, Local::now().fixed_offset()).await
    }

    /// Submit observations with an explicit timestamp.
    ///
    /// A rejected form still updates the published snapshot; the caller gets
    /// the same field errors as [`SurveyError::Validation`].
    pub async fn submit_at(
        &self,
        submission: DetailsSubmission,
        submitted_at: DateTime<FixedOffset>,
    ) -> Result<SurveySnapshot, SurveyError> {
        let snapshot = self
            .send(Command::Submit {
                submission,
                submitted_at,
            })
            .await?;

        match (snapshot.phase, &snapshot.field_errors) {
            (Phase::Details, Some(errors)) => Err(SurveyError::Validation(errors.clone())),
            _ => Ok(snapshot),
        }
    }

    pub async fn reset(&self) -> Result<SurveySnapshot, SurveyError> {
        self.send(Command::Reset).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SurveySnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SurveySnapshot> {
        self.snapshots.clone()
    }

    /// Wait until the session reaches `phase`.
    pub async fn wait_for_phase(&self, phase: Phase) -> Result<SurveySnapshot, SurveyError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| s.phase == phase)
            .await
            .map_err(|_| SurveyError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    /// Stop the session, cancelling the ticker and any insight request.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Message::Shutdown).await;
    }
}

struct Session {
    state: SurveyState,
    service: Arc<dyn InsightService>,
    events_tx: mpsc::UnboundedSender<Event>,
    snapshot_tx: watch::Sender<SurveySnapshot>,
    ticker: Option<Ticker>,
    /// Bumped for every ticker; ticks from older tickers are dropped.
    ticker_epoch: u64,
    insight: Option<JoinHandle<()>>,
}

impl Session {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Message>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        info!(
            reset_policy = ?self.state.reset_policy(),
            "Survey session started"
        );

        loop {
            tokio::select! {
                message = requests.recv() => match message {
                    Some(Message::Command { command, reply }) => {
                        let result = self.dispatch(command);
                        if reply.send(result).is_err() {
                            debug!("Caller dropped before reply");
                        }
                    }
                    Some(Message::Shutdown) | None => break,
                },

                Some(event) = events.recv() => {
                    let command = match event {
                        Event::Tick { epoch } if epoch == self.ticker_epoch && self.ticker.is_some() => {
                            Command::Tick
                        }
                        Event::Tick { .. } => continue,
                        Event::Insight(command) => command,
                    };
                    if let Err(e) = self.dispatch(command) {
                        debug!(error = %e, "Ignored internal event");
                    }
                }
            }
        }

        self.ticker = None;
        if let Some(handle) = self.insight.take() {
            handle.abort();
        }
        info!("Survey session stopped");
    }

    fn dispatch(&mut self, command: Command) -> Result<SurveySnapshot, SurveyError> {
        let transition = self.state.apply(command)?;
        let from = self.state.phase();
        self.state = transition.state;

        if from != self.state.phase() {
            info!(from = %from, to = %self.state.phase(), "Survey phase changed");
            if let Some(message) = self.state.last_error().filter(|_| from == Phase::Analyzing) {
                warn!(error = %message, "Insight request failed; awaiting resubmission");
            }
        }

        for effect in transition.effects {
            self.perform(effect);
        }

        let snapshot = self.state.snapshot();
        self.snapshot_tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::StartTicker => {
                self.ticker_epoch += 1;
                let epoch = self.ticker_epoch;
                let events = self.events_tx.clone();
                self.ticker = Some(Ticker::spawn(TICK_PERIOD, move || {
                    events.send(Event::Tick { epoch }).is_ok()
                }));
            }
            Effect::StopTicker => {
                if let Some(ticker) = self.ticker.take() {
                    ticker.stop();
                }
            }
            Effect::RequestInsight {
                ticket,
                record_id,
                request,
            } => {
                if let Some(stale) = self.insight.take() {
                    stale.abort();
                }
                self.insight = Some(self.spawn_insight(ticket, record_id, request));
            }
            Effect::CancelInsight => {
                if let Some(handle) = self.insight.take() {
                    info!("Cancelling in-flight insight request");
                    handle.abort();
                }
            }
        }
    }

    #[instrument(skip(self, request))]
    fn spawn_insight(
        &self,
        ticket: u64,
        record_id: String,
        request: InsightRequest,
    ) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let events = self.events_tx.clone();
        info!("Requesting traffic insights");

        tokio::spawn(async move {
            let command = match service.insights(&record_id, &request).await {
                Ok(result) => Command::InsightReady { ticket, result },
                Err(e) => Command::InsightFailed {
                    ticket,
                    message: e.to_string(),
                },
            };
            if events.send(Event::Insight(command)).is_err() {
                debug!("Session gone before insights arrived");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::{Analysis, InsightError, SuggestionRequest, Suggestions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Insight service that waits for a go signal, then answers.
    struct GatedService {
        gate: Notify,
        fail: bool,
        calls: AtomicUsize,
    }

    impl GatedService {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Notify::new(),
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InsightService for GatedService {
        async fn analyze(&self, _request: &InsightRequest) -> Result<Analysis, InsightError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail {
                return Err(InsightError::Malformed("model refused".into()));
            }
            Ok(Analysis {
                conclusion: "busy".into(),
                precautions: "slow down".into(),
            })
        }

        async fn suggest(&self, _request: &SuggestionRequest) -> Result<Suggestions, InsightError> {
            Ok(Suggestions {
                suggestions: "add signal".into(),
            })
        }
    }

    fn valid_details() -> DetailsSubmission {
        DetailsSubmission {
            human_flow: Some("High".into()),
            jams: Some("Normal".into()),
            delays: Some("Less".into()),
            signals: Some("Normal".into()),
            wrong_direction: Some("Less".into()),
            locality: Some("Commercial".into()),
            congestion_cause: Some("Peak Hour Rush".into()),
            remarks: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expiry_moves_to_details() {
        let service = GatedService::new(false);
        let handle = spawn_session(service, SurveyState::default());

        handle.start(Some(1)).await.unwrap();
        handle.increment(VehicleCategory::Heavy).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(handle.snapshot().phase, Phase::Running);
        assert_eq!(handle.snapshot().remaining_secs, 30);

        let snapshot = handle.wait_for_phase(Phase::Details).await.unwrap();
        assert_eq!(snapshot.remaining_secs, 0);
        assert_eq!(snapshot.counts.heavy_vehicles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_leak_after_reset() {
        let handle = spawn_session(GatedService::new(false), SurveyState::default());

        handle.start(Some(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        handle.reset().await.unwrap();
        handle.start(Some(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        // Only the new ticker counts down
        assert_eq!(handle.snapshot().remaining_secs, 58);
    }

    #[tokio::test]
    async fn test_snapshot_visible_while_analyzing() {
        let service = GatedService::new(false);
        let handle = spawn_session(service.clone(), SurveyState::default());

        handle.start(Some(1)).await.unwrap();
        handle.increment(VehicleCategory::TwoWheeler).await.unwrap();
        handle.finish_early().await.unwrap();
        let snapshot = handle.submit(valid_details()).await.unwrap();

        assert_eq!(snapshot.phase, Phase::Analyzing);
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(handle.snapshot().counts.two_wheelers, 1);

        // Second submission while analyzing is refused
        let err = handle.submit(valid_details()).await.unwrap_err();
        assert!(matches!(err, SurveyError::InvalidTransition { .. }));

        service.gate.notify_one();
        let done = handle.wait_for_phase(Phase::Complete).await.unwrap();
        assert_eq!(done.analysis.unwrap().suggestions, "add signal");
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_allows_resubmission() {
        let service = GatedService::new(true);
        let handle = spawn_session(service.clone(), SurveyState::default());

        handle.start(Some(1)).await.unwrap();
        handle.finish_early().await.unwrap();
        handle.submit(valid_details()).await.unwrap();

        service.gate.notify_one();
        let failed = handle.wait_for_phase(Phase::Details).await.unwrap();
        assert!(failed.last_error.unwrap().contains("model refused"));
        assert!(failed.analysis.is_none());
        assert_eq!(failed.history.len(), 1);

        let resubmitted = handle.submit(valid_details()).await.unwrap();
        assert_eq!(resubmitted.phase, Phase::Analyzing);
        assert_eq!(resubmitted.history.len(), 1);

        for _ in 0..10 {
            if service.calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_form_is_published() {
        let service = GatedService::new(false);
        let handle = spawn_session(service.clone(), SurveyState::default());
        let watcher = handle.subscribe();

        handle.start(Some(1)).await.unwrap();
        handle.finish_early().await.unwrap();
        let err = handle
            .submit(DetailsSubmission {
                jams: Some("Gridlock".into()),
                ..valid_details()
            })
            .await
            .unwrap_err();

        match err {
            SurveyError::Validation(errors) => assert!(errors.contains("jams")),
            other => panic!("unexpected error {other:?}"),
        }
        let published = watcher.borrow().clone();
        assert_eq!(published.phase, Phase::Details);
        assert!(published.field_errors.unwrap().contains("jams"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);

        let accepted = handle.submit(valid_details()).await.unwrap();
        assert_eq!(accepted.phase, Phase::Analyzing);
        assert!(accepted.field_errors.is_none());
    }

    #[tokio::test]
    async fn test_reset_cancels_in_flight_request() {
        let service = GatedService::new(false);
        let handle = spawn_session(service.clone(), SurveyState::default());

        handle.start(Some(1)).await.unwrap();
        handle.finish_early().await.unwrap();
        handle.submit(valid_details()).await.unwrap();

        let reset = handle.reset().await.unwrap();
        assert_eq!(reset.phase, Phase::Idle);

        // Releasing the gate must not revive the cancelled survey
        service.gate.notify_one();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.analysis.is_none());
        assert!(snapshot.history.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_reports_error() {
        let handle = spawn_session(GatedService::new(false), SurveyState::default());
        handle.shutdown().await;

        // Shutdown is queued ahead of the command, so the reply is never sent
        let err = handle.start(None).await.unwrap_err();
        assert_eq!(err, SurveyError::SessionClosed);
    }
}
