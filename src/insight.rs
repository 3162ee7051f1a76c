//! Generative insight service boundary.
//!
//! A finished survey is sent to a large language model twice: once for an
//! analysis (conclusion and precautions), then once more for infrastructure
//! improvement suggestions, which are based on the first conclusion. Both
//! calls go through [`InsightService`]; the controller only ever sees the
//! composed [`AnalysisResult`] or a uniform [`InsightError`].
//!
//! # Retries
//!
//! The service never retries. A failed submission is retried by the surveyor
//! resubmitting the form.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::{
    AnalysisResult, CongestionCause, Locality, Rating, SurveyRecord, TrafficTime,
};

/// Default base URL for the chat-completions API.
pub const DEFAULT_INSIGHT_API_URL: &str = "https://api.openai.com/v1";

/// Default model name.
pub const DEFAULT_INSIGHT_MODEL: &str = "gpt-4o-mini";

/// Any failure of the insight service.
///
/// Callers treat every variant the same way; the distinction only helps
/// logging.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("insight request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("insight service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("insight service returned a malformed response: {0}")]
    Malformed(String),

    #[error("insight service did not answer within {0:?}")]
    Timeout(Duration),
}

/// Projection of a [`SurveyRecord`] sent for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub two_wheelers: u32,
    pub three_wheelers: u32,
    pub four_wheelers: u32,
    pub heavy_vehicles: u32,
    pub time_interval: String,
    pub traffic_time: TrafficTime,
    pub human_flow: Rating,
    pub jams: Rating,
    pub delays: Rating,
    pub signals: Rating,
    pub wrong_direction: Rating,
    pub locality: Locality,
    pub congestion_cause: CongestionCause,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl From<&SurveyRecord> for InsightRequest {
    fn from(record: &SurveyRecord) -> Self {
        Self {
            two_wheelers: record.counts.two_wheelers,
            three_wheelers: record.counts.three_wheelers,
            four_wheelers: record.counts.four_wheelers,
            heavy_vehicles: record.counts.heavy_vehicles,
            time_interval: record.time_interval.clone(),
            traffic_time: record.traffic_time,
            human_flow: record.details.human_flow,
            jams: record.details.jams,
            delays: record.details.delays,
            signals: record.details.signals,
            wrong_direction: record.details.wrong_direction,
            locality: record.details.locality,
            congestion_cause: record.details.congestion_cause,
            remarks: record.details.remarks.clone(),
        }
    }
}

/// Input for the suggestions call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    /// Conclusion text from the analysis call.
    pub traffic_analysis: String,
    pub human_flow: Rating,
    pub jams: Rating,
    pub delays: Rating,
    pub signals: Rating,
    pub wrong_direction: Rating,
    pub locality: Locality,
    pub congestion_cause: CongestionCause,
}

impl SuggestionRequest {
    pub fn new(request: &InsightRequest, traffic_analysis: &str) -> Self {
        Self {
            traffic_analysis: traffic_analysis.to_string(),
            human_flow: request.human_flow,
            jams: request.jams,
            delays: request.delays,
            signals: request.signals,
            wrong_direction: request.wrong_direction,
            locality: request.locality,
            congestion_cause: request.congestion_cause,
        }
    }
}

/// Output of the analysis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub conclusion: String,
    pub precautions: String,
}

/// Output of the suggestions call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestions {
    pub suggestions: String,
}

/// Asynchronous source of traffic insights.
#[async_trait]
pub trait InsightService: Send + Sync {
    /// Produce a conclusion and precautions for one survey.
    async fn analyze(&self, request: &InsightRequest) -> Result<Analysis, InsightError>;

    /// Produce improvement suggestions from an analysis and the ratings.
    async fn suggest(&self, request: &SuggestionRequest) -> Result<Suggestions, InsightError>;

    /// Run both calls and compose the result for `record_id`.
    async fn insights(
        &self,
        record_id: &str,
        request: &InsightRequest,
    ) -> Result<AnalysisResult, InsightError> {
        let analysis = self.analyze(request).await?;
        let suggestions = self
            .suggest(&SuggestionRequest::new(request, &analysis.conclusion))
            .await?;

        Ok(AnalysisResult {
            record_id: record_id.to_string(),
            conclusion: analysis.conclusion,
            precautions: analysis.precautions,
            suggestions: suggestions.suggestions,
        })
    }
}

/// Settings for [`GenerativeInsightClient`].
#[derive(Debug, Clone)]
pub struct InsightConfig {
    /// Base URL of an OpenAI-compatible API, without the trailing
    /// `/chat/completions`.
    pub base_url: String,

    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,

    pub model: String,

    /// Optional upper bound per call. `None` waits until the service answers.
    pub timeout: Option<Duration>,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_INSIGHT_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_INSIGHT_MODEL.to_string(),
            timeout: None,
        }
    }
}

/// Insight service backed by an OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct GenerativeInsightClient {
    client: reqwest::Client,
    config: InsightConfig,
}

impl GenerativeInsightClient {
    pub fn new(config: InsightConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Send one prompt and return the assistant message content.
    ///
    /// The configured timeout bounds the whole exchange, body included.
    async fn complete(&self, system: &str, prompt: String) -> Result<String, InsightError> {
        let exchange = self.exchange(system, prompt);
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| InsightError::Timeout(limit))?,
            None => exchange.await,
        }
    }

    async fn exchange(&self, system: &str, prompt: String) -> Result<String, InsightError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "response_format": { "type": "json_object" },
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InsightError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| InsightError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InsightError::Malformed("no message content".to_string()))
    }
}

#[async_trait]
impl InsightService for GenerativeInsightClient {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn analyze(&self, request: &InsightRequest) -> Result<Analysis, InsightError> {
        let content = self.complete(ANALYST_SYSTEM_PROMPT, analysis_prompt(request)).await?;
        let analysis: Analysis = parse_content(&content)?;
        require_text("conclusion", &analysis.conclusion)?;
        require_text("precautions", &analysis.precautions)?;
        debug!("Analysis received");
        Ok(analysis)
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn suggest(&self, request: &SuggestionRequest) -> Result<Suggestions, InsightError> {
        let content = self.complete(PLANNER_SYSTEM_PROMPT, suggestion_prompt(request)).await?;
        let suggestions: Suggestions = parse_content(&content)?;
        require_text("suggestions", &suggestions.suggestions)?;
        debug!("Suggestions received");
        Ok(suggestions)
    }
}

// ============================================================================
// Wire types and prompts
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

const ANALYST_SYSTEM_PROMPT: &str = "You are an expert traffic analyst. \
Respond only with a JSON object of the form \
{\"conclusion\": string, \"precautions\": string}.";

const PLANNER_SYSTEM_PROMPT: &str = "You are an expert traffic planner. \
Respond only with a JSON object of the form {\"suggestions\": string}.";

fn analysis_prompt(request: &InsightRequest) -> String {
    let mut prompt = format!(
        "Analyze the following traffic data. Give a short conclusion about the \
traffic flow at the specified time, and precautions road users and authorities \
should take.

Vehicle Counts:
- Two-wheelers: {}
- Three-wheelers: {}
- Four-wheelers: {}
- Heavy vehicles: {}

Time Interval: {}
Traffic Time: {}

Additional Information:
- Human flow: {}
- Jams: {}
- Delays: {}
- Signals: {}
- Wrong direction driving: {}
- Locality: {}
- Primary cause of congestion: {}",
        request.two_wheelers,
        request.three_wheelers,
        request.four_wheelers,
        request.heavy_vehicles,
        request.time_interval,
        request.traffic_time,
        request.human_flow,
        request.jams,
        request.delays,
        request.signals,
        request.wrong_direction,
        request.locality,
        request.congestion_cause,
    );
    if let Some(remarks) = &request.remarks {
        prompt.push_str(&format!("\n- Surveyor remarks: {}", remarks));
    }
    prompt
}

fn suggestion_prompt(request: &SuggestionRequest) -> String {
    format!(
        "Based on the following information, suggest specific infrastructure and \
policy development ideas to improve long-term traffic flow and safety, such as new \
skywalks, road widening, signal optimization or enforcement changes. Your \
suggestions should directly address the problems indicated by the ratings. For \
example, high ratings for human flow and jams might warrant a skywalk and \
intersection redesign.

Traffic Analysis: {}
Human Flow Rating: {}
Jams Rating: {}
Delays Rating: {}
Signals Rating: {}
Wrong Direction Driving Rating: {}
Locality: {}
Primary Cause of Congestion: {}",
        request.traffic_analysis,
        request.human_flow,
        request.jams,
        request.delays,
        request.signals,
        request.wrong_direction,
        request.locality,
        request.congestion_cause,
    )
}

/// Parse the model's JSON answer, tolerating a surrounding code fence.
fn parse_content<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T, InsightError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(unfenced.trim()).map_err(|e| InsightError::Malformed(e.to_string()))
}

fn require_text(field: &str, value: &str) -> Result<(), InsightError> {
    if value.trim().is_empty() {
        return Err(InsightError::Malformed(format!("empty {}", field)));
    }
    Ok(())
}
