//! Brief generation through a local text-generation service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{
    BriefStakeholder, ExtensionSettings, RiskSeverity, RiskSignal, Situation, SituationBrief,
    SuggestedAction, UnresolvedThread,
};
use crate::report;

/// Upper bound on a whole generation request.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound on the liveness probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum BriefError {
    #[error("could not reach the text-generation service at {endpoint}; ensure the local service is running ({source})")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("text-generation service returned HTTP {0}")]
    Status(u16),

    #[error("brief generation timed out after {0:?}; ensure the local service is running")]
    TimedOut(Duration),

    #[error("could not read the generated brief: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// External collaborator turning a situation's history into a brief.
#[async_trait]
pub trait BriefGenerator: Send + Sync {
    async fn generate(&self, situation: &Situation) -> Result<SituationBrief, BriefError>;

    /// Cheap reachability check. Never an error: `false` is just a status.
    async fn probe(&self) -> bool;
}

/// Ollama-compatible HTTP client (`/api/generate`, `/api/tags`).
pub struct OllamaBriefGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaBriefGenerator {
    pub fn new(endpoint: &str, model: &str) -> Result<Self, BriefError> {
        let client = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()
            .map_err(BriefError::Client)?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_settings(settings: &ExtensionSettings) -> Result<Self, BriefError> {
        Self::new(&settings.local_llm_endpoint, &settings.local_llm_model)
    }

    fn unreachable(&self, source: reqwest::Error) -> BriefError {
        BriefError::Unreachable {
            endpoint: self.endpoint.clone(),
            source,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Shape the model is asked to answer with.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedBrief {
    #[serde(default)]
    title: Option<String>,
    summary: String,
    #[serde(default)]
    stakeholders: Vec<BriefStakeholder>,
    #[serde(default)]
    unresolved_items: Vec<UnresolvedThread>,
    #[serde(default)]
    suggested_next_steps: Vec<SuggestedAction>,
    #[serde(default)]
    risk_level: RiskSeverity,
    #[serde(default)]
    top_risks: Vec<RiskSignal>,
}

/// Parse the model's JSON answer into a brief for `situation`.
pub fn parse_brief(situation: &Situation, answer: &str) -> Result<SituationBrief, BriefError> {
    let generated: GeneratedBrief = serde_json::from_str(answer.trim())?;
    let mut stakeholders = generated.stakeholders;
    for stakeholder in stakeholders.iter_mut().filter(|s| s.participant_id.is_empty()) {
        if let Some(participant) = situation
            .participants
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(&stakeholder.name))
        {
            stakeholder.participant_id = participant.id.clone();
        }
    }

    Ok(SituationBrief {
        situation_id: situation.id.clone(),
        generated_at: Utc::now(),
        title: generated
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| situation.title.clone()),
        summary: generated.summary,
        stakeholders,
        unresolved_items: generated.unresolved_items,
        suggested_next_steps: generated.suggested_next_steps,
        risk_level: generated.risk_level,
        top_risks: generated.top_risks,
    })
}

#[async_trait]
impl BriefGenerator for OllamaBriefGenerator {
    async fn generate(&self, situation: &Situation) -> Result<SituationBrief, BriefError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: report::build_prompt(situation),
            stream: false,
            format: "json",
        };
        debug!(model = %self.model, situation_id = %situation.id, "requesting brief");

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(BriefError::Status(response.status().as_u16()));
        }
        let body: GenerateResponse = response.json().await.map_err(|e| self.unreachable(e))?;
        parse_brief(situation, &body.response)
    }

    async fn probe(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(endpoint = %self.endpoint, status = %response.status(), "text-generation service not healthy");
                false
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "text-generation service not reachable");
                false
            }
        }
    }
}
