use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SituationStatus {
    #[default]
    Active,
    Monitoring,
    Resolved,
}

impl SituationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Monitoring => "monitoring",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for SituationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SituationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "monitoring" => Ok(Self::Monitoring),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown situation status: {other}")),
        }
    }
}

/// Aggregate root. Owns its participants and communications; the whole
/// record is persisted as one element of the situations collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Situation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: SituationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub communications: Vec<Communication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<SituationAnalysis>,
}

impl Situation {
    /// Refresh `updated_at`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Fields a caller may overwrite on an existing situation. `id` and
/// `created_at` are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SituationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SituationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<SituationAnalysis>,
}

impl SituationPatch {
    pub fn apply(self, situation: &mut Situation) {
        if let Some(title) = self.title {
            situation.title = title;
        }
        if let Some(description) = self.description {
            situation.description = description;
        }
        if let Some(status) = self.status {
            situation.status = status;
        }
        if let Some(analysis) = self.analysis {
            situation.analysis = Some(analysis);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stated_position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_intent: Option<String>,
}

/// A participant before the repository assigns its id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParticipant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stated_position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_intent: Option<String>,
}

impl NewParticipant {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn into_participant(self, id: String) -> Participant {
        Participant {
            id,
            name: self.name,
            email: self.email,
            slack_id: self.slack_id,
            role: self.role,
            stated_position: self.stated_position,
            inferred_intent: self.inferred_intent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationSource {
    Slack,
    Gmail,
    Zoom,
    Manual,
}

impl CommunicationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Gmail => "gmail",
            Self::Zoom => "zoom",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for CommunicationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommunicationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slack" => Ok(Self::Slack),
            "gmail" => Ok(Self::Gmail),
            "zoom" => Ok(Self::Zoom),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown communication source: {other}")),
        }
    }
}

/// Source-specific details of a captured communication. Each known source
/// carries only its own fields; anything else lands in `Generic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommunicationMetadata {
    #[serde(rename_all = "camelCase")]
    Slack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        #[serde(default)]
        is_thread: bool,
    },
    #[serde(rename_all = "camelCase")]
    Gmail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
    Zoom {
        /// Meeting length in seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
    },
    Manual,
    Generic {
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
}

impl CommunicationMetadata {
    pub fn empty_for(source: CommunicationSource) -> Self {
        match source {
            CommunicationSource::Slack => Self::Slack {
                channel: None,
                channel_id: None,
                thread_id: None,
                is_thread: false,
            },
            CommunicationSource::Gmail => Self::Gmail {
                subject: None,
                thread_id: None,
            },
            CommunicationSource::Zoom => Self::Zoom { duration: None },
            CommunicationSource::Manual => Self::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    pub id: String,
    pub situation_id: String,
    pub source: CommunicationSource,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Display names, loosely matched against `Participant::name`.
    #[serde(default)]
    pub participants: Vec<String>,
    pub content: String,
    pub metadata: CommunicationMetadata,
}

/// A communication before the repository assigns `id` and `situation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommunication {
    pub source: CommunicationSource,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<String>,
    pub content: String,
    pub metadata: CommunicationMetadata,
}

impl NewCommunication {
    pub fn into_communication(self, id: String, situation_id: String) -> Communication {
        Communication {
            id,
            situation_id,
            source: self.source,
            source_id: self.source_id,
            source_url: self.source_url,
            timestamp: self.timestamp,
            participants: self.participants,
            content: self.content,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSignalType {
    Disengagement,
    Escalation,
    Misalignment,
    Blocker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSignal {
    #[serde(rename = "type")]
    pub kind: RiskSignalType,
    pub severity: RiskSeverity,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedKind {
    Question,
    Commitment,
    Decision,
    ActionItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedThread {
    #[serde(default)]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub raised_by: String,
    #[serde(default)]
    pub raised_at: String,
    #[serde(rename = "type")]
    pub kind: UnresolvedKind,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    pub priority: u32,
    pub action: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_questions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeholderAnalysis {
    pub participant_id: String,
    pub stated_position: String,
    pub inferred_intent: String,
    pub communication_style: String,
    pub engagement_level: EngagementLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneDataPoint {
    pub timestamp: String,
    pub participant: String,
    /// -1.0 (hostile) to 1.0 (warm).
    pub sentiment: f64,
    #[serde(default)]
    pub markers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SituationAnalysis {
    pub generated_at: DateTime<Utc>,
    pub summary: String,
    #[serde(default)]
    pub stakeholder_analysis: Vec<StakeholderAnalysis>,
    #[serde(default)]
    pub tone_trajectory: Vec<ToneDataPoint>,
    #[serde(default)]
    pub unresolved_threads: Vec<UnresolvedThread>,
    #[serde(default)]
    pub risk_signals: Vec<RiskSignal>,
    #[serde(default)]
    pub suggested_actions: Vec<SuggestedAction>,
    #[serde(default)]
    pub related_situations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefStakeholder {
    #[serde(default)]
    pub participant_id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub current_stance: String,
    pub recent_tone: Tone,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub suggested_approach: String,
}

/// At most one brief is kept per situation; saving overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SituationBrief {
    pub situation_id: String,
    pub generated_at: DateTime<Utc>,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub stakeholders: Vec<BriefStakeholder>,
    #[serde(default)]
    pub unresolved_items: Vec<UnresolvedThread>,
    #[serde(default)]
    pub suggested_next_steps: Vec<SuggestedAction>,
    #[serde(default)]
    pub risk_level: RiskSeverity,
    #[serde(default)]
    pub top_risks: Vec<RiskSignal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    pub local_llm_endpoint: String,
    pub local_llm_model: String,
    pub cloud_llm_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_llm_api_key: Option<String>,
    pub theme: Theme,
    pub auto_capture: bool,
    pub capture_slack: bool,
    pub capture_gmail: bool,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            local_llm_endpoint: "http://localhost:11434".to_string(),
            local_llm_model: "llama3:8b".to_string(),
            cloud_llm_enabled: false,
            cloud_llm_api_key: None,
            theme: Theme::System,
            auto_capture: false,
            capture_slack: true,
            capture_gmail: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used: u64,
    pub total: u64,
    pub percentage: f64,
}

impl StorageUsage {
    pub fn new(used: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            used,
            total,
            percentage,
        }
    }
}
