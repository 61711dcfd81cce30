//! Request/response message protocol.
//!
//! Every surface (CLI, stdin RPC) talks to the repositories through
//! [`Sidecar::handle`]. Responses always carry a success flag; callers must
//! check it before reading `data`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::briefs::BriefRepository;
use crate::capture::{self, CapturedContent};
use crate::error::Result;
use crate::llm::{BriefError, BriefGenerator, OllamaBriefGenerator, GENERATION_TIMEOUT};
use crate::models::{
    ExtensionSettings, NewCommunication, NewParticipant, SituationBrief, SituationPatch,
};
use crate::settings::SettingsRepository;
use crate::situations::SituationRepository;
use crate::store::Storage;
use crate::transfer::DataTransfer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    GetSituations,
    GetSituation {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateSituation {
        title: String,
        #[serde(default)]
        description: String,
    },
    UpdateSituation {
        id: String,
        #[serde(flatten)]
        patch: SituationPatch,
    },
    DeleteSituation {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    AddCommunication {
        situation_id: String,
        communication: NewCommunication,
    },
    #[serde(rename_all = "camelCase")]
    RemoveCommunication {
        situation_id: String,
        communication_id: String,
    },
    #[serde(rename_all = "camelCase")]
    AddParticipant {
        situation_id: String,
        participant: NewParticipant,
    },
    #[serde(rename_all = "camelCase")]
    RemoveParticipant {
        situation_id: String,
        participant_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CaptureSelection {
        situation_id: String,
        capture: CapturedContent,
    },
    #[serde(rename_all = "camelCase")]
    GetBrief {
        situation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    GenerateBrief {
        situation_id: String,
    },
    GetSettings,
    UpdateSettings(Map<String, Value>),
    ExportData,
    ImportData {
        data: String,
    },
    ClearData,
    GetStorageUsage,
    CheckLlmStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                data: Some(value),
                error: None,
            },
            Err(err) => Self::failure(format!("failed to encode response: {err}")),
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub type GeneratorFactory =
    Arc<dyn Fn(&ExtensionSettings) -> Result<Arc<dyn BriefGenerator>, BriefError> + Send + Sync>;

/// Stateless request handler over the repositories. Holds no cached
/// situations; every request re-reads the store.
#[derive(Clone)]
pub struct Sidecar {
    situations: SituationRepository,
    briefs: BriefRepository,
    settings: SettingsRepository,
    transfer: DataTransfer,
    generators: GeneratorFactory,
    brief_timeout: Duration,
}

impl Sidecar {
    pub fn new(storage: Storage) -> Self {
        Self {
            situations: SituationRepository::new(storage.clone()),
            briefs: BriefRepository::new(storage.clone()),
            settings: SettingsRepository::new(storage.clone()),
            transfer: DataTransfer::new(storage),
            generators: Arc::new(
                |settings: &ExtensionSettings| -> Result<Arc<dyn BriefGenerator>, BriefError> {
                    let generator = OllamaBriefGenerator::from_settings(settings)?;
                    Ok(Arc::new(generator))
                },
            ),
            brief_timeout: GENERATION_TIMEOUT,
        }
    }

    /// Replace how brief generators are built from the current settings.
    pub fn with_generators(mut self, generators: GeneratorFactory) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_brief_timeout(mut self, timeout: Duration) -> Self {
        self.brief_timeout = timeout;
        self
    }

    /// Typed lookup of a stored brief. Unlike `GET_BRIEF`, an absent brief is
    /// `Ok(None)` and only store failures are errors.
    pub async fn stored_brief(&self, situation_id: &str) -> Result<Option<SituationBrief>> {
        self.briefs.get(situation_id).await
    }

    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "request failed");
                Response::failure(err.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        let response = match request {
            Request::GetSituations => Response::ok(self.situations.list().await?),
            Request::GetSituation { id } => {
                found(self.situations.get(&id).await?, "situation", &id)
            }
            Request::CreateSituation { title, description } => {
                Response::ok(self.situations.create(&title, &description).await?)
            }
            Request::UpdateSituation { id, patch } => {
                found(self.situations.update(&id, patch).await?, "situation", &id)
            }
            Request::DeleteSituation { id } => {
                self.situations.delete(&id).await?;
                Response::empty()
            }
            Request::AddCommunication {
                situation_id,
                communication,
            } => found(
                self.situations
                    .add_communication(&situation_id, communication)
                    .await?,
                "situation",
                &situation_id,
            ),
            Request::RemoveCommunication {
                situation_id,
                communication_id,
            } => {
                self.situations
                    .remove_communication(&situation_id, &communication_id)
                    .await?;
                Response::empty()
            }
            Request::AddParticipant {
                situation_id,
                participant,
            } => found(
                self.situations
                    .add_participant(&situation_id, participant)
                    .await?,
                "situation",
                &situation_id,
            ),
            Request::RemoveParticipant {
                situation_id,
                participant_id,
            } => {
                self.situations
                    .remove_participant(&situation_id, &participant_id)
                    .await?;
                Response::empty()
            }
            Request::CaptureSelection {
                situation_id,
                capture,
            } => {
                let communication = capture::normalize(capture, Utc::now())?;
                found(
                    self.situations
                        .add_communication(&situation_id, communication)
                        .await?,
                    "situation",
                    &situation_id,
                )
            }
            Request::GetBrief { situation_id } => {
                found(self.briefs.get(&situation_id).await?, "brief", &situation_id)
            }
            Request::GenerateBrief { situation_id } => {
                let Some(situation) = self.situations.get(&situation_id).await? else {
                    return Ok(Response::failure(format!("situation {situation_id} not found")));
                };
                let settings = self.settings.get().await?;
                let generator = (self.generators)(&settings)?;
                let brief = tokio::time::timeout(self.brief_timeout, generator.generate(&situation))
                    .await
                    .map_err(|_| BriefError::TimedOut(self.brief_timeout))??;
                if !self.situations.save_brief(brief.clone()).await? {
                    warn!(situation_id = %situation_id, "situation deleted during brief generation");
                    return Ok(Response::failure(format!("situation {situation_id} not found")));
                }
                info!(situation_id = %situation_id, "brief generated");
                Response::ok(brief)
            }
            Request::GetSettings => Response::ok(self.settings.get().await?),
            Request::UpdateSettings(changes) => Response::ok(self.settings.update(changes).await?),
            Request::ExportData => Response::ok(self.transfer.export_json().await?),
            Request::ImportData { data } => {
                self.transfer.import_json(&data).await?;
                Response::empty()
            }
            Request::ClearData => {
                self.transfer.clear_all().await?;
                Response::empty()
            }
            Request::GetStorageUsage => Response::ok(self.transfer.usage().await?),
            Request::CheckLlmStatus => {
                let settings = self.settings.get().await?;
                let connected = match (self.generators)(&settings) {
                    Ok(generator) => generator.probe().await,
                    Err(_) => false,
                };
                Response::ok(serde_json::json!({
                    "connected": connected,
                    "endpoint": settings.local_llm_endpoint,
                }))
            }
        };
        Ok(response)
    }
}

/// Absent results are a normal outcome in the repositories; at the message
/// boundary they become a failed response.
fn found<T: Serialize>(value: Option<T>, what: &str, id: &str) -> Response {
    match value {
        Some(value) => Response::ok(value),
        None => Response::failure(format!("{what} {id} not found")),
    }
}
