//! Situation repository.
//!
//! The whole collection lives under one key. Every mutation loads it,
//! changes one situation, and writes the full collection back.

use chrono::Utc;
use tracing::info;

use crate::briefs::BriefRepository;
use crate::error::{Result, SidecarError};
use crate::ids::generate_id;
use crate::models::{
    Communication, NewCommunication, NewParticipant, Participant, Situation, SituationBrief,
    SituationPatch, SituationStatus,
};
use crate::store::{Partition, Storage, SITUATIONS_KEY};

#[derive(Clone)]
pub struct SituationRepository {
    storage: Storage,
    briefs: BriefRepository,
}

impl SituationRepository {
    pub fn new(storage: Storage) -> Self {
        let briefs = BriefRepository::new(storage.clone());
        Self { storage, briefs }
    }

    /// Most recently created first.
    pub async fn list(&self) -> Result<Vec<Situation>> {
        Ok(self.storage.load(Partition::Local, SITUATIONS_KEY).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Situation>> {
        Ok(self.list().await?.into_iter().find(|s| s.id == id))
    }

    pub async fn create(&self, title: &str, description: &str) -> Result<Situation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SidecarError::Validation("title must not be empty".to_string()));
        }

        let now = Utc::now();
        let situation = Situation {
            id: generate_id(),
            title: title.to_string(),
            description: description.trim().to_string(),
            status: SituationStatus::Active,
            created_at: now,
            updated_at: now,
            participants: Vec::new(),
            communications: Vec::new(),
            analysis: None,
        };

        let _guard = self.storage.lock(Partition::Local, SITUATIONS_KEY).await;
        let mut situations = self.list().await?;
        situations.insert(0, situation.clone());
        self.persist(&situations).await?;

        info!(situation_id = %situation.id, title = %situation.title, "situation created");
        Ok(situation)
    }

    pub async fn update(&self, id: &str, mut patch: SituationPatch) -> Result<Option<Situation>> {
        if let Some(title) = patch.title.take() {
            let title = title.trim();
            if title.is_empty() {
                return Err(SidecarError::Validation("title must not be empty".to_string()));
            }
            patch.title = Some(title.to_string());
        }
        if let Some(description) = patch.description.take() {
            patch.description = Some(description.trim().to_string());
        }

        let updated = self
            .mutate(id, |situation| {
                patch.apply(situation);
                situation.clone()
            })
            .await?;
        if let Some(situation) = &updated {
            info!(situation_id = %situation.id, status = %situation.status, "situation updated");
        }
        Ok(updated)
    }

    /// Idempotent. Also removes the situation's brief.
    pub async fn delete(&self, id: &str) -> Result<()> {
        {
            let _guard = self.storage.lock(Partition::Local, SITUATIONS_KEY).await;
            let mut situations = self.list().await?;
            let before = situations.len();
            situations.retain(|s| s.id != id);
            if situations.len() != before {
                self.persist(&situations).await?;
                info!(situation_id = id, "situation deleted");
            }
        }

        self.briefs.delete(id).await
    }

    /// Store a brief only while its situation still exists. The check and the
    /// write happen under the situations lock, so a concurrent `delete` either
    /// runs first (nothing saved) or cascades over the saved brief afterwards.
    pub async fn save_brief(&self, brief: SituationBrief) -> Result<bool> {
        let _guard = self.storage.lock(Partition::Local, SITUATIONS_KEY).await;
        if self.get(&brief.situation_id).await?.is_none() {
            return Ok(false);
        }
        self.briefs.save(brief).await?;
        Ok(true)
    }

    pub async fn add_communication(
        &self,
        situation_id: &str,
        communication: NewCommunication,
    ) -> Result<Option<Communication>> {
        let added = self
            .mutate(situation_id, |situation| {
                let communication =
                    communication.into_communication(generate_id(), situation.id.clone());
                situation.communications.push(communication.clone());
                communication
            })
            .await?;
        if let Some(communication) = &added {
            info!(
                situation_id,
                communication_id = %communication.id,
                source = %communication.source,
                "communication added"
            );
        }
        Ok(added)
    }

    /// No-op when either id is unknown. `updated_at` still advances for an
    /// existing situation even if no communication matched.
    pub async fn remove_communication(&self, situation_id: &str, communication_id: &str) -> Result<()> {
        self.mutate(situation_id, |situation| {
            situation.communications.retain(|c| c.id != communication_id);
        })
        .await?;
        Ok(())
    }

    pub async fn add_participant(
        &self,
        situation_id: &str,
        participant: NewParticipant,
    ) -> Result<Option<Participant>> {
        if participant.name.trim().is_empty() {
            return Err(SidecarError::Validation(
                "participant name must not be empty".to_string(),
            ));
        }

        let added = self
            .mutate(situation_id, |situation| {
                let participant = participant.into_participant(generate_id());
                situation.participants.push(participant.clone());
                participant
            })
            .await?;
        if let Some(participant) = &added {
            info!(situation_id, participant_id = %participant.id, "participant added");
        }
        Ok(added)
    }

    /// Same semantics as [`Self::remove_communication`].
    pub async fn remove_participant(&self, situation_id: &str, participant_id: &str) -> Result<()> {
        self.mutate(situation_id, |situation| {
            situation.participants.retain(|p| p.id != participant_id);
        })
        .await?;
        Ok(())
    }

    /// Load, apply `f` to the matching situation, refresh `updated_at`, and
    /// write back. Nothing is written when the id is unknown.
    async fn mutate<T, F>(&self, id: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Situation) -> T,
    {
        let _guard = self.storage.lock(Partition::Local, SITUATIONS_KEY).await;
        let mut situations = self.list().await?;
        let Some(situation) = situations.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };

        situation.touch(Utc::now());
        let output = f(situation);
        self.persist(&situations).await?;
        Ok(Some(output))
    }

    async fn persist(&self, situations: &[Situation]) -> Result<()> {
        self.storage
            .save(Partition::Local, SITUATIONS_KEY, situations)
            .await?;
        Ok(())
    }
}
