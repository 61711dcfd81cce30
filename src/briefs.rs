use std::collections::BTreeMap;

use tracing::info;

use crate::error::Result;
use crate::models::SituationBrief;
use crate::store::{Partition, Storage, BRIEFS_KEY};

/// Briefs keyed by situation id, stored as one mapping.
#[derive(Clone)]
pub struct BriefRepository {
    storage: Storage,
}

impl BriefRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, SituationBrief>> {
        Ok(self.storage.load(Partition::Local, BRIEFS_KEY).await?)
    }

    pub async fn get(&self, situation_id: &str) -> Result<Option<SituationBrief>> {
        Ok(self.get_all().await?.remove(situation_id))
    }

    /// Replaces any brief already stored for the same situation.
    pub async fn save(&self, brief: SituationBrief) -> Result<()> {
        let _guard = self.storage.lock(Partition::Local, BRIEFS_KEY).await;
        let mut briefs = self.get_all().await?;
        info!(situation_id = %brief.situation_id, risk = %brief.risk_level, "brief saved");
        briefs.insert(brief.situation_id.clone(), brief);
        self.storage.save(Partition::Local, BRIEFS_KEY, &briefs).await?;
        Ok(())
    }

    pub async fn delete(&self, situation_id: &str) -> Result<()> {
        let _guard = self.storage.lock(Partition::Local, BRIEFS_KEY).await;
        let mut briefs = self.get_all().await?;
        if briefs.remove(situation_id).is_some() {
            self.storage.save(Partition::Local, BRIEFS_KEY, &briefs).await?;
            info!(situation_id, "brief deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::models::RiskSeverity;
    use crate::store::MemoryStore;

    fn brief(situation_id: &str, summary: &str) -> SituationBrief {
        SituationBrief {
            situation_id: situation_id.to_string(),
            generated_at: Utc::now(),
            title: "Vendor negotiation".to_string(),
            summary: summary.to_string(),
            stakeholders: Vec::new(),
            unresolved_items: Vec::new(),
            suggested_next_steps: Vec::new(),
            risk_level: RiskSeverity::Low,
            top_risks: Vec::new(),
        }
    }

    fn repository() -> BriefRepository {
        BriefRepository::new(Storage::new(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn save_overwrites_previous_brief() {
        let repo = repository();
        repo.save(brief("s1", "old")).await.unwrap();
        repo.save(brief("s1", "new")).await.unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(repo.get("s1").await.unwrap().unwrap().summary, "new");
    }

    #[tokio::test]
    async fn delete_of_missing_brief_is_a_no_op() {
        let repo = repository();
        repo.save(brief("s1", "kept")).await.unwrap();
        repo.delete("s2").await.unwrap();
        assert!(repo.get("s1").await.unwrap().is_some());
        assert!(repo.get("s2").await.unwrap().is_none());
    }
}
