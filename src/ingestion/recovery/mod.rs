// Startup reconciliation of ingestion jobs lost to a crash or restart


use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::database::sqlite::{Database, KnowledgeBase, KnowledgeBaseStatus};
use crate::ingestion::registry::JobRegistry;

pub const INTERRUPTED_MESSAGE: &str = "Ingestion was interrupted before completion";

/// Whether a processing row has gone without a heartbeat for `stale_after`
#[inline]
pub fn is_stale(knowledge_base: &KnowledgeBase, now: DateTime<Utc>, stale_after: Duration) -> bool {
    (now - knowledge_base.updated_at)
        .to_std()
        .is_ok_and(|age| age >= stale_after)
}

/// Fail every stale `processing` knowledge base that no job in this process owns
///
/// Returns the bots that were moved to `failed`.
#[inline]
pub async fn reconcile_interrupted_jobs(
    database: &Database,
    registry: &JobRegistry,
    stale_after: Duration,
) -> Result<Vec<i64>> {
    let now = Utc::now();
    let mut reconciled = Vec::new();

    for knowledge_base in database
        .get_knowledge_bases_by_status(KnowledgeBaseStatus::Processing)
        .await?
    {
        let bot_id = knowledge_base.bot_id;

        if registry.is_active(bot_id) {
            continue;
        }

        if !is_stale(&knowledge_base, now, stale_after) {
            warn!(
                "Knowledge base for bot {} is processing without a local job, last seen {}",
                bot_id, knowledge_base.updated_at
            );
            continue;
        }

        if database
            .fail_if_processing(bot_id, INTERRUPTED_MESSAGE)
            .await?
        {
            info!("Marked interrupted ingestion for bot {} as failed", bot_id);
            reconciled.push(bot_id);
        }
    }

    Ok(reconciled)
}
