
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// In-process record of which bots have an ingestion job running
///
/// A bot is claimed with [`JobRegistry::try_acquire`] and released when the
/// returned [`JobSlot`] is dropped, whatever way the job ends.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    active: Arc<Mutex<HashSet<i64>>>,
}

impl JobRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the bot, or `None` when a job already holds it
    #[inline]
    pub fn try_acquire(&self, bot_id: i64) -> Option<JobSlot> {
        if !self.lock().insert(bot_id) {
            debug!("Job slot for bot {} is already taken", bot_id);
            return None;
        }

        debug!("Acquired job slot for bot {}", bot_id);
        Some(JobSlot {
            bot_id,
            active: Arc::clone(&self.active),
        })
    }

    #[inline]
    pub fn is_active(&self, bot_id: i64) -> bool {
        self.lock().contains(&bot_id)
    }

    /// Bots with a running job, in ascending order
    #[inline]
    pub fn active_jobs(&self) -> Vec<i64> {
        let mut bots: Vec<i64> = self.lock().iter().copied().collect();
        bots.sort_unstable();
        bots
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        // The set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive claim on a bot's ingestion
#[derive(Debug)]
pub struct JobSlot {
    bot_id: i64,
    active: Arc<Mutex<HashSet<i64>>>,
}

impl JobSlot {
    #[inline]
    pub fn bot_id(&self) -> i64 {
        self.bot_id
    }
}

impl Drop for JobSlot {
    #[inline]
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.bot_id);
        debug!("Released job slot for bot {}", self.bot_id);
    }
}
