//! Clinician selection.
//!
//! Reads the shared presence directory only, never the local registry.
//! Selection does not reserve the clinician: two requests racing before
//! either pairing is announced can land on the same clinician.

use std::sync::Arc;

use medirelay_common::{PresenceRecord, SignalError, Tier, now_millis};

use crate::presence::PresenceDirectory;

/// Tiered first-match selection over the presence directory
pub struct Matchmaker {
    directory: Arc<dyn PresenceDirectory>,
}

impl Matchmaker {
    pub fn new(directory: Arc<dyn PresenceDirectory>) -> Self {
        Self { directory }
    }

    /// Pick a live clinician.
    ///
    /// The preferred tier is scanned first; after that the remaining tiers
    /// in [`Tier::PRIORITY`] order. Within a tier the first live record in
    /// directory order wins. `Ok(None)` means every tier is exhausted.
    pub async fn select_clinician(
        &self,
        preferred: Option<Tier>,
    ) -> Result<Option<PresenceRecord>, SignalError> {
        self.select_excluding(preferred, None).await
    }

    /// Same policy as [`Matchmaker::select_clinician`], skipping `exclude`
    pub async fn select_excluding(
        &self,
        preferred: Option<Tier>,
        exclude: Option<&str>,
    ) -> Result<Option<PresenceRecord>, SignalError> {
        for tier in scan_order(preferred) {
            let records = self.directory.get_all(tier).await?;
            // One clock reading per tier keeps the scan consistent
            let now = now_millis();

            let found = records.into_iter().find(|record| {
                record.tier == tier
                    && record.is_live_at(now)
                    && exclude.is_none_or(|excluded| record.identity != excluded)
            });

            if let Some(record) = found {
                tracing::debug!(
                    preferred = ?preferred,
                    tier = %tier,
                    identity = %record.identity,
                    "Clinician selected"
                );
                return Ok(Some(record));
            }
        }

        tracing::debug!(preferred = ?preferred, exclude = ?exclude, "No clinician available");
        Ok(None)
    }
}

/// Preferred tier first, then the fixed priority order without repeats
fn scan_order(preferred: Option<Tier>) -> Vec<Tier> {
    let mut order: Vec<Tier> = preferred.into_iter().collect();
    order.extend(Tier::PRIORITY.into_iter().filter(|t| Some(*t) != preferred));
    order
}
