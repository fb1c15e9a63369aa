//! The only code path that changes gold.
//!
//! Two tiers are tracked per character: the authoritative off-chain entry and
//! the state of the on-chain mirror. Reconciliation always flows from the
//! off-chain ledger to the mirror, never the other way. The local cache is a
//! `watch` channel carrying the active character's authoritative amount.

use crate::{
    error::SpinError,
    ports::{
        LedgerService,
        MirrorSync,
    },
    types::{
        CharacterId,
        GoldLedgerEntry,
    },
};
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{
    info,
    warn,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorState {
    InSync(u64),
    Stale { target: u64, failed_attempts: u32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorSyncReport {
    pub synced: usize,
    pub failed: usize,
}

pub struct Reconciler<L, M> {
    ledger: L,
    mirror: M,
    active: Option<CharacterId>,
    authoritative: HashMap<CharacterId, GoldLedgerEntry>,
    mirror_state: HashMap<CharacterId, MirrorState>,
    cache: watch::Sender<Option<u64>>,
}

impl<L, M> Reconciler<L, M> {
    pub fn new(ledger: L, mirror: M) -> Self {
        let (cache, _) = watch::channel(None);
        Self {
            ledger,
            mirror,
            active: None,
            authoritative: HashMap::new(),
            mirror_state: HashMap::new(),
            cache,
        }
    }

    /// Observable balance of the active character.
    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.cache.subscribe()
    }

    pub fn balance(&self) -> Option<u64> {
        self.active
            .and_then(|character| self.authoritative.get(&character))
            .map(|entry| entry.amount)
    }

    pub fn entry(&self, character: CharacterId) -> Option<&GoldLedgerEntry> {
        self.authoritative.get(&character)
    }

    pub fn mirror_state(&self, character: CharacterId) -> Option<MirrorState> {
        self.mirror_state.get(&character).copied()
    }

    pub fn set_active(&mut self, character: CharacterId) {
        self.active = Some(character);
        self.publish();
    }

    pub fn clear(&mut self) {
        self.active = None;
        self.authoritative.clear();
        self.mirror_state.clear();
        self.publish();
    }

    /// Compares an observed on-chain amount with the authoritative one and
    /// schedules a push when they differ.
    pub fn observe_mirror(&mut self, character: CharacterId, on_chain: u64) {
        let Some(amount) = self.authoritative.get(&character).map(|e| e.amount) else {
            return;
        };
        if amount == on_chain {
            self.mirror_state
                .insert(character, MirrorState::InSync(amount));
        } else {
            warn!(%character, amount, on_chain, "on-chain gold mirror diverged");
            self.mark_stale(character, amount);
        }
    }

    fn record_authoritative(&mut self, character: CharacterId, entry: GoldLedgerEntry) {
        let amount = entry.amount;
        self.authoritative.insert(character, entry);
        if self.mirror_state.get(&character) != Some(&MirrorState::InSync(amount)) {
            self.mark_stale(character, amount);
        }
        if self.active == Some(character) {
            self.publish();
        }
    }

    fn mark_stale(&mut self, character: CharacterId, target: u64) {
        let failed_attempts = match self.mirror_state.get(&character) {
            Some(MirrorState::Stale {
                failed_attempts, ..
            }) => *failed_attempts,
            _ => 0,
        };
        self.mirror_state.insert(
            character,
            MirrorState::Stale {
                target,
                failed_attempts,
            },
        );
    }

    fn publish(&self) {
        self.cache.send_replace(self.balance());
    }
}

impl<L: LedgerService, M: MirrorSync> Reconciler<L, M> {
    /// Writes `delta` to the authoritative ledger and waits for it. The mirror
    /// is marked stale; callers push it with [`Self::sync_mirror`] once the
    /// round is settled.
    pub async fn commit(
        &mut self,
        character: CharacterId,
        delta: i64,
        reason: &str,
    ) -> Result<GoldLedgerEntry, SpinError> {
        let entry = self
            .ledger
            .apply_delta(character, delta, reason)
            .await
            .map_err(|err| {
                warn!(?err, %character, delta, reason, "ledger write failed");
                SpinError::LedgerWriteFailed(format!("{err:#}"))
            })?;
        info!(%character, delta, reason, balance = entry.amount, "gold committed");
        self.record_authoritative(character, entry.clone());
        Ok(entry)
    }

    /// Full re-read of the authoritative entry. The cache is left untouched on
    /// failure.
    pub async fn resync(&mut self, character: CharacterId) -> anyhow::Result<GoldLedgerEntry> {
        let entry = self.ledger.fetch_entry(character).await?;
        info!(%character, balance = entry.amount, "gold resynced from ledger");
        self.record_authoritative(character, entry.clone());
        Ok(entry)
    }

    /// Pushes every stale mirror once. Failures stay stale until the next
    /// natural sync point.
    pub async fn sync_mirror(&mut self) -> MirrorSyncReport {
        let mut report = MirrorSyncReport::default();
        let stale: Vec<(CharacterId, u64, u32)> = self
            .mirror_state
            .iter()
            .filter_map(|(character, state)| match state {
                MirrorState::Stale {
                    target,
                    failed_attempts,
                } => Some((*character, *target, *failed_attempts)),
                MirrorState::InSync(_) => None,
            })
            .collect();
        for (character, target, failed_attempts) in stale {
            match self.mirror.push_mirror(character, target).await {
                Ok(()) => {
                    report.synced += 1;
                    self.mirror_state
                        .insert(character, MirrorState::InSync(target));
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(?err, %character, target, "on-chain mirror sync failed; will retry later");
                    self.mirror_state.insert(
                        character,
                        MirrorState::Stale {
                            target,
                            failed_attempts: failed_attempts + 1,
                        },
                    );
                }
            }
        }
        report
    }
}
