//! The ledger service
//!
//! `Ledger` serializes every operation behind one async lock and persists
//! before acknowledging: a mutation runs against a scratch copy of the
//! state, the copy is committed to disk, and only then swapped in. When a
//! commit fails the live state is exactly what it was before the call.

use crate::codes::{self, CodeRecord};
use crate::guards::{self, Guard, RedeemRequest};
use crate::store::SnapshotStore;
use crate::types::{
    AddedCodes, DEFAULT_EVENT_BUFFER, LedgerError, LedgerEvent, LedgerState, LedgerStats,
    Redemption, ScoreEntry, UserId,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Ledger construction parameters.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Directory holding the snapshot file.
    pub data_dir: PathBuf,
    /// Capacity of the outbound event channel.
    pub event_buffer: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// The redemption engine and its durable state.
pub struct Ledger {
    state: Mutex<LedgerState>,
    store: SnapshotStore,
    guards: Vec<Box<dyn Guard>>,
    events: mpsc::Sender<LedgerEvent>,
}

impl Ledger {
    /// Open the ledger under `config.data_dir` and hand back the event
    /// stream. Dropping the receiver is fine; events are then discarded.
    pub fn open(config: LedgerConfig) -> Result<(Self, mpsc::Receiver<LedgerEvent>), LedgerError> {
        let store = SnapshotStore::open(&config.data_dir)?;
        let state = store.load();
        let stats = state.stats();
        info!(
            "ledger open: {} codes ({} redeemed), {} known users",
            stats.total_codes, stats.redeemed, stats.known_users
        );
        let (events, rx) = mpsc::channel(config.event_buffer.max(1));
        let ledger = Self {
            state: Mutex::new(state),
            store,
            guards: guards::redemption_pipeline(),
            events,
        };
        Ok((ledger, rx))
    }

    /// Where the snapshot lives on disk.
    pub fn snapshot_path(&self) -> &Path {
        self.store.path()
    }

    /// Run one mutation as a critical section: apply to a scratch copy,
    /// commit, swap. A commit failure leaves the live state untouched.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut LedgerState) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = op(&mut next)?;
        self.store.commit(&next)?;
        *state = next;
        Ok(out)
    }

    /// Like [`Self::mutate`], but `Ok(None)` from the closure means nothing
    /// changed and nothing is written.
    async fn mutate_opt<T>(
        &self,
        op: impl FnOnce(&mut LedgerState) -> Result<Option<T>, LedgerError>,
    ) -> Result<Option<T>, LedgerError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        match op(&mut next)? {
            Some(out) => {
                self.store.commit(&next)?;
                *state = next;
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    fn emit(&self, event: LedgerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("event buffer full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event receiver gone, discarding");
            }
        }
    }

    /// Redeem `raw_code` for `user`. The guards run in a fixed order and
    /// the first rejection is the error returned. On success the claim is
    /// on disk before the receipt or the event leave this function.
    pub async fn redeem(
        &self,
        user: UserId,
        handle: &str,
        raw_code: &str,
    ) -> Result<Redemption, LedgerError> {
        let code = codes::normalize(raw_code);
        let receipt = {
            let mut state = self.state.lock().await;
            let request = RedeemRequest {
                user,
                handle,
                code: &code,
            };
            if let Err(err) = guards::run(&self.guards, &state, &request) {
                debug!("redeem rejected: user={} code={} reason={}", user, code, err);
                return Err(err);
            }
            let mut next = state.clone();
            let redeemed_at = Utc::now();
            let prize = next.apply_win(user, handle, &code, redeemed_at)?;
            self.store.commit(&next)?;
            *state = next;
            Redemption {
                code,
                prize,
                redeemed_at,
            }
        };
        info!("code {} redeemed by {} ({})", receipt.code, handle, user);
        self.emit(LedgerEvent::Redeemed {
            user,
            handle: handle.to_string(),
            code: receipt.code.clone(),
            prize: receipt.prize.clone(),
            at: receipt.redeemed_at,
        });
        Ok(receipt)
    }

    /// Mint `amount` fresh codes with `prefix`, no prize text, and remember
    /// them as the current batch for prize assignment.
    pub async fn generate_codes(
        &self,
        amount: u32,
        prefix: &str,
    ) -> Result<Vec<CodeRecord>, LedgerError> {
        let prefix = codes::normalize(prefix);
        if !codes::is_valid_prefix(&prefix) {
            return Err(LedgerError::InvalidFormat);
        }
        let batch = self
            .mutate(|state| {
                let mut rng = rand::thread_rng();
                let mut batch = Vec::with_capacity(amount as usize);
                for _ in 0..amount {
                    let code = state.codes().draw_unique(&prefix, &mut rng);
                    let record = state.codes_mut().create(&code, None)?.clone();
                    batch.push(record);
                }
                state.set_last_batch(batch.iter().map(|r| r.code.clone()).collect());
                Ok(batch)
            })
            .await?;
        info!("generated {} codes with prefix {}", batch.len(), prefix);
        Ok(batch)
    }

    /// Add pre-made codes. Inputs are normalized first; malformed ones are
    /// reported back, duplicates of live codes are left untouched.
    pub async fn add_codes(&self, raw: &[String]) -> Result<AddedCodes, LedgerError> {
        let outcome = self
            .mutate(|state| {
                let mut outcome = AddedCodes::default();
                for raw_code in raw {
                    let code = codes::normalize(raw_code);
                    match state.codes_mut().create(&code, None) {
                        Ok(_) => outcome.added.push(code),
                        Err(LedgerError::InvalidFormat) => outcome.skipped_invalid.push(code),
                        Err(LedgerError::AlreadyExists) => {}
                        Err(err) => return Err(err),
                    }
                }
                Ok(outcome)
            })
            .await?;
        info!(
            "added {} codes, {} invalid inputs skipped",
            outcome.added.len(),
            outcome.skipped_invalid.len()
        );
        Ok(outcome)
    }

    /// Delete codes outright, claimed or not. Returns how many existed.
    pub async fn delete_codes(&self, raw: &[String]) -> Result<usize, LedgerError> {
        let deleted = self
            .mutate(|state| {
                let mut deleted = 0;
                for raw_code in raw {
                    let code = codes::normalize(raw_code);
                    if state.codes_mut().delete(&code).is_ok() {
                        deleted += 1;
                    }
                }
                Ok(deleted)
            })
            .await?;
        info!("deleted {} codes", deleted);
        Ok(deleted)
    }

    /// Set prize text on one existing code.
    pub async fn set_prize(&self, raw_code: &str, prize: &str) -> Result<(), LedgerError> {
        let code = codes::normalize(raw_code);
        if !codes::is_valid_code(&code) {
            return Err(LedgerError::InvalidFormat);
        }
        self.mutate(|state| state.codes_mut().set_prize(&code, prize))
            .await?;
        info!("prize set on {}", code);
        Ok(())
    }

    /// Pair prize lines with the most recent generated batch: line i goes
    /// to batch code i. A line whose code was deleted since generation is
    /// consumed without shifting later pairs. Returns how many codes got
    /// prize text.
    pub async fn assign_prizes(&self, lines: &[String]) -> Result<usize, LedgerError> {
        let assigned = self
            .mutate(|state| {
                let targets = state.last_batch().to_vec();
                if targets.is_empty() {
                    return Err(LedgerError::NoBatch);
                }
                Ok(assign_lines(state, lines, &targets))
            })
            .await?;
        info!("assigned {} prize lines to the current batch", assigned);
        Ok(assigned)
    }

    /// Same pairing rule against an explicit code list.
    pub async fn assign_prizes_to(
        &self,
        lines: &[String],
        targets: &[String],
    ) -> Result<usize, LedgerError> {
        let targets: Vec<String> = targets.iter().map(|c| codes::normalize(c)).collect();
        let assigned = self
            .mutate(|state| Ok(assign_lines(state, lines, &targets)))
            .await?;
        info!(
            "assigned {} prize lines to {} explicit codes",
            assigned,
            targets.len()
        );
        Ok(assigned)
    }

    /// Ban a participant. Returns `false` if they already were.
    pub async fn ban(&self, user: UserId) -> Result<bool, LedgerError> {
        let changed = self
            .mutate_opt(|state| Ok(state.ban(user).then_some(())))
            .await?
            .is_some();
        if changed {
            info!("user {} banned", user);
        }
        Ok(changed)
    }

    /// Lift a ban. Returns `false` if there was none.
    pub async fn unban(&self, user: UserId) -> Result<bool, LedgerError> {
        let changed = self
            .mutate_opt(|state| Ok(state.unban(user).then_some(())))
            .await?
            .is_some();
        if changed {
            info!("user {} unbanned", user);
        }
        Ok(changed)
    }

    /// Start a new epoch: everyone may win again. Claimed codes stay
    /// claimed. Returns how many winner marks were cleared.
    pub async fn reset_epoch(&self) -> Result<usize, LedgerError> {
        let cleared = self.mutate(|state| Ok(state.reset_epoch())).await?;
        info!("epoch reset, {} winner marks cleared", cleared);
        Ok(cleared)
    }

    /// Record that a participant exists. Returns `true` the first time.
    /// Banned participants are rejected.
    pub async fn note_user(&self, user: UserId) -> Result<bool, LedgerError> {
        let added = self
            .mutate_opt(|state| {
                if state.is_banned(user) {
                    return Err(LedgerError::Banned);
                }
                Ok(state.note_user(user).then_some(()))
            })
            .await?
            .is_some();
        Ok(added)
    }

    /// Record a proof-of-claim submission, clearing the pending mark.
    /// Returns whether a mark existed. Banned participants are rejected.
    pub async fn submit_proof(&self, user: UserId, handle: &str) -> Result<bool, LedgerError> {
        let cleared = self
            .mutate_opt(|state| {
                if state.is_banned(user) {
                    return Err(LedgerError::Banned);
                }
                Ok(state.clear_proof(user).then_some(()))
            })
            .await?
            .is_some();
        if cleared {
            info!("proof received from {} ({})", handle, user);
            self.emit(LedgerEvent::ProofSubmitted {
                user,
                handle: handle.to_string(),
            });
        }
        Ok(cleared)
    }

    pub async fn stats(&self) -> LedgerStats {
        self.state.lock().await.stats()
    }

    /// Leaderboard rows, highest score first, at most `limit`.
    pub async fn leaderboard(&self, limit: usize) -> Vec<ScoreEntry> {
        self.state.lock().await.top(limit)
    }

    /// Unclaimed codes in creation order.
    pub async fn unredeemed_codes(&self) -> Vec<CodeRecord> {
        self.state.lock().await.codes().unredeemed().cloned().collect()
    }

    /// Full record for one code, if present.
    pub async fn get_code(&self, raw_code: &str) -> Option<CodeRecord> {
        let code = codes::normalize(raw_code);
        self.state.lock().await.codes().get(&code).cloned()
    }

    pub async fn is_banned(&self, user: UserId) -> bool {
        self.state.lock().await.is_banned(user)
    }

    pub async fn is_past_winner(&self, user: UserId) -> bool {
        self.state.lock().await.is_past_winner(user)
    }

    /// Consistent copy of the full state.
    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }
}

/// Positional pairing: line i with target i, stopping at the shorter side.
/// Unknown targets consume their line and count nothing.
fn assign_lines(state: &mut LedgerState, lines: &[String], targets: &[String]) -> usize {
    let mut assigned = 0;
    for (code, line) in targets.iter().zip(lines.iter()) {
        if state.codes_mut().set_prize(code, line).is_ok() {
            assigned += 1;
        }
    }
    assigned
}
