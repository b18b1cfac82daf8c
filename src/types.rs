//! Core data model for the reward code ledger
//!
//! Everything that goes into a snapshot lives here. `LedgerState` owns the
//! cross-entity rules (one win per participant per epoch, leaderboard
//! bookkeeping), while per-code rules live in [`crate::codes::CodeBook`].

use crate::codes::CodeBook;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Participant identifier.
///
/// The chat platforms this ledger fronts hand out 64-bit numeric ids and
/// use the negative range for group chats, so the full `i64` is kept.
pub type UserId = i64;

/// Default capacity of the outbound event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid code format")]
    InvalidFormat,
    #[error("unknown code")]
    UnknownCode,
    #[error("code already redeemed")]
    AlreadyRedeemed,
    #[error("participant already won this epoch")]
    AlreadyWon,
    #[error("participant is banned")]
    Banned,
    #[error("no generated batch to assign to")]
    NoBatch,
    #[error("code already exists")]
    AlreadyExists,
    #[error("code not found")]
    NotFound,
    #[error("i/o failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

/// One leaderboard row.
///
/// Rows are stored in first-win order; [`LedgerState::top`] sorts a copy by
/// score, so participants with equal scores keep their first-win order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreEntry {
    pub user: UserId,
    pub handle: String,
    pub score: u32,
}

/// Receipt for a successful redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub code: String,
    /// `None` when no prize text was assigned to the code.
    pub prize: Option<String>,
    pub redeemed_at: DateTime<Utc>,
}

/// Outcome of a bulk add of pre-made codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddedCodes {
    /// Normalized codes that entered the book.
    pub added: Vec<String>,
    /// Normalized inputs rejected by the format check.
    pub skipped_invalid: Vec<String>,
}

/// Point-in-time counters for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub total_codes: usize,
    pub redeemed: usize,
    pub available: usize,
    pub known_users: usize,
    pub banned: usize,
    pub pending_proof: usize,
}

/// Outbound notification, emitted only after the state change behind it is
/// durably on disk. Delivery is best effort; the ledger never blocks on a
/// slow or absent consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    Redeemed {
        user: UserId,
        handle: String,
        code: String,
        prize: Option<String>,
        at: DateTime<Utc>,
    },
    ProofSubmitted {
        user: UserId,
        handle: String,
    },
}

/// Full ledger state, serialized as one snapshot document.
///
/// Every field defaults to empty so snapshots written by older builds keep
/// loading after schema additions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerState {
    #[serde(default)]
    codes: CodeBook,
    /// Participants who already won in the current epoch.
    #[serde(default)]
    past_winners: HashSet<UserId>,
    #[serde(default)]
    banned: HashSet<UserId>,
    /// Everyone who ever interacted with the front end.
    #[serde(default)]
    known_users: HashSet<UserId>,
    #[serde(default)]
    leaderboard: Vec<ScoreEntry>,
    /// Winners whose proof of claim is still outstanding.
    #[serde(default)]
    pending_proof: HashSet<UserId>,
    /// Codes from the most recent generation run, in creation order.
    #[serde(default)]
    last_batch: Vec<String>,
}

impl LedgerState {
    pub fn codes(&self) -> &CodeBook {
        &self.codes
    }

    pub fn codes_mut(&mut self) -> &mut CodeBook {
        &mut self.codes
    }

    pub fn is_banned(&self, user: UserId) -> bool {
        self.banned.contains(&user)
    }

    pub fn is_past_winner(&self, user: UserId) -> bool {
        self.past_winners.contains(&user)
    }

    pub fn is_known(&self, user: UserId) -> bool {
        self.known_users.contains(&user)
    }

    pub fn is_proof_pending(&self, user: UserId) -> bool {
        self.pending_proof.contains(&user)
    }

    pub fn last_batch(&self) -> &[String] {
        &self.last_batch
    }

    pub fn set_last_batch(&mut self, batch: Vec<String>) {
        self.last_batch = batch;
    }

    /// Record a win: stamp the code, mark the participant as a winner with
    /// proof outstanding, and credit the leaderboard. The code must exist
    /// and be unclaimed.
    pub fn apply_win(
        &mut self,
        user: UserId,
        handle: &str,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<String>, LedgerError> {
        let record = self.codes.get_mut(code).ok_or(LedgerError::UnknownCode)?;
        if record.is_redeemed() {
            return Err(LedgerError::AlreadyRedeemed);
        }
        record.redeemed_by = Some(user);
        record.redeemed_by_handle = Some(handle.to_string());
        record.redeemed_at = Some(at);
        let prize = record.prize.clone();

        self.past_winners.insert(user);
        self.pending_proof.insert(user);
        self.bump_score(user, handle);
        Ok(prize)
    }

    /// Add one point for `user`, creating the row on first win. The stored
    /// handle follows the latest one seen.
    fn bump_score(&mut self, user: UserId, handle: &str) {
        match self.leaderboard.iter_mut().find(|entry| entry.user == user) {
            Some(entry) => {
                entry.score += 1;
                entry.handle = handle.to_string();
            }
            None => self.leaderboard.push(ScoreEntry {
                user,
                handle: handle.to_string(),
                score: 1,
            }),
        }
    }

    /// Mark a participant as seen. Returns `true` if they were new.
    pub fn note_user(&mut self, user: UserId) -> bool {
        self.known_users.insert(user)
    }

    /// Returns `true` if the participant was not already banned.
    pub fn ban(&mut self, user: UserId) -> bool {
        self.banned.insert(user)
    }

    /// Returns `true` if the participant was actually banned.
    pub fn unban(&mut self, user: UserId) -> bool {
        self.banned.remove(&user)
    }

    /// Clear an outstanding proof obligation. Returns `true` if one existed.
    pub fn clear_proof(&mut self, user: UserId) -> bool {
        self.pending_proof.remove(&user)
    }

    /// Open a new epoch: everyone may win again. Redeemed codes stay
    /// redeemed, bans, scores and proof obligations all survive. Returns
    /// how many winner marks were cleared.
    pub fn reset_epoch(&mut self) -> usize {
        let cleared = self.past_winners.len();
        self.past_winners.clear();
        cleared
    }

    pub fn stats(&self) -> LedgerStats {
        let total_codes = self.codes.len();
        let redeemed = self.codes.redeemed_count();
        LedgerStats {
            total_codes,
            redeemed,
            available: total_codes - redeemed,
            known_users: self.known_users.len(),
            banned: self.banned.len(),
            pending_proof: self.pending_proof.len(),
        }
    }

    /// Top rows by score, at most `limit`. Ties keep first-win order.
    pub fn top(&self, limit: usize) -> Vec<ScoreEntry> {
        let mut rows = self.leaderboard.clone();
        rows.sort_by(|a, b| b.score.cmp(&a.score));
        rows.truncate(limit);
        rows
    }

    /// Repair bookkeeping after deserialization. Hand-edited snapshots may
    /// disagree with the derived structures; the code book order list is
    /// rebuilt and duplicate leaderboard rows collapse to the first one.
    pub fn reconcile(&mut self) {
        self.codes.reconcile();
        let mut seen = HashSet::new();
        self.leaderboard.retain(|entry| seen.insert(entry.user));
    }
}
