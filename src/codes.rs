//! Code format, generation and the code book
//!
//! A code is an uppercase prefix plus three random four-character groups,
//! hyphen separated: `FEST-7GQ2-M0XA-41BZ`. The book keeps one record per
//! live code and remembers creation order for listings.

use crate::types::{LedgerError, UserId};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::collections::hash_map::{Entry, HashMap};

/// Characters usable in prefixes and generated groups.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of one random group.
pub const GROUP_LEN: usize = 4;

/// Random groups following the prefix.
pub const GROUP_COUNT: usize = 3;

/// Canonical form of participant input: surrounding whitespace stripped,
/// ASCII uppercased. Applied before every lookup and store.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn is_code_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit()
}

/// A prefix is one or more alphabet characters, no hyphens.
pub fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.chars().all(is_code_char)
}

/// Structural check on an already normalized code.
pub fn is_valid_code(code: &str) -> bool {
    let mut parts = code.split('-');
    let Some(prefix) = parts.next() else {
        return false;
    };
    if !is_valid_prefix(prefix) {
        return false;
    }
    let mut groups = 0;
    for group in parts {
        if group.len() != GROUP_LEN || !group.chars().all(is_code_char) {
            return false;
        }
        groups += 1;
    }
    groups == GROUP_COUNT
}

/// Draw one code with the given prefix. Uniqueness is the caller's job.
pub fn random_code<R: Rng>(prefix: &str, rng: &mut R) -> String {
    let mut code = String::with_capacity(prefix.len() + GROUP_COUNT * (GROUP_LEN + 1));
    code.push_str(prefix);
    for _ in 0..GROUP_COUNT {
        code.push('-');
        for _ in 0..GROUP_LEN {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            code.push(CODE_ALPHABET[idx] as char);
        }
    }
    code
}

/// One reward code and its lifecycle.
///
/// A record starts unclaimed and is stamped exactly once; there is no
/// un-redeem. Optional fields stay absent in old snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeRecord {
    pub code: String,
    /// Prize text shown to the winner; assignable after creation.
    #[serde(default)]
    pub prize: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub redeemed_by: Option<UserId>,
    #[serde(default)]
    pub redeemed_by_handle: Option<String>,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl CodeRecord {
    pub fn new(code: String, prize: Option<String>) -> Self {
        Self {
            code,
            prize,
            created_at: Utc::now(),
            redeemed_by: None,
            redeemed_by_handle: None,
            redeemed_at: None,
        }
    }

    pub fn is_redeemed(&self) -> bool {
        self.redeemed_by.is_some()
    }
}

/// All live codes, keyed by code string.
///
/// Lookups go through the map; listings follow `order`, which tracks
/// creation order and never contains a key the map lacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CodeBook {
    #[serde(default)]
    entries: HashMap<String, CodeRecord>,
    #[serde(default)]
    order: Vec<String>,
}

impl CodeBook {
    /// Insert a new unclaimed record. The code must already be normalized.
    pub fn create(&mut self, code: &str, prize: Option<String>) -> Result<&CodeRecord, LedgerError> {
        if !is_valid_code(code) {
            return Err(LedgerError::InvalidFormat);
        }
        match self.entries.entry(code.to_string()) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists),
            Entry::Vacant(slot) => {
                self.order.push(slot.key().clone());
                let record = CodeRecord::new(slot.key().clone(), prize);
                Ok(slot.insert(record))
            }
        }
    }

    /// Remove a code outright, claimed or not.
    pub fn delete(&mut self, code: &str) -> Result<CodeRecord, LedgerError> {
        match self.entries.remove(code) {
            Some(record) => {
                self.order.retain(|c| c != code);
                Ok(record)
            }
            None => Err(LedgerError::NotFound),
        }
    }

    /// Attach or replace prize text.
    pub fn set_prize(&mut self, code: &str, prize: &str) -> Result<(), LedgerError> {
        match self.entries.get_mut(code) {
            Some(record) => {
                record.prize = Some(prize.to_string());
                Ok(())
            }
            None => Err(LedgerError::NotFound),
        }
    }

    pub fn get(&self, code: &str) -> Option<&CodeRecord> {
        self.entries.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut CodeRecord> {
        self.entries.get_mut(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    /// Draw a code with `prefix` that collides with nothing in the book.
    /// Taken candidates are discarded and redrawn.
    pub fn draw_unique<R: Rng>(&self, prefix: &str, rng: &mut R) -> String {
        loop {
            let candidate = random_code(prefix, rng);
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &CodeRecord> {
        self.order.iter().filter_map(|code| self.entries.get(code))
    }

    /// Unclaimed records in creation order, produced lazily.
    pub fn unredeemed(&self) -> impl Iterator<Item = &CodeRecord> {
        self.iter().filter(|record| !record.is_redeemed())
    }

    pub fn redeemed_count(&self) -> usize {
        self.entries.values().filter(|record| record.is_redeemed()).count()
    }

    /// Rebuild the order list after deserialization: drop stale or duplicate
    /// keys, then append map entries a hand edit left unlisted.
    pub fn reconcile(&mut self) {
        let mut seen = HashSet::with_capacity(self.entries.len());
        let entries = &self.entries;
        self.order
            .retain(|code| entries.contains_key(code) && seen.insert(code.clone()));
        if seen.len() != self.entries.len() {
            let mut missing: Vec<String> = self
                .entries
                .keys()
                .filter(|code| !seen.contains(*code))
                .cloned()
                .collect();
            missing.sort();
            self.order.extend(missing);
        }
    }
}
