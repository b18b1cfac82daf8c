//! Redemption guard pipeline
//!
//! Every redemption attempt runs through an ordered list of independent
//! checks. The first failing guard decides the error the participant sees,
//! so order matters: a banned winner resubmitting a claimed code is told
//! about the ban, nothing else.

use crate::codes;
use crate::types::{LedgerError, LedgerState, UserId};

/// A redemption attempt as the guards see it. `code` is already normalized.
#[derive(Debug, Clone, Copy)]
pub struct RedeemRequest<'a> {
    pub user: UserId,
    pub handle: &'a str,
    pub code: &'a str,
}

/// One gate in the pipeline. Guards read state, never mutate it.
pub trait Guard: Send + Sync {
    /// Short name for trace output.
    fn name(&self) -> &'static str;

    /// `Ok` to pass the attempt on, `Err` to stop with that error.
    fn check(&self, state: &LedgerState, request: &RedeemRequest<'_>) -> Result<(), LedgerError>;
}

/// Rejects banned participants.
pub struct NotBanned;

impl Guard for NotBanned {
    fn name(&self) -> &'static str {
        "not_banned"
    }

    fn check(&self, state: &LedgerState, request: &RedeemRequest<'_>) -> Result<(), LedgerError> {
        if state.is_banned(request.user) {
            return Err(LedgerError::Banned);
        }
        Ok(())
    }
}

/// Rejects input that does not look like a code at all.
pub struct ValidFormat;

impl Guard for ValidFormat {
    fn name(&self) -> &'static str {
        "valid_format"
    }

    fn check(&self, _state: &LedgerState, request: &RedeemRequest<'_>) -> Result<(), LedgerError> {
        if !codes::is_valid_code(request.code) {
            return Err(LedgerError::InvalidFormat);
        }
        Ok(())
    }
}

/// Rejects participants who already won in the current epoch.
pub struct NotPastWinner;

impl Guard for NotPastWinner {
    fn name(&self) -> &'static str {
        "not_past_winner"
    }

    fn check(&self, state: &LedgerState, request: &RedeemRequest<'_>) -> Result<(), LedgerError> {
        if state.is_past_winner(request.user) {
            return Err(LedgerError::AlreadyWon);
        }
        Ok(())
    }
}

/// Rejects codes the book has never seen.
pub struct CodeExists;

impl Guard for CodeExists {
    fn name(&self) -> &'static str {
        "code_exists"
    }

    fn check(&self, state: &LedgerState, request: &RedeemRequest<'_>) -> Result<(), LedgerError> {
        if !state.codes().contains(request.code) {
            return Err(LedgerError::UnknownCode);
        }
        Ok(())
    }
}

/// Rejects codes someone already claimed.
pub struct CodeUnclaimed;

impl Guard for CodeUnclaimed {
    fn name(&self) -> &'static str {
        "code_unclaimed"
    }

    fn check(&self, state: &LedgerState, request: &RedeemRequest<'_>) -> Result<(), LedgerError> {
        match state.codes().get(request.code) {
            Some(record) if record.is_redeemed() => Err(LedgerError::AlreadyRedeemed),
            _ => Ok(()),
        }
    }
}

/// The stock pipeline, in evaluation order.
pub fn redemption_pipeline() -> Vec<Box<dyn Guard>> {
    vec![
        Box::new(NotBanned),
        Box::new(ValidFormat),
        Box::new(NotPastWinner),
        Box::new(CodeExists),
        Box::new(CodeUnclaimed),
    ]
}

/// Run `request` through `guards`, stopping at the first rejection.
pub fn run(
    guards: &[Box<dyn Guard>],
    state: &LedgerState,
    request: &RedeemRequest<'_>,
) -> Result<(), LedgerError> {
    for guard in guards {
        guard.check(state, request)?;
    }
    Ok(())
}
