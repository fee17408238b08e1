use crate::guard::GuardError;
use crate::numeric::{Ratio, Tokens, TUSD};
use candid::{CandidType, Deserialize, Principal};
use icrc_ledger_types::icrc1::transfer::TransferError;
use icrc_ledger_types::icrc2::transfer_from::TransferFromError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

pub mod event;
pub mod guard;
pub mod logs;
pub mod management;
pub mod market;
pub mod numeric;
pub mod state;
pub mod storage;

#[cfg(test)]
mod tests;

/// One whole token in base units (9 fractional digits).
pub const E9S: u64 = 1_000_000_000;

/// Default minimum collateral ratio for new markets: collateral must be
/// worth at least twice the outstanding debt.
pub const DEFAULT_MIN_COLLATERAL_RATIO_PERCENT: u64 = 200;

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolArg {
    Init(InitArg),
    Upgrade(UpgradeArg),
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitArg {
    /// Ledger of the debt token. This canister must be its minting account
    /// so that borrows mint and repayments burn.
    pub debt_ledger_principal: Principal,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeArg {
    pub debt_ledger_principal: Option<Principal>,
}

#[derive(CandidType, Deserialize, Debug)]
pub struct MarketStatus {
    pub collateral_ledger: Principal,
    pub admin: Principal,
    pub min_collateral_ratio_percent: u64,
    pub total_debt: u64,
    pub escrow_balance: u64,
    pub open_troves: u64,
    pub total_collateral_ratio_percent: f64,
}

#[derive(CandidType, Deserialize)]
pub struct GetEventsArg {
    pub start: u64,
    pub length: u64,
}

/// Every rejection carries a distinguishable kind: validation errors
/// (`ZeroAmount`, `Overflow`), state errors (`DuplicateMarket`,
/// `DuplicatePosition`, `NoSuchMarket`, `NoSuchTrove`), solvency errors
/// (`InsufficientCollateral`), balance errors (`InsufficientFunds`,
/// `ExcessRepayment`), and transport/authorization errors surfaced from the
/// ledgers and the call layer.
#[derive(CandidType, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum ProtocolError {
    ZeroAmount,
    Overflow,
    DuplicateMarket,
    DuplicatePosition,
    NoSuchMarket,
    NoSuchTrove,
    InsufficientCollateral,
    InsufficientFunds,
    ExcessRepayment,
    CallerNotOwner,
    AnonymousCallerNotAllowed,
    AlreadyProcessing,
    TemporarilyUnavailable(String),
    TransferError(TransferError),
    TransferFromError(TransferFromError, u64),
}

impl From<GuardError> for ProtocolError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::AlreadyProcessing => Self::AlreadyProcessing,
            GuardError::TooManyConcurrentRequests => {
                Self::TemporarilyUnavailable("too many concurrent requests".to_string())
            }
        }
    }
}

/// Single authoritative solvency comparison, used by every ratio check:
/// `collateral * 100 >= debt * min_collateral_ratio_percent`, with a fixed
/// 1:1 valuation between collateral and debt units. A trove with zero debt
/// is always solvent. Evaluated in 128-bit arithmetic so the comparison
/// itself cannot overflow.
pub fn is_solvent(collateral: Tokens, debt: TUSD, min_collateral_ratio_percent: u64) -> bool {
    if debt == TUSD::new(0) {
        return true;
    }
    collateral.to_u64() as u128 * 100
        >= debt.to_u64() as u128 * min_collateral_ratio_percent as u128
}

/// Collateral-to-debt ratio in percent, for status reporting only.
/// Enforcement goes through [`is_solvent`].
pub fn compute_collateral_ratio(collateral: Tokens, debt: TUSD) -> Ratio {
    if debt == TUSD::new(0) {
        return Ratio::from(Decimal::MAX);
    }
    let collateral = Decimal::from(collateral.to_u64());
    let debt = Decimal::from(debt.to_u64());
    Ratio::from(collateral * dec!(100) / debt)
}
