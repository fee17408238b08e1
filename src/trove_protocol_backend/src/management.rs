//! Inter-canister calls against the collateral ledgers and the debt ledger.
//!
//! Escrow is the canister's own account on each collateral ledger, so every
//! collateral movement is an ICRC-1/ICRC-2 call with this canister on one
//! side. The debt ledger's minting account is this canister: transfers out
//! of it mint, transfers into it burn.

use crate::state::read_state;
use candid::{Nat, Principal};
use icrc_ledger_types::icrc1::account::Account;
use icrc_ledger_types::icrc1::transfer::{TransferArg, TransferError};
use icrc_ledger_types::icrc2::transfer_from::{TransferFromArgs, TransferFromError};
use num_traits::ToPrimitive;

async fn icrc1_transfer(
    ledger: Principal,
    to: Account,
    amount: u64,
) -> Result<u64, TransferError> {
    let args = TransferArg {
        from_subaccount: None,
        to,
        amount: Nat::from(amount),
        fee: None,
        memo: None,
        created_at_time: None,
    };
    let (result,): (Result<Nat, TransferError>,) =
        ic_cdk::call(ledger, "icrc1_transfer", (args,))
            .await
            .map_err(|(code, msg)| TransferError::GenericError {
                error_code: Nat::from(500_u32),
                message: format!("call to ledger {} failed ({:?}): {}", ledger, code, msg),
            })?;
    let block_index = result?;
    block_index
        .0
        .to_u64()
        .ok_or_else(|| TransferError::GenericError {
            error_code: Nat::from(501_u32),
            message: "block index does not fit in u64".to_string(),
        })
}

async fn icrc2_transfer_from(
    ledger: Principal,
    from: Account,
    to: Account,
    amount: u64,
) -> Result<u64, TransferFromError> {
    let args = TransferFromArgs {
        spender_subaccount: None,
        from,
        to,
        amount: Nat::from(amount),
        fee: None,
        memo: None,
        created_at_time: None,
    };
    let (result,): (Result<Nat, TransferFromError>,) =
        ic_cdk::call(ledger, "icrc2_transfer_from", (args,))
            .await
            .map_err(|(code, msg)| TransferFromError::GenericError {
                error_code: Nat::from(500_u32),
                message: format!("call to ledger {} failed ({:?}): {}", ledger, code, msg),
            })?;
    let block_index = result?;
    block_index
        .0
        .to_u64()
        .ok_or_else(|| TransferFromError::GenericError {
            error_code: Nat::from(501_u32),
            message: "block index does not fit in u64".to_string(),
        })
}

fn escrow_account() -> Account {
    Account {
        owner: ic_cdk::id(),
        subaccount: None,
    }
}

fn account_of(owner: Principal) -> Account {
    Account {
        owner,
        subaccount: None,
    }
}

/// Pulls `amount` collateral from `from` into escrow. The caller must have
/// approved this canister on the collateral ledger beforehand.
pub async fn transfer_collateral_from(
    amount: u64,
    from: Principal,
    ledger: Principal,
) -> Result<u64, TransferFromError> {
    icrc2_transfer_from(ledger, account_of(from), escrow_account(), amount).await
}

/// Pays `amount` collateral out of escrow to `to`.
pub async fn transfer_collateral(
    amount: u64,
    to: Principal,
    ledger: Principal,
) -> Result<u64, TransferError> {
    icrc1_transfer(ledger, account_of(to), amount).await
}

/// Mints `amount` debt tokens to `to`.
pub async fn mint_debt(amount: u64, to: Principal) -> Result<u64, TransferError> {
    let debt_ledger = read_state(|s| s.debt_ledger_principal);
    icrc1_transfer(debt_ledger, account_of(to), amount).await
}

/// Burns `amount` debt tokens from `from` by moving them back to the
/// minting account. Requires a prior approval on the debt ledger.
pub async fn burn_debt_from(amount: u64, from: Principal) -> Result<u64, TransferFromError> {
    let debt_ledger = read_state(|s| s.debt_ledger_principal);
    icrc2_transfer_from(debt_ledger, account_of(from), escrow_account(), amount).await
}
