use crate::event::{
    record_borrow, record_deposit, record_init_market, record_open_trove, record_repay,
    record_withdraw,
};
use crate::guard::GuardPrincipal;
use crate::logs::{DEBUG, INFO};
use crate::management::{burn_debt_from, mint_debt, transfer_collateral, transfer_collateral_from};
use crate::numeric::{Tokens, TUSD};
use crate::state::{mutate_state, read_state, Market, MarketId, State, Trove};
use crate::{is_solvent, ProtocolError, DEFAULT_MIN_COLLATERAL_RATIO_PERCENT};
use candid::{CandidType, Deserialize, Principal};
use ic_canister_log::log;
use serde::Serialize;

#[derive(CandidType, Deserialize)]
pub struct InitMarketArg {
    pub collateral_ledger: Principal,
    /// Defaults to [`crate::DEFAULT_MIN_COLLATERAL_RATIO_PERCENT`].
    pub min_collateral_ratio_percent: Option<u64>,
}

#[derive(CandidType, Deserialize)]
pub struct OpenTroveArg {
    pub market_id: MarketId,
    pub collateral_amount: u64,
    pub debt_amount: u64,
}

#[derive(CandidType, Deserialize)]
pub struct TroveArg {
    pub market_id: MarketId,
    pub amount: u64,
}

#[derive(CandidType, Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct OpenTroveSuccess {
    pub market_id: MarketId,
    pub block_index: u64,
}

#[derive(CandidType, Serialize, Deserialize, Debug)]
pub struct CandidTrove {
    pub owner: Principal,
    pub market_id: MarketId,
    pub collateral_amount: u64,
    pub debt_amount: u64,
}

impl From<&Trove> for CandidTrove {
    fn from(trove: &Trove) -> Self {
        Self {
            owner: trove.owner,
            market_id: trove.market_id,
            collateral_amount: trove.collateral_amount.to_u64(),
            debt_amount: trove.debt_amount.to_u64(),
        }
    }
}

#[derive(CandidType, Serialize, Deserialize, Debug)]
pub struct CandidMarket {
    pub collateral_ledger: Principal,
    pub admin: Principal,
    pub min_collateral_ratio_percent: u64,
    pub total_debt: u64,
}

impl From<&Market> for CandidMarket {
    fn from(market: &Market) -> Self {
        Self {
            collateral_ledger: market.collateral_ledger,
            admin: market.admin,
            min_collateral_ratio_percent: market.min_collateral_ratio_percent,
            total_debt: market.total_debt.to_u64(),
        }
    }
}

// Every operation validates against the full post-state before any external
// effect, then performs the ledger transfers, then commits the deltas in a
// single mutate_state block. A rejected call mutates nothing.

pub fn validate_init_market(s: &State, collateral_ledger: &MarketId) -> Result<(), ProtocolError> {
    if s.markets.contains_key(collateral_ledger) {
        return Err(ProtocolError::DuplicateMarket);
    }
    Ok(())
}

pub fn validate_open_trove(
    s: &State,
    owner: Principal,
    market_id: MarketId,
    collateral: Tokens,
    debt: TUSD,
) -> Result<(), ProtocolError> {
    let market = s.get_market(&market_id).ok_or(ProtocolError::NoSuchMarket)?;
    if s.get_trove(owner, market_id).is_some() {
        return Err(ProtocolError::DuplicatePosition);
    }
    if collateral == Tokens::new(0) {
        return Err(ProtocolError::ZeroAmount);
    }
    market
        .total_debt
        .checked_add(debt)
        .ok_or(ProtocolError::Overflow)?;
    s.escrow_balance_of(&market_id)
        .checked_add(collateral)
        .ok_or(ProtocolError::Overflow)?;
    if !is_solvent(collateral, debt, market.min_collateral_ratio_percent) {
        return Err(ProtocolError::InsufficientCollateral);
    }
    Ok(())
}

pub fn validate_deposit(
    s: &State,
    owner: Principal,
    market_id: MarketId,
    amount: Tokens,
) -> Result<(), ProtocolError> {
    let trove = s
        .get_trove(owner, market_id)
        .ok_or(ProtocolError::NoSuchTrove)?;
    if amount == Tokens::new(0) {
        return Err(ProtocolError::ZeroAmount);
    }
    trove
        .collateral_amount
        .checked_add(amount)
        .ok_or(ProtocolError::Overflow)?;
    s.escrow_balance_of(&market_id)
        .checked_add(amount)
        .ok_or(ProtocolError::Overflow)?;
    Ok(())
}

pub fn validate_withdraw(
    s: &State,
    owner: Principal,
    market_id: MarketId,
    amount: Tokens,
) -> Result<(), ProtocolError> {
    let trove = s
        .get_trove(owner, market_id)
        .ok_or(ProtocolError::NoSuchTrove)?;
    if trove.owner != owner {
        return Err(ProtocolError::CallerNotOwner);
    }
    let market = s
        .get_market(&market_id)
        .expect("bug: trove without market");
    let remaining = trove
        .collateral_amount
        .checked_sub(amount)
        .ok_or(ProtocolError::InsufficientFunds)?;
    if !is_solvent(remaining, trove.debt_amount, market.min_collateral_ratio_percent) {
        return Err(ProtocolError::InsufficientCollateral);
    }
    Ok(())
}

pub fn validate_borrow(
    s: &State,
    owner: Principal,
    market_id: MarketId,
    amount: TUSD,
) -> Result<(), ProtocolError> {
    let trove = s
        .get_trove(owner, market_id)
        .ok_or(ProtocolError::NoSuchTrove)?;
    if trove.owner != owner {
        return Err(ProtocolError::CallerNotOwner);
    }
    if amount == TUSD::new(0) {
        return Err(ProtocolError::ZeroAmount);
    }
    let market = s
        .get_market(&market_id)
        .expect("bug: trove without market");
    let new_debt = trove
        .debt_amount
        .checked_add(amount)
        .ok_or(ProtocolError::Overflow)?;
    market
        .total_debt
        .checked_add(amount)
        .ok_or(ProtocolError::Overflow)?;
    if !is_solvent(
        trove.collateral_amount,
        new_debt,
        market.min_collateral_ratio_percent,
    ) {
        return Err(ProtocolError::InsufficientCollateral);
    }
    Ok(())
}

pub fn validate_repay(
    s: &State,
    owner: Principal,
    market_id: MarketId,
    amount: TUSD,
) -> Result<(), ProtocolError> {
    let trove = s
        .get_trove(owner, market_id)
        .ok_or(ProtocolError::NoSuchTrove)?;
    if amount > trove.debt_amount {
        return Err(ProtocolError::ExcessRepayment);
    }
    Ok(())
}

/// Registers a market for a collateral asset. The caller becomes the
/// market's administrator; the ratio and the administrator are immutable
/// after this call.
pub fn init_market(arg: InitMarketArg) -> Result<MarketId, ProtocolError> {
    let caller = ic_cdk::api::caller();
    let _guard = GuardPrincipal::new(caller)?;

    let min_collateral_ratio_percent = arg
        .min_collateral_ratio_percent
        .unwrap_or(DEFAULT_MIN_COLLATERAL_RATIO_PERCENT);

    mutate_state(|s| {
        validate_init_market(s, &arg.collateral_ledger)?;
        record_init_market(
            s,
            Market {
                collateral_ledger: arg.collateral_ledger,
                admin: caller,
                min_collateral_ratio_percent,
                total_debt: TUSD::new(0),
            },
        );
        Ok::<(), ProtocolError>(())
    })?;

    log!(
        INFO,
        "[init_market] {} registered market for collateral ledger {} at minimum ratio {}%",
        caller,
        arg.collateral_ledger,
        min_collateral_ratio_percent
    );
    Ok(arg.collateral_ledger)
}

/// Opens the caller's trove under a market. Reads the market record;
/// creates the trove, moves the collateral into escrow, and adds the
/// requested debt to the market aggregate (minting it to the caller).
pub async fn open_trove(arg: OpenTroveArg) -> Result<OpenTroveSuccess, ProtocolError> {
    let caller = ic_cdk::api::caller();
    let _guard = GuardPrincipal::new(caller)?;

    let collateral = Tokens::from(arg.collateral_amount);
    let debt = TUSD::from(arg.debt_amount);

    read_state(|s| validate_open_trove(s, caller, arg.market_id, collateral, debt))?;

    let block_index = transfer_collateral_from(arg.collateral_amount, caller, arg.market_id)
        .await
        .map_err(|e| ProtocolError::TransferFromError(e, arg.collateral_amount))?;

    if debt > TUSD::new(0) {
        if let Err(mint_error) = mint_debt(arg.debt_amount, caller).await {
            // The collateral is already in escrow with nothing committed
            // against it; send it back before failing the call.
            match transfer_collateral(arg.collateral_amount, caller, arg.market_id).await {
                Ok(refund_block) => log!(
                    INFO,
                    "[open_trove] debt mint failed for {}, refunded {} collateral (block {})",
                    caller,
                    arg.collateral_amount,
                    refund_block
                ),
                Err(refund_error) => log!(
                    INFO,
                    "[open_trove] debt mint AND collateral refund failed for {}: \
                     amount {}, mint error {:?}, refund error {:?}. \
                     Manual intervention required.",
                    caller,
                    arg.collateral_amount,
                    mint_error,
                    refund_error
                ),
            }
            return Err(ProtocolError::TransferError(mint_error));
        }
    }

    mutate_state(|s| {
        record_open_trove(
            s,
            Trove {
                owner: caller,
                market_id: arg.market_id,
                collateral_amount: collateral,
                debt_amount: debt,
            },
            block_index,
        )
    });

    log!(
        INFO,
        "[open_trove] {} opened a trove under market {} with collateral {} and debt {}",
        caller,
        arg.market_id,
        collateral,
        debt
    );
    Ok(OpenTroveSuccess {
        market_id: arg.market_id,
        block_index,
    })
}

/// Adds collateral to the caller's trove. Mutates the trove and the
/// market's escrow balance; the ratio can only improve, so there is no
/// post-state ratio check.
pub async fn deposit(arg: TroveArg) -> Result<u64, ProtocolError> {
    let caller = ic_cdk::api::caller();
    let _guard = GuardPrincipal::new(caller)?;

    let amount = Tokens::from(arg.amount);
    read_state(|s| validate_deposit(s, caller, arg.market_id, amount))?;

    let block_index = transfer_collateral_from(arg.amount, caller, arg.market_id)
        .await
        .map_err(|e| ProtocolError::TransferFromError(e, arg.amount))?;

    mutate_state(|s| record_deposit(s, caller, arg.market_id, amount, block_index));

    log!(
        INFO,
        "[deposit] {} added {} collateral under market {}",
        caller,
        amount,
        arg.market_id
    );
    Ok(block_index)
}

/// Pays collateral out of escrow back to the caller. Reads the market's
/// minimum ratio, mutates the trove and the escrow balance; rejected if the
/// remaining collateral would leave the debt undercollateralized.
pub async fn withdraw(arg: TroveArg) -> Result<u64, ProtocolError> {
    let caller = ic_cdk::api::caller();
    let _guard = GuardPrincipal::new(caller)?;

    let amount = Tokens::from(arg.amount);
    if let Err(e) = read_state(|s| validate_withdraw(s, caller, arg.market_id, amount)) {
        log!(
            DEBUG,
            "[withdraw] rejected withdrawal of {} by {} under market {}: {:?}",
            amount,
            caller,
            arg.market_id,
            e
        );
        return Err(e);
    }

    let block_index = transfer_collateral(arg.amount, caller, arg.market_id)
        .await
        .map_err(ProtocolError::TransferError)?;

    mutate_state(|s| record_withdraw(s, caller, arg.market_id, amount, block_index));

    log!(
        INFO,
        "[withdraw] {} withdrew {} collateral under market {}",
        caller,
        amount,
        arg.market_id
    );
    Ok(block_index)
}

/// Mints debt tokens to the caller against the trove's collateral.
/// Mutates the trove and the market's `total_debt` aggregate.
pub async fn borrow(arg: TroveArg) -> Result<u64, ProtocolError> {
    let caller = ic_cdk::api::caller();
    let _guard = GuardPrincipal::new(caller)?;

    let amount = TUSD::from(arg.amount);
    if let Err(e) = read_state(|s| validate_borrow(s, caller, arg.market_id, amount)) {
        log!(
            DEBUG,
            "[borrow] rejected borrow of {} by {} under market {}: {:?}",
            amount,
            caller,
            arg.market_id,
            e
        );
        return Err(e);
    }

    let block_index = mint_debt(arg.amount, caller)
        .await
        .map_err(ProtocolError::TransferError)?;

    mutate_state(|s| record_borrow(s, caller, arg.market_id, amount, block_index));

    log!(
        INFO,
        "[borrow] {} borrowed {} under market {}",
        caller,
        amount,
        arg.market_id
    );
    Ok(block_index)
}

/// Burns debt tokens from the caller's balance and reduces the trove's
/// debt and the market's `total_debt` aggregate. Repayment strictly
/// improves solvency, so there is no ratio check.
pub async fn repay(arg: TroveArg) -> Result<u64, ProtocolError> {
    let caller = ic_cdk::api::caller();
    let _guard = GuardPrincipal::new(caller)?;

    let amount = TUSD::from(arg.amount);
    read_state(|s| validate_repay(s, caller, arg.market_id, amount))?;

    let block_index = burn_debt_from(arg.amount, caller)
        .await
        .map_err(|e| ProtocolError::TransferFromError(e, arg.amount))?;

    mutate_state(|s| record_repay(s, caller, arg.market_id, amount, block_index));

    log!(
        INFO,
        "[repay] {} repaid {} under market {}",
        caller,
        amount,
        arg.market_id
    );
    Ok(block_index)
}
