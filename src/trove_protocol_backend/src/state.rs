use crate::is_solvent;
use crate::numeric::{Tokens, TUSD};
use crate::{InitArg, UpgradeArg};
use candid::{CandidType, Principal};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

// Like assert_eq, but returns an error instead of panicking.
macro_rules! ensure_eq {
    ($lhs:expr, $rhs:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if $lhs != $rhs {
            return Err(format!("{} ({:?}) != {} ({:?}): {}",
                               std::stringify!($lhs), $lhs,
                               std::stringify!($rhs), $rhs,
                               format!($msg $(,$args)*)));
        }
    }
}

macro_rules! ensure {
    ($cond:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if !$cond {
            return Err(format!("Condition {} is false: {}",
                               std::stringify!($cond),
                               format!($msg $(,$args)*)));
        }
    }
}

/// Markets are keyed by the ICRC-1 ledger of their collateral asset.
pub type MarketId = Principal;

/// One trove per owner per market.
pub type TroveKey = (Principal, MarketId);

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub collateral_ledger: Principal,
    /// Set at creation, never changed afterwards.
    pub admin: Principal,
    /// Set at creation, never changed afterwards.
    pub min_collateral_ratio_percent: u64,
    /// The only mutable field: aggregate debt across the market's troves,
    /// maintained incrementally by every open/borrow/repay.
    pub total_debt: TUSD,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trove {
    pub owner: Principal,
    pub market_id: MarketId,
    pub collateral_amount: Tokens,
    pub debt_amount: TUSD,
}

thread_local! {
    static __STATE: RefCell<Option<State>> = RefCell::default();
}

pub struct State {
    pub markets: BTreeMap<MarketId, Market>,
    pub troves: BTreeMap<TroveKey, Trove>,
    /// Escrowed collateral per market. Mirrors the canister's balance on
    /// each collateral ledger; mutated only alongside a trove mutation.
    pub escrow_balances: BTreeMap<MarketId, Tokens>,
    pub debt_ledger_principal: Principal,
    pub principal_guards: BTreeSet<Principal>,
}

impl From<InitArg> for State {
    fn from(args: InitArg) -> Self {
        Self {
            markets: BTreeMap::new(),
            troves: BTreeMap::new(),
            escrow_balances: BTreeMap::new(),
            debt_ledger_principal: args.debt_ledger_principal,
            principal_guards: BTreeSet::new(),
        }
    }
}

impl State {
    pub fn upgrade(&mut self, args: UpgradeArg) {
        if let Some(debt_ledger_principal) = args.debt_ledger_principal {
            self.debt_ledger_principal = debt_ledger_principal;
        }
    }

    pub fn get_market(&self, market_id: &MarketId) -> Option<&Market> {
        self.markets.get(market_id)
    }

    pub fn get_trove(&self, owner: Principal, market_id: MarketId) -> Option<&Trove> {
        self.troves.get(&(owner, market_id))
    }

    pub fn escrow_balance_of(&self, market_id: &MarketId) -> Tokens {
        self.escrow_balances
            .get(market_id)
            .copied()
            .unwrap_or(Tokens::new(0))
    }

    /// Recomputes the aggregate debt of a market by scanning its troves.
    /// The live aggregate is `Market::total_debt`; this is the
    /// reconciliation path only.
    pub fn total_debt_of(&self, market_id: &MarketId) -> TUSD {
        self.troves
            .values()
            .filter(|t| t.market_id == *market_id)
            .map(|t| t.debt_amount)
            .sum()
    }

    pub fn total_collateral_of(&self, market_id: &MarketId) -> Tokens {
        self.troves
            .values()
            .filter(|t| t.market_id == *market_id)
            .map(|t| t.collateral_amount)
            .sum()
    }

    pub fn troves_of_market(&self, market_id: &MarketId) -> u64 {
        self.troves
            .values()
            .filter(|t| t.market_id == *market_id)
            .count() as u64
    }

    pub fn init_market(&mut self, market: Market) {
        let market_id = market.collateral_ledger;
        assert!(
            self.markets.insert(market_id, market).is_none(),
            "bug: market already registered"
        );
        self.escrow_balances.insert(market_id, Tokens::new(0));
    }

    pub fn open_trove(&mut self, trove: Trove) {
        let key = (trove.owner, trove.market_id);
        let market = self
            .markets
            .get_mut(&trove.market_id)
            .expect("bug: opening a trove under an unknown market");
        market.total_debt += trove.debt_amount;
        *self
            .escrow_balances
            .get_mut(&trove.market_id)
            .expect("bug: market without escrow") += trove.collateral_amount;
        assert!(
            self.troves.insert(key, trove).is_none(),
            "bug: trove already open"
        );
    }

    pub fn deposit_to_trove(&mut self, key: TroveKey, amount: Tokens) {
        let trove = self
            .troves
            .get_mut(&key)
            .expect("bug: depositing to an unknown trove");
        trove.collateral_amount += amount;
        *self
            .escrow_balances
            .get_mut(&key.1)
            .expect("bug: market without escrow") += amount;
    }

    pub fn withdraw_from_trove(&mut self, key: TroveKey, amount: Tokens) {
        let trove = self
            .troves
            .get_mut(&key)
            .expect("bug: withdrawing from an unknown trove");
        assert!(amount <= trove.collateral_amount);
        trove.collateral_amount -= amount;
        *self
            .escrow_balances
            .get_mut(&key.1)
            .expect("bug: market without escrow") -= amount;
    }

    pub fn borrow_on_trove(&mut self, key: TroveKey, amount: TUSD) {
        let trove = self
            .troves
            .get_mut(&key)
            .expect("bug: borrowing on an unknown trove");
        trove.debt_amount += amount;
        self.markets
            .get_mut(&key.1)
            .expect("bug: trove without market")
            .total_debt += amount;
    }

    pub fn repay_to_trove(&mut self, key: TroveKey, amount: TUSD) {
        let trove = self
            .troves
            .get_mut(&key)
            .expect("bug: repaying to an unknown trove");
        assert!(amount <= trove.debt_amount);
        trove.debt_amount -= amount;
        self.markets
            .get_mut(&key.1)
            .expect("bug: trove without market")
            .total_debt -= amount;
    }

    pub fn check_semantically_eq(&self, other: &Self) -> Result<(), String> {
        ensure_eq!(self.markets, other.markets, "markets do not match");
        ensure_eq!(self.troves, other.troves, "troves do not match");
        ensure_eq!(
            self.escrow_balances,
            other.escrow_balances,
            "escrow_balances do not match"
        );
        ensure_eq!(
            self.debt_ledger_principal,
            other.debt_ledger_principal,
            "debt_ledger_principal does not match"
        );
        Ok(())
    }

    /// Reconciliation: recompute every aggregate from the trove table and
    /// compare against the incrementally maintained values, then check the
    /// solvency of every indebted trove.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (market_id, market) in &self.markets {
            ensure_eq!(
                market.collateral_ledger,
                *market_id,
                "market keyed under the wrong ledger"
            );
            ensure_eq!(
                market.total_debt,
                self.total_debt_of(market_id),
                "total_debt drifted from the sum of trove debts for market {}",
                market_id
            );
            ensure_eq!(
                self.escrow_balance_of(market_id),
                self.total_collateral_of(market_id),
                "escrow balance drifted from the sum of trove collateral for market {}",
                market_id
            );
        }

        for ((owner, market_id), trove) in &self.troves {
            ensure_eq!(trove.owner, *owner, "trove keyed under the wrong owner");
            ensure_eq!(
                trove.market_id,
                *market_id,
                "trove keyed under the wrong market"
            );
            let market = self
                .markets
                .get(market_id)
                .ok_or_else(|| format!("trove under unknown market {}", market_id))?;
            ensure!(
                is_solvent(
                    trove.collateral_amount,
                    trove.debt_amount,
                    market.min_collateral_ratio_percent
                ),
                "undercollateralized trove: owner {}, market {}, collateral {}, debt {}",
                owner,
                market_id,
                trove.collateral_amount,
                trove.debt_amount,
            );
        }

        Ok(())
    }
}

pub fn read_state<R>(f: impl FnOnce(&State) -> R) -> R {
    __STATE.with(|s| f(s.borrow().as_ref().expect("state not initialized")))
}

pub fn mutate_state<R>(f: impl FnOnce(&mut State) -> R) -> R {
    __STATE.with(|s| f(s.borrow_mut().as_mut().expect("state not initialized")))
}

pub fn replace_state(state: State) {
    __STATE.with(|s| {
        *s.borrow_mut() = Some(state);
    });
}
