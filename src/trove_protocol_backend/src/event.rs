use crate::numeric::{Tokens, TUSD};
use crate::state::{Market, MarketId, State, Trove};
use crate::storage::record_event;
use crate::{InitArg, UpgradeArg};
use candid::{CandidType, Principal};
use serde::{Deserialize, Serialize};

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[serde(rename = "init")]
    Init(InitArg),

    #[serde(rename = "upgrade")]
    Upgrade(UpgradeArg),

    #[serde(rename = "init_market")]
    InitMarket { market: Market },

    #[serde(rename = "open_trove")]
    OpenTrove { trove: Trove, block_index: u64 },

    #[serde(rename = "deposit")]
    Deposit {
        owner: Principal,
        market_id: MarketId,
        amount: Tokens,
        block_index: u64,
    },

    #[serde(rename = "withdraw")]
    Withdraw {
        owner: Principal,
        market_id: MarketId,
        amount: Tokens,
        block_index: u64,
    },

    #[serde(rename = "borrow")]
    Borrow {
        owner: Principal,
        market_id: MarketId,
        amount: TUSD,
        block_index: u64,
    },

    #[serde(rename = "repay")]
    Repay {
        owner: Principal,
        market_id: MarketId,
        amount: TUSD,
        block_index: u64,
    },
}

impl Event {
    pub fn is_trove_related(&self, filter_owner: &Principal, filter_market: &MarketId) -> bool {
        match self {
            Event::Init(_) | Event::Upgrade(_) | Event::InitMarket { .. } => false,
            Event::OpenTrove { trove, .. } => {
                &trove.owner == filter_owner && &trove.market_id == filter_market
            }
            Event::Deposit {
                owner, market_id, ..
            }
            | Event::Withdraw {
                owner, market_id, ..
            }
            | Event::Borrow {
                owner, market_id, ..
            }
            | Event::Repay {
                owner, market_id, ..
            } => owner == filter_owner && market_id == filter_market,
        }
    }
}

pub fn record_init_market(state: &mut State, market: Market) {
    record_event(&Event::InitMarket {
        market: market.clone(),
    });
    state.init_market(market);
}

pub fn record_open_trove(state: &mut State, trove: Trove, block_index: u64) {
    record_event(&Event::OpenTrove {
        trove: trove.clone(),
        block_index,
    });
    state.open_trove(trove);
}

pub fn record_deposit(
    state: &mut State,
    owner: Principal,
    market_id: MarketId,
    amount: Tokens,
    block_index: u64,
) {
    record_event(&Event::Deposit {
        owner,
        market_id,
        amount,
        block_index,
    });
    state.deposit_to_trove((owner, market_id), amount);
}

pub fn record_withdraw(
    state: &mut State,
    owner: Principal,
    market_id: MarketId,
    amount: Tokens,
    block_index: u64,
) {
    record_event(&Event::Withdraw {
        owner,
        market_id,
        amount,
        block_index,
    });
    state.withdraw_from_trove((owner, market_id), amount);
}

pub fn record_borrow(
    state: &mut State,
    owner: Principal,
    market_id: MarketId,
    amount: TUSD,
    block_index: u64,
) {
    record_event(&Event::Borrow {
        owner,
        market_id,
        amount,
        block_index,
    });
    state.borrow_on_trove((owner, market_id), amount);
}

pub fn record_repay(
    state: &mut State,
    owner: Principal,
    market_id: MarketId,
    amount: TUSD,
    block_index: u64,
) {
    record_event(&Event::Repay {
        owner,
        market_id,
        amount,
        block_index,
    });
    state.repay_to_trove((owner, market_id), amount);
}

#[derive(Debug)]
pub enum ReplayLogError {
    /// There are no events in the event log.
    EmptyLog,
    /// The event log is inconsistent.
    InconsistentLog(String),
}

/// Rebuilds the state from the event log. Used after an upgrade; the
/// rebuilt state must be semantically equal to the pre-upgrade one.
pub fn replay(mut events: impl Iterator<Item = Event>) -> Result<State, ReplayLogError> {
    let mut state = match events.next() {
        Some(Event::Init(args)) => State::from(args),
        Some(evt) => {
            return Err(ReplayLogError::InconsistentLog(format!(
                "The first event is not Init: {:?}",
                evt
            )))
        }
        None => return Err(ReplayLogError::EmptyLog),
    };
    for event in events {
        match event {
            Event::Init(args) => {
                return Err(ReplayLogError::InconsistentLog(format!(
                    "Found a second Init event: {:?}",
                    args
                )))
            }
            Event::Upgrade(args) => state.upgrade(args),
            Event::InitMarket { market } => state.init_market(market),
            Event::OpenTrove {
                trove,
                block_index: _,
            } => state.open_trove(trove),
            Event::Deposit {
                owner,
                market_id,
                amount,
                block_index: _,
            } => state.deposit_to_trove((owner, market_id), amount),
            Event::Withdraw {
                owner,
                market_id,
                amount,
                block_index: _,
            } => state.withdraw_from_trove((owner, market_id), amount),
            Event::Borrow {
                owner,
                market_id,
                amount,
                block_index: _,
            } => state.borrow_on_trove((owner, market_id), amount),
            Event::Repay {
                owner,
                market_id,
                amount,
                block_index: _,
            } => state.repay_to_trove((owner, market_id), amount),
        }
    }
    Ok(state)
}
