use crate::market::{
    validate_borrow, validate_deposit, validate_open_trove, validate_repay, validate_withdraw,
};
use crate::numeric::{Tokens, TUSD};
use crate::state::{Market, MarketId, State, Trove};
use crate::{is_solvent, InitArg, DEFAULT_MIN_COLLATERAL_RATIO_PERCENT, E9S};
use candid::Principal;
use proptest::collection::vec as pvec;
use proptest::prelude::*;

fn arb_principal() -> impl Strategy<Value = Principal> {
    pvec(any::<u8>(), 29).prop_map(|bytes| Principal::from_slice(&bytes))
}

#[derive(Clone, Debug)]
enum Op {
    Deposit(u64),
    Withdraw(u64),
    Borrow(u64),
    Repay(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1..=10 * E9S).prop_map(Op::Deposit),
        (1..=10 * E9S).prop_map(Op::Withdraw),
        (1..=10 * E9S).prop_map(Op::Borrow),
        (1..=10 * E9S).prop_map(Op::Repay),
    ]
}

fn market_id() -> MarketId {
    Principal::from_slice(&[7; 10])
}

fn state_with_market() -> State {
    let mut state = State::from(InitArg {
        debt_ledger_principal: Principal::from_slice(&[1; 10]),
    });
    state.init_market(Market {
        collateral_ledger: market_id(),
        admin: Principal::from_slice(&[2; 10]),
        min_collateral_ratio_percent: DEFAULT_MIN_COLLATERAL_RATIO_PERCENT,
        total_debt: TUSD::new(0),
    });
    state
}

#[test]
fn solvency_boundary() {
    // 200%: collateral must be at least twice the debt.
    assert!(is_solvent(Tokens::new(1_000), TUSD::new(500), 200));
    assert!(!is_solvent(Tokens::new(1_000), TUSD::new(501), 200));
    assert!(is_solvent(Tokens::new(0), TUSD::new(0), 200));
    // Zero debt is always solvent, even with zero collateral.
    assert!(is_solvent(Tokens::new(0), TUSD::new(0), u64::MAX));
    // The comparison must not overflow on extreme inputs.
    assert!(!is_solvent(Tokens::new(u64::MAX), TUSD::new(u64::MAX), 200));
    assert!(is_solvent(Tokens::new(u64::MAX), TUSD::new(u64::MAX), 100));
}

proptest! {
    /// Applying any sequence of validated operations never breaks the
    /// per-trove solvency invariant or the aggregate bookkeeping.
    #[test]
    fn operation_sequences_preserve_invariants(
        owners in pvec(arb_principal(), 1..4),
        ops in pvec((any::<prop::sample::Index>(), arb_op()), 1..60),
    ) {
        let mut state = state_with_market();
        let market = market_id();

        for owner in &owners {
            let collateral = Tokens::new(10 * E9S);
            let debt = TUSD::new(E9S);
            if validate_open_trove(&state, *owner, market, collateral, debt).is_ok() {
                state.open_trove(Trove {
                    owner: *owner,
                    market_id: market,
                    collateral_amount: collateral,
                    debt_amount: debt,
                });
            }
        }

        for (idx, op) in ops {
            let owner = owners[idx.index(owners.len())];
            match op {
                Op::Deposit(amount) => {
                    if validate_deposit(&state, owner, market, Tokens::new(amount)).is_ok() {
                        state.deposit_to_trove((owner, market), Tokens::new(amount));
                    }
                }
                Op::Withdraw(amount) => {
                    if validate_withdraw(&state, owner, market, Tokens::new(amount)).is_ok() {
                        state.withdraw_from_trove((owner, market), Tokens::new(amount));
                    }
                }
                Op::Borrow(amount) => {
                    if validate_borrow(&state, owner, market, TUSD::new(amount)).is_ok() {
                        state.borrow_on_trove((owner, market), TUSD::new(amount));
                    }
                }
                Op::Repay(amount) => {
                    if validate_repay(&state, owner, market, TUSD::new(amount)).is_ok() {
                        state.repay_to_trove((owner, market), TUSD::new(amount));
                    }
                }
            }
            prop_assert!(state.check_invariants().is_ok());
        }
    }

    /// A borrow that would push the trove past the minimum ratio is always
    /// rejected, and an in-range borrow is always accepted.
    #[test]
    fn borrow_respects_minimum_ratio(
        owner in arb_principal(),
        collateral in 1..=1_000 * E9S,
        amount in 1..=1_000 * E9S,
    ) {
        let mut state = state_with_market();
        let market = market_id();
        state.open_trove(Trove {
            owner,
            market_id: market,
            collateral_amount: Tokens::new(collateral),
            debt_amount: TUSD::new(0),
        });

        let max_borrowable = collateral as u128 * 100
            / DEFAULT_MIN_COLLATERAL_RATIO_PERCENT as u128;
        let accepted = validate_borrow(&state, owner, market, TUSD::new(amount)).is_ok();
        prop_assert_eq!(accepted, amount as u128 <= max_borrowable);
    }
}
