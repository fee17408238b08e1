use candid::{candid_method, Principal};
use ic_canister_log::log;
use ic_cdk_macros::{init, post_upgrade, query, update};
use trove_protocol_backend::{
    compute_collateral_ratio,
    event::Event,
    logs::INFO,
    market::{
        self, CandidMarket, CandidTrove, InitMarketArg, OpenTroveArg, OpenTroveSuccess, TroveArg,
    },
    state::{read_state, replace_state, MarketId, State},
    GetEventsArg, MarketStatus, ProtocolArg, ProtocolError,
};

#[cfg(feature = "self_check")]
fn ok_or_die(result: Result<(), String>) {
    if let Err(msg) = result {
        ic_cdk::println!("{}", msg);
        ic_cdk::trap(&msg);
    }
}

/// Checks that the canister state is internally consistent and matches a
/// replay of the event log.
#[cfg(feature = "self_check")]
fn check_invariants() -> Result<(), String> {
    use trove_protocol_backend::event::replay;
    use trove_protocol_backend::storage;

    read_state(|s| {
        s.check_invariants()?;

        let events: Vec<_> = storage::events().collect();
        let recovered_state = replay(events.clone().into_iter())
            .unwrap_or_else(|e| panic!("failed to replay log {:?}: {:?}", events, e));

        recovered_state.check_invariants()?;
        s.check_semantically_eq(&recovered_state)?;

        Ok(())
    })
}

fn check_postcondition<T>(t: T) -> T {
    #[cfg(feature = "self_check")]
    ok_or_die(check_invariants());
    t
}

fn validate_call() -> Result<(), ProtocolError> {
    if ic_cdk::caller() == Principal::anonymous() {
        return Err(ProtocolError::AnonymousCallerNotAllowed);
    }
    Ok(())
}

fn main() {}

#[candid_method(init)]
#[init]
fn init(arg: ProtocolArg) {
    match arg {
        ProtocolArg::Init(init_arg) => {
            log!(INFO, "[init] initialized the protocol with args: {:?}", init_arg);
            trove_protocol_backend::storage::record_event(&Event::Init(init_arg.clone()));
            replace_state(State::from(init_arg));
        }
        ProtocolArg::Upgrade(_) => ic_cdk::trap("expected Init got Upgrade"),
    }
}

#[post_upgrade]
fn post_upgrade(arg: ProtocolArg) {
    use trove_protocol_backend::event::replay;
    use trove_protocol_backend::storage::{count_events, events, record_event};

    log!(INFO, "[upgrade]: replaying {} events", count_events());

    match arg {
        ProtocolArg::Init(_) => ic_cdk::trap("expected Upgrade got Init"),
        ProtocolArg::Upgrade(upgrade_args) => {
            log!(
                INFO,
                "[upgrade]: updating configuration with {:?}",
                upgrade_args
            );
            record_event(&Event::Upgrade(upgrade_args));
        }
    }

    let state = replay(events()).unwrap_or_else(|e| {
        ic_cdk::trap(&format!(
            "[upgrade]: failed to replay the event log: {:?}",
            e
        ))
    });

    replace_state(state);
}

#[candid_method(update)]
#[update]
fn init_market(arg: InitMarketArg) -> Result<MarketId, ProtocolError> {
    validate_call()?;
    check_postcondition(market::init_market(arg))
}

#[candid_method(update)]
#[update]
async fn open_trove(arg: OpenTroveArg) -> Result<OpenTroveSuccess, ProtocolError> {
    validate_call()?;
    check_postcondition(market::open_trove(arg).await)
}

#[candid_method(update)]
#[update]
async fn deposit(arg: TroveArg) -> Result<u64, ProtocolError> {
    validate_call()?;
    check_postcondition(market::deposit(arg).await)
}

#[candid_method(update)]
#[update]
async fn withdraw(arg: TroveArg) -> Result<u64, ProtocolError> {
    validate_call()?;
    check_postcondition(market::withdraw(arg).await)
}

#[candid_method(update)]
#[update]
async fn borrow(arg: TroveArg) -> Result<u64, ProtocolError> {
    validate_call()?;
    check_postcondition(market::borrow(arg).await)
}

#[candid_method(update)]
#[update]
async fn repay(arg: TroveArg) -> Result<u64, ProtocolError> {
    validate_call()?;
    check_postcondition(market::repay(arg).await)
}

#[candid_method(query)]
#[query]
fn get_trove(owner: Principal, market_id: MarketId) -> Option<CandidTrove> {
    read_state(|s| s.get_trove(owner, market_id).map(CandidTrove::from))
}

#[candid_method(query)]
#[query]
fn get_markets() -> Vec<CandidMarket> {
    read_state(|s| s.markets.values().map(CandidMarket::from).collect())
}

#[candid_method(query)]
#[query]
fn get_market_status(market_id: MarketId) -> Option<MarketStatus> {
    read_state(|s| {
        s.get_market(&market_id).map(|market| {
            let escrow_balance = s.escrow_balance_of(&market_id);
            MarketStatus {
                collateral_ledger: market.collateral_ledger,
                admin: market.admin,
                min_collateral_ratio_percent: market.min_collateral_ratio_percent,
                total_debt: market.total_debt.to_u64(),
                escrow_balance: escrow_balance.to_u64(),
                open_troves: s.troves_of_market(&market_id),
                total_collateral_ratio_percent: compute_collateral_ratio(
                    escrow_balance,
                    market.total_debt,
                )
                .to_f64(),
            }
        })
    })
}

#[candid_method(query)]
#[query]
fn get_trove_history(owner: Principal, market_id: MarketId) -> Vec<Event> {
    if ic_cdk::api::data_certificate().is_none() {
        ic_cdk::trap("update call rejected");
    }

    trove_protocol_backend::storage::events()
        .filter(|event| event.is_trove_related(&owner, &market_id))
        .collect()
}

#[candid_method(query)]
#[query]
fn get_events(args: GetEventsArg) -> Vec<Event> {
    if ic_cdk::api::data_certificate().is_none() {
        ic_cdk::trap("update call rejected");
    }
    const MAX_EVENTS_PER_QUERY: usize = 2000;

    trove_protocol_backend::storage::events()
        .skip(args.start as usize)
        .take(MAX_EVENTS_PER_QUERY.min(args.length as usize))
        .collect()
}

candid::export_service!();

#[query(name = "__get_candid_interface_tmp_hack")]
fn export_candid() -> String {
    __export_service()
}
