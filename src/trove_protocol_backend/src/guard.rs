use crate::state::mutate_state;
use candid::Principal;
use std::marker::PhantomData;

const MAX_CONCURRENT: usize = 100;

#[derive(Debug, PartialEq, Eq)]
pub enum GuardError {
    AlreadyProcessing,
    TooManyConcurrentRequests,
}

/// Guards a block from executing twice when called by the same user and from
/// being executed [MAX_CONCURRENT] or more times in parallel.
#[must_use]
pub struct GuardPrincipal {
    principal: Principal,
    _marker: PhantomData<GuardPrincipal>,
}

impl GuardPrincipal {
    /// Attempts to create a new guard for the current call. Fails if the
    /// principal already has a request in flight or if at least
    /// [MAX_CONCURRENT] requests are pending.
    pub fn new(principal: Principal) -> Result<Self, GuardError> {
        mutate_state(|s| {
            if s.principal_guards.contains(&principal) {
                return Err(GuardError::AlreadyProcessing);
            }
            if s.principal_guards.len() >= MAX_CONCURRENT {
                return Err(GuardError::TooManyConcurrentRequests);
            }
            s.principal_guards.insert(principal);
            Ok(Self {
                principal,
                _marker: PhantomData,
            })
        })
    }
}

impl Drop for GuardPrincipal {
    fn drop(&mut self) {
        mutate_state(|s| {
            s.principal_guards.remove(&self.principal);
        });
    }
}
