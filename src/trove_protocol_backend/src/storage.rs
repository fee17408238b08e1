use crate::event::Event;
use ic_stable_structures::{
    log::Log as StableLog,
    memory_manager::{MemoryId, MemoryManager, VirtualMemory},
    storable::Bound,
    DefaultMemoryImpl, Storable,
};
use std::borrow::Cow;
use std::cell::RefCell;

const LOG_INDEX_MEMORY_ID: MemoryId = MemoryId::new(0);
const LOG_DATA_MEMORY_ID: MemoryId = MemoryId::new(1);

type VMem = VirtualMemory<DefaultMemoryImpl>;
type EventLog = StableLog<Event, VMem, VMem>;

thread_local! {
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));

    /// Append-only log of state-changing events in stable memory.
    static EVENTS: RefCell<EventLog> = MEMORY_MANAGER.with(|m| {
        RefCell::new(
            StableLog::init(
                m.borrow().get(LOG_INDEX_MEMORY_ID),
                m.borrow().get(LOG_DATA_MEMORY_ID),
            )
            .expect("failed to initialize the event log"),
        )
    });
}

impl Storable for Event {
    fn to_bytes(&self) -> Cow<[u8]> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).expect("failed to encode an event");
        Cow::Owned(buf)
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        ciborium::de::from_reader(bytes.as_ref()).expect("failed to decode an event")
    }

    const BOUND: Bound = Bound::Unbounded;
}

/// Appends the event to the stable log.
pub fn record_event(event: &Event) {
    EVENTS.with(|events| {
        events
            .borrow()
            .append(event)
            .expect("recording an event should succeed")
    });
}

pub fn count_events() -> u64 {
    EVENTS.with(|events| events.borrow().len())
}

pub fn events() -> impl Iterator<Item = Event> {
    EVENTS
        .with(|events| events.borrow().iter().collect::<Vec<_>>())
        .into_iter()
}
