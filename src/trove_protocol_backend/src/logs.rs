use ic_canister_log::declare_log_buffer;

// High-priority messages.
declare_log_buffer!(name = INFO, capacity = 1000);

// Low-priority info messages.
declare_log_buffer!(name = DEBUG, capacity = 1000);
