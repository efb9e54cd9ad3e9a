pub mod event_relay;
pub mod server;
