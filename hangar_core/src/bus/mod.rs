pub mod message_bus;
pub mod observer;
