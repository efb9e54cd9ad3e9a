pub mod bridge;
pub mod bus;
pub mod fragmenter;
pub mod projection;
pub mod types;
