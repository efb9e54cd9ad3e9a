pub mod install_bridge;
pub mod install_router;
