pub mod events;
pub mod http_fragmenter;
pub mod package_fragmenter;
