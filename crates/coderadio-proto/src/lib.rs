pub mod config;
pub mod platform;
pub mod protocol;
pub mod snapshot;
pub mod state;
pub mod view;
