pub mod binder;
pub mod config;
pub mod error;
pub mod events;
pub mod game_server;
pub mod paylines;
pub mod ports;
pub mod processed;
pub mod reconciler;
pub mod session;
pub mod settlement;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::SpinError;
