//! pk front-end
//!
//! Headless driver for the rebuild engine: one-shot batch rebuilds and an
//! interactive command loop that runs rebuilds on a worker thread.

pub mod actions;
pub mod app;
pub mod error;
pub mod report;
pub mod state;
pub mod worker;

// Re-exports for convenience
pub use app::{App, AppEvent};
pub use error::AppError;
pub use state::{AppAction, AppState};
