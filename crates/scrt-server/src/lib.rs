pub mod auth;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod server;
pub mod store;

use error::ApiError;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// `None` when the database could not be opened at startup.
    pub store: Option<store::Store>,
    pub notifier: notify::ReceiptNotifier,
}

impl AppState {
    pub fn store(&self) -> Result<&store::Store, ApiError> {
        self.store.as_ref().ok_or(ApiError::StoreUnavailable)
    }
}

pub use server::{read_key_file, resolve_data_dir, resolve_master_key, router, run, ServerConfig};
