//! Token Management
//!
//! Key-value token persistence and the per-provider manager that loads,
//! saves, and refreshes token sets.

pub mod manager;
pub mod storage;

pub use storage::{
    create_in_memory_token_store, create_mock_token_store, InMemoryTokenStore, MockTokenStore,
    TokenStore,
};

pub use manager::{create_mock_token_manager, DefaultTokenManager, MockTokenManager, TokenManager};
