//! Cosmetic profile lookup collaborator
//!
//! Resolved out-of-band after a join; never blocks the join path and must tolerate
//! the room having disappeared by the time the lookup lands.

use async_trait::async_trait;

#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Display name for a wallet, if the profile service knows one.
    async fn display_name(&self, wallet_address: &str) -> Option<String>;
}

/// Default implementation that resolves nothing.
pub struct NullProfileService;

#[async_trait]
impl ProfileService for NullProfileService {
    async fn display_name(&self, _wallet_address: &str) -> Option<String> {
        None
    }
}
