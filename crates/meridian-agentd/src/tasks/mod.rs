use std::collections::HashMap;
use std::sync::Arc;

use meridian_core::ModuleRegistry;
use meridian_limiter::RateLimiter;
use meridian_store::FailoverStore;

use crate::ports::{PaymentClient, SocialClient, TextGenerator};

pub mod analytics;
pub mod engagement;
pub mod health;
pub mod learning;
pub mod posting;
pub mod sales;

/// Most recent posted-content records retained per platform.
pub const POSTED_HISTORY_CAP: usize = 100;

/// Everything a task cycle needs, shared across all loops.
///
/// Loops communicate only through the store and limiter; nothing here is
/// mutated by the cycles themselves.
pub struct TaskContext {
    pub store: Arc<FailoverStore>,
    pub limiter: Arc<RateLimiter>,
    pub registry: ModuleRegistry,
    pub socials: Vec<Arc<dyn SocialClient>>,
    pub generator: Arc<dyn TextGenerator>,
    pub payments: Arc<dyn PaymentClient>,
    /// Platform name -> maximum characters per post.
    pub post_limits: HashMap<String, usize>,
    /// Rotation of content topics for the posting loop.
    pub topics: Vec<String>,
}

impl TaskContext {
    /// Character budget for one platform's posts.
    pub fn post_limit(&self, platform: &str) -> usize {
        self.post_limits.get(platform).copied().unwrap_or(1_000)
    }
}
