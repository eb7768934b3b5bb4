//! # Application State
//!
//! Shared state handed to every HTTP handler.

use crate::gateway::Gateway;
use std::sync::Arc;

/// Cheap to clone; everything behind it is shared.
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    pub fn from_shared(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }
}
