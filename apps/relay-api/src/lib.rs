pub mod config;
pub mod error;
pub mod hub;
pub mod models;
pub mod routes;
pub mod source;
pub mod throttle;

use std::sync::Arc;

use config::Config;
use hub::BroadcastHub;
use throttle::EmissionThrottle;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub throttle: Arc<EmissionThrottle>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(BroadcastHub::from_config(&config)),
            throttle: Arc::new(EmissionThrottle::from_config(&config)),
            config: Arc::new(config),
        }
    }
}
