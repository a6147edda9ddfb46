use std::env;
use std::sync::Arc;
use std::time::Duration;
use tera::Tera;
use tokio_util::sync::CancellationToken;

use sdnctl::controller::{Controller, ControllerConfig};
use sdnctl::programmer::FlowProgrammer;
use sdnctl::topology::TopologyStore;

/// Application configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind_address: String,
    /// Cron expression for the topology refresh schedule.
    pub refresh_cron: String,
    pub controller_url: String,
    pub controller_user: String,
    pub controller_password: String,
    /// Per-request timeout towards the controller.
    pub controller_timeout: Duration,
}

impl Config {
    /// Creates Config from environment variables with defaults.
    pub fn from_env() -> Self {
        let timeout_secs = env::var("CONTROLLER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8201".into()),
            refresh_cron: env::var("REFRESH_CRON").unwrap_or_else(|_| "0 */5 * * * *".into()),
            controller_url: env::var("CONTROLLER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8181".into()),
            controller_user: env::var("CONTROLLER_USER").unwrap_or_else(|_| "admin".into()),
            controller_password: env::var("CONTROLLER_PASSWORD").unwrap_or_else(|_| "admin".into()),
            controller_timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            base_url: self.controller_url.clone(),
            username: self.controller_user.clone(),
            password: self.controller_password.clone(),
            timeout: self.controller_timeout,
        }
    }
}

/// Shared application state passed to all request handlers.
pub struct AppState {
    /// Template engine for rendering HTML pages.
    pub tera: Tera,
    pub controller: Arc<dyn Controller>,
    /// Current topology snapshot, replaced on refresh.
    pub store: TopologyStore,
    pub programmer: FlowProgrammer,
    /// Cancelled on shutdown; path installs run under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(tera: Tera, controller: Arc<dyn Controller>) -> Self {
        Self {
            tera,
            programmer: FlowProgrammer::new(Arc::clone(&controller)),
            controller,
            store: TopologyStore::new(),
            shutdown: CancellationToken::new(),
        }
    }
}
