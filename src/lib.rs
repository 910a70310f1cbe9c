pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;
pub mod realtime;

use std::sync::Arc;

use crate::app::auth::TokenVerifier;
use crate::app::notifications::NotificationService;
use crate::infra::{bus::FanoutBus, store::NotificationStore};
use crate::realtime::StreamGateway;

#[derive(Clone)]
pub struct AppState {
    pub notifications: NotificationService,
    pub gateway: StreamGateway,
    pub store: Arc<dyn NotificationStore>,
    pub bus: Arc<dyn FanoutBus>,
    pub tokens: TokenVerifier,
    pub admin_token: Option<String>,
}
