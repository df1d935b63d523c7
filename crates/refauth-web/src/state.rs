use std::sync::Arc;

use refauth_core::AuthFlow;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub flow: Arc<AuthFlow>,
}
