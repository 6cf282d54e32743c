use alloc::sync::Arc;

use crate::app::coordinator::Coordinator;
use crate::config::ControllerConfig;
use crate::provider::InstanceBackend;

/// Application state shared across request handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    /// Startup configuration, read-only for the process lifetime.
    pub config: Arc<ControllerConfig>,

    /// Single coordination point for the managed instance.
    pub coordinator: Arc<Coordinator<InstanceBackend>>,
}
