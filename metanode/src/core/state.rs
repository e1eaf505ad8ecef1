use std::sync::Arc;

use crate::core::directory::BlockDirectory;
use crate::core::notify::BroadcastNotifier;
use crate::core::registry::NodeRegistry;

#[derive(Clone)]
pub struct MetaState {
    pub registry: NodeRegistry,
    pub directory: BlockDirectory,
    pub notifier: Arc<BroadcastNotifier>,
}
