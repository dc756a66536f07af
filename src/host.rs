use std::sync::Arc;

use crate::cluster::ManagedCluster;
use crate::error::MinikubeError;
use crate::reconciler::ProviderConnection;

pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

pub trait Provider: Send + Sync {
    fn register_connection(&self, connection: Arc<ProviderConnection>) -> Box<dyn Disposable>;
}

pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Asks the user to choose a target cluster. `Ok(None)` means the prompt was dismissed.
pub trait ClusterPicker: Send + Sync {
    fn pick(&self, clusters: &[ManagedCluster]) -> Result<Option<ManagedCluster>, MinikubeError>;
}
