// src/server/context.rs

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::snapshot::ClusterSnapshot;
use crate::config::Config;
use crate::core::events::EventBus;
use crate::core::hbctrl::Aggregator;

/// Holds all the initialized state required to run the daemon's actors and
/// external surfaces.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub bus: EventBus,
    pub snapshot: ClusterSnapshot,
    pub hb_aggregator: Aggregator,
    pub cancel: CancellationToken,
    pub background_tasks: JoinSet<()>,
}
