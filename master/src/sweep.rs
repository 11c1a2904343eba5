use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::state::MasterState;

/// Background task: unregister workers whose heartbeat went stale, every
/// `period`, independent of request traffic.
pub async fn run_health_sweep(state: Arc<MasterState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // first tick is immediate; skip it
    loop {
        interval.tick().await;
        let removed = state.sweep().await;
        if removed > 0 {
            debug!(removed, "health sweep finished");
        }
    }
}
