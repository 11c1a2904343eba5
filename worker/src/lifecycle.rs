//! Registration with the master and the heartbeat that keeps us routed.

use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    app_state::WorkerState,
    backoff::backoff_delay,
    master_client::{MasterClient, MasterClientError},
};

const MAX_REGISTER_DELAY: Duration = Duration::from_secs(60);

/// One registration attempt. On success the worker is marked registered
/// and the heartbeat loop is started if it is not already running.
pub async fn register_once(state: &WorkerState, master: &MasterClient) -> Result<(), MasterClientError> {
    let registration = state.registration();
    let reply = master.register(&registration).await?;
    state.set_registered(true);
    info!(
        worker_id = %state.worker_id(),
        worker_url = %state.worker_url(),
        master_url = %master.base_url(),
        message = ?reply.message,
        "Registered with master"
    );
    ensure_heartbeat(state);
    Ok(())
}

pub fn spawn_registration(state: &WorkerState, initial_delay: Duration) -> JoinHandle<()> {
    tokio::spawn(run_registration(state.clone(), initial_delay))
}

/// Register after `initial_delay`, retrying with backoff until it works or
/// the attempt budget runs out. Failures are logged, never raised.
pub async fn run_registration(state: WorkerState, initial_delay: Duration) {
    let Some(master) = state.master().cloned() else {
        warn!("No master URL configured; running standalone");
        return;
    };
    if !state.try_begin_registering() {
        debug!("registration already in progress");
        return;
    }
    if !initial_delay.is_zero() {
        tokio::time::sleep(initial_delay).await;
    }

    let settings = state.settings().clone();
    let mut attempt: u32 = 0;
    while !state.is_registered() {
        let Err(e) = register_once(&state, &master).await else {
            break;
        };
        attempt += 1;
        if settings.register_max_attempts != 0 && attempt >= settings.register_max_attempts {
            error!(attempt, error = %e, "Giving up on master registration");
            break;
        }
        let delay = backoff_delay(
            settings.register_backoff,
            attempt - 1,
            MAX_REGISTER_DELAY,
            &mut rand::rng(),
        );
        warn!(
            attempt,
            error = %e,
            retry_in_ms = delay.as_millis() as u64,
            "Master registration failed"
        );
        tokio::time::sleep(delay).await;
    }
    state.end_registering();
}

pub fn ensure_heartbeat(state: &WorkerState) {
    if state.try_begin_heartbeat() {
        tokio::spawn(run_heartbeat(state.clone()));
    }
}

async fn run_heartbeat(state: WorkerState) {
    let Some(master) = state.master().cloned() else {
        state.end_heartbeat();
        return;
    };

    let mut interval = tokio::time::interval(state.settings().heartbeat_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    let mut forgotten = false;
    loop {
        interval.tick().await;
        if !state.is_registered() {
            break;
        }
        match master.heartbeat(&state.heartbeat()).await {
            Ok(_) => debug!(worker_id = %state.worker_id(), "heartbeat sent"),
            Err(e) if e.is_not_registered() => {
                warn!(error = %e, "Master no longer knows this worker; registering again");
                state.set_registered(false);
                forgotten = true;
                break;
            }
            Err(e) => warn!(error = %e, "heartbeat failed"),
        }
    }

    state.end_heartbeat();
    if forgotten {
        spawn_registration(&state, Duration::ZERO);
    }
}

/// Best-effort goodbye so the master stops routing here right away.
pub async fn unregister_on_shutdown(state: &WorkerState) {
    let Some(master) = state.master() else {
        return;
    };
    if !state.is_registered() {
        return;
    }
    state.set_registered(false);
    match master.unregister(state.worker_id()).await {
        Ok(_) => info!(worker_id = %state.worker_id(), "Unregistered from master"),
        Err(e) => warn!(error = %e, "Failed to unregister from master"),
    }
}
