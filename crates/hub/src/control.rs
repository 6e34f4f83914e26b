//! Fixed-period control loop.
//!
//! One tick = synthesize, step the state machine, evaluate rules, broadcast
//! the snapshot.  The whole tick runs under the state write lock, so the
//! scheduler and inbound commands never interleave with it.  A tick that
//! overruns delays the next one instead of bunching up.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatch::Hub;

/// Tick until `cancel` fires.  Returns the number of ticks run.
pub async fn run(hub: Hub, tick: Duration, cancel: CancellationToken) -> u64 {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(tick_ms = tick.as_millis() as u64, "control loop started");
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(ticks, "control loop stopped");
                return ticks;
            }
            _ = ticker.tick() => {}
        }

        let snapshot = {
            let mut st = hub.state.write().await;
            st.tick()
        };
        ticks += 1;

        for r in snapshot.sensors.sensor_readings() {
            debug!(sensor = r.sensor, value = r.value, unit = r.unit, "reading");
        }

        match serde_json::to_string(&snapshot) {
            Ok(msg) => hub.publish(msg),
            Err(e) => error!("serialize snapshot: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::scheduler::Scheduler;
    use crate::state::ControllerState;
    use irrigation_sim::{CycleConfig, SignalSynthesizer};

    async fn hub() -> Hub {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let state = ControllerState::with_synthesizer(SignalSynthesizer::with_seed(
            CycleConfig::default(),
            65.0,
            9,
        ))
        .shared();
        let scheduler = Scheduler::new(state.clone(), vec![]);
        Hub::new(state, scheduler, db)
    }

    #[tokio::test]
    async fn broadcasts_every_tick_until_cancelled() {
        // The sqlite pool must be open before time is paused, or its
        // acquire timeout elapses while the worker thread connects.
        let hub = hub().await;
        tokio::time::pause();
        let mut rx = hub.subscribe();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            hub.clone(),
            Duration::from_millis(2000),
            cancel.clone(),
        ));

        for _ in 0..3 {
            let msg = rx.recv().await.unwrap();
            let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
            assert!(v["sensors"]["soilMoisture"].is_number());
        }

        cancel.cancel();
        let ticks = task.await.unwrap();
        assert!(ticks >= 3);
    }
}
