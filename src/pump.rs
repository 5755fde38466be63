//! Remote pump control
//!
//! The pump task polls the `/pump` flag on its own interval. A raised flag
//! runs the pump once for the configured duration and is then cleared, so
//! a single request never triggers two cycles.

use log::{error, info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::config::RetryPolicy;
use crate::database::{execute_with_retry, CloudStore, StoreValue, PUMP_PATH};
use crate::hardware::PumpOutput;

/// True once shutdown has been requested or its sender is gone
fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // An Err means the sender was dropped, which also ends the wait
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Drive the pump HIGH for `duration`, then LOW
///
/// Returns false when shutdown cut the run short. The output is LOW on
/// return either way.
pub async fn actuate<P: PumpOutput>(
    pump: &mut P,
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    pump.set_active(true);
    let completed = tokio::select! {
        _ = sleep(duration) => true,
        _ = wait_for_shutdown(shutdown) => false,
    };
    pump.set_active(false);
    completed
}

pub async fn run_pump_task<S, P>(
    store: S,
    mut pump: P,
    poll_interval: Duration,
    duration: Duration,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) where
    S: CloudStore + Sync,
    P: PumpOutput,
{
    pump.set_active(false);
    info!(
        "Pump task started: polling every {}s",
        poll_interval.as_secs()
    );

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let store = &store;

    loop {
        if shutdown_requested(&shutdown) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }

        let requested = match execute_with_retry(&policy, "poll pump flag", move || {
            store.get_flag(PUMP_PATH)
        })
        .await
        {
            Ok(requested) => requested,
            Err(e) => {
                warn!("Skipping pump poll: {}", e);
                continue;
            }
        };
        if !requested {
            continue;
        }

        info!("Pump requested: turning ON for {}s", duration.as_secs());
        if !actuate(&mut pump, duration, &mut shutdown).await {
            info!("Pump run interrupted by shutdown");
            break;
        }

        let cleared = [(PUMP_PATH.to_string(), StoreValue::Bool(false))];
        let cleared = &cleared;
        match execute_with_retry(&policy, "clear pump flag", move || store.set_values(cleared))
            .await
        {
            Ok(()) => info!("Pump cycle complete"),
            Err(e) => error!("Pump ran but the request flag could not be cleared: {}", e),
        }
    }

    pump.set_active(false);
    info!("Pump task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use std::num::NonZeroU32;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Clone, Default)]
    struct RecordingPump {
        states: Arc<Mutex<Vec<(bool, Instant)>>>,
    }

    impl RecordingPump {
        fn states(&self) -> Vec<bool> {
            self.states.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }

        fn is_active(&self) -> bool {
            self.states
                .lock()
                .unwrap()
                .last()
                .map(|(s, _)| *s)
                .unwrap_or(false)
        }
    }

    impl PumpOutput for RecordingPump {
        fn set_active(&mut self, active: bool) {
            self.states.lock().unwrap().push((active, Instant::now()));
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_secs(1),
            max_attempts: NonZeroU32::new(2).unwrap(),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }

    fn spawn_task(
        store: &MemoryStore,
        pump: &RecordingPump,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_pump_task(
            store.clone(),
            pump.clone(),
            Duration::from_secs(2),
            Duration::from_secs(10),
            policy(),
            rx,
        ));
        (tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn actuate_runs_for_the_full_duration() {
        let mut pump = RecordingPump::default();
        let (_tx, mut rx) = watch::channel(false);
        let start = Instant::now();

        assert!(actuate(&mut pump, Duration::from_secs(10), &mut rx).await);

        assert_eq!(start.elapsed(), Duration::from_secs(10));
        let states = pump.states.lock().unwrap().clone();
        assert_eq!(states.len(), 2);
        assert!(states[0].0 && !states[1].0);
        assert_eq!(states[1].1 - states[0].1, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn raised_flag_runs_pump_once_and_clears_it() {
        let store = MemoryStore::new();
        let pump = RecordingPump::default();
        store.insert(PUMP_PATH, StoreValue::Bool(true));

        let (tx, handle) = spawn_task(&store, &pump);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(pump.is_active());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!pump.is_active());
        assert_eq!(store.value(PUMP_PATH).as_deref(), Some("false"));
        // initial LOW, then exactly one HIGH/LOW pair
        assert_eq!(pump.states(), vec![false, true, false]);

        tx.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lowered_flag_keeps_pump_off() {
        let store = MemoryStore::new();
        let pump = RecordingPump::default();
        store.insert(PUMP_PATH, StoreValue::Bool(false));

        let (tx, handle) = spawn_task(&store, &pump);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(pump.states(), vec![false]);
        tx.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_is_skipped_until_next_tick() {
        let store = MemoryStore::new();
        let pump = RecordingPump::default();
        store.insert(PUMP_PATH, StoreValue::Bool(true));
        store.fail_next(2);

        let (tx, handle) = spawn_task(&store, &pump);
        // first poll exhausts both attempts
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!pump.is_active());

        // the next tick at 2 s succeeds
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(pump.is_active());

        tx.send_replace(true);
        handle.await.unwrap();
        assert!(!pump.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_run_forces_pump_low() {
        let store = MemoryStore::new();
        let pump = RecordingPump::default();
        store.insert(PUMP_PATH, StoreValue::Bool(true));

        let (tx, handle) = spawn_task(&store, &pump);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(pump.is_active());

        let start = Instant::now();
        tx.send_replace(true);
        handle.await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!pump.is_active());
        // flag is left raised since the run did not complete
        assert_eq!(store.value(PUMP_PATH).as_deref(), Some("true"));
    }
}
