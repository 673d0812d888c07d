use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{AutopilotEngine, CycleOutcome};
use crate::config::Settings;
use crate::error::{log_error, Result};
use crate::task::{TaskKey, TriggerTask};

/// Commands for controlling the dispatcher loop.
#[derive(Debug)]
pub enum DispatcherCommand {
    Shutdown,
}

/// Periodically hands due tasks to the engine.
///
/// A task is due when its condition's poll interval has elapsed since it was
/// last dispatched. At most `max_concurrent_tasks` cycles run at once; claim
/// exclusivity itself is enforced by the store.
pub struct Dispatcher {
    engine: Arc<AutopilotEngine>,
    settings: Settings,
    last_dispatched: DashMap<TaskKey, i64>,
    cmd_rx: mpsc::Receiver<DispatcherCommand>,
}

impl Dispatcher {
    pub fn new(engine: Arc<AutopilotEngine>, settings: &Settings) -> (Self, mpsc::Sender<DispatcherCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<DispatcherCommand>(1);
        (
            Self {
                engine,
                settings: settings.clone(),
                last_dispatched: DashMap::new(),
                cmd_rx,
            },
            cmd_tx,
        )
    }

    fn is_due(&self, task: &TriggerTask, now: i64) -> bool {
        let interval = self.settings.poll_interval(&task.payload.condition).as_secs() as i64;
        self.last_dispatched
            .get(&task.key)
            .map_or(true, |last| now - *last >= interval)
    }

    /// Runs one dispatch round and returns the outcomes of the tasks it handled.
    pub async fn run_cycle(&self) -> Result<Vec<(TaskKey, CycleOutcome)>> {
        let now = self.engine.now();
        let pending = self.engine.store().pending().await?;

        // Forget tasks that left the pool
        self.last_dispatched
            .retain(|key, _| pending.iter().any(|task| &task.key == key));

        let due: Vec<TaskKey> = pending
            .iter()
            .filter(|task| self.is_due(task, now))
            .map(|task| task.key.clone())
            .collect();
        if due.is_empty() {
            return Ok(Vec::new());
        }
        debug!(due = due.len(), pending = pending.len(), "Dispatching due tasks");
        for key in &due {
            self.last_dispatched.insert(key.clone(), now);
        }

        let outcomes = Arc::new(parking_lot::Mutex::new(Vec::with_capacity(due.len())));
        stream::iter(due)
            .for_each_concurrent(self.settings.max_concurrent_tasks, |key| {
                let engine = self.engine.clone();
                let outcomes = outcomes.clone();
                async move {
                    match engine.process_task(&key).await {
                        Ok(outcome) => outcomes.lock().push((key, outcome)),
                        Err(e) => log_error(&e, &format!("Processing task {} failed", key)),
                    }
                }
            })
            .await;

        let outcomes = std::mem::take(&mut *outcomes.lock());
        Ok(outcomes)
    }

    /// Runs until a shutdown command arrives or the command channel closes.
    pub async fn start(mut self) -> Result<()> {
        info!(
            tick_ms = self.settings.dispatch_tick_ms,
            max_concurrent = self.settings.max_concurrent_tasks,
            "Dispatcher started"
        );
        let mut ticker = tokio::time::interval(Duration::from_millis(self.settings.dispatch_tick_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    match command {
                        Some(DispatcherCommand::Shutdown) | None => {
                            info!("Shutdown command received. Stopping dispatcher...");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            debug!(handled = outcomes.len(), "Dispatch round finished");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Dispatch round failed"),
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SimulatedVerifier;
    use crate::chain::simulated::sample_position;
    use crate::chain::SimulatedChainClient;
    use crate::engine::{Collaborators, FixedClock};
    use crate::market_data::InMemoryPriceHistory;
    use crate::task::{InMemoryTaskStore, TaskStore};
    use autopilot_types::{Action, CloseAction, Condition, Payload, TimeCondition};

    fn setup() -> (Arc<FixedClock>, Arc<InMemoryTaskStore>, Dispatcher, mpsc::Sender<DispatcherCommand>) {
        let settings = Settings::default();
        let chain = Arc::new(SimulatedChainClient::new());
        chain.upsert_position(sample_position(1, 7, "0xowner"));
        chain.approve_operator(1, 7);
        let clock = Arc::new(FixedClock::new(1_000));
        let store = Arc::new(InMemoryTaskStore::new());
        let engine = Arc::new(AutopilotEngine::new(
            &settings,
            Collaborators {
                store: store.clone(),
                chain,
                prices: Arc::new(InMemoryPriceHistory::new()),
                verifier: Arc::new(SimulatedVerifier),
                clock: clock.clone(),
            },
        ));
        let (dispatcher, tx) = Dispatcher::new(engine, &settings);
        (clock, store, dispatcher, tx)
    }

    fn time_payload(threshold: i64) -> Payload {
        Payload {
            owner_addr: "0xowner".to_string(),
            chain_id: 1,
            nft_id: 7,
            condition: Condition::Time(TimeCondition { time_after_epoch_sec: threshold }),
            action: Action::Close(CloseAction { slippage: 0.01, max_gas_proportion: 0.1 }),
        }
    }

    #[tokio::test]
    async fn test_respects_condition_cadence() {
        let (clock, store, dispatcher, _tx) = setup();
        store.insert(time_payload(5_000), 1_000).await.unwrap();

        let first = dispatcher.run_cycle().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].1, CycleOutcome::NotMet);

        // Time conditions are polled every 60s by default
        clock.advance(30);
        assert!(dispatcher.run_cycle().await.unwrap().is_empty());

        clock.advance(30);
        assert_eq!(dispatcher.run_cycle().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_tasks_leave_the_pool() {
        let (_clock, store, dispatcher, _tx) = setup();
        let task = store.insert(time_payload(500), 1_000).await.unwrap();

        let outcomes = dispatcher.run_cycle().await.unwrap();
        assert_eq!(outcomes, vec![(task.key.clone(), CycleOutcome::Completed)]);
        assert!(dispatcher.run_cycle().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (_clock, _store, dispatcher, tx) = setup();
        let handle = tokio::spawn(dispatcher.start());
        tx.send(DispatcherCommand::Shutdown).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
