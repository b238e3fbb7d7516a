//! Change consumer: drains the `changes` channel one message at a time.
//!
//! Each message is dispatched to the handler registered for its event code
//! and driven through a bounded retry loop. `STALE_STATE` and `FAILED`
//! outcomes are retried internally up to the retry limit; the message is
//! acknowledged exactly once whatever the outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use calbus_core::{
    defaults, logging, Channel, ChangeHandler, ChannelSubscription, ChannelTransport, Error,
    ProcessResult, Result, SysCode, SysEvent,
};

use crate::handler::HandlerRegistry;

/// Configuration for the change consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Attempts per message before giving up.
    pub retry_limit: u32,
    /// Whether to start the consumer at all.
    pub enabled: bool,
    /// How long `stop` waits for the worker task before aborting it.
    pub shutdown_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry_limit: defaults::CHANGES_RETRY_LIMIT,
            enabled: true,
            shutdown_timeout: Duration::from_secs(defaults::CONSUMER_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl ConsumerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CALBUS_CHANGES_RETRY_LIMIT` | `5` | Attempts per change message |
    /// | `CALBUS_CONSUMER_ENABLED` | `true` | Enable/disable the change consumer |
    /// | `CALBUS_SHUTDOWN_TIMEOUT_SECS` | `10` | Join window on shutdown |
    pub fn from_env() -> Self {
        let retry_limit = std::env::var("CALBUS_CHANGES_RETRY_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::CHANGES_RETRY_LIMIT)
            .max(1);

        let enabled = std::env::var("CALBUS_CONSUMER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let shutdown_timeout = std::env::var("CALBUS_SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::CONSUMER_SHUTDOWN_TIMEOUT_SECS);

        Self {
            retry_limit,
            enabled,
            shutdown_timeout: Duration::from_secs(shutdown_timeout),
        }
    }

    /// Set the number of attempts per message (at least one).
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit.max(1);
        self
    }

    /// Enable or disable the consumer.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Event emitted by the change consumer.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// Consumer started draining the channel.
    Started,
    /// A message reached a terminal outcome and was acknowledged.
    MessageProcessed {
        event_id: Uuid,
        syscode: SysCode,
        result: ProcessResult,
        attempts: u32,
    },
    /// Consumer stopped.
    Stopped,
}

/// Snapshot of the consumer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeStats {
    pub total: u64,
    pub processed: u64,
    pub ignored: u64,
    pub noaction: u64,
    pub failed_no_retries: u64,
    pub stale_state: u64,
    /// Failing attempts across all messages.
    pub retries: u64,
    /// Messages that failed at least once.
    pub retried: u64,
    /// Messages that exhausted the retry limit.
    pub failed_retries: u64,
    /// Most attempts consumed by a single message.
    pub max_retries: u64,
}

impl fmt::Display for ChangeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} processed={} ignored={} noaction={} failedNoRetries={} \
             staleState={} retries={} retried={} failedRetries={} maxRetries={}",
            self.total,
            self.processed,
            self.ignored,
            self.noaction,
            self.failed_no_retries,
            self.stale_state,
            self.retries,
            self.retried,
            self.failed_retries,
            self.max_retries
        )
    }
}

#[derive(Default)]
struct ChangeCounters {
    total: AtomicU64,
    processed: AtomicU64,
    ignored: AtomicU64,
    noaction: AtomicU64,
    failed_no_retries: AtomicU64,
    stale_state: AtomicU64,
    retries: AtomicU64,
    retried: AtomicU64,
    failed_retries: AtomicU64,
    max_retries: AtomicU64,
}

impl ChangeCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a terminal, non-retried outcome.
    fn record_terminal(&self, result: ProcessResult) {
        match result {
            ProcessResult::Processed => Self::bump(&self.processed),
            ProcessResult::Ignored => Self::bump(&self.ignored),
            ProcessResult::NoAction => Self::bump(&self.noaction),
            ProcessResult::FailedNoRetry => Self::bump(&self.failed_no_retries),
            ProcessResult::StaleState | ProcessResult::Failed => {}
        }
    }

    fn snapshot(&self) -> ChangeStats {
        ChangeStats {
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            noaction: self.noaction.load(Ordering::Relaxed),
            failed_no_retries: self.failed_no_retries.load(Ordering::Relaxed),
            stale_state: self.stale_state.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed_retries: self.failed_retries.load(Ordering::Relaxed),
            max_retries: self.max_retries.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the worker task and its handle.
struct Shared {
    counters: ChangeCounters,
    retry_limit: AtomicU32,
    running: AtomicBool,
    /// Set by [`ConsumerHandle::stop`]; no new attempts start once set.
    stopping: AtomicBool,
}

/// Builder for a [`ChangeConsumer`].
pub struct ConsumerBuilder {
    transport: Arc<dyn ChannelTransport>,
    config: ConsumerConfig,
    registry: HandlerRegistry,
}

impl ConsumerBuilder {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            transport,
            config: ConsumerConfig::default(),
            registry: HandlerRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler for the codes it declares.
    pub fn with_handler<H: ChangeHandler + 'static>(mut self, handler: H) -> Self {
        self.registry.register(Arc::new(handler));
        self
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> ChangeConsumer {
        let (event_tx, _) = broadcast::channel(defaults::CONSUMER_EVENT_CAPACITY);
        ChangeConsumer {
            transport: self.transport,
            config: self.config,
            registry: self.registry,
            event_tx,
        }
    }
}

/// Single dedicated worker for the `changes` channel.
pub struct ChangeConsumer {
    transport: Arc<dyn ChannelTransport>,
    config: ConsumerConfig,
    registry: HandlerRegistry,
    event_tx: broadcast::Sender<ConsumerEvent>,
}

impl ChangeConsumer {
    /// Subscribe to the `changes` channel and spawn the worker task.
    ///
    /// Messages published after this returns are guaranteed to be seen.
    pub fn start(self) -> Result<ConsumerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let shared = Arc::new(Shared {
            counters: ChangeCounters::default(),
            retry_limit: AtomicU32::new(self.config.retry_limit.max(1)),
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        });

        let mut handle = ConsumerHandle {
            shutdown_tx,
            event_rx,
            join: None,
            shared: shared.clone(),
            shutdown_timeout: self.config.shutdown_timeout,
        };

        if !self.config.enabled {
            info!(
                subsystem = logging::SUBSYSTEM_JOBS,
                component = logging::COMPONENT_CONSUMER,
                "Change consumer is disabled, not starting"
            );
            return Ok(handle);
        }

        let subscription = self.transport.subscribe(Channel::Changes)?;
        shared.running.store(true, Ordering::SeqCst);

        let worker = Worker {
            registry: self.registry,
            shared,
            event_tx: self.event_tx,
        };
        handle.join = Some(tokio::spawn(worker.run(subscription, shutdown_rx)));
        Ok(handle)
    }
}

struct Worker {
    registry: HandlerRegistry,
    shared: Arc<Shared>,
    event_tx: broadcast::Sender<ConsumerEvent>,
}

impl Worker {
    #[instrument(
        skip_all,
        fields(subsystem = logging::SUBSYSTEM_JOBS, component = logging::COMPONENT_CONSUMER)
    )]
    async fn run(
        self,
        mut subscription: Box<dyn ChannelSubscription>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(
            retry_limit = self.shared.retry_limit.load(Ordering::Relaxed),
            handled_codes = self.registry.len(),
            "Change consumer started"
        );
        let _ = self.event_tx.send(ConsumerEvent::Started);

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Change consumer received shutdown signal");
                    break;
                }
                delivery = subscription.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        info!("Changes channel closed");
                        break;
                    }
                },
            };

            let event = delivery.message.event.clone();
            let (event_id, syscode) = (event.id, event.code);
            let (result, attempts) = self.process(event).await;

            if let Err(e) = subscription.ack(&delivery).await {
                warn!(
                    error = %e,
                    delivery_id = delivery.delivery_id,
                    event_id = %event_id,
                    "Failed to acknowledge change message"
                );
            }

            let _ = self.event_tx.send(ConsumerEvent::MessageProcessed {
                event_id,
                syscode,
                result,
                attempts,
            });
        }

        self.shared.running.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(ConsumerEvent::Stopped);
        info!(
            stats = %self.shared.counters.snapshot(),
            "Change consumer stopped"
        );
    }

    /// Drive one message to a terminal outcome. Returns the outcome and the
    /// number of attempts made.
    async fn process(&self, event: SysEvent) -> (ProcessResult, u32) {
        let counters = &self.shared.counters;
        ChangeCounters::bump(&counters.total);

        let Some(handler) = self.registry.get(event.code) else {
            debug!(
                event_id = %event.id,
                syscode = %event.code,
                "No change handler registered"
            );
            counters.record_terminal(ProcessResult::NoAction);
            return (ProcessResult::NoAction, 0);
        };

        let limit = self.shared.retry_limit.load(Ordering::Relaxed).max(1);
        let event = Arc::new(event);
        let mut attempt = 0u32;
        let mut failed_before = false;

        let result = loop {
            attempt += 1;
            let start = Instant::now();

            // A panicking handler must not take the worker down with it.
            let task_handler = handler.clone();
            let task_event = event.clone();
            let task = tokio::spawn(async move { task_handler.handle(&task_event).await });
            let _abort = AbortOnDrop(task.abort_handle());
            let joined = task.await;

            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(
                        error = ?e,
                        event_id = %event.id,
                        syscode = %event.code,
                        attempt,
                        "Change handler panicked"
                    );
                    counters.record_terminal(ProcessResult::FailedNoRetry);
                    break ProcessResult::FailedNoRetry;
                }
            };

            debug!(
                event_id = %event.id,
                syscode = %event.code,
                attempt,
                result = %result,
                duration_ms = start.elapsed().as_millis() as u64,
                "Change attempt finished"
            );

            if !result.is_retryable() {
                counters.record_terminal(result);
                break result;
            }

            if result == ProcessResult::StaleState {
                ChangeCounters::bump(&counters.stale_state);
            }
            ChangeCounters::bump(&counters.retries);
            if !failed_before {
                ChangeCounters::bump(&counters.retried);
                failed_before = true;
            }

            if attempt >= limit {
                warn!(
                    event_id = %event.id,
                    syscode = %event.code,
                    attempts = attempt,
                    result = %result,
                    "Change message exhausted retries"
                );
                ChangeCounters::bump(&counters.failed_retries);
                break result;
            }

            if self.shared.stopping.load(Ordering::SeqCst) {
                warn!(
                    event_id = %event.id,
                    syscode = %event.code,
                    attempts = attempt,
                    result = %result,
                    "Consumer stopping, abandoning retries"
                );
                ChangeCounters::bump(&counters.failed_retries);
                break result;
            }

            warn!(
                event_id = %event.id,
                syscode = %event.code,
                attempt,
                retry_limit = limit,
                result = %result,
                "Retrying change message"
            );
        };

        counters
            .max_retries
            .fetch_max(u64::from(attempt), Ordering::Relaxed);
        (result, attempt)
    }
}

/// Aborts a handler attempt if the worker is dropped while awaiting it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle for controlling a running consumer.
pub struct ConsumerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<ConsumerEvent>,
    join: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    shutdown_timeout: Duration,
}

impl ConsumerHandle {
    /// Signal the worker to stop and wait for it within the shutdown window.
    ///
    /// The message in flight finishes its current attempt but is not
    /// retried. If the window elapses the worker and its attempt are aborted
    /// and an error is returned.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut join) = self.join.take() else {
            return Ok(());
        };
        self.shared.stopping.store(true, Ordering::SeqCst);

        // The worker may already have exited because its channel closed.
        let _ = self.shutdown_tx.send(()).await;

        match tokio::time::timeout(self.shutdown_timeout, &mut join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(Error::Internal(format!("Change consumer task failed: {}", e)))
            }
            Err(_) => {
                join.abort();
                self.shared.running.store(false, Ordering::SeqCst);
                warn!(
                    subsystem = logging::SUBSYSTEM_JOBS,
                    component = logging::COMPONENT_CONSUMER,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Change consumer did not stop in time, aborted"
                );
                Err(Error::Internal(format!(
                    "Change consumer did not stop within {:?}",
                    self.shutdown_timeout
                )))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn retry_limit(&self) -> u32 {
        self.shared.retry_limit.load(Ordering::Relaxed)
    }

    /// Change the retry limit; applies from the next message.
    pub fn set_retry_limit(&self, limit: u32) {
        self.shared.retry_limit.store(limit.max(1), Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn stats(&self) -> ChangeStats {
        self.shared.counters.snapshot()
    }

    /// Get a receiver for consumer events.
    pub fn events(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.event_rx.resubscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use calbus_bus::{LocalTransport, TransportConfig};
    use calbus_core::{ChangeInfo, ChannelMessage};
    use tokio::sync::Notify;

    struct ScriptedHandler {
        codes: Vec<SysCode>,
        results: Vec<ProcessResult>,
        calls: AtomicU32,
    }

    impl ScriptedHandler {
        /// Returns `results` in order, repeating the last one.
        fn new(results: Vec<ProcessResult>) -> Self {
            Self {
                codes: vec![SysCode::EntityUpdated],
                results,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChangeHandler for ScriptedHandler {
        fn codes(&self) -> Vec<SysCode> {
            self.codes.clone()
        }

        async fn handle(&self, _event: &SysEvent) -> ProcessResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.results[n.min(self.results.len() - 1)]
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl ChangeHandler for PanicHandler {
        fn codes(&self) -> Vec<SysCode> {
            vec![SysCode::EntityDeleted]
        }

        async fn handle(&self, _event: &SysEvent) -> ProcessResult {
            panic!("handler blew up");
        }
    }

    /// Signals when an attempt starts, then holds it until released.
    #[derive(Default)]
    struct GatedHandler {
        started: Notify,
        release: Notify,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChangeHandler for GatedHandler {
        fn codes(&self) -> Vec<SysCode> {
            vec![SysCode::EntityUpdated]
        }

        async fn handle(&self, _event: &SysEvent) -> ProcessResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            ProcessResult::Failed
        }
    }

    /// Never finishes; records when its attempt is dropped.
    #[derive(Default)]
    struct HangingHandler {
        started: Notify,
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ChangeHandler for HangingHandler {
        fn codes(&self) -> Vec<SysCode> {
            vec![SysCode::EntityUpdated]
        }

        async fn handle(&self, _event: &SysEvent) -> ProcessResult {
            let _dropped = SetOnDrop(self.dropped.clone());
            self.started.notify_one();
            std::future::pending::<ProcessResult>().await
        }
    }

    fn change_event(code: SysCode) -> SysEvent {
        SysEvent::change(
            code,
            ChangeInfo::new("mike", "mike", "/cal/mike/ev1").shared(true),
        )
    }

    fn publish(transport: &LocalTransport, event: SysEvent) {
        transport
            .publish(Channel::Changes, &ChannelMessage::from_event(event))
            .unwrap();
    }

    async fn next_outcome(events: &mut broadcast::Receiver<ConsumerEvent>) -> (ProcessResult, u32) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for consumer event")
                .unwrap();
            if let ConsumerEvent::MessageProcessed {
                result, attempts, ..
            } = event
            {
                return (result, attempts);
            }
        }
    }

    #[test]
    fn test_config_default() {
        let config = ConsumerConfig::default();
        assert_eq!(config.retry_limit, defaults::CHANGES_RETRY_LIMIT);
        assert!(config.enabled);
        assert_eq!(
            config.shutdown_timeout,
            Duration::from_secs(defaults::CONSUMER_SHUTDOWN_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_config_builder() {
        let config = ConsumerConfig::default()
            .with_retry_limit(0)
            .with_enabled(false)
            .with_shutdown_timeout(Duration::from_millis(50));
        assert_eq!(config.retry_limit, 1);
        assert!(!config.enabled);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_stats_display() {
        let stats = ChangeStats {
            total: 3,
            processed: 2,
            ..Default::default()
        };
        let line = stats.to_string();
        assert!(line.starts_with("total=3 processed=2 "));
        assert!(line.contains("failedRetries=0"));
    }

    #[tokio::test]
    async fn test_stale_handler_is_retried_up_to_limit() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let handler = Arc::new(ScriptedHandler::new(vec![ProcessResult::StaleState]));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .with_config(ConsumerConfig::default().with_retry_limit(4))
            .with_handler(handler.clone())
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();

        publish(&transport, change_event(SysCode::EntityUpdated));
        let (result, attempts) = next_outcome(&mut events).await;

        assert_eq!(result, ProcessResult::StaleState);
        assert_eq!(attempts, 4);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);

        let stats = handle.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.failed_retries, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.retries, 4);
        assert_eq!(stats.stale_state, 4);
        assert_eq!(stats.max_retries, 4);
        assert_eq!(transport.acked_count(), 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let handler = Arc::new(ScriptedHandler::new(vec![
            ProcessResult::Failed,
            ProcessResult::StaleState,
            ProcessResult::Processed,
        ]));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .with_handler(handler.clone())
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();

        publish(&transport, change_event(SysCode::EntityUpdated));
        assert_eq!(
            next_outcome(&mut events).await,
            (ProcessResult::Processed, 3)
        );

        let stats = handle.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.stale_state, 1);
        assert_eq!(stats.failed_retries, 0);
        assert_eq!(stats.max_retries, 3);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_consumer() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .with_handler(PanicHandler)
            .with_handler(ScriptedHandler::new(vec![ProcessResult::Ignored]))
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();

        publish(&transport, change_event(SysCode::EntityDeleted));
        publish(&transport, change_event(SysCode::EntityUpdated));

        assert_eq!(
            next_outcome(&mut events).await,
            (ProcessResult::FailedNoRetry, 1)
        );
        assert_eq!(next_outcome(&mut events).await, (ProcessResult::Ignored, 1));

        let stats = handle.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed_no_retries, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.retries, 0);
        assert!(handle.is_running());

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unhandled_code_is_no_action() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();

        publish(&transport, change_event(SysCode::EntityAdded));
        assert_eq!(next_outcome(&mut events).await, (ProcessResult::NoAction, 0));
        assert_eq!(handle.stats().noaction, 1);
        assert_eq!(transport.acked_count(), 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_retry_limit_applies_to_next_message() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .with_config(ConsumerConfig::default().with_retry_limit(5))
            .with_handler(ScriptedHandler::new(vec![ProcessResult::Failed]))
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();

        handle.set_retry_limit(2);
        assert_eq!(handle.retry_limit(), 2);
        handle.set_retry_limit(0);
        assert_eq!(handle.retry_limit(), 1);

        publish(&transport, change_event(SysCode::EntityUpdated));
        assert_eq!(next_outcome(&mut events).await, (ProcessResult::Failed, 1));
        assert_eq!(handle.stats().failed_retries, 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_lifecycle() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();
        assert!(handle.is_running());

        handle.stop().await.unwrap();
        assert!(!handle.is_running());

        let mut saw_stopped = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConsumerEvent::Stopped) {
                saw_stopped = true;
            }
        }
        assert!(saw_stopped);

        // Second stop is a no-op.
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_ends_worker() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();

        transport.close(Channel::Changes);
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, ConsumerEvent::Stopped) {
                break;
            }
        }
        assert!(!handle.is_running());
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_consumer_does_not_subscribe() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let mut handle = ConsumerBuilder::new(transport.clone())
            .with_config(ConsumerConfig::default().with_enabled(false))
            .build()
            .start()
            .unwrap();

        assert!(!handle.is_running());
        assert_eq!(transport.subscriber_count(Channel::Changes), 0);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_abandons_retries_after_current_attempt() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let handler = Arc::new(GatedHandler::default());
        let mut handle = ConsumerBuilder::new(transport.clone())
            .with_config(ConsumerConfig::default().with_retry_limit(5))
            .with_handler(handler.clone())
            .build()
            .start()
            .unwrap();
        let mut events = handle.events();

        publish(&transport, change_event(SysCode::EntityUpdated));
        handler.started.notified().await;

        let (stopped, _) = tokio::join!(handle.stop(), async {
            handler.release.notify_one();
        });
        stopped.unwrap();

        assert_eq!(next_outcome(&mut events).await, (ProcessResult::Failed, 1));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let stats = handle.stats();
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.failed_retries, 1);
        assert_eq!(transport.acked_count(), 1);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_aborts_running_attempt() {
        let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
        let handler = Arc::new(HangingHandler::default());
        let mut handle = ConsumerBuilder::new(transport.clone())
            .with_config(ConsumerConfig::default().with_shutdown_timeout(Duration::from_secs(30)))
            .with_handler(handler.clone())
            .build()
            .start()
            .unwrap();

        publish(&transport, change_event(SysCode::EntityUpdated));
        handler.started.notified().await;

        let err = handle.stop().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(!handle.is_running());

        for _ in 0..16 {
            if handler.dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(handler.dropped.load(Ordering::SeqCst));
        assert_eq!(transport.acked_count(), 0);
    }
}
