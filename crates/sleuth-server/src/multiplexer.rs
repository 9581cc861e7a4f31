//! Runs one orchestrator unit in the background and turns its events into
//! an ordered outbound sequence with heartbeats, a whole-run timeout and
//! disconnect handling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sleuth_core::{
    event_channel, AgentError, AgentEvent, AnalysisResult, EventReceiver, EventSink, ResultCache,
    RunGuard, TaskRegistry,
};
use sleuth_loop::RunOutcome;

type WorkerResult = Result<RunOutcome, AgentError>;

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Silence after which a heartbeat `progress` is sent.
    pub heartbeat_interval: Duration,
    /// Upper bound on each wait for the next event.
    pub poll_interval: Duration,
    /// Whole-run timeout, after which the stream reports an error and
    /// detaches from the worker.
    pub run_timeout: Duration,
    pub channel_capacity: usize,
    pub outbound_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            run_timeout: Duration::from_secs(300),
            channel_capacity: 256,
            outbound_capacity: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    tasks: TaskRegistry,
    settings: StreamSettings,
    cache: Option<Arc<ResultCache>>,
}

/// Where a completed run's result is stored.
struct CacheSlot {
    cache: Arc<ResultCache>,
    key: String,
}

impl CacheSlot {
    fn fill(&self, label: &str, result: &AnalysisResult) {
        if self.cache.put(self.key.clone(), result.clone()) {
            log::debug!("[{}] result cached", label);
        }
    }
}

impl StreamMultiplexer {
    pub fn new(tasks: TaskRegistry, settings: StreamSettings) -> Self {
        Self {
            tasks,
            settings,
            cache: None,
        }
    }

    /// Completed runs started with `start_cached` store their result here.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Start `run` on a worker task and return the outbound event stream.
    /// The stream closes after the run's last event.
    pub fn start<F, Fut>(&self, label: impl Into<String>, run: F) -> mpsc::Receiver<AgentEvent>
    where
        F: FnOnce(EventSink) -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        self.spawn(label.into(), None, run)
    }

    /// Like `start`, and a completed result is cached under `key` even when
    /// the consumer has gone or the stream timed out.
    pub fn start_cached<F, Fut>(
        &self,
        label: impl Into<String>,
        key: impl Into<String>,
        run: F,
    ) -> mpsc::Receiver<AgentEvent>
    where
        F: FnOnce(EventSink) -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        let slot = self.cache.clone().map(|cache| CacheSlot {
            cache,
            key: key.into(),
        });
        self.spawn(label.into(), slot, run)
    }

    fn spawn<F, Fut>(&self, label: String, cache: Option<CacheSlot>, run: F) -> mpsc::Receiver<AgentEvent>
    where
        F: FnOnce(EventSink) -> Fut + Send + 'static,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (sink, events) = event_channel(self.settings.channel_capacity, cancel.clone());
        let guard = self.tasks.register(label.clone(), cancel.clone());
        let (tx, rx) = mpsc::channel(self.settings.outbound_capacity.max(1));

        log::info!("[{}] run started", label);
        let worker = tokio::spawn(run(sink));
        let pump = Pump {
            outbound: Outbound::new(label, tx),
            events,
            events_open: true,
            cancel,
            settings: self.settings.clone(),
            cache,
        };
        tokio::spawn(pump.run(worker, guard));
        rx
    }
}

/// Outbound side of a stream. Stops forwarding once the consumer is gone.
struct Outbound {
    label: String,
    tx: mpsc::Sender<AgentEvent>,
    connected: bool,
    last_sent: Instant,
    last_progress: f64,
}

impl Outbound {
    fn new(label: String, tx: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            label,
            tx,
            connected: true,
            last_sent: Instant::now(),
            last_progress: 0.0,
        }
    }

    async fn send(&mut self, event: AgentEvent) {
        if let AgentEvent::Progress { progress, .. } = &event {
            self.last_progress = self.last_progress.max(*progress);
        }
        self.last_sent = Instant::now();
        if !self.connected {
            return;
        }
        if self.tx.send(event).await.is_err() {
            self.connected = false;
            log::info!("[{}] client disconnected, run continues in background", self.label);
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_sent.elapsed()
    }
}

struct Pump {
    outbound: Outbound,
    events: EventReceiver,
    events_open: bool,
    cancel: CancellationToken,
    settings: StreamSettings,
    cache: Option<CacheSlot>,
}

impl Pump {
    async fn run(mut self, mut worker: JoinHandle<WorkerResult>, guard: RunGuard) {
        self.outbound
            .send(AgentEvent::progress("Analysis started", 0.0, None))
            .await;

        let deadline = tokio::time::sleep(self.settings.run_timeout);
        tokio::pin!(deadline);

        let joined = loop {
            // Ready events go out before anything else is considered.
            while let Ok(event) = self.events.try_recv() {
                self.outbound.send(event).await;
            }

            tokio::select! {
                biased;
                joined = &mut worker => break Some(joined),
                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => self.outbound.send(event).await,
                    None => self.events_open = false,
                },
                _ = &mut deadline => break None,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            if self.outbound.idle_for() >= self.settings.heartbeat_interval && !self.cancel.is_cancelled() {
                let progress = self.outbound.last_progress;
                self.outbound
                    .send(AgentEvent::progress("Analysis in progress...", progress, None))
                    .await;
            }
        };

        match joined {
            Some(joined) => {
                self.drain_ready().await;
                self.finish(joined).await;
                drop(guard);
            }
            None => self.detach(worker, guard).await,
        }
    }

    async fn drain_ready(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.outbound.send(event).await;
        }
    }

    async fn finish(&mut self, joined: Result<WorkerResult, JoinError>) {
        let label = self.outbound.label.clone();
        match joined {
            Ok(Ok(RunOutcome::Completed(result))) => {
                log::info!("[{}] run completed, confidence {:.2}", label, result.confidence);
                if let Some(slot) = &self.cache {
                    slot.fill(&label, &result);
                }
            }
            Ok(Ok(RunOutcome::Suspended { request_id, .. })) => {
                log::info!("[{}] run suspended as {}", label, request_id);
            }
            Ok(Err(AgentError::Cancelled)) => {
                log::info!("[{}] run cancelled", label);
            }
            Ok(Err(error)) => {
                log::error!("[{}] run failed: {}", label, error);
                self.outbound.send(AgentEvent::error(error.to_string())).await;
            }
            Err(join_error) => {
                log::error!("[{}] worker task failed: {}", label, join_error);
                self.outbound
                    .send(AgentEvent::error("Internal error: the analysis task stopped unexpectedly"))
                    .await;
            }
        }
    }

    /// Report the timeout and leave the worker running. A background task
    /// keeps draining its events and logs how it eventually ends.
    async fn detach(mut self, worker: JoinHandle<WorkerResult>, guard: RunGuard) {
        let timeout = AgentError::Timeout(self.settings.run_timeout.as_secs());
        log::warn!("[{}] {}, detaching worker", self.outbound.label, timeout);
        self.drain_ready().await;
        self.outbound.send(AgentEvent::error(timeout.to_string())).await;

        let Pump {
            outbound,
            mut events,
            cache,
            ..
        } = self;
        let label = outbound.label;
        drop(outbound.tx);

        tokio::spawn(async move {
            let drain = async { while events.recv().await.is_some() {} };
            let (joined, ()) = tokio::join!(worker, drain);
            match joined {
                Ok(Ok(RunOutcome::Completed(result))) => {
                    log::info!("[{}] detached run finished", label);
                    if let Some(slot) = &cache {
                        slot.fill(&label, &result);
                    }
                }
                Ok(Ok(RunOutcome::Suspended { request_id, .. })) => {
                    log::info!("[{}] detached run suspended as {}", label, request_id)
                }
                Ok(Err(error)) => log::info!("[{}] detached run ended: {}", label, error),
                Err(join_error) => log::error!("[{}] detached worker failed: {}", label, join_error),
            }
            drop(guard);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::ResultCacheConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn completed() -> RunOutcome {
        RunOutcome::Completed(AnalysisResult {
            root_cause: "missing file".to_string(),
            suggestions: Vec::new(),
            confidence: 0.7,
            related_code: None,
            related_logs: None,
        })
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            heartbeat_interval: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            run_timeout: Duration::from_secs(30),
            channel_capacity: 16,
            outbound_capacity: 16,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn is_heartbeat(event: &AgentEvent) -> bool {
        matches!(event, AgentEvent::Progress { message, .. } if message == "Analysis in progress...")
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_events_in_order() {
        let multiplexer = StreamMultiplexer::new(TaskRegistry::new(), settings());
        let rx = multiplexer.start("ordered", |sink| async move {
            sink.emit(AgentEvent::Plan { steps: Vec::new() }).await;
            sink.emit(AgentEvent::progress("Step 1: search code", 0.2, Some(1)))
                .await;
            sink.emit(AgentEvent::Result {
                result: AnalysisResult {
                    root_cause: "missing file".to_string(),
                    suggestions: Vec::new(),
                    confidence: 0.7,
                    related_code: None,
                    related_logs: None,
                },
            })
            .await;
            sink.emit(AgentEvent::done("Analysis complete")).await;
            Ok(completed())
        });

        let names: Vec<&str> = collect(rx).await.iter().map(AgentEvent::event_name).collect();
        assert_eq!(names, vec!["progress", "plan", "progress", "result", "done"]);
        assert!(multiplexer.tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_fill_silence() {
        let multiplexer = StreamMultiplexer::new(TaskRegistry::new(), settings());
        let rx = multiplexer.start("quiet", |sink| async move {
            sink.emit(AgentEvent::progress("Step 1: search code", 0.3, Some(1)))
                .await;
            tokio::time::sleep(Duration::from_secs(7)).await;
            sink.emit(AgentEvent::done("Analysis complete")).await;
            Ok(completed())
        });

        let events = collect(rx).await;
        let heartbeats: Vec<&AgentEvent> = events.iter().filter(|event| is_heartbeat(event)).collect();
        assert!(heartbeats.len() >= 2, "expected heartbeats, got {events:?}");
        for heartbeat in heartbeats {
            if let AgentEvent::Progress { progress, .. } = heartbeat {
                assert_eq!(*progress, 0.3);
            }
        }
        assert_eq!(events.last().map(AgentEvent::event_name), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_error_and_detaches() {
        let tasks = TaskRegistry::new();
        let multiplexer = StreamMultiplexer::new(
            tasks.clone(),
            StreamSettings {
                run_timeout: Duration::from_secs(5),
                heartbeat_interval: Duration::from_secs(60),
                ..settings()
            },
        );
        let finished = Arc::new(AtomicBool::new(false));
        let rx = multiplexer.start("slow", {
            let finished = finished.clone();
            |sink| async move {
                tokio::time::sleep(Duration::from_secs(20)).await;
                sink.emit(AgentEvent::done("late")).await;
                finished.store(true, Ordering::SeqCst);
                Ok(completed())
            }
        });

        let events = collect(rx).await;
        match events.last() {
            Some(AgentEvent::Error { error }) => assert!(error.contains("timed out after 5 seconds")),
            other => panic!("expected timeout error, got {other:?}"),
        }
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(tasks.len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_does_not_cancel_the_run() {
        let tasks = TaskRegistry::new();
        let multiplexer = StreamMultiplexer::new(tasks.clone(), settings());
        let saw_cancel = Arc::new(AtomicBool::new(true));
        let rx = multiplexer.start("orphan", {
            let saw_cancel = saw_cancel.clone();
            |sink| async move {
                for step in 1..=40 {
                    sink.emit(AgentEvent::progress("working", 0.5, Some(step)))
                        .await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                saw_cancel.store(sink.cancel_token().is_cancelled(), Ordering::SeqCst);
                Ok(completed())
            }
        });
        drop(rx);

        while !tasks.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_ends_with_one_error() {
        let multiplexer = StreamMultiplexer::new(TaskRegistry::new(), settings());
        let rx = multiplexer.start("broken", |sink| async move {
            sink.emit(AgentEvent::Plan { steps: Vec::new() }).await;
            Err(AgentError::Llm("The language model service is currently unavailable.".to_string()))
        });

        let events = collect(rx).await;
        let names: Vec<&str> = events.iter().map(AgentEvent::event_name).collect();
        assert_eq!(names, vec!["progress", "plan", "error"]);
        assert_eq!(
            events.last(),
            Some(&AgentEvent::error("The language model service is currently unavailable."))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_worker_is_reported() {
        let multiplexer = StreamMultiplexer::new(TaskRegistry::new(), settings());
        let rx = multiplexer.start("panics", |_sink| async move {
            if true {
                panic!("boom");
            }
            Ok(completed())
        });

        let events = collect(rx).await;
        assert_eq!(events.last().map(AgentEvent::event_name), Some("error"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_ends_quietly() {
        let tasks = TaskRegistry::new();
        let multiplexer = StreamMultiplexer::new(tasks.clone(), settings());
        let rx = multiplexer.start("cancelled", |sink| async move {
            sink.cancel_token().cancelled().await;
            sink.emit(AgentEvent::progress("after cancel", 0.9, None)).await;
            Err(AgentError::Cancelled)
        });

        let remaining = tasks.cancel_all(Duration::from_secs(1)).await;
        assert_eq!(remaining, 0);

        let names: Vec<&str> = collect(rx).await.iter().map(AgentEvent::event_name).collect();
        assert_eq!(names, vec!["progress"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_run_still_fills_the_cache() {
        let tasks = TaskRegistry::new();
        let cache = Arc::new(ResultCache::new(ResultCacheConfig::default()));
        let multiplexer = StreamMultiplexer::new(tasks.clone(), settings()).with_cache(cache.clone());
        let rx = multiplexer.start_cached("orphan", "boom", |sink| async move {
            for step in 1..=40 {
                sink.emit(AgentEvent::progress("working", 0.5, Some(step)))
                    .await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(completed())
        });
        drop(rx);

        while !tasks.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(cache.get("boom").map(|result| result.root_cause), Some("missing file".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_run_is_cached_when_it_finishes() {
        let tasks = TaskRegistry::new();
        let cache = Arc::new(ResultCache::default());
        let multiplexer = StreamMultiplexer::new(
            tasks.clone(),
            StreamSettings {
                run_timeout: Duration::from_secs(5),
                heartbeat_interval: Duration::from_secs(60),
                ..settings()
            },
        )
        .with_cache(cache.clone());
        let rx = multiplexer.start_cached("slow", "slow-key", |_sink| async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            Ok(completed())
        });

        let events = collect(rx).await;
        assert_eq!(events.last().map(AgentEvent::event_name), Some("error"));
        assert!(cache.get("slow-key").is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(tasks.is_empty());
        assert!(cache.get("slow-key").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_are_not_cached() {
        let cache = Arc::new(ResultCache::default());
        let multiplexer = StreamMultiplexer::new(TaskRegistry::new(), settings()).with_cache(cache.clone());
        let rx = multiplexer.start_cached("broken", "boom", |_sink| async move {
            Err(AgentError::Llm("unavailable".to_string()))
        });

        collect(rx).await;
        assert!(cache.is_empty());
    }
}
