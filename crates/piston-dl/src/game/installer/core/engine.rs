use crate::game::installer::config::EngineConfig;
use crate::game::installer::core::fetcher::{ContentFetcher, TransferControl};
use crate::game::installer::core::limiter::TaskLimiter;
use crate::game::installer::core::planner::{DownloadPlan, DownloadPlanner};
use crate::game::installer::core::traits::PlanSource;
use crate::game::installer::error::{FetchError, InstallError, InstallResult};
use crate::game::installer::types::{DownloadTask, EngineEvent, EngineListener, Section};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineStatus {
    Idle,
    Running,
    Paused,
    Done,
    Stopped,
    Failed,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Done,
    /// Finished, but some files were given up on
    DoneWithErrors,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub section: Section,
    pub id: String,
    pub error: String,
    pub attempts: u32,
    /// Declared size of the file, 0 when unknown
    pub size: u64,
    /// Bytes of the file counted in `downloaded_bytes` before it was given up
    pub credited_bytes: u64,
}

impl FileFailure {
    fn section_wide(section: Section, error: String) -> Self {
        Self {
            section,
            id: section.to_string(),
            error,
            attempts: 1,
            size: 0,
            credited_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub section: Section,
    pub status: RunStatus,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Files that had to be downloaded
    pub planned_files: usize,
    /// Files already present
    pub satisfied_files: usize,
    pub failures: Vec<FileFailure>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Done
    }

    /// Declared size of every file given up on
    pub fn failed_bytes(&self) -> u64 {
        self.failures.iter().map(|f| f.size).sum()
    }

    /// Progress that belongs to files present at the end of the run.
    /// Equals `total_bytes - failed_bytes()` for a run that was not stopped.
    pub fn completed_bytes(&self) -> u64 {
        let partial: u64 = self.failures.iter().map(|f| f.credited_bytes).sum();
        self.downloaded_bytes.saturating_sub(partial)
    }
}

/// Point-in-time view of an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub section: Section,
    pub status: EngineStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub pending: usize,
    pub running: usize,
    pub force_install: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, Default)]
struct RunControl {
    paused: bool,
    stopped: bool,
}

/// Forwards events into an unbounded channel
struct ChannelListener(mpsc::UnboundedSender<EngineEvent>);

impl EngineListener for ChannelListener {
    fn on_event(&self, event: &EngineEvent) {
        let _ = self.0.send(event.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<EngineEvent>,
    delivering: bool,
}

/// Ordered event fan-out.
///
/// Events are queued in the order they are created and handed to listeners
/// by whichever caller holds the delivery turn, outside of any lock. A
/// listener may call back into the engine; its events are delivered after
/// the current one.
#[derive(Default)]
struct EventHub {
    outbox: Mutex<Outbox>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn EngineListener>)>>,
    next_id: AtomicU64,
}

impl EventHub {
    fn subscribe(&self, listener: Arc<dyn EngineListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn emit(&self, event: EngineEvent) {
        self.emit_with(|| event)
    }

    /// `make` runs under the queue lock, so values it reads from shared
    /// counters are ordered the same way the events are delivered.
    fn emit_with(&self, make: impl FnOnce() -> EngineEvent) {
        {
            let mut outbox = lock(&self.outbox);
            outbox.queue.push_back(make());
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }

        loop {
            let event = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };

            let listeners: Vec<Arc<dyn EngineListener>> = lock(&self.listeners)
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();
            for listener in listeners {
                listener.on_event(&event);
            }
        }
    }
}

struct EngineInner {
    section: Section,
    source: Arc<dyn PlanSource>,
    fetcher: ContentFetcher,
    limiter: TaskLimiter,
    planner: DownloadPlanner,
    max_retries: u32,
    status: Mutex<EngineStatus>,
    /// Set from `start()` until its last task has settled
    active: AtomicBool,
    control: watch::Sender<RunControl>,
    pending: Mutex<VecDeque<DownloadTask>>,
    downloaded: AtomicU64,
    total: AtomicU64,
    force: AtomicBool,
    events: EventHub,
}

impl TransferControl for EngineInner {
    fn is_cancelled(&self) -> bool {
        self.control.borrow().stopped
    }

    fn cancelled(&self) -> BoxFuture<'_, ()> {
        let mut control = self.control.subscribe();
        Box::pin(async move { wait_for_stop(&mut control).await })
    }

    fn ready(&self) -> BoxFuture<'_, bool> {
        let mut control = self.control.subscribe();
        Box::pin(async move {
            let ready = control
                .wait_for(|c| !c.paused || c.stopped)
                .await
                .map(|c| !c.stopped)
                .unwrap_or(false);
            ready
        })
    }
}

/// Clears the engine's active flag when a run ends, however it ends
struct ActiveRun<'a>(&'a AtomicBool);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives one section's downloads: plan, then fetch every missing file
/// under the concurrency limit with pause/resume/stop and per-file retry.
///
/// Cloning hands out another handle to the same engine, so control calls
/// can be made while `start()` is being awaited elsewhere.
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

impl DownloadEngine {
    pub fn new(
        source: Arc<dyn PlanSource>,
        fetcher: ContentFetcher,
        config: &EngineConfig,
    ) -> InstallResult<Self> {
        let limiter = TaskLimiter::new(config.concurrency)?;
        let (control, _) = watch::channel(RunControl::default());

        Ok(Self {
            inner: Arc::new(EngineInner {
                section: source.section(),
                source,
                fetcher,
                limiter,
                planner: DownloadPlanner::new(config.verify_hashes),
                max_retries: config.max_retries,
                status: Mutex::new(EngineStatus::Idle),
                active: AtomicBool::new(false),
                control,
                pending: Mutex::new(VecDeque::new()),
                downloaded: AtomicU64::new(0),
                total: AtomicU64::new(0),
                force: AtomicBool::new(false),
                events: EventHub::default(),
            }),
        })
    }

    pub fn section(&self) -> Section {
        self.inner.section
    }

    pub fn subscribe(&self, listener: Arc<dyn EngineListener>) -> ListenerId {
        self.inner.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Every event from now on, in emission order
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(Arc::new(ChannelListener(tx)));
        rx
    }

    pub fn status(&self) -> EngineStatus {
        *lock(&self.inner.status)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            section: self.inner.section,
            status: self.status(),
            downloaded_bytes: self.inner.downloaded.load(Ordering::SeqCst),
            total_bytes: self.inner.total.load(Ordering::SeqCst),
            pending: lock(&self.inner.pending).len(),
            running: self.inner.limiter.running(),
            force_install: self.inner.force.load(Ordering::SeqCst),
        }
    }

    pub fn force_install(&self) -> bool {
        self.inner.force.load(Ordering::SeqCst)
    }

    /// Re-download files even when they are already present
    pub fn set_force_install(&self, force: bool) {
        let previous = self.inner.force.swap(force, Ordering::SeqCst);
        if previous != force {
            self.inner.events.emit(EngineEvent::ForceInstallChanged {
                section: self.inner.section,
                force,
            });
        }
    }

    /// Total bytes the next run will account for, without downloading
    pub async fn total_bytes(&self) -> InstallResult<u64> {
        let force = self.force_install();
        Ok(self.inner.plan(force).await?.total_bytes)
    }

    /// Running -> Paused. Transfers already streaming finish; queued ones
    /// wait before touching the network.
    pub fn pause(&self) -> bool {
        {
            let mut status = lock(&self.inner.status);
            if *status != EngineStatus::Running {
                return false;
            }
            *status = EngineStatus::Paused;
            self.inner.control.send_modify(|c| c.paused = true);
        }
        log::info!("[{}] Paused", self.inner.section);
        self.inner.events.emit(EngineEvent::Paused {
            section: self.inner.section,
        });
        true
    }

    pub fn resume(&self) -> bool {
        {
            let mut status = lock(&self.inner.status);
            if *status != EngineStatus::Paused {
                return false;
            }
            *status = EngineStatus::Running;
            self.inner.control.send_modify(|c| c.paused = false);
        }
        log::info!("[{}] Resumed", self.inner.section);
        self.inner.events.emit(EngineEvent::Resumed {
            section: self.inner.section,
        });
        true
    }

    /// Abandon the run. Queued tasks are dropped and in-flight transfers
    /// abort at their next chunk. Calling it again is a no-op.
    pub fn stop(&self) {
        {
            let mut status = lock(&self.inner.status);
            if *status == EngineStatus::Stopped {
                return;
            }
            *status = EngineStatus::Stopped;
            self.inner.control.send_modify(|c| c.stopped = true);
        }
        let dropped = {
            let mut pending = lock(&self.inner.pending);
            let n = pending.len();
            pending.clear();
            n
        };
        log::info!(
            "[{}] Stopped ({} queued downloads discarded)",
            self.inner.section,
            dropped
        );
        self.inner.events.emit(EngineEvent::Stopped {
            section: self.inner.section,
        });
    }

    /// Plan and download. Resolves once every task has settled or the
    /// run was stopped.
    ///
    /// A stopped run stays active until its in-flight transfers have
    /// unwound; starting again before that fails with `AlreadyRunning`.
    pub async fn start(&self) -> InstallResult<RunReport> {
        let inner = &self.inner;
        let _active = {
            let mut status = lock(&inner.status);
            if matches!(*status, EngineStatus::Running | EngineStatus::Paused)
                || inner.active.swap(true, Ordering::SeqCst)
            {
                return Err(InstallError::AlreadyRunning);
            }
            *status = EngineStatus::Running;
            inner.control.send_replace(RunControl::default());
            ActiveRun(&inner.active)
        };

        inner.downloaded.store(0, Ordering::SeqCst);
        inner.total.store(0, Ordering::SeqCst);
        lock(&inner.pending).clear();

        log::info!("[{}] Starting", inner.section);
        inner.events.emit(EngineEvent::Start {
            section: inner.section,
        });

        let force = inner.force.load(Ordering::SeqCst);
        let mut plan = match inner.plan(force).await {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("[{}] Planning failed: {}", inner.section, e);
                {
                    let mut status = lock(&inner.status);
                    if *status != EngineStatus::Stopped {
                        *status = EngineStatus::Failed;
                    }
                }
                inner.events.emit(EngineEvent::SectionError {
                    section: inner.section,
                    id: inner.section.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        inner.total.store(plan.total_bytes, Ordering::SeqCst);
        if plan.satisfied_bytes > 0 {
            inner.credit(plan.satisfied_bytes);
        }

        let tasks = std::mem::take(&mut plan.tasks);
        let planned_files = tasks.len();
        let mut failures = inner.drive(tasks).await;

        let stopped = inner.control.borrow().stopped;
        if !stopped {
            if let Err(e) = inner.source.finish(&plan).await {
                log::error!("[{}] Finishing failed: {}", inner.section, e);
                inner.events.emit(EngineEvent::SectionError {
                    section: inner.section,
                    id: inner.section.to_string(),
                    error: e.to_string(),
                });
                failures.push(FileFailure::section_wide(inner.section, e.to_string()));
            }
        }

        let completed = {
            let mut status = lock(&inner.status);
            if *status == EngineStatus::Stopped {
                false
            } else {
                *status = EngineStatus::Done;
                true
            }
        };

        let status = if !completed {
            RunStatus::Stopped
        } else if failures.is_empty() {
            RunStatus::Done
        } else {
            RunStatus::DoneWithErrors
        };

        if completed {
            log::info!(
                "[{}] Done: {} downloaded, {} present, {} failed",
                inner.section,
                planned_files - failures.len().min(planned_files),
                plan.satisfied_files,
                failures.len()
            );
            inner.events.emit(EngineEvent::Done {
                section: inner.section,
                failed: failures.len(),
            });
        }

        Ok(RunReport {
            section: inner.section,
            status,
            total_bytes: inner.total.load(Ordering::SeqCst),
            downloaded_bytes: inner.downloaded.load(Ordering::SeqCst),
            planned_files,
            satisfied_files: plan.satisfied_files,
            failures,
        })
    }
}

impl EngineInner {
    async fn plan(&self, force: bool) -> InstallResult<DownloadPlan> {
        let candidates = self.source.candidates().await?;
        Ok(self.planner.plan(self.section, candidates, force).await)
    }

    fn credit(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.events.emit_with(|| {
            let downloaded = self.downloaded.fetch_add(delta, Ordering::SeqCst) + delta;
            EngineEvent::Bytes {
                section: self.section,
                delta,
                downloaded,
                total: self.total.load(Ordering::SeqCst),
            }
        });
    }

    /// Dispatch every task, re-queueing failures, until the queue and the
    /// running set are both empty or the run is stopped.
    async fn drive(self: &Arc<Self>, tasks: Vec<DownloadTask>) -> Vec<FileFailure> {
        lock(&self.pending).extend(tasks);

        let mut control = self.control.subscribe();
        let mut running: JoinSet<(DownloadTask, InstallResult<()>)> = JoinSet::new();
        let mut failures = Vec::new();

        loop {
            while let Some(joined) = running.try_join_next() {
                self.settle(joined, &mut failures);
            }
            if control.borrow().stopped {
                break;
            }

            let next = lock(&self.pending).pop_front();
            match next {
                Some(task) => {
                    let permit = tokio::select! {
                        permit = self.limiter.acquire() => permit,
                        _ = wait_for_stop(&mut control) => break,
                    };
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            log::error!(
                                "[{}] No download slot for {}: {}",
                                self.section,
                                task.id,
                                e
                            );
                            failures.push(FileFailure {
                                section: self.section,
                                id: task.id,
                                error: e.to_string(),
                                attempts: task.attempts,
                                size: task.size,
                                credited_bytes: task.credited,
                            });
                            continue;
                        }
                    };
                    let inner = self.clone();
                    running.spawn(async move {
                        let _permit = permit;
                        let mut task = task;
                        let result = inner.run_task(&mut task).await;
                        (task, result)
                    });
                }
                None if running.is_empty() => {
                    let state = *control.borrow();
                    if state.paused && !state.stopped {
                        // Completion waits for resume
                        let _ = control.wait_for(|c| !c.paused || c.stopped).await;
                        continue;
                    }
                    break;
                }
                None => {
                    tokio::select! {
                        joined = running.join_next() => {
                            if let Some(joined) = joined {
                                self.settle(joined, &mut failures);
                            }
                        }
                        _ = wait_for_stop(&mut control) => {}
                    }
                }
            }
        }

        // Let in-flight transfers reach their cancellation checkpoint
        while let Some(joined) = running.join_next().await {
            self.settle(joined, &mut failures);
        }
        failures
    }

    fn settle(
        &self,
        joined: Result<(DownloadTask, InstallResult<()>), tokio::task::JoinError>,
        failures: &mut Vec<FileFailure>,
    ) {
        let (mut task, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("[{}] Download task aborted: {}", self.section, e);
                failures.push(FileFailure {
                    section: self.section,
                    id: "<aborted>".to_string(),
                    error: e.to_string(),
                    attempts: 1,
                    size: 0,
                    credited_bytes: 0,
                });
                return;
            }
        };

        let error = match result {
            Ok(()) => return,
            Err(e) => e,
        };

        if error.is_cancelled() || self.control.borrow().stopped {
            log::debug!("[{}] {} cancelled", self.section, task.id);
            return;
        }

        task.attempts += 1;
        if task.attempts <= self.max_retries {
            log::warn!(
                "[{}] {} failed (attempt {}/{}): {}. Re-queueing",
                self.section,
                task.id,
                task.attempts,
                self.max_retries + 1,
                error
            );
            lock(&self.pending).push_back(task);
            return;
        }

        log::error!(
            "[{}] Giving up on {} after {} attempts: {}",
            self.section,
            task.id,
            task.attempts,
            error
        );
        self.events.emit(EngineEvent::SectionError {
            section: self.section,
            id: task.id.clone(),
            error: error.to_string(),
        });
        failures.push(FileFailure {
            section: self.section,
            id: task.id,
            error: error.to_string(),
            attempts: task.attempts,
            size: task.size,
            credited_bytes: task.credited,
        });
    }

    async fn run_task(&self, task: &mut DownloadTask) -> InstallResult<()> {
        if !self.ready().await {
            return Err(FetchError::Cancelled {
                url: task.url.clone(),
            }
            .into());
        }

        log::debug!("[{}] Downloading {}", self.section, task.id);
        self.events.emit(EngineEvent::FileStart {
            section: self.section,
            id: task.id.clone(),
            size: task.size,
        });

        // Credit per file is capped at its declared size and survives
        // retries, so a second attempt only reports bytes past the first.
        let size = task.size;
        let credited = AtomicU64::new(task.credited);
        let on_progress = |received: u64| {
            let capped = received.min(size);
            let previous = credited.fetch_max(capped, Ordering::SeqCst);
            if capped > previous {
                self.credit(capped - previous);
            }
        };

        let fetched = self
            .fetcher
            .fetch_to_path(
                &task.url,
                &task.destination,
                task.sha1.as_deref(),
                self,
                &on_progress,
            )
            .await;
        task.credited = credited.load(Ordering::SeqCst);
        fetched?;

        self.source.after_download(task).await?;

        if task.credited < size {
            self.credit(size - task.credited);
            task.credited = size;
        }

        self.events.emit(EngineEvent::FileEnd {
            section: self.section,
            id: task.id.clone(),
        });
        Ok(())
    }
}

async fn wait_for_stop(control: &mut watch::Receiver<RunControl>) {
    if control.wait_for(|c| c.stopped).await.is_err() {
        // Sender gone: the engine is being torn down
        std::future::pending::<()>().await;
    }
}
