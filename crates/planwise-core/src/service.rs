//! Sync service: the explicitly constructed object graph shared by clients.
//!
//! Owns the local store, operation queue, synchronizer and data facade.
//! `init()` starts the auto-sync loop (sync on reconnect and on an interval,
//! and reopen remote subscriptions lost to an outage); `dispose()` stops it
//! and releases subscriptions.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::facade::DataFacade;
use crate::models::{OperationKind, QueuedOperation, SyncConflict, SyncStats, SyncStatus, TableName};
use crate::queue::{OperationQueue, DEFAULT_MAX_ATTEMPTS};
use crate::remote::{DisconnectedRemoteStore, RemoteStore, RestRemoteStore};
use crate::store::{LocalStore, AUTO_SYNC_SLOT};
use crate::sync::{
    ConflictHandler, Connectivity, SyncEvent, SyncOutcome, Synchronizer, UnattendedResolution,
};

/// Tunables for a [`SyncService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_attempts: Option<u32>,
    pub unattended_resolution: UnattendedResolution,
    pub auto_sync_interval: Option<Duration>,
    /// Connectivity assumed until the platform reports otherwise
    pub start_online: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            unattended_resolution: UnattendedResolution::default(),
            auto_sync_interval: None,
            start_online: true,
        }
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            unattended_resolution: settings.unattended_resolution,
            auto_sync_interval: settings.auto_sync_interval(),
            start_online: settings.is_remote_configured(),
        }
    }
}

struct AutoSyncWorker {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

pub struct SyncService {
    store: Arc<LocalStore>,
    queue: Arc<OperationQueue>,
    synchronizer: Arc<Synchronizer>,
    facade: Arc<DataFacade>,
    connectivity: Connectivity,
    auto_sync_interval: Option<Duration>,
    worker: Mutex<Option<AutoSyncWorker>>,
}

impl SyncService {
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteStore>, options: SyncOptions) -> Self {
        let queue = Arc::new(
            OperationQueue::new(store.clone()).with_max_attempts(options.max_attempts),
        );
        let connectivity = Connectivity::new(options.start_online);
        let synchronizer = Arc::new(Synchronizer::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            connectivity.clone(),
            options.unattended_resolution,
        ));
        let facade = Arc::new(DataFacade::new(
            store.clone(),
            queue.clone(),
            remote,
            connectivity.clone(),
        ));

        Self {
            store,
            queue,
            synchronizer,
            facade,
            connectivity,
            auto_sync_interval: options.auto_sync_interval,
            worker: Mutex::new(None),
        }
    }

    /// Build the service described by `settings`: the local store at the
    /// configured path, and the hosted backend when an API URL is set.
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        settings.validate()?;
        let store = Arc::new(LocalStore::open(settings.resolved_db_path()?)?);

        let remote: Arc<dyn RemoteStore> = match &settings.api_url {
            Some(url) => {
                let rest = RestRemoteStore::new(
                    url.clone(),
                    settings.api_key.clone(),
                    settings.request_timeout(),
                )?
                .with_poll_interval(settings.poll_interval());
                rest.set_access_token(settings.access_token.clone());
                tracing::info!("Syncing with {}", rest.base_url());
                Arc::new(rest)
            }
            None => {
                tracing::info!("Running in local-only mode (no API URL configured)");
                Arc::new(DisconnectedRemoteStore)
            }
        };

        Ok(Self::new(store, remote, SyncOptions::from(settings)))
    }

    pub fn facade(&self) -> &DataFacade {
        &self.facade
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Start the auto-sync loop. Calling it again while running is a no-op.
    pub fn init(&self) {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_auto_sync(
            self.synchronizer.clone(),
            self.facade.clone(),
            self.store.clone(),
            self.connectivity.subscribe(),
            self.auto_sync_interval,
            shutdown.clone(),
        ));
        *worker = Some(AutoSyncWorker { shutdown, task });
        tracing::debug!("Auto-sync loop started");
    }

    /// Stop the auto-sync loop (waiting for an in-flight pass) and release
    /// every subscription.
    pub async fn dispose(&self) {
        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            worker.shutdown.notify_one();
            if let Err(error) = worker.task.await {
                tracing::warn!("Auto-sync loop ended abnormally: {error}");
            }
            tracing::debug!("Auto-sync loop stopped");
        }
        self.facade.unsubscribe_all().await;
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_worker().is_some()
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<AutoSyncWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a mutation directly, bypassing the facade's remote attempt.
    pub fn queue_operation(&self, table: TableName, kind: OperationKind) -> Result<QueuedOperation> {
        self.queue.enqueue(table, kind)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.synchronizer.status()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.synchronizer.stats()
    }

    /// Run a sync pass now; fails with [`Error::Offline`] without connectivity.
    pub async fn manual_sync(&self) -> Result<SyncOutcome> {
        self.synchronizer.trigger_drain_and_reconcile().await
    }

    pub fn set_auto_sync(&self, enabled: bool) -> Result<()> {
        self.store.write_slot(AUTO_SYNC_SLOT, &Some(enabled))
    }

    pub fn is_auto_sync_enabled(&self) -> bool {
        auto_sync_enabled(&self.store)
    }

    /// Report platform connectivity; going online wakes the auto-sync loop.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.synchronizer.subscribe_events()
    }

    pub fn set_conflict_handler(&self, handler: Option<Arc<dyn ConflictHandler>>) {
        self.synchronizer.set_conflict_handler(handler);
    }

    /// Resolved conflicts, newest first
    pub fn conflict_log(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.store.conflict_log(limit)
    }
}

fn auto_sync_enabled(store: &LocalStore) -> bool {
    store.read_slot::<Option<bool>>(AUTO_SYNC_SLOT).unwrap_or(true)
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_auto_sync(
    synchronizer: Arc<Synchronizer>,
    facade: Arc<DataFacade>,
    store: Arc<LocalStore>,
    mut online: watch::Receiver<bool>,
    interval: Option<Duration>,
    shutdown: Arc<Notify>,
) {
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let trigger = tokio::select! {
            () = shutdown.notified() => return,
            changed = online.changed() => {
                if changed.is_err() {
                    return;
                }
                if !*online.borrow_and_update() {
                    continue;
                }
                facade.restore_remote_subscriptions().await;
                "connectivity restored"
            }
            () = next_tick(ticker.as_mut()) => "interval",
        };

        if !auto_sync_enabled(&store) {
            continue;
        }
        match synchronizer.trigger_drain_and_reconcile().await {
            Ok(SyncOutcome::Completed(report)) => {
                tracing::debug!(
                    "Auto-sync ({trigger}) finished; {} tables reconciled",
                    report.tables.len()
                );
            }
            Ok(SyncOutcome::AlreadyRunning) | Err(Error::Offline) => {}
            Err(error) => tracing::warn!("Auto-sync ({trigger}) failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ChangeEvent, MemoryRemoteStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service_with(remote: Arc<MemoryRemoteStore>, options: SyncOptions) -> SyncService {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        SyncService::new(store, remote, options)
    }

    async fn wait_for_finish(events: &mut broadcast::Receiver<SyncEvent>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SyncEvent::Finished { .. }) = events.recv().await {
                    return;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manual_sync_offline_fails() {
        let service = service_with(
            Arc::new(MemoryRemoteStore::new()),
            SyncOptions {
                start_online: false,
                ..SyncOptions::default()
            },
        );

        assert!(matches!(service.manual_sync().await, Err(Error::Offline)));
        assert!(!service.sync_status().is_online);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_manual_syncs_run_one_pass() {
        let remote = Arc::new(MemoryRemoteStore::new().with_latency(Duration::from_millis(20)));
        let service = service_with(remote, SyncOptions::default());

        let (first, second) = tokio::join!(service.manual_sync(), service.manual_sync());

        let already_running = [first.unwrap(), second.unwrap()]
            .into_iter()
            .filter(|outcome| *outcome == SyncOutcome::AlreadyRunning)
            .count();
        assert_eq!(already_running, 1);
        assert_eq!(service.sync_stats().total_syncs, 1);
        assert_eq!(service.sync_stats().successful_syncs, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auto_sync_flag_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("planwise.db");
        let remote = Arc::new(MemoryRemoteStore::new());

        {
            let store = Arc::new(LocalStore::open(&path).unwrap());
            let service = SyncService::new(store, remote.clone(), SyncOptions::default());
            assert!(service.is_auto_sync_enabled());
            service.set_auto_sync(false).unwrap();
        }

        let store = Arc::new(LocalStore::open(&path).unwrap());
        let service = SyncService::new(store, remote, SyncOptions::default());
        assert!(!service.is_auto_sync_enabled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnect_replays_offline_create() {
        let remote = Arc::new(MemoryRemoteStore::new().with_server_ids());
        let service = service_with(
            remote.clone(),
            SyncOptions {
                start_online: false,
                ..SyncOptions::default()
            },
        );
        service.init();
        let mut events = service.subscribe_events();

        let created = service
            .facade()
            .create(TableName::Tasks, json!({"title": "X"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert!(created.is_local());
        assert_eq!(service.sync_status().queue_length, 1);

        service.set_online(true);
        wait_for_finish(&mut events).await;

        let status = service.sync_status();
        assert_eq!(status.queue_length, 0);
        assert!(status.last_sync_timestamp.is_some());
        let local = service.store().get_all(TableName::Tasks);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id.as_str(), "srv-1");
        assert_eq!(local[0].title(), Some("X"));

        service.dispose().await;
        assert!(!service.is_initialized());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnect_reopens_remote_subscriptions() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_available(false);
        let service = service_with(
            remote.clone(),
            SyncOptions {
                start_online: false,
                ..SyncOptions::default()
            },
        );
        service.init();
        let mut events = service.subscribe_events();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        service
            .facade()
            .subscribe(
                TableName::Projects,
                Arc::new(move |event: ChangeEvent| {
                    sink.lock().unwrap().push(event.record.title().map(str::to_string));
                }),
            )
            .await;

        remote.set_available(true);
        service.set_online(true);
        wait_for_finish(&mut events).await;

        remote
            .create(TableName::Projects, json!({"title": "Shared"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some("Shared".to_string())]);

        service.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_interval_sync_runs_while_online() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let service = service_with(
            remote.clone(),
            SyncOptions {
                auto_sync_interval: Some(Duration::from_millis(20)),
                ..SyncOptions::default()
            },
        );
        let mut events = service.subscribe_events();
        service.init();
        service.init();

        wait_for_finish(&mut events).await;
        service.dispose().await;

        assert!(service.sync_stats().total_syncs >= 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_auto_sync_and_disposed_service_do_not_sync() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let service = service_with(
            remote.clone(),
            SyncOptions {
                start_online: false,
                ..SyncOptions::default()
            },
        );
        service.set_auto_sync(false).unwrap();
        service.init();

        service.set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.sync_stats().total_syncs, 0);

        service.set_auto_sync(true).unwrap();
        service.dispose().await;
        service.set_online(false);
        service.set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.sync_stats().total_syncs, 0);
        assert_eq!(remote.calls().read, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_operation_and_status() {
        let service = service_with(Arc::new(MemoryRemoteStore::new()), SyncOptions::default());

        let operation = service
            .queue_operation(
                TableName::Events,
                OperationKind::Delete {
                    record_id: "e1".into(),
                },
            )
            .unwrap();

        assert_eq!(service.queue().pending(), vec![operation]);
        let status = service.sync_status();
        assert_eq!(status.queue_length, 1);
        assert!(status.is_online);
        assert!(!status.sync_in_progress);
        assert_eq!(status.last_sync_timestamp, None);
    }

    #[test]
    fn test_options_from_settings() {
        let settings = SyncSettings {
            api_url: Some("https://db.example.com".into()),
            max_attempts: None,
            ..SyncSettings::default()
        };
        let options = SyncOptions::from(&settings);
        assert!(options.start_online);
        assert_eq!(options.max_attempts, None);
        assert_eq!(options.auto_sync_interval, Some(Duration::from_secs(300)));
        assert!(!SyncOptions::from(&SyncSettings::default()).start_online);
    }
}
