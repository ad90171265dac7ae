use crate::config::Config;
use crate::jobs::JobType;
use crate::state::WarningKind;
use crate::storage::{self, DomainStore, SharedStorage};
use crate::SumiError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lease expiry per job type, already multiplied by the grace factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    pub robots_check: Duration,
    pub domain_crawl: Duration,
}

impl JobTimeouts {
    /// Leases expire after three times the configured job timeout
    pub const GRACE_FACTOR: u32 = 3;

    pub fn from_config(config: &Config) -> Self {
        Self {
            robots_check: Duration::from_millis(config.robots_check.timeout_ms)
                * Self::GRACE_FACTOR,
            domain_crawl: Duration::from_millis(config.domain_crawl.timeout_ms)
                * Self::GRACE_FACTOR,
        }
    }

    pub fn for_job(&self, job_type: JobType) -> Duration {
        match job_type {
            JobType::RobotsCheck => self.robots_check,
            JobType::DomainCrawl => self.domain_crawl,
        }
    }
}

/// Snapshot of an outstanding lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub origin: String,
    pub job_id: u64,
    pub job_type: JobType,
    pub worker_id: String,
}

/// Notifications the registry sends to the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A lease expired and its domain was rolled back
    TimedOut(LeaseInfo),
    /// A lease expired while its result was being saved
    Fault(String),
}

struct Lease {
    info: LeaseInfo,
    saving: bool,
    timer: JoinHandle<()>,
}

struct Inner {
    leases: Mutex<HashMap<String, Lease>>,
    storage: SharedStorage,
    timeouts: JobTimeouts,
    events: mpsc::UnboundedSender<RegistryEvent>,
}

/// In-memory table of domain leases, each guarded by an expiry timer
///
/// There is at most one lease per origin. Leases are never persisted: the
/// storage side of a lease is the domain's `checking`/`crawling` status, which
/// the startup sweep resets.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl JobRegistry {
    pub fn new(
        storage: SharedStorage,
        timeouts: JobTimeouts,
        events: mpsc::UnboundedSender<RegistryEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                leases: Mutex::new(HashMap::new()),
                storage,
                timeouts,
                events,
            }),
        }
    }

    /// Registers a lease whose domain lock was just taken in storage
    ///
    /// Must be called from within a tokio runtime. A second lease for the
    /// same origin is refused and the refused job's lock is rolled back.
    pub fn register(
        &self,
        origin: &str,
        job_type: JobType,
        job_id: u64,
        worker_id: &str,
    ) -> Result<(), SumiError> {
        let mut leases = self.inner.leases()?;

        if let Some(existing) = leases.get(origin) {
            tracing::error!(
                "Refusing job {} for {}: job {} already holds the domain",
                job_id,
                origin,
                existing.info.job_id
            );
            drop(leases);
            storage::lock(&self.inner.storage)?.rollback_job(
                origin,
                job_type,
                job_id,
                Utc::now(),
            )?;
            return Err(SumiError::JobAlreadyLeased {
                origin: origin.to_string(),
            });
        }

        let info = LeaseInfo {
            origin: origin.to_string(),
            job_id,
            job_type,
            worker_id: worker_id.to_string(),
        };
        let timer = self.inner.spawn_timer(origin, job_id, job_type);
        leases.insert(
            origin.to_string(),
            Lease {
                info,
                saving: false,
                timer,
            },
        );

        tracing::debug!("Registered {} job {} for {}", job_type, job_id, origin);
        Ok(())
    }

    /// Restarts the expiry timer of a live lease
    ///
    /// Returns false when the job no longer holds the origin.
    pub fn postpone_timeout(&self, origin: &str, job_id: u64) -> Result<bool, SumiError> {
        let mut leases = self.inner.leases()?;
        let Some(lease) = leases.get_mut(origin).filter(|l| l.info.job_id == job_id) else {
            return Ok(false);
        };

        lease.timer.abort();
        lease.timer = self.inner.spawn_timer(origin, job_id, lease.info.job_type);
        Ok(true)
    }

    /// Whether `job_id` still holds `origin`
    pub fn is_current(&self, origin: &str, job_id: u64) -> Result<bool, SumiError> {
        Ok(self
            .inner
            .leases()?
            .get(origin)
            .is_some_and(|l| l.info.job_id == job_id))
    }

    /// Flags a lease as mid-save; returns false for a stale job
    pub fn begin_save(&self, origin: &str, job_id: u64) -> Result<bool, SumiError> {
        let mut leases = self.inner.leases()?;
        match leases.get_mut(origin).filter(|l| l.info.job_id == job_id) {
            Some(lease) => {
                lease.saving = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn end_save(&self, origin: &str, job_id: u64) -> Result<(), SumiError> {
        let mut leases = self.inner.leases()?;
        if let Some(lease) = leases.get_mut(origin).filter(|l| l.info.job_id == job_id) {
            lease.saving = false;
        }
        Ok(())
    }

    /// Deregisters a finished job and cancels its timer
    pub fn finish(&self, origin: &str, job_id: u64) -> Result<Option<LeaseInfo>, SumiError> {
        let mut leases = self.inner.leases()?;
        if !leases.get(origin).is_some_and(|l| l.info.job_id == job_id) {
            return Ok(None);
        }
        Ok(leases.remove(origin).map(|lease| {
            lease.timer.abort();
            lease.info
        }))
    }

    /// Looks up a lease by job id
    pub fn lease_of(&self, job_id: u64) -> Result<Option<LeaseInfo>, SumiError> {
        Ok(self
            .inner
            .leases()?
            .values()
            .find(|l| l.info.job_id == job_id)
            .map(|l| l.info.clone()))
    }

    /// Drops a lease the worker refused and returns its domain to storage
    pub fn release_refused(&self, job_id: u64) -> Result<Option<LeaseInfo>, SumiError> {
        let Some(info) = self.lease_of(job_id)? else {
            return Ok(None);
        };
        if let Some(info) = self.finish(&info.origin, job_id)? {
            storage::lock(&self.inner.storage)?.rollback_job(
                &info.origin,
                info.job_type,
                info.job_id,
                Utc::now(),
            )?;
            return Ok(Some(info));
        }
        Ok(None)
    }

    /// Reclaims every lease held by a worker
    pub fn cancel_worker_jobs(&self, worker_id: &str) -> Result<Vec<LeaseInfo>, SumiError> {
        let cancelled: Vec<LeaseInfo> = {
            let mut leases = self.inner.leases()?;
            let origins: Vec<String> = leases
                .iter()
                .filter(|(_, l)| l.info.worker_id == worker_id)
                .map(|(origin, _)| origin.clone())
                .collect();
            origins
                .iter()
                .filter_map(|origin| leases.remove(origin))
                .map(|lease| {
                    lease.timer.abort();
                    lease.info
                })
                .collect()
        };

        let mut storage = storage::lock(&self.inner.storage)?;
        for info in &cancelled {
            storage.rollback_job(&info.origin, info.job_type, info.job_id, Utc::now())?;
            storage.increment_warning(&info.origin, WarningKind::WorkerShutdown)?;
        }

        if !cancelled.is_empty() {
            tracing::warn!(
                "Reclaimed {} lease(s) of worker {}",
                cancelled.len(),
                worker_id
            );
        }
        Ok(cancelled)
    }

    /// Number of outstanding leases
    pub fn outstanding(&self) -> Result<usize, SumiError> {
        Ok(self.inner.leases()?.len())
    }

    pub fn outstanding_for(&self, job_type: JobType) -> Result<usize, SumiError> {
        Ok(self
            .inner
            .leases()?
            .values()
            .filter(|l| l.info.job_type == job_type)
            .count())
    }
}

impl Inner {
    fn leases(&self) -> Result<MutexGuard<'_, HashMap<String, Lease>>, SumiError> {
        self.leases
            .lock()
            .map_err(|e| SumiError::Storage(format!("lease table poisoned: {}", e)))
    }

    fn spawn_timer(self: &Arc<Self>, origin: &str, job_id: u64, job_type: JobType) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let origin = origin.to_string();
        let timeout = self.timeouts.for_job(job_type);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = inner.expire(&origin, job_id) {
                tracing::error!("Failed to expire job {} for {}: {}", job_id, origin, e);
            }
        })
    }

    fn expire(&self, origin: &str, job_id: u64) -> Result<(), SumiError> {
        let info = {
            let mut leases = self.leases()?;
            let Some(lease) = leases.get(origin).filter(|l| l.info.job_id == job_id) else {
                return Ok(());
            };

            if lease.saving {
                let message = format!(
                    "lease of job {} for {} expired while its result was being saved",
                    job_id, origin
                );
                tracing::error!("{}", message);
                let _ = self.events.send(RegistryEvent::Fault(message));
                return Ok(());
            }

            match leases.remove(origin) {
                Some(lease) => lease.info,
                None => return Ok(()),
            }
        };

        {
            let mut storage = storage::lock(&self.storage)?;
            storage.rollback_job(origin, info.job_type, job_id, Utc::now())?;
            storage.increment_warning(origin, info.job_type.timeout_warning())?;
        }

        tracing::warn!(
            "{} job {} for {} timed out on worker {}; domain rolled back",
            info.job_type,
            job_id,
            origin,
            info.worker_id
        );
        let _ = self.events.send(RegistryEvent::TimedOut(info));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DomainStatus, ResourceStatus, RobotsOutcome, RobotsStatus};
    use crate::storage::{ResourceStore, SqliteStorage};

    const ORIGIN: &str = "http://example.org";

    fn timeouts() -> JobTimeouts {
        JobTimeouts {
            robots_check: Duration::from_secs(3),
            domain_crawl: Duration::from_secs(30),
        }
    }

    fn setup() -> (
        JobRegistry,
        SharedStorage,
        mpsc::UnboundedReceiver<RegistryEvent>,
    ) {
        let storage = storage::shared(SqliteStorage::new_in_memory().unwrap());
        {
            let mut guard = storage::lock(&storage).unwrap();
            guard.ensure_domain(ORIGIN, Utc::now()).unwrap();
            assert!(guard.try_lock_for_robots(ORIGIN, "w1", 1, Utc::now()).unwrap());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = JobRegistry::new(storage.clone(), timeouts(), tx);
        (registry, storage, rx)
    }

    fn domain_status(storage: &SharedStorage) -> DomainStatus {
        storage::lock(storage)
            .unwrap()
            .get_domain(ORIGIN)
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lease_refused() {
        let (registry, _storage, _rx) = setup();
        registry.register(ORIGIN, JobType::RobotsCheck, 1, "w1").unwrap();

        let refused = registry.register(ORIGIN, JobType::RobotsCheck, 2, "w2");
        assert!(matches!(refused, Err(SumiError::JobAlreadyLeased { .. })));
        assert_eq!(registry.outstanding().unwrap(), 1);
        assert!(registry.is_current(ORIGIN, 1).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rolls_back_once() {
        let (registry, storage, mut rx) = setup();
        registry.register(ORIGIN, JobType::RobotsCheck, 1, "w1").unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;

        match rx.recv().await {
            Some(RegistryEvent::TimedOut(info)) => {
                assert_eq!(info.origin, ORIGIN);
                assert_eq!(info.job_id, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.outstanding().unwrap(), 0);
        assert_eq!(domain_status(&storage), DomainStatus::Unvisited);

        let warnings = storage::lock(&storage).unwrap().get_warnings(ORIGIN).unwrap();
        assert_eq!(warnings.get(&WarningKind::RobotsCheckTimeout), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_timeout_returns_resources() {
        let storage = storage::shared(SqliteStorage::new_in_memory().unwrap());
        let urls = vec![format!("{}/a", ORIGIN), format!("{}/b", ORIGIN)];
        let leased_at = Utc::now();
        {
            let mut guard = storage::lock(&storage).unwrap();
            let earlier = leased_at - chrono::Duration::seconds(10);
            guard.ensure_domain(ORIGIN, earlier).unwrap();
            assert!(guard.try_lock_for_robots(ORIGIN, "w1", 1, earlier).unwrap());
            let outcome = RobotsOutcome {
                status: DomainStatus::Ready,
                robots_status: RobotsStatus::NotFound,
                robots_text: None,
                crawl_delay_ms: 1000,
                error: None,
            };
            assert!(guard.save_robots_outcome(ORIGIN, 1, &outcome, earlier).unwrap());
            assert!(guard.try_lock_for_crawl(ORIGIN, "w1", 2, leased_at).unwrap());
            for url in &urls {
                guard.ensure_resource(url, ORIGIN, earlier).unwrap();
            }
            assert_eq!(guard.mark_resources_crawling(&urls, 2, leased_at).unwrap(), urls);
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = JobRegistry::new(storage.clone(), timeouts(), tx);
        registry.register(ORIGIN, JobType::DomainCrawl, 2, "w1").unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(11)).await;

        match rx.recv().await {
            Some(RegistryEvent::TimedOut(info)) => {
                assert_eq!(info.job_type, JobType::DomainCrawl);
                assert_eq!(info.job_id, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.outstanding().unwrap(), 0);

        let guard = storage::lock(&storage).unwrap();
        for url in &urls {
            let resource = guard.get_resource(url).unwrap().unwrap();
            assert_eq!(resource.status, ResourceStatus::Unvisited);
            assert!(resource.job_id.is_none());
        }
        let domain = guard.get_domain(ORIGIN).unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Ready);
        assert!(domain.lease.is_none());
        // Requests may have gone out right up to the expiry
        assert!(domain.next_allowed.unwrap() >= leased_at + chrono::Duration::seconds(1));
        let warnings = guard.get_warnings(ORIGIN).unwrap();
        assert_eq!(warnings.get(&WarningKind::DomainCrawlTimeout), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_postpone_keeps_lease_alive() {
        let (registry, storage, mut rx) = setup();
        registry.register(ORIGIN, JobType::RobotsCheck, 1, "w1").unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.postpone_timeout(ORIGIN, 1).unwrap());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(domain_status(&storage), DomainStatus::Checking);
        assert!(!registry.postpone_timeout(ORIGIN, 9).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_cancels_timer() {
        let (registry, _storage, mut rx) = setup();
        registry.register(ORIGIN, JobType::RobotsCheck, 1, "w1").unwrap();

        assert!(registry.finish(ORIGIN, 2).unwrap().is_none());
        assert!(registry.finish(ORIGIN, 1).unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_mid_save_is_a_fault() {
        let (registry, _storage, mut rx) = setup();
        registry.register(ORIGIN, JobType::RobotsCheck, 1, "w1").unwrap();
        assert!(registry.begin_save(ORIGIN, 1).unwrap());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(matches!(rx.recv().await, Some(RegistryEvent::Fault(_))));
        assert_eq!(registry.outstanding().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_worker_jobs() {
        let (registry, storage, _rx) = setup();
        registry.register(ORIGIN, JobType::RobotsCheck, 1, "w1").unwrap();

        let cancelled = registry.cancel_worker_jobs("w1").unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(registry.outstanding().unwrap(), 0);
        assert_eq!(domain_status(&storage), DomainStatus::Unvisited);
        assert!(registry.cancel_worker_jobs("w1").unwrap().is_empty());
    }
}
