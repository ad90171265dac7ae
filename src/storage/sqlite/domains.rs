use super::{from_millis, to_millis, SqliteStorage};
use crate::jobs::JobType;
use crate::state::{
    CrawlCounters, DomainLease, DomainRecord, DomainStatus, RobotsOutcome, RobotsStatus,
    WarningKind,
};
use crate::storage::traits::{DomainStore, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, HashMap};

const DOMAIN_COLUMNS: &str = "origin, status, robots_status, robots_text, robots_checked_at,
    crawl_delay_ms, last_accessed, next_allowed, queued, ongoing, success, failed, path_heads,
    worker_id, job_id, error";

fn domain_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DomainRecord> {
    let worker_id: Option<String> = row.get(13)?;
    let job_id: Option<i64> = row.get(14)?;

    Ok(DomainRecord {
        origin: row.get(0)?,
        status: DomainStatus::from_db_string(&row.get::<_, String>(1)?)
            .unwrap_or(DomainStatus::Unvisited),
        robots_status: RobotsStatus::from_db_string(&row.get::<_, String>(2)?)
            .unwrap_or(RobotsStatus::Unvisited),
        robots_text: row.get(3)?,
        robots_checked_at: from_millis(row.get(4)?),
        crawl_delay_ms: row.get::<_, i64>(5)?.max(0) as u64,
        last_accessed: from_millis(row.get(6)?),
        next_allowed: from_millis(row.get(7)?),
        counters: CrawlCounters {
            queued: row.get(8)?,
            ongoing: row.get(9)?,
            success: row.get(10)?,
            failed: row.get(11)?,
            path_heads: row.get(12)?,
        },
        lease: match (worker_id, job_id) {
            (Some(worker_id), Some(job_id)) => Some(DomainLease {
                worker_id,
                job_id: job_id as u64,
            }),
            _ => None,
        },
        error: row.get(15)?,
    })
}

impl DomainStore for SqliteStorage {
    fn ensure_domain(&mut self, origin: &str, now: DateTime<Utc>) -> StorageResult<()> {
        let now = to_millis(now);
        self.conn.execute(
            "INSERT OR IGNORE INTO domains (origin, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![origin, now],
        )?;
        Ok(())
    }

    fn get_domain(&self, origin: &str) -> StorageResult<Option<DomainRecord>> {
        let domain = self
            .conn
            .query_row(
                &format!("SELECT {} FROM domains WHERE origin = ?1", DOMAIN_COLUMNS),
                params![origin],
                domain_from_row,
            )
            .optional()?;
        Ok(domain)
    }

    fn try_lock_for_robots(
        &mut self,
        origin: &str,
        worker_id: &str,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE domains
             SET status = 'checking', robots_status = 'checking',
                 worker_id = ?2, job_id = ?3, updated_at = ?4
             WHERE origin = ?1 AND status = 'unvisited' AND robots_status = 'unvisited'",
            params![origin, worker_id, job_id as i64, to_millis(now)],
        )?;
        Ok(changed == 1)
    }

    fn try_lock_for_crawl(
        &mut self,
        origin: &str,
        worker_id: &str,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE domains
             SET status = 'crawling', worker_id = ?2, job_id = ?3, updated_at = ?4
             WHERE origin = ?1 AND status = 'ready'
               AND (next_allowed IS NULL OR next_allowed <= ?4)",
            params![origin, worker_id, job_id as i64, to_millis(now)],
        )?;
        Ok(changed == 1)
    }

    fn save_robots_outcome(
        &mut self,
        origin: &str,
        job_id: u64,
        outcome: &RobotsOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let now = to_millis(now);
        let changed = self.conn.execute(
            "UPDATE domains
             SET status = ?3, robots_status = ?4, robots_text = ?5, robots_checked_at = ?7,
                 crawl_delay_ms = ?6,
                 next_allowed = MAX(COALESCE(next_allowed, 0), ?7 + ?6),
                 worker_id = NULL, job_id = NULL, error = ?8, updated_at = ?7
             WHERE origin = ?1 AND status = 'checking' AND job_id = ?2",
            params![
                origin,
                job_id as i64,
                outcome.status.to_db_string(),
                outcome.robots_status.to_db_string(),
                outcome.robots_text,
                outcome.crawl_delay_ms as i64,
                now,
                outcome.error,
            ],
        )?;
        Ok(changed == 1)
    }

    fn advance_next_allowed(
        &mut self,
        origin: &str,
        accessed_at: DateTime<Utc>,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let accessed_at = to_millis(accessed_at);
        self.conn.execute(
            "UPDATE domains
             SET last_accessed = MAX(COALESCE(last_accessed, 0), ?2),
                 next_allowed = MAX(COALESCE(next_allowed, 0), ?2 + crawl_delay_ms),
                 updated_at = MAX(updated_at, ?2)
             WHERE origin = ?1",
            params![origin, accessed_at],
        )?;

        let next: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT next_allowed FROM domains WHERE origin = ?1",
                params![origin],
                |row| row.get(0),
            )
            .optional()?;
        Ok(from_millis(next.flatten()))
    }

    fn release_crawl(
        &mut self,
        origin: &str,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let now = to_millis(now);
        let job_id = job_id as i64;
        let tx = self.conn.transaction()?;

        // Resources the job never reported on go back to the queue
        tx.execute(
            "UPDATE resources SET status = 'unvisited', job_id = NULL, updated_at = ?3
             WHERE origin = ?1 AND status = 'crawling' AND job_id = ?2",
            params![origin, job_id, now],
        )?;
        let changed = tx.execute(
            "UPDATE domains
             SET status = 'ready', worker_id = NULL, job_id = NULL, ongoing = 0, updated_at = ?3
             WHERE origin = ?1 AND status = 'crawling' AND job_id = ?2",
            params![origin, job_id, now],
        )?;

        tx.commit()?;
        Ok(changed == 1)
    }

    fn rollback_job(
        &mut self,
        origin: &str,
        job_type: JobType,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let now = to_millis(now);
        let job_id = job_id as i64;
        let tx = self.conn.transaction()?;

        let changed = match job_type {
            JobType::RobotsCheck => tx.execute(
                "UPDATE domains
                 SET status = 'unvisited', robots_status = 'unvisited',
                     worker_id = NULL, job_id = NULL, updated_at = ?3
                 WHERE origin = ?1 AND status = 'checking' AND job_id = ?2",
                params![origin, job_id, now],
            )?,
            JobType::DomainCrawl => {
                tx.execute(
                    "UPDATE resources SET status = 'unvisited', job_id = NULL, updated_at = ?3
                     WHERE origin = ?1 AND status = 'crawling' AND job_id = ?2",
                    params![origin, job_id, now],
                )?;
                // The worker may have issued requests right up to the timeout
                tx.execute(
                    "UPDATE domains
                     SET status = 'ready', worker_id = NULL, job_id = NULL, ongoing = 0,
                         next_allowed = MAX(COALESCE(next_allowed, 0), ?3 + crawl_delay_ms),
                         updated_at = ?3
                     WHERE origin = ?1 AND status = 'crawling' AND job_id = ?2",
                    params![origin, job_id, now],
                )?
            }
        };

        tx.commit()?;
        Ok(changed == 1)
    }

    fn mark_host_not_found(
        &mut self,
        origin: &str,
        job_id: u64,
        message: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let now = to_millis(now);
        let job_id = job_id as i64;
        let tx = self.conn.transaction()?;

        tx.execute(
            "UPDATE resources SET status = 'unvisited', job_id = NULL, updated_at = ?3
             WHERE origin = ?1 AND status = 'crawling' AND job_id = ?2",
            params![origin, job_id, now],
        )?;
        let changed = tx.execute(
            "UPDATE domains
             SET status = 'error', error = ?3, worker_id = NULL, job_id = NULL, ongoing = 0,
                 updated_at = ?4
             WHERE origin = ?1 AND job_id = ?2 AND status IN ('checking', 'crawling')",
            params![origin, job_id, message, now],
        )?;

        tx.commit()?;
        Ok(changed == 1)
    }

    fn reset_domain(&mut self, origin: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let now = to_millis(now);
        let tx = self.conn.transaction()?;

        tx.execute(
            "UPDATE resources SET status = 'unvisited', job_id = NULL, updated_at = ?2
             WHERE origin = ?1 AND status = 'crawling'",
            params![origin, now],
        )?;
        let changed = tx.execute(
            "UPDATE domains
             SET status = 'unvisited', robots_status = 'unvisited', robots_text = NULL,
                 robots_checked_at = NULL, error = NULL, worker_id = NULL, job_id = NULL,
                 queued = 0, ongoing = 0, updated_at = ?2
             WHERE origin = ?1",
            params![origin, now],
        )?;

        tx.commit()?;
        Ok(changed == 1)
    }

    fn increment_warning(&mut self, origin: &str, kind: WarningKind) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO domain_warnings (origin, kind, count)
             SELECT ?1, ?2, 1 WHERE EXISTS (SELECT 1 FROM domains WHERE origin = ?1)
             ON CONFLICT(origin, kind) DO UPDATE SET count = count + 1",
            params![origin, kind.to_db_string()],
        )?;
        Ok(())
    }

    fn get_warnings(&self, origin: &str) -> StorageResult<BTreeMap<WarningKind, u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, count FROM domain_warnings WHERE origin = ?1")?;
        let rows = stmt.query_map(params![origin], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut warnings = BTreeMap::new();
        for row in rows {
            let (kind, count) = row?;
            if let Some(kind) = WarningKind::from_db_string(&kind) {
                warnings.insert(kind, count);
            }
        }
        Ok(warnings)
    }

    fn set_job_counters(
        &mut self,
        origin: &str,
        queued: u32,
        path_heads: u32,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE domains SET queued = ?2, ongoing = ?2, path_heads = ?3 WHERE origin = ?1",
            params![origin, queued, path_heads],
        )?;
        Ok(())
    }

    fn record_resource_outcome(&mut self, origin: &str, success: bool) -> StorageResult<()> {
        let (ok, failed) = if success { (1, 0) } else { (0, 1) };
        self.conn.execute(
            "UPDATE domains
             SET success = success + ?2, failed = failed + ?3, ongoing = MAX(ongoing - 1, 0)
             WHERE origin = ?1",
            params![origin, ok, failed],
        )?;
        Ok(())
    }

    fn robots_candidates(
        &self,
        process_id: i64,
        max_path_length: u32,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.origin FROM domains d
             WHERE d.status = 'unvisited' AND d.robots_status = 'unvisited'
               AND EXISTS (
                   SELECT 1 FROM paths p JOIN resources r ON r.url = p.head_resource
                   WHERE p.process_id = ?1 AND p.status = 'active' AND p.frontier = 1
                     AND p.nodes_count < ?2
                     AND r.origin = d.origin AND r.status = 'unvisited')
             ORDER BY d.created_at, d.origin
             LIMIT ?3",
        )?;
        let origins = stmt
            .query_map(params![process_id, max_path_length, limit as i64], |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(origins)
    }

    fn crawl_candidates(
        &self,
        process_id: i64,
        max_path_length: u32,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.origin, COUNT(DISTINCT r.url) AS heads FROM domains d
             JOIN resources r ON r.origin = d.origin AND r.status = 'unvisited'
             JOIN paths p ON p.head_resource = r.url
             WHERE p.process_id = ?1 AND p.status = 'active' AND p.frontier = 1
               AND p.nodes_count < ?2
               AND d.status = 'ready'
               AND (d.next_allowed IS NULL OR d.next_allowed <= ?3)
             GROUP BY d.origin
             ORDER BY heads DESC, d.origin
             LIMIT ?4",
        )?;
        let origins = stmt
            .query_map(
                params![process_id, max_path_length, to_millis(now), limit as i64],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(origins)
    }

    fn max_job_id(&self) -> StorageResult<u64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(m) FROM (
                 SELECT MAX(job_id) AS m FROM domains
                 UNION ALL
                 SELECT MAX(job_id) AS m FROM resources)",
            [],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    fn reset_interrupted(&mut self, now: DateTime<Utc>) -> StorageResult<(usize, usize)> {
        let now = to_millis(now);
        let tx = self.conn.transaction()?;

        let checking = tx.execute(
            "UPDATE domains
             SET status = 'unvisited', robots_status = 'unvisited',
                 worker_id = NULL, job_id = NULL, updated_at = ?1
             WHERE status = 'checking'",
            params![now],
        )?;
        let crawling = tx.execute(
            "UPDATE domains
             SET status = 'ready', worker_id = NULL, job_id = NULL, ongoing = 0, updated_at = ?1
             WHERE status = 'crawling'",
            params![now],
        )?;
        let resources = tx.execute(
            "UPDATE resources SET status = 'unvisited', job_id = NULL, updated_at = ?1
             WHERE status = 'crawling'",
            params![now],
        )?;

        tx.commit()?;
        Ok((checking + crawling, resources))
    }

    fn count_domains_by_status(&self) -> StorageResult<HashMap<DomainStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM domains GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = DomainStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ResourceOutcome, ResourceStatus};
    use crate::storage::traits::ResourceStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn ready_domain(storage: &mut SqliteStorage, origin: &str, delay_ms: u64) {
        storage.ensure_domain(origin, t0()).unwrap();
        assert!(storage.try_lock_for_robots(origin, "w1", 1, t0()).unwrap());
        let outcome = RobotsOutcome {
            status: DomainStatus::Ready,
            robots_status: RobotsStatus::Done,
            robots_text: Some("User-agent: *\nAllow: /".to_string()),
            crawl_delay_ms: delay_ms,
            error: None,
        };
        assert!(storage.save_robots_outcome(origin, 1, &outcome, t0()).unwrap());
    }

    #[test]
    fn test_ensure_domain_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.ensure_domain("http://a.org", t0()).unwrap();
        storage.ensure_domain("http://a.org", t0()).unwrap();

        let domain = storage.get_domain("http://a.org").unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Unvisited);
        assert!(storage.get_domain("http://b.org").unwrap().is_none());
    }

    #[test]
    fn test_robots_lease_is_exclusive() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.ensure_domain("http://a.org", t0()).unwrap();

        assert!(storage.try_lock_for_robots("http://a.org", "w1", 1, t0()).unwrap());
        assert!(!storage.try_lock_for_robots("http://a.org", "w2", 2, t0()).unwrap());
        assert!(!storage.try_lock_for_crawl("http://a.org", "w2", 3, t0()).unwrap());

        let domain = storage.get_domain("http://a.org").unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Checking);
        assert_eq!(
            domain.lease,
            Some(DomainLease {
                worker_id: "w1".to_string(),
                job_id: 1
            })
        );
    }

    #[test]
    fn test_robots_outcome_requires_matching_job() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.ensure_domain("http://a.org", t0()).unwrap();
        storage.try_lock_for_robots("http://a.org", "w1", 7, t0()).unwrap();

        let outcome = RobotsOutcome {
            status: DomainStatus::Ready,
            robots_status: RobotsStatus::NotFound,
            robots_text: None,
            crawl_delay_ms: 1000,
            error: None,
        };
        assert!(!storage.save_robots_outcome("http://a.org", 6, &outcome, t0()).unwrap());
        assert!(storage.save_robots_outcome("http://a.org", 7, &outcome, t0()).unwrap());

        let domain = storage.get_domain("http://a.org").unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Ready);
        assert_eq!(domain.next_allowed, Some(t0() + Duration::seconds(1)));
        assert!(domain.lease.is_none());
    }

    #[test]
    fn test_crawl_lease_respects_next_allowed() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        ready_domain(&mut storage, "http://d.org", 5000);

        let at = |secs| t0() + Duration::seconds(secs);
        assert!(!storage.try_lock_for_crawl("http://d.org", "w1", 2, at(2)).unwrap());
        assert!(storage.try_lock_for_crawl("http://d.org", "w1", 2, at(6)).unwrap());
        assert!(!storage.try_lock_for_crawl("http://d.org", "w2", 3, at(7)).unwrap());
    }

    #[test]
    fn test_next_allowed_is_monotonic() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        ready_domain(&mut storage, "http://d.org", 5000);

        let late = storage
            .advance_next_allowed("http://d.org", t0() + Duration::seconds(10))
            .unwrap()
            .unwrap();
        assert_eq!(late, t0() + Duration::seconds(15));

        // An older access never moves it back
        let after_old = storage
            .advance_next_allowed("http://d.org", t0() + Duration::seconds(3))
            .unwrap()
            .unwrap();
        assert_eq!(after_old, late);

        let domain = storage.get_domain("http://d.org").unwrap().unwrap();
        assert_eq!(domain.last_accessed, Some(t0() + Duration::seconds(10)));
    }

    #[test]
    fn test_rollback_robots_check() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.ensure_domain("http://a.org", t0()).unwrap();
        storage.try_lock_for_robots("http://a.org", "w1", 4, t0()).unwrap();

        assert!(!storage
            .rollback_job("http://a.org", JobType::RobotsCheck, 5, t0())
            .unwrap());
        assert!(storage
            .rollback_job("http://a.org", JobType::RobotsCheck, 4, t0())
            .unwrap());

        let domain = storage.get_domain("http://a.org").unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Unvisited);
        assert_eq!(domain.robots_status, RobotsStatus::Unvisited);
    }

    #[test]
    fn test_release_crawl_requeues_unreported_resources() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        ready_domain(&mut storage, "http://a.org", 0);
        let urls: Vec<String> = ["alice", "bob"]
            .iter()
            .map(|name| format!("http://a.org/{}", name))
            .collect();
        for url in &urls {
            storage.ensure_resource(url, "http://a.org", t0()).unwrap();
        }
        assert!(storage.try_lock_for_crawl("http://a.org", "w1", 2, t0()).unwrap());
        storage.mark_resources_crawling(&urls, 2, t0()).unwrap();
        assert!(storage
            .complete_resource(&urls[0], 2, &ResourceOutcome::done(1), t0())
            .unwrap());

        assert!(!storage.release_crawl("http://a.org", 3, t0()).unwrap());
        assert_eq!(
            storage.get_resource(&urls[1]).unwrap().unwrap().status,
            ResourceStatus::Crawling
        );

        assert!(storage.release_crawl("http://a.org", 2, t0()).unwrap());
        let alice = storage.get_resource(&urls[0]).unwrap().unwrap();
        assert_eq!(alice.status, ResourceStatus::Done);
        let bob = storage.get_resource(&urls[1]).unwrap().unwrap();
        assert_eq!(bob.status, ResourceStatus::Unvisited);
        assert!(bob.job_id.is_none());
        assert_eq!(
            storage.get_domain("http://a.org").unwrap().unwrap().status,
            DomainStatus::Ready
        );
    }

    #[test]
    fn test_warning_counters() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.ensure_domain("http://a.org", t0()).unwrap();
        storage
            .increment_warning("http://a.org", WarningKind::DomainCrawlTimeout)
            .unwrap();
        storage
            .increment_warning("http://a.org", WarningKind::DomainCrawlTimeout)
            .unwrap();
        storage
            .increment_warning("http://unknown.org", WarningKind::Transport)
            .unwrap();

        let warnings = storage.get_warnings("http://a.org").unwrap();
        assert_eq!(warnings.get(&WarningKind::DomainCrawlTimeout), Some(&2));
        assert!(storage.get_warnings("http://unknown.org").unwrap().is_empty());
    }

    #[test]
    fn test_host_not_found_and_reset() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        ready_domain(&mut storage, "http://gone.org", 0);
        storage.try_lock_for_crawl("http://gone.org", "w1", 9, t0()).unwrap();

        assert!(storage
            .mark_host_not_found("http://gone.org", 9, "dns failure", t0())
            .unwrap());
        let domain = storage.get_domain("http://gone.org").unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Error);
        assert_eq!(domain.error.as_deref(), Some("dns failure"));

        assert!(storage.reset_domain("http://gone.org", t0()).unwrap());
        let domain = storage.get_domain("http://gone.org").unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Unvisited);
        assert!(domain.error.is_none());
    }

    #[test]
    fn test_reset_interrupted() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.ensure_domain("http://a.org", t0()).unwrap();
        storage.try_lock_for_robots("http://a.org", "w1", 12, t0()).unwrap();
        ready_domain(&mut storage, "http://b.org", 0);
        storage.try_lock_for_crawl("http://b.org", "w1", 13, t0()).unwrap();

        assert_eq!(storage.max_job_id().unwrap(), 13);
        let (domains, _) = storage.reset_interrupted(t0()).unwrap();
        assert_eq!(domains, 2);

        let counts = storage.count_domains_by_status().unwrap();
        assert_eq!(counts.get(&DomainStatus::Unvisited), Some(&1));
        assert_eq!(counts.get(&DomainStatus::Ready), Some(&1));
    }
}
