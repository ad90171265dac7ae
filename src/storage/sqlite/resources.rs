use super::{to_millis, SqliteStorage};
use crate::state::{ResourceOutcome, ResourceRecord, ResourceStatus};
use crate::storage::traits::{DomainStore, ResourceStore, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

impl ResourceStore for SqliteStorage {
    fn ensure_resource(
        &mut self,
        url: &str,
        origin: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.ensure_domain(origin, now)?;
        let now = to_millis(now);
        self.conn.execute(
            "INSERT OR IGNORE INTO resources (url, origin, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![url, origin, now],
        )?;
        Ok(())
    }

    fn get_resource(&self, url: &str) -> StorageResult<Option<ResourceRecord>> {
        let resource = self
            .conn
            .query_row(
                "SELECT url, origin, status, job_id, error_kind, error_message, triple_count
                 FROM resources WHERE url = ?1",
                params![url],
                |row| {
                    Ok(ResourceRecord {
                        url: row.get(0)?,
                        origin: row.get(1)?,
                        status: ResourceStatus::from_db_string(&row.get::<_, String>(2)?)
                            .unwrap_or(ResourceStatus::Unvisited),
                        job_id: row.get::<_, Option<i64>>(3)?.map(|id| id as u64),
                        error_kind: row.get(4)?,
                        error_message: row.get(5)?,
                        triple_count: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(resource)
    }

    fn head_resources(
        &self,
        process_id: i64,
        max_path_length: u32,
        origin: &str,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.url FROM resources r
             JOIN paths p ON p.head_resource = r.url
             WHERE p.process_id = ?1 AND p.status = 'active' AND p.frontier = 1
               AND p.nodes_count < ?2
               AND r.origin = ?3 AND r.status = 'unvisited'
             GROUP BY r.url
             ORDER BY MIN(r.created_at), r.url
             LIMIT ?4",
        )?;
        let urls = stmt
            .query_map(
                params![process_id, max_path_length, origin, limit as i64],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn unvisited_resources(&self, origin: &str, limit: usize) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT url FROM resources
             WHERE origin = ?1 AND status = 'unvisited'
             ORDER BY created_at, url
             LIMIT ?2",
        )?;
        let urls = stmt
            .query_map(params![origin, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn mark_resources_crawling(
        &mut self,
        urls: &[String],
        job_id: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<String>> {
        let now = to_millis(now);
        let tx = self.conn.transaction()?;
        let mut leased = Vec::with_capacity(urls.len());

        {
            let mut stmt = tx.prepare(
                "UPDATE resources SET status = 'crawling', job_id = ?2, updated_at = ?3
                 WHERE url = ?1 AND status = 'unvisited'",
            )?;
            for url in urls {
                if stmt.execute(params![url, job_id as i64, now])? == 1 {
                    leased.push(url.clone());
                }
            }
        }

        tx.commit()?;
        Ok(leased)
    }

    fn complete_resource(
        &mut self,
        url: &str,
        job_id: u64,
        outcome: &ResourceOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE resources
             SET status = ?3, error_kind = ?4, error_message = ?5, triple_count = ?6,
                 job_id = NULL, updated_at = ?7
             WHERE url = ?1 AND status = 'crawling' AND job_id = ?2",
            params![
                url,
                job_id as i64,
                outcome.status.to_db_string(),
                outcome.error_kind,
                outcome.error_message,
                outcome.triple_count,
                to_millis(now),
            ],
        )?;
        Ok(changed == 1)
    }

    fn fail_unvisited_resource(
        &mut self,
        url: &str,
        outcome: &ResourceOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE resources
             SET status = ?2, error_kind = ?3, error_message = ?4, updated_at = ?5
             WHERE url = ?1 AND status = 'unvisited'",
            params![
                url,
                outcome.status.to_db_string(),
                outcome.error_kind,
                outcome.error_message,
                to_millis(now),
            ],
        )?;
        Ok(changed == 1)
    }

    fn count_resources_by_status(
        &self,
        process_id: Option<i64>,
    ) -> StorageResult<HashMap<ResourceStatus, u64>> {
        let (sql, pid) = match process_id {
            Some(pid) => (
                "SELECT r.status, COUNT(DISTINCT r.url) FROM resources r
                 JOIN paths p ON p.head_resource = r.url
                 WHERE p.process_id = ?1
                 GROUP BY r.status",
                pid,
            ),
            None => (
                "SELECT status, COUNT(*) FROM resources WHERE ?1 = ?1 GROUP BY status",
                0,
            ),
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![pid], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = ResourceStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "http://example.org";

    fn storage_with(urls: &[&str]) -> SqliteStorage {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        for url in urls {
            storage.ensure_resource(url, ORIGIN, Utc::now()).unwrap();
        }
        storage
    }

    #[test]
    fn test_ensure_resource_creates_domain() {
        let storage = storage_with(&["http://example.org/a"]);

        let resource = storage.get_resource("http://example.org/a").unwrap().unwrap();
        assert_eq!(resource.status, ResourceStatus::Unvisited);
        assert_eq!(resource.origin, ORIGIN);
        assert!(storage.get_domain(ORIGIN).unwrap().is_some());
    }

    #[test]
    fn test_mark_crawling_skips_leased() {
        let mut storage = storage_with(&["http://example.org/a", "http://example.org/b"]);
        let urls = vec!["http://example.org/a".to_string()];
        storage.mark_resources_crawling(&urls, 1, Utc::now()).unwrap();

        let both = vec![
            "http://example.org/a".to_string(),
            "http://example.org/b".to_string(),
        ];
        let leased = storage.mark_resources_crawling(&both, 2, Utc::now()).unwrap();
        assert_eq!(leased, vec!["http://example.org/b".to_string()]);
    }

    #[test]
    fn test_complete_requires_lease_holder() {
        let mut storage = storage_with(&["http://example.org/a"]);
        let urls = vec!["http://example.org/a".to_string()];
        storage.mark_resources_crawling(&urls, 5, Utc::now()).unwrap();

        let outcome = ResourceOutcome::done(12);
        assert!(!storage
            .complete_resource("http://example.org/a", 4, &outcome, Utc::now())
            .unwrap());
        assert!(storage
            .complete_resource("http://example.org/a", 5, &outcome, Utc::now())
            .unwrap());
        // A duplicate report changes nothing
        assert!(!storage
            .complete_resource("http://example.org/a", 5, &outcome, Utc::now())
            .unwrap());

        let resource = storage.get_resource("http://example.org/a").unwrap().unwrap();
        assert_eq!(resource.status, ResourceStatus::Done);
        assert_eq!(resource.triple_count, 12);
        assert_eq!(resource.job_id, None);
    }

    #[test]
    fn test_fail_unvisited_resource() {
        let mut storage = storage_with(&["http://example.org/private"]);
        let outcome = ResourceOutcome::error("robots_disallowed", "blocked by robots.txt");

        assert!(storage
            .fail_unvisited_resource("http://example.org/private", &outcome, Utc::now())
            .unwrap());
        let resource = storage
            .get_resource("http://example.org/private")
            .unwrap()
            .unwrap();
        assert_eq!(resource.status, ResourceStatus::Error);
        assert_eq!(resource.error_kind.as_deref(), Some("robots_disallowed"));
    }

    #[test]
    fn test_unvisited_resources_and_counts() {
        let storage = storage_with(&["http://example.org/a", "http://example.org/b"]);

        let unvisited = storage.unvisited_resources(ORIGIN, 1).unwrap();
        assert_eq!(unvisited.len(), 1);

        let counts = storage.count_resources_by_status(None).unwrap();
        assert_eq!(counts.get(&ResourceStatus::Unvisited), Some(&2));
    }
}
