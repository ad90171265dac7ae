use super::{
    ensure_target, required_millis, term_columns, term_from_columns, to_millis, SqliteStorage,
};
use crate::paths::{EndpointPath, Path, PathContract, PathMeta, PathStatus, PathType, TraversalPath};
use crate::state::ResourceStatus;
use crate::storage::traits::{PathStore, StorageError, StorageResult};
use crate::storage::InsertOutcome;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, ToSql};
use std::collections::{BTreeMap, HashMap};

const PATH_SELECT: &str = "SELECT p.id, p.process_id, p.path_type, p.seed, p.head_kind,
        p.head_value, p.head_datatype, p.head_language, p.nodes, p.predicates, p.seed_paths,
        p.frontier, p.status, p.extended_step, p.created_at, p.updated_at, r.status
    FROM paths p LEFT JOIN resources r ON r.url = p.head_resource";

/// Raw columns of a path row before JSON decoding
struct PathRow {
    id: i64,
    process_id: i64,
    path_type: String,
    seed: String,
    head_kind: String,
    head_value: String,
    head_datatype: String,
    head_language: String,
    nodes: String,
    predicates: String,
    seed_paths: String,
    frontier: bool,
    status: String,
    extended_step: i64,
    created_at: i64,
    updated_at: i64,
    head_status: Option<String>,
}

impl PathRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            process_id: row.get(1)?,
            path_type: row.get(2)?,
            seed: row.get(3)?,
            head_kind: row.get(4)?,
            head_value: row.get(5)?,
            head_datatype: row.get(6)?,
            head_language: row.get(7)?,
            nodes: row.get(8)?,
            predicates: row.get(9)?,
            seed_paths: row.get(10)?,
            frontier: row.get(11)?,
            status: row.get(12)?,
            extended_step: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            head_status: row.get(16)?,
        })
    }

    fn into_path(self) -> StorageResult<Path> {
        let path_type = PathType::from_db_string(&self.path_type).ok_or_else(|| {
            StorageError::Corrupt(format!("path {} has type {:?}", self.id, self.path_type))
        })?;
        let meta = PathMeta {
            id: Some(self.id),
            process_id: self.process_id,
            status: PathStatus::from_db_string(&self.status).unwrap_or(PathStatus::Active),
            extended_step: self.extended_step.max(0) as usize,
            head_status: self
                .head_status
                .as_deref()
                .and_then(ResourceStatus::from_db_string),
            created_at: required_millis(self.created_at),
            updated_at: required_millis(self.updated_at),
        };
        let head = term_from_columns(
            &self.head_kind,
            self.head_value,
            self.head_datatype,
            self.head_language,
        );

        let path = match path_type {
            PathType::Traversal => Path::Traversal(TraversalPath {
                meta,
                seed: self.seed,
                head,
                nodes: serde_json::from_str(&self.nodes)?,
                predicates: serde_json::from_str(&self.predicates)?,
            }),
            PathType::Endpoint => Path::Endpoint(EndpointPath {
                meta,
                seed: self.seed,
                head,
                seed_paths: serde_json::from_str(&self.seed_paths)?,
                frontier: self.frontier,
            }),
        };
        Ok(path)
    }
}

impl SqliteStorage {
    fn query_paths(&self, sql_where: &str, params: &[&dyn ToSql]) -> StorageResult<Vec<Path>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE {} ORDER BY p.id", PATH_SELECT, sql_where))?;
        let rows = stmt
            .query_map(params, PathRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(PathRow::into_path).collect()
    }

    fn count(&self, sql: &str, params: &[&dyn ToSql]) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, params, |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl PathStore for SqliteStorage {
    fn insert_path(&mut self, path: &Path) -> StorageResult<InsertOutcome> {
        let meta = path.meta();
        let key = path.identity_key();
        let (head_kind, head_value, head_datatype, head_language) = term_columns(path.head());
        let target = path.head_target();

        let (nodes, predicates, seed_paths, frontier) = match path {
            Path::Traversal(p) => (
                serde_json::to_string(&p.nodes)?,
                serde_json::to_string(&p.predicates)?,
                "{}".to_string(),
                true,
            ),
            Path::Endpoint(p) => (
                "[]".to_string(),
                "[]".to_string(),
                serde_json::to_string(&p.seed_paths)?,
                p.frontier,
            ),
        };
        let predicates_count = match path {
            Path::Traversal(p) => p.predicates.len() as i64,
            Path::Endpoint(_) => 0,
        };

        let tx = self.conn.transaction()?;
        if let Some(target) = &target {
            ensure_target(&tx, target, to_millis(meta.created_at))?;
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO paths
                 (process_id, path_type, path_key, seed, head_kind, head_value, head_datatype,
                  head_language, head_resource, nodes, nodes_count, predicates, predicates_count,
                  seed_paths, frontier, status, extended_step, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19)",
            params![
                meta.process_id,
                path.path_type().to_db_string(),
                key,
                path.seed(),
                head_kind,
                head_value,
                head_datatype,
                head_language,
                target.as_ref().map(|t| t.resource.as_str()),
                nodes,
                path.length() as i64,
                predicates,
                predicates_count,
                seed_paths,
                frontier,
                meta.status.to_db_string(),
                meta.extended_step as i64,
                to_millis(meta.created_at),
                to_millis(meta.updated_at),
            ],
        )?;

        let outcome = if inserted == 1 {
            InsertOutcome::Created(tx.last_insert_rowid())
        } else {
            let id: i64 = tx.query_row(
                "SELECT id FROM paths WHERE process_id = ?1 AND path_type = ?2 AND path_key = ?3",
                params![meta.process_id, path.path_type().to_db_string(), key],
                |row| row.get(0),
            )?;
            InsertOutcome::Existing(id)
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_path(&self, id: i64) -> StorageResult<Option<Path>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE p.id = ?1", PATH_SELECT),
                params![id],
                PathRow::from_row,
            )
            .optional()?;
        row.map(PathRow::into_path).transpose()
    }

    fn find_path_by_key(
        &self,
        process_id: i64,
        path_type: PathType,
        key: &str,
    ) -> StorageResult<Option<Path>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE p.process_id = ?1 AND p.path_type = ?2 AND p.path_key = ?3",
                    PATH_SELECT
                ),
                params![process_id, path_type.to_db_string(), key],
                PathRow::from_row,
            )
            .optional()?;
        row.map(PathRow::into_path).transpose()
    }

    fn update_endpoint(
        &mut self,
        id: i64,
        seed_paths: &BTreeMap<String, u32>,
        frontier: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let min_hops = seed_paths.values().copied().min().unwrap_or(0);
        let changed = self.conn.execute(
            "UPDATE paths SET seed_paths = ?2, nodes_count = ?3, frontier = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                serde_json::to_string(seed_paths)?,
                min_hops as i64 + 1,
                frontier,
                to_millis(now)
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::PathNotFound(id));
        }
        Ok(())
    }

    fn mark_path_deleted(&mut self, id: i64, now: DateTime<Utc>) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE paths SET status = 'deleted', updated_at = ?2
             WHERE id = ?1 AND status = 'active'",
            params![id, to_millis(now)],
        )?;
        Ok(changed == 1)
    }

    fn set_frontier(&mut self, id: i64, frontier: bool, now: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE paths SET frontier = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, frontier, to_millis(now)],
        )?;
        Ok(())
    }

    fn set_extended_step(
        &mut self,
        id: i64,
        step: usize,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE paths SET extended_step = MAX(extended_step, ?2), updated_at = ?3
             WHERE id = ?1",
            params![id, step as i64, to_millis(now)],
        )?;
        Ok(())
    }

    fn open_paths_at(&self, process_id: i64, node: &str) -> StorageResult<Vec<Path>> {
        self.query_paths(
            "p.process_id = ?1 AND p.head_kind = 'named' AND p.head_value = ?2
             AND p.status = 'active' AND p.frontier = 1",
            params![process_id, node],
        )
    }

    fn open_paths_in_resource(
        &self,
        process_id: i64,
        resource: &str,
    ) -> StorageResult<Vec<Path>> {
        self.query_paths(
            "p.process_id = ?1 AND p.head_resource = ?2
             AND p.status = 'active' AND p.frontier = 1",
            params![process_id, resource],
        )
    }

    fn paths_pending_extension(
        &self,
        process_id: i64,
        step_index: usize,
        limit: usize,
    ) -> StorageResult<Vec<Path>> {
        let step_index = step_index as i64;
        let limit = limit as i64;
        self.query_paths(
            "p.process_id = ?1 AND p.status = 'active' AND p.frontier = 1
             AND p.extended_step < ?2
             AND p.id IN (SELECT id FROM paths
                          WHERE process_id = ?1 AND status = 'active' AND frontier = 1
                            AND extended_step < ?2
                          ORDER BY id LIMIT ?3)",
            params![process_id, step_index, limit],
        )
    }

    fn count_paths_pending_extension(
        &self,
        process_id: i64,
        step_index: usize,
    ) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM paths
             WHERE process_id = ?1 AND status = 'active' AND frontier = 1
               AND extended_step < ?2",
            params![process_id, step_index as i64],
        )
    }

    fn record_process_triple(&mut self, process_id: i64, triple_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO process_triples (process_id, triple_id) VALUES (?1, ?2)",
            params![process_id, triple_id],
        )?;
        Ok(())
    }

    fn count_process_triples(&self, process_id: i64) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM process_triples WHERE process_id = ?1",
            params![process_id],
        )
    }

    fn count_paths_by_status(&self, process_id: i64) -> StorageResult<HashMap<PathStatus, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM paths WHERE process_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![process_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = PathStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    fn count_crawlable_heads(&self, process_id: i64, max_path_length: u32) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM paths p
             JOIN resources r ON r.url = p.head_resource
             JOIN domains d ON d.origin = r.origin
             WHERE p.process_id = ?1 AND p.status = 'active' AND p.frontier = 1
               AND p.nodes_count < ?2
               AND r.status IN ('unvisited', 'crawling') AND d.status != 'error'",
            params![process_id, max_path_length],
        )
    }

    fn count_checking_domains(&self, process_id: i64) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(DISTINCT d.origin) FROM paths p
             JOIN resources r ON r.url = p.head_resource
             JOIN domains d ON d.origin = r.origin
             WHERE p.process_id = ?1 AND p.status = 'active' AND p.frontier = 1
               AND d.status = 'checking'",
            params![process_id],
        )
    }

    fn count_crawling_resources(&self, process_id: i64) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(DISTINCT r.url) FROM paths p
             JOIN resources r ON r.url = p.head_resource
             WHERE p.process_id = ?1 AND p.status = 'active' AND p.frontier = 1
               AND r.status = 'crawling'",
            params![process_id],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Literal, Term};
    use crate::paths::SpawnContext;
    use crate::process::ProcessDefinition;
    use crate::state::ResourceOutcome;
    use crate::storage::traits::{DomainStore, ProcessStore, ResourceStore};

    fn ctx() -> SpawnContext {
        SpawnContext {
            step_index: 0,
            max_path_length: 4,
            now: Utc::now(),
        }
    }

    fn storage_with_process(path_type: PathType) -> (SqliteStorage, i64) {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut definition: ProcessDefinition = toml::from_str(
            r#"
            seeds = ["http://a.org/alice"]

            [[steps]]
            max-path-length = 4
            max-path-props = 2
            "#,
        )
        .unwrap();
        definition.path_type = path_type;
        let pid = storage.create_process(&definition, Utc::now()).unwrap();
        (storage, pid)
    }

    #[test]
    fn test_insert_traversal_is_unique() {
        let (mut storage, pid) = storage_with_process(PathType::Traversal);
        let seed = Path::new_seed(PathType::Traversal, pid, "http://a.org/alice", &ctx());

        let first = storage.insert_path(&seed).unwrap();
        assert!(first.is_created());
        let second = storage.insert_path(&seed).unwrap();
        assert_eq!(second, InsertOutcome::Existing(first.id()));

        let loaded = storage.get_path(first.id()).unwrap().unwrap();
        assert_eq!(loaded.head(), &Term::named("http://a.org/alice"));
        assert_eq!(loaded.meta().head_status, Some(ResourceStatus::Unvisited));
        assert_eq!(loaded.identity_key(), seed.identity_key());
    }

    #[test]
    fn test_endpoint_roundtrip_and_update() {
        let (mut storage, pid) = storage_with_process(PathType::Endpoint);
        let seed = Path::new_seed(PathType::Endpoint, pid, "http://a.org/alice", &ctx());
        let child = seed.spawn(Term::named("http://b.org/bob"), "http://p", &ctx());
        let id = storage.insert_path(&child).unwrap().id();

        let found = storage
            .find_path_by_key(pid, PathType::Endpoint, "http://b.org/bob")
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), Some(id));

        let hops = BTreeMap::from([("http://a.org/alice".to_string(), 1)]);
        storage.update_endpoint(id, &hops, false, Utc::now()).unwrap();
        match storage.get_path(id).unwrap().unwrap() {
            Path::Endpoint(path) => {
                assert_eq!(path.seed_paths, hops);
                assert!(!path.frontier);
            }
            other => panic!("unexpected path {:?}", other),
        }
    }

    #[test]
    fn test_literal_head_has_no_resource() {
        let (mut storage, pid) = storage_with_process(PathType::Traversal);
        let seed = Path::new_seed(PathType::Traversal, pid, "http://a.org/alice", &ctx());
        let child = seed.spawn(Term::Literal(Literal::plain("Alice")), "http://name", &ctx());
        let id = storage.insert_path(&child).unwrap().id();

        let loaded = storage.get_path(id).unwrap().unwrap();
        assert!(loaded.is_terminal());
        assert_eq!(loaded.meta().head_status, None);
    }

    #[test]
    fn test_open_paths_and_deletion() {
        let (mut storage, pid) = storage_with_process(PathType::Traversal);
        let seed = Path::new_seed(PathType::Traversal, pid, "http://a.org/alice#me", &ctx());
        let id = storage.insert_path(&seed).unwrap().id();

        assert_eq!(storage.open_paths_at(pid, "http://a.org/alice#me").unwrap().len(), 1);
        assert_eq!(
            storage
                .open_paths_in_resource(pid, "http://a.org/alice")
                .unwrap()
                .len(),
            1
        );

        assert!(storage.mark_path_deleted(id, Utc::now()).unwrap());
        assert!(!storage.mark_path_deleted(id, Utc::now()).unwrap());
        assert!(storage.open_paths_at(pid, "http://a.org/alice#me").unwrap().is_empty());
        assert_eq!(
            storage.count_paths_by_status(pid).unwrap().get(&PathStatus::Deleted),
            Some(&1)
        );
    }

    #[test]
    fn test_pending_extension() {
        let (mut storage, pid) = storage_with_process(PathType::Traversal);
        let seed = Path::new_seed(PathType::Traversal, pid, "http://a.org/alice", &ctx());
        let id = storage.insert_path(&seed).unwrap().id();

        assert_eq!(storage.count_paths_pending_extension(pid, 1).unwrap(), 1);
        assert_eq!(storage.paths_pending_extension(pid, 1, 10).unwrap().len(), 1);

        storage.set_extended_step(id, 1, Utc::now()).unwrap();
        assert_eq!(storage.count_paths_pending_extension(pid, 1).unwrap(), 0);
    }

    #[test]
    fn test_completion_counters() {
        let (mut storage, pid) = storage_with_process(PathType::Traversal);
        let seed = Path::new_seed(PathType::Traversal, pid, "http://a.org/alice", &ctx());
        storage.insert_path(&seed).unwrap();
        assert_eq!(storage.count_crawlable_heads(pid, 4).unwrap(), 1);

        let urls = vec!["http://a.org/alice".to_string()];
        storage.mark_resources_crawling(&urls, 1, Utc::now()).unwrap();
        assert_eq!(storage.count_crawling_resources(pid).unwrap(), 1);

        storage
            .complete_resource("http://a.org/alice", 1, &ResourceOutcome::done(0), Utc::now())
            .unwrap();
        assert_eq!(storage.count_crawlable_heads(pid, 4).unwrap(), 0);
        assert_eq!(storage.count_crawling_resources(pid).unwrap(), 0);
        assert_eq!(storage.count_checking_domains(pid).unwrap(), 0);
    }

    #[test]
    fn test_full_length_heads_are_not_crawlable() {
        let (mut storage, pid) = storage_with_process(PathType::Traversal);
        let seed = Path::new_seed(PathType::Traversal, pid, "http://a.org/alice", &ctx());
        let child = seed.spawn(Term::named("http://b.org/bob"), "http://knows", &ctx());
        storage.insert_path(&seed).unwrap();
        storage.insert_path(&child).unwrap();

        assert_eq!(storage.count_crawlable_heads(pid, 3).unwrap(), 2);
        // bob already sits at the second of two allowed nodes
        assert_eq!(storage.count_crawlable_heads(pid, 2).unwrap(), 1);
        assert_eq!(
            storage.robots_candidates(pid, 2, 10).unwrap(),
            vec!["http://a.org".to_string()]
        );
        assert!(storage
            .head_resources(pid, 2, "http://b.org", 10)
            .unwrap()
            .is_empty());
        assert_eq!(
            storage.head_resources(pid, 3, "http://b.org", 10).unwrap(),
            vec!["http://b.org/bob".to_string()]
        );
    }
}
