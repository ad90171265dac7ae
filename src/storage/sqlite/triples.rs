use super::{ensure_target, term_columns, term_from_columns, to_millis, SqliteStorage};
use crate::graph::{dedup_batch, StoredTriple, Triple, TripleFilter};
use crate::paths::DirectionMetric;
use crate::storage::traits::{StorageResult, TripleStore};
use crate::storage::UpsertReport;
use crate::url::crawl_target;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::{BTreeMap, BTreeSet};

fn stored_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredTriple> {
    let kind: String = row.get(3)?;
    Ok(StoredTriple {
        id: row.get(0)?,
        triple: Triple {
            subject: row.get(1)?,
            predicate: row.get(2)?,
            object: term_from_columns(&kind, row.get(4)?, row.get(5)?, row.get(6)?),
        },
    })
}

impl TripleStore for SqliteStorage {
    fn upsert_triples(
        &mut self,
        source_url: &str,
        triples: &[Triple],
        now: DateTime<Utc>,
    ) -> StorageResult<UpsertReport> {
        let now = to_millis(now);
        let batch = dedup_batch(triples);
        let tx = self.conn.transaction()?;
        let mut report = UpsertReport::default();

        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO triples
                     (subject, predicate, object_kind, object_value, datatype, language, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut lookup = tx.prepare(
                "SELECT id FROM triples
                 WHERE subject = ?1 AND predicate = ?2 AND object_kind = ?3
                   AND object_value = ?4 AND datatype = ?5 AND language = ?6",
            )?;
            let mut source = tx.prepare(
                "INSERT OR IGNORE INTO triple_sources (triple_id, source_url) VALUES (?1, ?2)",
            )?;

            for triple in batch {
                let (kind, value, datatype, language) = term_columns(&triple.object);
                let inserted = insert.execute(params![
                    triple.subject,
                    triple.predicate,
                    kind,
                    value,
                    datatype,
                    language,
                    now
                ])?;
                let id: i64 = lookup.query_row(
                    params![triple.subject, triple.predicate, kind, value, datatype, language],
                    |row| row.get(0),
                )?;
                source.execute(params![id, source_url])?;

                for node in triple.nodes() {
                    if let Some(target) = crawl_target(node) {
                        ensure_target(&tx, &target, now)?;
                    }
                }

                report.inserted += inserted;
                report.stored.push(StoredTriple { id, triple });
            }
        }

        tx.commit()?;
        Ok(report)
    }

    fn triples_touching(&self, filter: &TripleFilter) -> StorageResult<Vec<StoredTriple>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject, predicate, object_kind, object_value, datatype, language
             FROM triples
             WHERE subject = ?1 OR (object_kind = 'named' AND object_value = ?1)
             ORDER BY id",
        )?;
        let triples = stmt
            .query_map(params![filter.node], stored_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(triples)
    }

    fn triple_sources(&self, triple_id: i64) -> StorageResult<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source_url FROM triple_sources WHERE triple_id = ?1")?;
        let sources = stmt
            .query_map(params![triple_id], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;
        Ok(sources)
    }

    fn count_triples(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM triples", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn predicate_metrics(&self) -> StorageResult<BTreeMap<String, DirectionMetric>> {
        let mut stmt = self.conn.prepare(
            "SELECT predicate,
                    COUNT(DISTINCT subject),
                    COUNT(DISTINCT object_kind || char(31) || object_value || char(31)
                                   || datatype || char(31) || language)
             FROM triples
             GROUP BY predicate",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                DirectionMetric {
                    distinct_subjects: row.get::<_, i64>(1)? as u64,
                    distinct_objects: row.get::<_, i64>(2)? as u64,
                },
            ))
        })?;
        let metrics = rows.collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Literal, Term};
    use crate::storage::traits::ResourceStore;

    fn knows(subject: &str, object: &str) -> Triple {
        Triple::new(subject, "http://xmlns.com/foaf/0.1/knows", Term::named(object))
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let batch = vec![
            knows("http://a.org/alice", "http://b.org/bob"),
            knows("http://a.org/alice", "http://b.org/bob"),
        ];

        let first = storage
            .upsert_triples("http://a.org/alice", &batch, Utc::now())
            .unwrap();
        assert_eq!(first.inserted, 1);
        assert_eq!(first.stored.len(), 1);

        let second = storage
            .upsert_triples("http://b.org/bob", &batch, Utc::now())
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.stored[0].id, first.stored[0].id);
        assert_eq!(storage.count_triples().unwrap(), 1);

        let sources = storage.triple_sources(first.stored[0].id).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.contains("http://b.org/bob"));
    }

    #[test]
    fn test_literals_differ_by_language() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let label = |language: &str| {
            Triple::new(
                "http://a.org/berlin",
                "http://www.w3.org/2000/01/rdf-schema#label",
                Term::Literal(Literal {
                    value: "Berlin".to_string(),
                    datatype: None,
                    language: Some(language.to_string()),
                }),
            )
        };

        let report = storage
            .upsert_triples("http://a.org/berlin", &[label("en"), label("de")], Utc::now())
            .unwrap();
        assert_eq!(report.inserted, 2);
    }

    #[test]
    fn test_upsert_registers_resources() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .upsert_triples(
                "http://a.org/alice",
                &[knows("http://a.org/alice", "http://b.org/people#bob")],
                Utc::now(),
            )
            .unwrap();

        assert!(storage.get_resource("http://b.org/people").unwrap().is_some());
        assert!(storage.get_resource("http://a.org/alice").unwrap().is_some());
    }

    #[test]
    fn test_triples_touching() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let batch = vec![
            knows("http://a.org/alice", "http://b.org/bob"),
            knows("http://b.org/bob", "http://c.org/carol"),
            knows("http://c.org/carol", "http://a.org/alice"),
        ];
        storage.upsert_triples("http://a.org/", &batch, Utc::now()).unwrap();

        let touching = storage
            .triples_touching(&TripleFilter {
                node: "http://b.org/bob".to_string(),
            })
            .unwrap();
        assert_eq!(touching.len(), 2);
        assert!(touching.iter().all(|t| t.triple.touches("http://b.org/bob")));
    }

    #[test]
    fn test_predicate_metrics() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let batch = vec![
            knows("http://a.org/alice", "http://b.org/bob"),
            knows("http://a.org/carol", "http://b.org/bob"),
        ];
        storage.upsert_triples("http://a.org/", &batch, Utc::now()).unwrap();

        let metrics = storage.predicate_metrics().unwrap();
        let knows = metrics.get("http://xmlns.com/foaf/0.1/knows").unwrap();
        assert_eq!(knows.distinct_subjects, 2);
        assert_eq!(knows.distinct_objects, 1);
    }
}
