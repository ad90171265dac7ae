use super::{required_millis, to_millis, SqliteStorage};
use crate::paths::PathType;
use crate::process::{ExtensionCounter, Process, ProcessDefinition, ProcessStatus, StepDefinition};
use crate::storage::traits::{ProcessStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl SqliteStorage {
    fn load_process(&self, pid: i64) -> StorageResult<Option<Process>> {
        let row = self
            .conn
            .query_row(
                "SELECT pid, status, path_type, current_step, ext_total, ext_done, error,
                        created_at, updated_at
                 FROM processes WHERE pid = ?1",
                params![pid],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((pid, status, path_type, current_step, total, done, error, created, updated)) =
            row
        else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT definition FROM process_steps WHERE process_id = ?1 ORDER BY step_index",
        )?;
        let steps = stmt
            .query_map(params![pid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(|json| serde_json::from_str::<StepDefinition>(json))
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT url FROM process_seeds WHERE process_id = ?1 ORDER BY position")?;
        let seeds = stmt
            .query_map(params![pid], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Some(Process {
            pid,
            status: ProcessStatus::from_db_string(&status).ok_or_else(|| {
                StorageError::Corrupt(format!("process {} has status {:?}", pid, status))
            })?,
            path_type: PathType::from_db_string(&path_type).ok_or_else(|| {
                StorageError::Corrupt(format!("process {} has path type {:?}", pid, path_type))
            })?,
            seeds,
            steps,
            current_step: current_step.max(0) as usize,
            extension: ExtensionCounter {
                total: total.max(0) as u64,
                done: done.max(0) as u64,
            },
            error,
            created_at: required_millis(created),
            updated_at: required_millis(updated),
        }))
    }

    fn load_processes(&self, sql: &str) -> StorageResult<Vec<Process>> {
        let mut stmt = self.conn.prepare(sql)?;
        let pids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        let mut processes = Vec::with_capacity(pids.len());
        for pid in pids {
            if let Some(process) = self.load_process(pid)? {
                processes.push(process);
            }
        }
        Ok(processes)
    }
}

impl ProcessStore for SqliteStorage {
    fn create_process(
        &mut self,
        definition: &ProcessDefinition,
        now: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let now = to_millis(now);
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO processes (status, path_type, current_step, created_at, updated_at)
             VALUES ('queued', ?1, ?2, ?3, ?3)",
            params![
                definition.path_type.to_db_string(),
                definition.steps.len().saturating_sub(1) as i64,
                now
            ],
        )?;
        let pid = tx.last_insert_rowid();

        for (index, step) in definition.steps.iter().enumerate() {
            tx.execute(
                "INSERT INTO process_steps (process_id, step_index, definition, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![pid, index as i64, serde_json::to_string(step)?, now],
            )?;
        }
        for (position, seed) in definition.seeds.iter().enumerate() {
            tx.execute(
                "INSERT INTO process_seeds (process_id, position, url) VALUES (?1, ?2, ?3)",
                params![pid, position as i64, seed],
            )?;
        }

        tx.commit()?;
        Ok(pid)
    }

    fn get_process(&self, pid: i64) -> StorageResult<Option<Process>> {
        self.load_process(pid)
    }

    fn next_process(&self) -> StorageResult<Option<Process>> {
        let pid: Option<i64> = self
            .conn
            .query_row(
                "SELECT pid FROM processes
                 WHERE status IN ('extending', 'running', 'queued')
                 ORDER BY CASE status WHEN 'queued' THEN 1 ELSE 0 END, pid
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match pid {
            Some(pid) => self.load_process(pid),
            None => Ok(None),
        }
    }

    fn list_processes(&self) -> StorageResult<Vec<Process>> {
        self.load_processes("SELECT pid FROM processes ORDER BY pid")
    }

    fn set_process_status(
        &mut self,
        pid: i64,
        status: ProcessStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE processes SET status = ?2, error = ?3, updated_at = ?4 WHERE pid = ?1",
            params![pid, status.to_db_string(), error, to_millis(now)],
        )?;
        if changed == 0 {
            return Err(StorageError::ProcessNotFound(pid));
        }
        Ok(())
    }

    fn append_step(
        &mut self,
        pid: i64,
        step: &StepDefinition,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let now = to_millis(now);
        let tx = self.conn.transaction()?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM process_steps WHERE process_id = ?1",
            params![pid],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO process_steps (process_id, step_index, definition, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![pid, count, serde_json::to_string(step)?, now],
        )?;
        let changed = tx.execute(
            "UPDATE processes
             SET current_step = ?2, ext_total = 0, ext_done = 0, updated_at = ?3
             WHERE pid = ?1",
            params![pid, count, now],
        )?;
        if changed == 0 {
            return Err(StorageError::ProcessNotFound(pid));
        }

        tx.commit()?;
        Ok(count as usize)
    }

    fn set_extension_counter(
        &mut self,
        pid: i64,
        counter: ExtensionCounter,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE processes SET ext_total = ?2, ext_done = ?3, updated_at = ?4 WHERE pid = ?1",
            params![pid, counter.total as i64, counter.done as i64, to_millis(now)],
        )?;
        Ok(())
    }
}
