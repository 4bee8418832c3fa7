//! Reader/writer methods for `branch_progress`.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde_json::json;

use crate::error::Result;
use crate::model::{AgentId, BranchProgress, EntityType, FunctionName, ScratchSlug};

use super::Store;

fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<BranchProgress> {
    let function_name: String = row.get("function_name")?;
    let scratch_slug: Option<String> = row.get("scratch_slug")?;
    let agent_id: Option<String> = row.get("agent_id")?;
    Ok(BranchProgress {
        function_name: FunctionName::new(function_name)
            .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))?,
        branch: row.get("branch")?,
        match_percent: row.get("match_percent")?,
        scratch_slug: scratch_slug.map(ScratchSlug::new).transpose().map_err(|e| {
            rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
        })?,
        is_committed: row.get::<_, i64>("is_committed")? != 0,
        commit_hash: row.get("commit_hash")?,
        agent_id: agent_id.map(AgentId::new).transpose().map_err(|e| {
            rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
        })?,
        updated_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>("updated_at")?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

const PROGRESS_COLUMNS: &str =
    "function_name, branch, match_percent, scratch_slug, is_committed, commit_hash, agent_id, updated_at";

impl Store {
    pub fn upsert_branch_progress(&mut self, progress: &BranchProgress) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM branch_progress WHERE function_name = ?1 AND branch = ?2"
        );
        let before: Option<BranchProgress> = tx
            .query_row(
                &sql,
                params![progress.function_name.as_str(), progress.branch],
                row_to_progress,
            )
            .optional()?;

        tx.execute(
            "INSERT INTO branch_progress
                (function_name, branch, match_percent, scratch_slug, is_committed, commit_hash,
                 agent_id, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(function_name, branch) DO UPDATE SET
                match_percent=excluded.match_percent, scratch_slug=excluded.scratch_slug,
                is_committed=excluded.is_committed, commit_hash=excluded.commit_hash,
                agent_id=excluded.agent_id, updated_at=excluded.updated_at",
            params![
                progress.function_name.as_str(),
                progress.branch,
                progress.match_percent,
                progress.scratch_slug.as_ref().map(ScratchSlug::as_str),
                i64::from(progress.is_committed),
                progress.commit_hash,
                progress.agent_id.as_ref().map(AgentId::as_str),
                progress.updated_at.to_rfc3339(),
            ],
        )?;

        let action = if before.is_some() { "updated" } else { "created" };
        super::log_audit(
            &tx,
            EntityType::BranchProgress,
            &format!("{}@{}", progress.function_name, progress.branch),
            action,
            before.as_ref().map(|p| json!(p)).as_ref(),
            Some(&json!(progress)),
            progress.agent_id.as_ref().map(AgentId::as_str),
            None,
        )?;

        tx.commit()?;
        Ok(())
    }

    /// The branch progress row with the highest `match_percent` for `function`.
    pub fn get_best_branch_progress(&self, function: &FunctionName) -> Result<Option<BranchProgress>> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM branch_progress
             WHERE function_name = ?1 ORDER BY match_percent DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![function.as_str()], row_to_progress)
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(function: &str, branch: &str, pct: f64) -> BranchProgress {
        BranchProgress {
            function_name: FunctionName::new(function).unwrap(),
            branch: branch.to_owned(),
            match_percent: pct,
            scratch_slug: None,
            is_committed: false,
            commit_hash: None,
            agent_id: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn best_branch_progress_picks_highest_match() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert_branch_progress(&progress("Foo_1", "main", 42.0))
            .unwrap();
        store
            .upsert_branch_progress(&progress("Foo_1", "feature/x", 87.5))
            .unwrap();
        let best = store
            .get_best_branch_progress(&FunctionName::new("Foo_1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(best.branch, "feature/x");
    }

    #[test]
    fn upsert_is_keyed_by_function_and_branch() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert_branch_progress(&progress("Foo_1", "main", 42.0))
            .unwrap();
        store
            .upsert_branch_progress(&progress("Foo_1", "main", 91.0))
            .unwrap();
        let best = store
            .get_best_branch_progress(&FunctionName::new("Foo_1").unwrap())
            .unwrap()
            .unwrap();
        assert!((best.match_percent - 91.0).abs() < f64::EPSILON);
    }
}
