//! Reader/writer methods for the `functions` table.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use serde_json::json;

use crate::error::Result;
use crate::lifecycle;
use crate::model::{
    AgentId, BuildStatus, EntityType, Function, FunctionName, FunctionStatus, PrState,
    ScratchSlug,
};

use super::Store;

fn row_to_function(row: &Row<'_>) -> rusqlite::Result<Function> {
    let name: String = row.get("name")?;
    let status: String = row.get("status")?;
    let build_status: String = row.get("build_status")?;
    let pr_state: Option<String> = row.get("pr_state")?;
    let claimed_by_agent: Option<String> = row.get("claimed_by_agent")?;
    let local_scratch_slug: Option<String> = row.get("local_scratch_slug")?;
    let production_scratch_slug: Option<String> = row.get("production_scratch_slug")?;

    Ok(Function {
        name: FunctionName::new(name).map_err(to_sqlite_err)?,
        source_file: row.get("source_file")?,
        worktree_path: row.get("worktree_path")?,
        match_percent: row.get("match_percent")?,
        status: FunctionStatus::from_db_str(&status).unwrap_or(FunctionStatus::Unclaimed),
        local_scratch_slug: local_scratch_slug
            .map(ScratchSlug::new)
            .transpose()
            .map_err(to_sqlite_err)?,
        production_scratch_slug: production_scratch_slug
            .map(ScratchSlug::new)
            .transpose()
            .map_err(to_sqlite_err)?,
        claimed_by_agent: claimed_by_agent
            .map(AgentId::new)
            .transpose()
            .map_err(to_sqlite_err)?,
        claimed_at: parse_opt_ts(row, "claimed_at")?,
        branch: row.get("branch")?,
        commit_hash: row.get("commit_hash")?,
        build_status: BuildStatus::from_db_str(&build_status).unwrap_or_default(),
        build_diagnosis: row.get("build_diagnosis")?,
        is_committed: row.get::<_, i64>("is_committed")? != 0,
        pr_url: row.get("pr_url")?,
        pr_number: row.get("pr_number")?,
        pr_state: pr_state.and_then(|s| PrState::from_db_str(&s)),
        created_at: parse_ts(row, "created_at")?,
        updated_at: parse_ts(row, "updated_at")?,
    })
}

fn parse_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<chrono::DateTime<Utc>> {
    let s: String = row.get(col)?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<chrono::DateTime<Utc>>> {
    let s: Option<String> = row.get(col)?;
    s.map(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
    })
    .transpose()
}

fn to_sqlite_err(e: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
}

const FUNCTION_COLUMNS: &str = "name, source_file, worktree_path, match_percent, status,
     local_scratch_slug, production_scratch_slug, claimed_by_agent, claimed_at, branch,
     commit_hash, build_status, build_diagnosis, is_committed, pr_url, pr_number, pr_state,
     created_at, updated_at";

impl Store {
    /// Fetch a function row by name, or `None` if it has never been referenced.
    pub fn get_function(&self, name: &FunctionName) -> Result<Option<Function>> {
        let sql = format!("SELECT {FUNCTION_COLUMNS} FROM functions WHERE name = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![name.as_str()], row_to_function)
            .optional()?)
    }

    /// Create-or-merge a function row (`upsert_function`). Any field left
    /// `None` in `patch` keeps its prior value (or the default for a new row).
    /// Logs a diff against the prior snapshot and recomputes canonical status
    /// via the Lifecycle Engine before writing (status-derivation authority,
    /// Open Question).
    pub fn upsert_function(
        &mut self,
        name: &FunctionName,
        patch: FunctionPatch,
        agent: Option<&AgentId>,
    ) -> Result<Function> {
        let now = Utc::now();
        let tx = self.conn_mut().transaction()?;

        let existing = {
            let sql = format!("SELECT {FUNCTION_COLUMNS} FROM functions WHERE name = ?1");
            tx.query_row(&sql, params![name.as_str()], row_to_function)
                .optional()?
        };

        let before = existing.clone();
        let mut row = existing.unwrap_or_else(|| Function::new(name.clone(), now));
        patch.apply(&mut row);
        row.updated_at = now;
        row.status = lifecycle::derive_status(&row, has_active_claim(&tx, name)?);

        tx.execute(
            "INSERT INTO functions
                (name, source_file, worktree_path, match_percent, status, local_scratch_slug,
                 production_scratch_slug, claimed_by_agent, claimed_at, branch, commit_hash,
                 build_status, build_diagnosis, is_committed, pr_url, pr_number, pr_state,
                 created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
             ON CONFLICT(name) DO UPDATE SET
                source_file=excluded.source_file, worktree_path=excluded.worktree_path,
                match_percent=excluded.match_percent, status=excluded.status,
                local_scratch_slug=excluded.local_scratch_slug,
                production_scratch_slug=excluded.production_scratch_slug,
                claimed_by_agent=excluded.claimed_by_agent, claimed_at=excluded.claimed_at,
                branch=excluded.branch, commit_hash=excluded.commit_hash,
                build_status=excluded.build_status, build_diagnosis=excluded.build_diagnosis,
                is_committed=excluded.is_committed, pr_url=excluded.pr_url,
                pr_number=excluded.pr_number, pr_state=excluded.pr_state,
                updated_at=excluded.updated_at",
            params![
                row.name.as_str(),
                row.source_file,
                row.worktree_path,
                row.match_percent,
                row.status.as_db_str(),
                row.local_scratch_slug.as_ref().map(ScratchSlug::as_str),
                row.production_scratch_slug.as_ref().map(ScratchSlug::as_str),
                row.claimed_by_agent.as_ref().map(AgentId::as_str),
                row.claimed_at.map(|t| t.to_rfc3339()),
                row.branch,
                row.commit_hash,
                row.build_status.as_db_str(),
                row.build_diagnosis,
                i64::from(row.is_committed),
                row.pr_url,
                row.pr_number,
                row.pr_state.map(PrState::as_db_str),
                row.created_at.to_rfc3339(),
                row.updated_at.to_rfc3339(),
            ],
        )?;

        let action = if before.is_some() {
            "updated"
        } else {
            "created"
        };
        super::log_audit(
            &tx,
            EntityType::Function,
            name.as_str(),
            action,
            before.as_ref().map(|f| json!(f)).as_ref(),
            Some(&json!(&row)),
            agent.map(AgentId::as_str),
            None,
        )?;

        tx.commit()?;
        Ok(row)
    }

    /// All functions whose canonical status equals `status`.
    pub fn get_functions_by_status(&self, status: FunctionStatus) -> Result<Vec<Function>> {
        let sql = format!("SELECT {FUNCTION_COLUMNS} FROM functions WHERE status = ?1 ORDER BY updated_at DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_db_str()], row_to_function)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All functions with `match_percent >= 95` and not yet committed ("Derived queries").
    pub fn get_uncommitted_matches(&self) -> Result<Vec<Function>> {
        let sql = format!(
            "SELECT {FUNCTION_COLUMNS} FROM functions
             WHERE match_percent >= 95.0 AND is_committed = 0
             ORDER BY updated_at DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_function)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All functions with a broken build that are still committed ("Derived queries" `needs_fix`).
    pub fn get_needs_fix(&self) -> Result<Vec<Function>> {
        let sql = format!(
            "SELECT {FUNCTION_COLUMNS} FROM functions
             WHERE build_status = 'broken' AND is_committed = 1
             ORDER BY updated_at DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_function)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Overwrite only the `status` column, bypassing status derivation.
    /// Used exclusively by [`crate::lifecycle::fix`], which has already
    /// computed the canonical value and wants exactly that value persisted.
    pub fn write_status_only(&mut self, name: &FunctionName, status: FunctionStatus) -> Result<()> {
        self.conn_mut().execute(
            "UPDATE functions SET status = ?1, updated_at = ?2 WHERE name = ?3",
            params![status.as_db_str(), Utc::now().to_rfc3339(), name.as_str()],
        )?;
        Ok(())
    }

    /// All functions whose `source_file` equals `source_file`, used by the
    /// Commit Applier's "every function in the file is matched" gate before
    /// flipping a build-config entry from NonMatching to Matching.
    pub fn get_functions_by_source_file(&self, source_file: &str) -> Result<Vec<Function>> {
        let sql = format!("SELECT {FUNCTION_COLUMNS} FROM functions WHERE source_file = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![source_file], row_to_function)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Count of functions with `build_status = 'broken'` whose `worktree_path`
    /// equals `worktree_path`, used by the broken-build threshold check in
    /// `workflow finish`.
    pub fn count_broken_builds_in_worktree(&self, worktree_path: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM functions WHERE build_status = 'broken' AND worktree_path = ?1",
            params![worktree_path],
            |row| row.get(0),
        )?)
    }
}

/// Insert a default (`unclaimed`, `match_percent` 0) row for `name` if none
/// exists yet, within an already-open transaction. Per §3 ("created lazily
/// on first reference"), callers that mutate a function by name before any
/// `upsert_function` call — the Claim Arbiter's `add_claim` chief among them
/// — must run this first so the row is there to update.
pub(crate) fn ensure_function_row(
    tx: &rusqlite::Transaction<'_>,
    name: &FunctionName,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    let row = Function::new(name.clone(), now);
    let sql = format!(
        "INSERT INTO functions ({FUNCTION_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
         ON CONFLICT(name) DO NOTHING"
    );
    tx.execute(
        &sql,
        params![
            row.name.as_str(),
            row.source_file,
            row.worktree_path,
            row.match_percent,
            row.status.as_db_str(),
            row.local_scratch_slug.as_ref().map(ScratchSlug::as_str),
            row.production_scratch_slug.as_ref().map(ScratchSlug::as_str),
            row.claimed_by_agent.as_ref().map(AgentId::as_str),
            row.claimed_at.map(|t| t.to_rfc3339()),
            row.branch,
            row.commit_hash,
            row.build_status.as_db_str(),
            row.build_diagnosis,
            i64::from(row.is_committed),
            row.pr_url,
            row.pr_number,
            row.pr_state.map(PrState::as_db_str),
            row.created_at.to_rfc3339(),
            row.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn has_active_claim(tx: &rusqlite::Transaction<'_>, name: &FunctionName) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let held: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM claims WHERE function_name = ?1 AND expires_at > ?2",
            params![name.as_str(), now],
            |row| row.get(0),
        )
        .optional()?;
    Ok(held.is_some())
}

/// Partial update for [`Store::upsert_function`]. Every field is optional;
/// `None` leaves the existing (or default) value untouched.
#[derive(Clone, Debug, Default)]
pub struct FunctionPatch {
    pub source_file: Option<Option<String>>,
    pub worktree_path: Option<Option<String>>,
    pub match_percent: Option<f64>,
    pub local_scratch_slug: Option<Option<ScratchSlug>>,
    pub production_scratch_slug: Option<Option<ScratchSlug>>,
    pub claimed_by_agent: Option<Option<AgentId>>,
    pub claimed_at: Option<Option<chrono::DateTime<Utc>>>,
    pub branch: Option<Option<String>>,
    pub commit_hash: Option<Option<String>>,
    pub build_status: Option<BuildStatus>,
    pub build_diagnosis: Option<Option<String>>,
    pub is_committed: Option<bool>,
    pub pr_url: Option<Option<String>>,
    pub pr_number: Option<Option<i64>>,
    pub pr_state: Option<Option<PrState>>,
}

impl FunctionPatch {
    fn apply(self, f: &mut Function) {
        if let Some(v) = self.source_file {
            f.source_file = v;
        }
        if let Some(v) = self.worktree_path {
            f.worktree_path = v;
        }
        if let Some(v) = self.match_percent {
            f.match_percent = v;
        }
        if let Some(v) = self.local_scratch_slug {
            f.local_scratch_slug = v;
        }
        if let Some(v) = self.production_scratch_slug {
            f.production_scratch_slug = v;
        }
        if let Some(v) = self.claimed_by_agent {
            f.claimed_by_agent = v;
        }
        if let Some(v) = self.claimed_at {
            f.claimed_at = v;
        }
        if let Some(v) = self.branch {
            f.branch = v;
        }
        if let Some(v) = self.commit_hash {
            f.commit_hash = v;
        }
        if let Some(v) = self.build_status {
            f.build_status = v;
        }
        if let Some(v) = self.build_diagnosis {
            f.build_diagnosis = v;
        }
        if let Some(v) = self.is_committed {
            f.is_committed = v;
        }
        if let Some(v) = self.pr_url {
            f.pr_url = v;
        }
        if let Some(v) = self.pr_number {
            f.pr_number = v;
        }
        if let Some(v) = self.pr_state {
            f.pr_state = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_unclaimed_function() {
        let mut store = Store::open_in_memory().unwrap();
        let name = FunctionName::new("Foo_80005940").unwrap();
        let f = store
            .upsert_function(&name, FunctionPatch::default(), None)
            .unwrap();
        assert_eq!(f.status, FunctionStatus::Unclaimed);
        assert!((f.match_percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn upsert_merges_and_derives_status() {
        let mut store = Store::open_in_memory().unwrap();
        let name = FunctionName::new("Foo_80005940").unwrap();
        store
            .upsert_function(&name, FunctionPatch::default(), None)
            .unwrap();

        let patch = FunctionPatch {
            match_percent: Some(42.0),
            ..Default::default()
        };
        let f = store.upsert_function(&name, patch, None).unwrap();
        assert_eq!(f.status, FunctionStatus::InProgress);
    }

    #[test]
    fn uncommitted_matches_filters_by_threshold_and_commit_flag() {
        let mut store = Store::open_in_memory().unwrap();
        let a = FunctionName::new("A_1").unwrap();
        let b = FunctionName::new("B_2").unwrap();
        store
            .upsert_function(
                &a,
                FunctionPatch {
                    match_percent: Some(100.0),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        store
            .upsert_function(
                &b,
                FunctionPatch {
                    match_percent: Some(50.0),
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        let matches = store.get_uncommitted_matches().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, a);
    }
}
