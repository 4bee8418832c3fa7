//! Claim Arbiter (component B): subdirectory lock acquisition/release.
//!
//! Same single-winner protocol as [`super::claims`], with one addition:
//! re-acquisition by the same agent is permitted and extends the lock's
//! expiry — an agent legitimately renews its reservation as work
//! proceeds within a directory.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde_json::json;

use crate::error::{Result, StoreError};
use crate::model::{AgentId, BranchName, EntityType, SubdirectoryKey, SubdirectoryLock};

use super::Store;

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubdirectoryLock> {
    let key: String = row.get("key")?;
    let branch: Option<String> = row.get("branch")?;
    let locked_by_agent: String = row.get("locked_by_agent")?;
    Ok(SubdirectoryLock {
        key: SubdirectoryKey::new(key)
            .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))?,
        worktree_path: row.get("worktree_path")?,
        branch: branch.map(BranchName::new).transpose().map_err(|e| {
            rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
        })?,
        locked_by_agent: AgentId::new(locked_by_agent).map_err(|e| {
            rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
        })?,
        locked_at: parse_rfc3339(&row.get::<_, String>("locked_at")?)?,
        lock_expires_at: parse_rfc3339(&row.get::<_, String>("lock_expires_at")?)?,
        pending_commits_count: row.get("pending_commits_count")?,
        last_commit_at: row
            .get::<_, Option<String>>("last_commit_at")?
            .map(|s| parse_rfc3339(&s))
            .transpose()?,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

const LOCK_COLUMNS: &str = "key, worktree_path, branch, locked_by_agent, locked_at,
    lock_expires_at, pending_commits_count, last_commit_at";

impl Store {
    /// Acquire (or renew) an exclusive lock on `key`. Same protocol as
    /// [`Store::add_claim`], except re-acquisition by the same agent succeeds
    /// and extends `lock_expires_at` rather than erroring.
    pub fn lock_subdirectory(
        &mut self,
        key: &SubdirectoryKey,
        worktree_path: &str,
        branch: Option<&BranchName>,
        agent: &AgentId,
        ttl_secs: i64,
    ) -> Result<SubdirectoryLock> {
        let now = Utc::now();
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "DELETE FROM subdirectory_locks WHERE key = ?1 AND lock_expires_at <= ?2 AND locked_by_agent != ?3",
            params![key.as_str(), now.to_rfc3339(), agent.as_str()],
        )?;

        let sql = format!("SELECT {LOCK_COLUMNS} FROM subdirectory_locks WHERE key = ?1");
        let existing: Option<SubdirectoryLock> =
            tx.query_row(&sql, params![key.as_str()], row_to_lock).optional()?;

        if let Some(existing) = &existing
            && !existing.is_expired(now)
            && existing.locked_by_agent != *agent
        {
            return Err(StoreError::LockHeld {
                key: key.clone(),
                holder: existing.locked_by_agent.clone(),
            });
        }

        let expires_at = now + chrono::Duration::seconds(ttl_secs);
        let lock = SubdirectoryLock {
            key: key.clone(),
            worktree_path: worktree_path.to_string(),
            branch: branch.cloned(),
            locked_by_agent: agent.clone(),
            locked_at: existing
                .as_ref()
                .filter(|e| e.locked_by_agent == *agent)
                .map_or(now, |e| e.locked_at),
            lock_expires_at: expires_at,
            pending_commits_count: existing.as_ref().map_or(0, |e| e.pending_commits_count),
            last_commit_at: existing.as_ref().and_then(|e| e.last_commit_at),
        };

        tx.execute(
            "INSERT INTO subdirectory_locks
                (key, worktree_path, branch, locked_by_agent, locked_at, lock_expires_at,
                 pending_commits_count, last_commit_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(key) DO UPDATE SET
                worktree_path=excluded.worktree_path, branch=excluded.branch,
                locked_by_agent=excluded.locked_by_agent, locked_at=excluded.locked_at,
                lock_expires_at=excluded.lock_expires_at",
            params![
                lock.key.as_str(),
                lock.worktree_path,
                lock.branch.as_ref().map(BranchName::as_str),
                lock.locked_by_agent.as_str(),
                lock.locked_at.to_rfc3339(),
                lock.lock_expires_at.to_rfc3339(),
                lock.pending_commits_count,
                lock.last_commit_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        super::log_audit(
            &tx,
            EntityType::SubdirectoryLock,
            key.as_str(),
            "locked",
            existing.as_ref().map(|e| json!(e)).as_ref(),
            Some(&json!(&lock)),
            Some(agent.as_str()),
            None,
        )?;

        tx.commit()?;
        Ok(lock)
    }

    /// Release a lock on `key`. Symmetric with [`Store::release_claim`]:
    /// force-releases when `agent` is `None`.
    pub fn unlock_subdirectory(
        &mut self,
        key: &SubdirectoryKey,
        agent: Option<&AgentId>,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let sql = format!("SELECT {LOCK_COLUMNS} FROM subdirectory_locks WHERE key = ?1");
        let existing: Option<SubdirectoryLock> =
            tx.query_row(&sql, params![key.as_str()], row_to_lock).optional()?;

        let Some(existing) = existing else {
            return Ok(false);
        };

        if let Some(agent) = agent
            && existing.locked_by_agent != *agent
        {
            return Err(StoreError::LockNotHeldByAgent {
                key: key.clone(),
                agent: agent.clone(),
            });
        }

        tx.execute(
            "DELETE FROM subdirectory_locks WHERE key = ?1",
            params![key.as_str()],
        )?;

        super::log_audit(
            &tx,
            EntityType::SubdirectoryLock,
            key.as_str(),
            "unlocked",
            Some(&json!(&existing)),
            None,
            Some(existing.locked_by_agent.as_str()),
            None,
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Current lock on `key`, regardless of expiry (callers check
    /// `is_expired` themselves; an expired row still reports its prior
    /// holder until the next write touching the key collects it, per the
    /// "stale rows are collected opportunistically" expiry policy.
    pub fn get_subdirectory_lock(&self, key: &SubdirectoryKey) -> Result<Option<SubdirectoryLock>> {
        let sql = format!("SELECT {LOCK_COLUMNS} FROM subdirectory_locks WHERE key = ?1");
        Ok(self.conn.query_row(&sql, params![key.as_str()], row_to_lock).optional()?)
    }

    /// All subdirectory locks, for the audit/query layer's worktree status view.
    pub fn list_subdirectory_locks(&self) -> Result<Vec<SubdirectoryLock>> {
        let sql = format!("SELECT {LOCK_COLUMNS} FROM subdirectory_locks ORDER BY key ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_lock)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Increment a subdirectory's pending-commits counter and bump
    /// `last_commit_at`, called by `workflow finish` after a successful
    /// commit.
    pub fn increment_pending_commits(&mut self, key: &SubdirectoryKey) -> Result<()> {
        self.conn_mut().execute(
            "UPDATE subdirectory_locks SET pending_commits_count = pending_commits_count + 1,
                last_commit_at = ?1 WHERE key = ?2",
            params![Utc::now().to_rfc3339(), key.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s).unwrap()
    }
    fn key(s: &str) -> SubdirectoryKey {
        SubdirectoryKey::new(s).unwrap()
    }

    #[test]
    fn stale_lock_takeover_succeeds() {
        let mut store = Store::open_in_memory().unwrap();
        let k = key("lb");
        store
            .lock_subdirectory(&k, "/wt/lb", None, &agent("agentA"), -3600)
            .unwrap();
        let lock = store
            .lock_subdirectory(&k, "/wt/lb", None, &agent("agentB"), 3600)
            .unwrap();
        assert_eq!(lock.locked_by_agent, agent("agentB"));
    }

    #[test]
    fn same_agent_relock_extends_expiry() {
        let mut store = Store::open_in_memory().unwrap();
        let k = key("ft-chara-ftFox");
        let first = store
            .lock_subdirectory(&k, "/wt/ft", None, &agent("agentA"), 100)
            .unwrap();
        let second = store
            .lock_subdirectory(&k, "/wt/ft", None, &agent("agentA"), 9999)
            .unwrap();
        assert!(second.lock_expires_at > first.lock_expires_at);
    }

    #[test]
    fn different_agent_cannot_steal_active_lock() {
        let mut store = Store::open_in_memory().unwrap();
        let k = key("lb");
        store
            .lock_subdirectory(&k, "/wt/lb", None, &agent("agentA"), 3600)
            .unwrap();
        let err = store
            .lock_subdirectory(&k, "/wt/lb", None, &agent("agentB"), 3600)
            .unwrap_err();
        assert!(matches!(err, StoreError::LockHeld { .. }));
    }
}
