//! Reader/writer methods for the `agents` registry and for `audit_log` reads.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::model::{Agent, AgentId, AuditEntry, BranchName, EntityType};

use super::Store;

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let agent_id: String = row.get("agent_id")?;
    let branch: Option<String> = row.get("branch")?;
    Ok(Agent {
        agent_id: AgentId::new(agent_id)
            .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))?,
        worktree_path: row.get("worktree_path")?,
        branch: branch.map(BranchName::new).transpose().map_err(|e| {
            rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
        })?,
        last_seen_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>("last_seen_at")?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

impl Store {
    /// Register (or touch) an agent, updating `last_seen_at`, `worktree_path`
    /// and `branch`. Called once per CLI invocation by the Workflow Driver.
    ///
    /// # Errors
    /// Returns an error if the underlying write fails.
    pub fn touch_agent(
        &mut self,
        agent_id: &AgentId,
        worktree_path: Option<&str>,
        branch: Option<&BranchName>,
    ) -> Result<()> {
        self.conn_mut().execute(
            "INSERT INTO agents (agent_id, worktree_path, branch, last_seen_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(agent_id) DO UPDATE SET
                worktree_path = excluded.worktree_path,
                branch = excluded.branch,
                last_seen_at = excluded.last_seen_at",
            params![
                agent_id.as_str(),
                worktree_path,
                branch.map(BranchName::as_str),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the underlying query fails.
    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut stmt = self.conn().prepare(
            "SELECT agent_id, worktree_path, branch, last_seen_at FROM agents
             ORDER BY last_seen_at DESC",
        )?;
        let rows = stmt
            .query_map([], row_to_agent)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Append one audit entry. Exposed directly (not just as a side effect of
    /// the other mutating methods) so the CLI's read-only commands and
    /// cross-cutting callers (e.g. PR state sync) can still record
    /// provenance without going through a domain-specific mutation.
    ///
    /// # Errors
    /// Returns an error if the underlying write fails.
    pub fn log_audit(
        &mut self,
        entity_type: EntityType,
        entity_id: &str,
        action: &str,
        old_value: Option<&serde_json::Value>,
        new_value: Option<&serde_json::Value>,
        agent: Option<&AgentId>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        super::log_audit(
            &tx,
            entity_type,
            entity_id,
            action,
            old_value,
            new_value,
            agent.map(AgentId::as_str),
            metadata,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Audit history, newest first, optionally filtered by entity type and/or
    /// id (`get_history`).
    ///
    /// # Errors
    /// Returns an error if the underlying query fails.
    pub fn get_history(
        &self,
        entity_type: Option<EntityType>,
        entity_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AuditEntry>> {
        let mut sql = String::from(
            "SELECT id, timestamp, entity_type, entity_id, action, old_value, new_value, agent_id, metadata
             FROM audit_log WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(et) = entity_type {
            sql.push_str(" AND entity_type = ?");
            args.push(Box::new(et.as_db_str().to_string()));
        }
        if let Some(id) = entity_id {
            sql.push_str(" AND entity_id = ?");
            args.push(Box::new(id.to_string()));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");
        args.push(Box::new(limit));

        let mut stmt = self.conn().prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(std::convert::AsRef::as_ref).collect();
        let rows = stmt
            .query_map(params.as_slice(), |row| {
                let entity_type: String = row.get(2)?;
                let old_value: Option<String> = row.get(5)?;
                let new_value: Option<String> = row.get(6)?;
                let agent_id: Option<String> = row.get(7)?;
                let metadata: Option<String> = row.get(8)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(1)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                1,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                    entity_type: EntityType::from_db_str(&entity_type).unwrap_or(EntityType::Function),
                    entity_id: row.get(3)?,
                    action: crate::model::AuditAction::new(row.get::<_, String>(4)?),
                    old_value: old_value.and_then(|v| serde_json::from_str(&v).ok()),
                    new_value: new_value.and_then(|v| serde_json::from_str(&v).ok()),
                    agent_id: agent_id.map(AgentId::new).transpose().map_err(|e| {
                        rusqlite::Error::InvalidColumnType(7, e.to_string(), rusqlite::types::Type::Text)
                    })?,
                    metadata: metadata.and_then(|v| serde_json::from_str(&v).ok()),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FunctionName;
    use crate::store::functions::FunctionPatch;

    #[test]
    fn history_is_newest_first() {
        let mut store = Store::open_in_memory().unwrap();
        let a = FunctionName::new("A_1").unwrap();
        let b = FunctionName::new("B_2").unwrap();
        store.upsert_function(&a, FunctionPatch::default(), None).unwrap();
        store.upsert_function(&b, FunctionPatch::default(), None).unwrap();
        let history = store.get_history(Some(EntityType::Function), None, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].entity_id, "B_2");
        assert_eq!(history[1].entity_id, "A_1");
    }
}
