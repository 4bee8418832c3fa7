//! Claim Arbiter (component B): single-winner claim acquisition/release.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde_json::json;

use crate::error::{Result, StoreError};
use crate::model::{AgentId, Claim, EntityType, FunctionName};

use super::Store;

/// Default claim TTL in seconds.
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 3600;

fn row_to_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    let function_name: String = row.get("function_name")?;
    let agent_id: String = row.get("agent_id")?;
    let claimed_at: String = row.get("claimed_at")?;
    let expires_at: String = row.get("expires_at")?;
    Ok(Claim {
        function_name: FunctionName::new(function_name)
            .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))?,
        agent_id: AgentId::new(agent_id)
            .map_err(|e| rusqlite::Error::InvalidColumnType(1, e.to_string(), rusqlite::types::Type::Text))?,
        claimed_at: parse_rfc3339(&claimed_at)?,
        expires_at: parse_rfc3339(&expires_at)?,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

impl Store {
    /// Acquire an exclusive claim on `function`, per the `add_claim`
    /// protocol: delete expired rows, reject an active claim (by this or
    /// another agent), insert with `expires_at = now + ttl`, transition the
    /// function's status `unclaimed -> claimed`, log `action=created`.
    ///
    /// # Errors
    /// Returns [`StoreError::ClaimHeld`] if another agent holds an active
    /// claim, or [`StoreError::DoubleClaim`] if `agent` already holds it.
    pub fn add_claim(
        &mut self,
        function: &FunctionName,
        agent: &AgentId,
        ttl_secs: i64,
    ) -> Result<Claim> {
        let now = Utc::now();
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "DELETE FROM claims WHERE function_name = ?1 AND expires_at <= ?2",
            params![function.as_str(), now.to_rfc3339()],
        )?;

        let active: Option<String> = tx
            .query_row(
                "SELECT agent_id FROM claims WHERE function_name = ?1 AND expires_at > ?2",
                params![function.as_str(), now.to_rfc3339()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(holder) = active {
            let holder_id = AgentId::new(holder.clone())
                .map_err(|_| StoreError::Invariant("corrupt agent_id in claims row".into()))?;
            return if holder_id == *agent {
                Err(StoreError::DoubleClaim {
                    name: function.clone(),
                    agent: agent.clone(),
                })
            } else {
                Err(StoreError::ClaimHeld {
                    name: function.clone(),
                    holder: holder_id,
                })
            };
        }

        let expires_at = now + chrono::Duration::seconds(ttl_secs);
        let claim = Claim {
            function_name: function.clone(),
            agent_id: agent.clone(),
            claimed_at: now,
            expires_at,
        };

        tx.execute(
            "INSERT INTO claims (function_name, agent_id, claimed_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                function.as_str(),
                agent.as_str(),
                now.to_rfc3339(),
                expires_at.to_rfc3339()
            ],
        )?;

        // A claim may be the very first reference to this function (spec §3:
        // "created lazily on first reference"); make sure the row exists
        // before updating it.
        super::functions::ensure_function_row(&tx, function, now)?;

        // Promote unclaimed -> claimed only; functions already further along
        // (in_progress, matched, ...) are not regressed by a re-claim attempt
        // that got this far, since the active-claim check above already
        // rejects a concurrent claimant.
        tx.execute(
            "UPDATE functions SET claimed_by_agent = ?1, claimed_at = ?2, updated_at = ?3,
                status = CASE WHEN status = 'unclaimed' THEN 'claimed' ELSE status END
             WHERE name = ?4",
            params![agent.as_str(), now.to_rfc3339(), now.to_rfc3339(), function.as_str()],
        )?;

        super::log_audit(
            &tx,
            EntityType::Claim,
            function.as_str(),
            "created",
            None,
            Some(&json!(&claim)),
            Some(agent.as_str()),
            None,
        )?;

        tx.commit()?;
        Ok(claim)
    }

    /// Release a claim on `function`, per `release_claim`. If `agent` is
    /// supplied it must match the current holder; if omitted, force-releases
    /// any holder. Returns `true` if a claim was released. Resets status to
    /// `unclaimed` only when the current status is still `claimed` (does not
    /// demote a function that has progressed further).
    ///
    /// # Errors
    /// Returns [`StoreError::ClaimNotHeldByAgent`] if `agent` is supplied and
    /// does not match the current holder.
    pub fn release_claim(
        &mut self,
        function: &FunctionName,
        agent: Option<&AgentId>,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let existing: Option<(String, String, String)> = tx
            .query_row(
                "SELECT agent_id, claimed_at, expires_at FROM claims WHERE function_name = ?1",
                params![function.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((holder, claimed_at, expires_at)) = existing else {
            return Ok(false);
        };

        if let Some(agent) = agent
            && holder != agent.as_str()
        {
            return Err(StoreError::ClaimNotHeldByAgent {
                name: function.clone(),
                agent: agent.clone(),
            });
        }

        let released = Claim {
            function_name: function.clone(),
            agent_id: AgentId::new(holder.clone())
                .map_err(|_| StoreError::Invariant("corrupt agent_id in claims row".into()))?,
            claimed_at: parse_rfc3339(&claimed_at)?,
            expires_at: parse_rfc3339(&expires_at)?,
        };

        tx.execute(
            "DELETE FROM claims WHERE function_name = ?1",
            params![function.as_str()],
        )?;

        tx.execute(
            "UPDATE functions SET claimed_by_agent = NULL, claimed_at = NULL, updated_at = ?1,
                status = CASE WHEN status = 'claimed' THEN 'unclaimed' ELSE status END
             WHERE name = ?2",
            params![Utc::now().to_rfc3339(), function.as_str()],
        )?;

        super::log_audit(
            &tx,
            EntityType::Claim,
            function.as_str(),
            "released",
            Some(&json!(&released)),
            None,
            Some(&holder),
            None,
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// All claims with `expires_at > now` (`get_active_claims`).
    pub fn get_active_claims(&self) -> Result<Vec<Claim>> {
        let now = Utc::now().to_rfc3339();
        let mut stmt = self.conn().prepare(
            "SELECT function_name, agent_id, claimed_at, expires_at FROM claims
             WHERE expires_at > ?1 ORDER BY claimed_at ASC",
        )?;
        let rows = stmt
            .query_map(params![now], row_to_claim)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The active (unexpired) claim on `function`, if any.
    pub fn get_claim(&self, function: &FunctionName) -> Result<Option<Claim>> {
        let now = Utc::now().to_rfc3339();
        Ok(self
            .conn()
            .query_row(
                "SELECT function_name, agent_id, claimed_at, expires_at FROM claims
                 WHERE function_name = ?1 AND expires_at > ?2",
                params![function.as_str(), now],
                row_to_claim,
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FunctionStatus;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s).unwrap()
    }
    fn func(s: &str) -> FunctionName {
        FunctionName::new(s).unwrap()
    }

    #[test]
    fn second_agent_cannot_claim_held_function() {
        let mut store = Store::open_in_memory().unwrap();
        let name = func("Bar_80006000");
        store.add_claim(&name, &agent("claude1"), 3600).unwrap();
        let err = store.add_claim(&name, &agent("claude2"), 3600).unwrap_err();
        assert!(err.to_string().contains("claude1"));
    }

    #[test]
    fn release_then_claim_succeeds() {
        let mut store = Store::open_in_memory().unwrap();
        let name = func("Bar_80006000");
        store.add_claim(&name, &agent("claude1"), 3600).unwrap();
        assert!(store.release_claim(&name, Some(&agent("claude1"))).unwrap());
        store.add_claim(&name, &agent("claude2"), 3600).unwrap();
    }

    #[test]
    fn same_agent_double_claim_fails() {
        let mut store = Store::open_in_memory().unwrap();
        let name = func("Foo_1");
        store.add_claim(&name, &agent("claude1"), 3600).unwrap();
        let err = store.add_claim(&name, &agent("claude1"), 3600).unwrap_err();
        assert!(matches!(err, StoreError::DoubleClaim { .. }));
    }

    #[test]
    fn expired_claim_is_not_active() {
        let mut store = Store::open_in_memory().unwrap();
        let name = func("Foo_2");
        store.add_claim(&name, &agent("claude1"), -10).unwrap();
        assert!(store.get_active_claims().unwrap().is_empty());
        // and a new claimant can now take it
        store.add_claim(&name, &agent("claude2"), 3600).unwrap();
    }

    #[test]
    fn release_wrong_agent_fails() {
        let mut store = Store::open_in_memory().unwrap();
        let name = func("Foo_3");
        store.add_claim(&name, &agent("claude1"), 3600).unwrap();
        let err = store
            .release_claim(&name, Some(&agent("claude2")))
            .unwrap_err();
        assert!(matches!(err, StoreError::ClaimNotHeldByAgent { .. }));
    }

    #[test]
    fn add_claim_promotes_status_to_claimed() {
        let mut store = Store::open_in_memory().unwrap();
        let name = func("Foo_4");
        store.add_claim(&name, &agent("claude1"), 3600).unwrap();
        let f = store.get_function(&name).unwrap().unwrap();
        assert_eq!(f.status, FunctionStatus::Claimed);
    }

    #[test]
    fn add_claim_lazily_creates_never_referenced_function() {
        let mut store = Store::open_in_memory().unwrap();
        let name = func("Foo_80005940");
        assert!(store.get_function(&name).unwrap().is_none());
        store.add_claim(&name, &agent("claude1234"), 3600).unwrap();
        let f = store.get_function(&name).unwrap().unwrap();
        assert_eq!(f.status, FunctionStatus::Claimed);
        assert_eq!(f.match_percent, 0.0);
        assert_eq!(f.claimed_by_agent.as_ref().map(AgentId::as_str), Some("claude1234"));
    }
}
