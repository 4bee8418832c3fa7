//! Reader/writer methods for `scratches` and `match_history`.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde_json::json;

use crate::error::Result;
use crate::model::{EntityType, FunctionName, MatchHistoryEntry, Scratch, ScratchInstance, ScratchSlug};

use super::Store;

fn row_to_scratch(row: &rusqlite::Row<'_>) -> rusqlite::Result<Scratch> {
    let slug: String = row.get("slug")?;
    let instance: String = row.get("instance")?;
    let function_name: String = row.get("function_name")?;
    Ok(Scratch {
        slug: ScratchSlug::new(slug)
            .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))?,
        instance: ScratchInstance::from_db_str(&instance).unwrap_or(ScratchInstance::Local),
        base_url: row.get("base_url")?,
        function_name: FunctionName::new(function_name)
            .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))?,
        score: row.get("score")?,
        max_score: row.get("max_score")?,
        match_percent: row.get("match_percent")?,
        claim_token: row.get("claim_token")?,
        verified_at: row
            .get::<_, Option<String>>("verified_at")?
            .map(|s| parse_rfc3339(&s))
            .transpose()?,
        created_at: parse_rfc3339(&row.get::<_, String>("created_at")?)?,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

const SCRATCH_COLUMNS: &str = "slug, instance, base_url, function_name, score, max_score,
    match_percent, claim_token, verified_at, created_at";

impl Store {
    /// Create-or-merge a scratch row (`upsert_scratch`).
    pub fn upsert_scratch(&mut self, scratch: &Scratch, agent: Option<&str>) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        let sql = format!("SELECT {SCRATCH_COLUMNS} FROM scratches WHERE slug = ?1");
        let before: Option<Scratch> = tx
            .query_row(&sql, params![scratch.slug.as_str()], row_to_scratch)
            .optional()?;

        tx.execute(
            "INSERT INTO scratches
                (slug, instance, base_url, function_name, score, max_score, match_percent,
                 claim_token, verified_at, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(slug) DO UPDATE SET
                instance=excluded.instance, base_url=excluded.base_url,
                function_name=excluded.function_name, score=excluded.score,
                max_score=excluded.max_score, match_percent=excluded.match_percent,
                claim_token=excluded.claim_token, verified_at=excluded.verified_at",
            params![
                scratch.slug.as_str(),
                scratch.instance.as_db_str(),
                scratch.base_url,
                scratch.function_name.as_str(),
                scratch.score,
                scratch.max_score,
                scratch.match_percent,
                scratch.claim_token,
                scratch.verified_at.map(|t| t.to_rfc3339()),
                scratch.created_at.to_rfc3339(),
            ],
        )?;

        let action = if before.is_some() { "updated" } else { "created" };
        super::log_audit(
            &tx,
            EntityType::Scratch,
            scratch.slug.as_str(),
            action,
            before.as_ref().map(|s| json!(s)).as_ref(),
            Some(&json!(scratch)),
            agent,
            None,
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn get_scratch(&self, slug: &ScratchSlug) -> Result<Option<Scratch>> {
        let sql = format!("SELECT {SCRATCH_COLUMNS} FROM scratches WHERE slug = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![slug.as_str()], row_to_scratch)
            .optional()?)
    }

    /// Scratches not verified within `max_age`, for the stale-data query.
    pub fn get_stale_scratches(&self, max_age: chrono::Duration) -> Result<Vec<Scratch>> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        let sql = format!(
            "SELECT {SCRATCH_COLUMNS} FROM scratches
             WHERE verified_at IS NULL OR verified_at < ?1
             ORDER BY verified_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![cutoff], row_to_scratch)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Record an observed compile score for `slug` (`record_match_score`).
    ///
    /// Idempotent on unchanged scores: if the most recent history row for
    /// this scratch already carries the same `(score, max_score)`, no new row
    /// is inserted and the scratch's summary fields are left untouched —
    /// per "consecutive duplicate scores ... produce exactly one history
    /// row". Otherwise a history row is inserted and the scratch's summary
    /// (`score`, `max_score`, `match_percent`, `verified_at`) is updated in
    /// the same transaction.
    pub fn record_match_score(
        &mut self,
        slug: &ScratchSlug,
        score: i64,
        max_score: i64,
        agent: Option<&str>,
    ) -> Result<MatchHistoryEntry> {
        let now = Utc::now();
        let tx = self.conn_mut().transaction()?;

        let last: Option<(i64, i64)> = tx
            .query_row(
                "SELECT score, max_score FROM match_history
                 WHERE scratch_slug = ?1 ORDER BY id DESC LIMIT 1",
                params![slug.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let match_percent = crate::model::Scratch::compute_match_percent(score, max_score);
        let entry = MatchHistoryEntry {
            scratch_slug: slug.clone(),
            timestamp: now,
            score,
            max_score,
            match_percent,
        };

        if last == Some((score, max_score)) {
            tx.commit()?;
            return Ok(entry);
        }

        tx.execute(
            "INSERT INTO match_history (scratch_slug, timestamp, score, max_score, match_percent)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                slug.as_str(),
                now.to_rfc3339(),
                score,
                max_score,
                match_percent
            ],
        )?;

        tx.execute(
            "UPDATE scratches SET score = ?1, max_score = ?2, match_percent = ?3, verified_at = ?4
             WHERE slug = ?5",
            params![score, max_score, match_percent, now.to_rfc3339(), slug.as_str()],
        )?;

        super::log_audit(
            &tx,
            EntityType::Scratch,
            slug.as_str(),
            "updated",
            None,
            Some(&json!(&entry)),
            agent,
            None,
        )?;

        tx.commit()?;
        Ok(entry)
    }

    /// Full match-history for one scratch, oldest first.
    pub fn get_match_history(&self, slug: &ScratchSlug) -> Result<Vec<MatchHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT scratch_slug, timestamp, score, max_score, match_percent
             FROM match_history WHERE scratch_slug = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![slug.as_str()], |row| {
                let slug: String = row.get(0)?;
                let ts: String = row.get(1)?;
                Ok(MatchHistoryEntry {
                    scratch_slug: ScratchSlug::new(slug).map_err(|e| {
                        rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
                    })?,
                    timestamp: parse_rfc3339(&ts)?,
                    score: row.get(2)?,
                    max_score: row.get(3)?,
                    match_percent: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(slug: &str, function: &str) -> Scratch {
        Scratch {
            slug: ScratchSlug::new(slug).unwrap(),
            instance: ScratchInstance::Local,
            base_url: "http://localhost:8080".into(),
            function_name: FunctionName::new(function).unwrap(),
            score: 120,
            max_score: 120,
            match_percent: 0.0,
            claim_token: Some("tok".into()),
            verified_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_consecutive_scores_collapse_to_one_row() {
        let mut store = Store::open_in_memory().unwrap();
        let s = scratch("abc123", "Foo_1");
        store.upsert_scratch(&s, None).unwrap();
        store.record_match_score(&s.slug, 0, 120, None).unwrap();
        store.record_match_score(&s.slug, 0, 120, None).unwrap();
        store.record_match_score(&s.slug, 0, 120, None).unwrap();
        assert_eq!(store.get_match_history(&s.slug).unwrap().len(), 1);
    }

    #[test]
    fn differing_scores_each_get_a_row() {
        let mut store = Store::open_in_memory().unwrap();
        let s = scratch("abc123", "Foo_1");
        store.upsert_scratch(&s, None).unwrap();
        store.record_match_score(&s.slug, 30, 120, None).unwrap();
        store.record_match_score(&s.slug, 0, 120, None).unwrap();
        assert_eq!(store.get_match_history(&s.slug).unwrap().len(), 2);
    }

    #[test]
    fn record_match_score_updates_scratch_summary_atomically() {
        let mut store = Store::open_in_memory().unwrap();
        let s = scratch("abc123", "Foo_1");
        store.upsert_scratch(&s, None).unwrap();
        store.record_match_score(&s.slug, 0, 120, None).unwrap();
        let updated = store.get_scratch(&s.slug).unwrap().unwrap();
        assert_eq!(updated.score, 0);
        assert!((updated.match_percent - 100.0).abs() < f64::EPSILON);
        assert!(updated.verified_at.is_some());
    }
}
