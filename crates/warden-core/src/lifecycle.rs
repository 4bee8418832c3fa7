//! Lifecycle Engine (component C): derives the canonical function status from
//! a coherent field bundle and validates/repairs stored rows that diverge.
//!
//! Stored `status` is advisory only; canonical status is always recomputed
//! from `(is_committed, pr_state, build_status, match_percent)` plus whether
//! an active claim exists ("status-derivation authority").
//! [`derive_status`] is the single place that encodes the consistency
//! table, and every writer in [`crate::store`] calls it before persisting a
//! row rather than trusting a caller-supplied status.

use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::model::{EntityType, Function, FunctionStatus, PrState};
use crate::store::Store;

/// Compute the canonical status for `f`, given whether an active claim
/// currently exists on it. Implements the consistency table in the
/// order specified there.
#[must_use]
pub fn derive_status(f: &Function, has_active_claim: bool) -> FunctionStatus {
    if f.pr_state == Some(PrState::Merged) {
        return FunctionStatus::Merged;
    }
    if f.pr_state == Some(PrState::Open) && f.is_committed {
        return FunctionStatus::InReview;
    }
    if f.is_committed && f.build_status == crate::model::BuildStatus::Broken {
        return FunctionStatus::CommittedNeedsFix;
    }
    if f.is_committed
        && matches!(
            f.build_status,
            crate::model::BuildStatus::Passing | crate::model::BuildStatus::Unknown
        )
        && f.pr_url.is_none()
    {
        return FunctionStatus::Committed;
    }
    if f.match_percent >= 95.0 && !f.is_committed {
        return FunctionStatus::Matched;
    }
    if f.match_percent > 0.0 && f.match_percent < 95.0 {
        return FunctionStatus::InProgress;
    }
    if has_active_claim {
        return FunctionStatus::Claimed;
    }
    FunctionStatus::Unclaimed
}

/// One row whose stored status diverges from its derived canonical status.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationDivergence {
    pub function: Function,
    pub derived: FunctionStatus,
}

/// Scan every function row and report those whose stored status disagrees
/// with [`derive_status`] ("Validation reports each row...").
pub fn validate(store: &Store) -> Result<Vec<ValidationDivergence>> {
    let mut divergences = Vec::new();
    for status in ALL_STATUSES {
        for f in store.get_functions_by_status(status)? {
            let has_claim = store.get_claim(&f.name)?.is_some();
            let derived = derive_status(&f, has_claim);
            if derived != f.status {
                divergences.push(ValidationDivergence { function: f, derived });
            }
        }
    }
    Ok(divergences)
}

const ALL_STATUSES: [FunctionStatus; 8] = [
    FunctionStatus::Unclaimed,
    FunctionStatus::Claimed,
    FunctionStatus::InProgress,
    FunctionStatus::Matched,
    FunctionStatus::Committed,
    FunctionStatus::CommittedNeedsFix,
    FunctionStatus::InReview,
    FunctionStatus::Merged,
];

/// Rewrite each divergent row's status to its derived value, preserving all
/// other fields, logging one audit entry per fixed row. Idempotent: running
/// `validate` again immediately after reports no divergences.
pub fn fix(store: &mut Store, divergences: &[ValidationDivergence]) -> Result<()> {
    for d in divergences {
        let before = json!(&d.function);
        let mut after = d.function.clone();
        after.status = d.derived;
        let after_json = json!(&after);
        store.write_status_only(&after.name, d.derived)?;
        store.log_audit(
            EntityType::Function,
            d.function.name.as_str(),
            "updated",
            Some(&before),
            Some(&after_json),
            None,
            Some(&json!({"reason": "validate --fix"})),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BuildStatus, FunctionName};

    fn base(name: &str) -> Function {
        Function::new(FunctionName::new(name).unwrap(), chrono::Utc::now())
    }

    #[test]
    fn merged_pr_state_wins_over_everything() {
        let mut f = base("Foo_1");
        f.pr_state = Some(PrState::Merged);
        f.is_committed = true;
        f.build_status = BuildStatus::Broken;
        assert_eq!(derive_status(&f, false), FunctionStatus::Merged);
    }

    #[test]
    fn committed_and_broken_is_needs_fix() {
        let mut f = base("Foo_2");
        f.is_committed = true;
        f.build_status = BuildStatus::Broken;
        assert_eq!(derive_status(&f, false), FunctionStatus::CommittedNeedsFix);
    }

    #[test]
    fn committed_and_passing_no_pr_is_committed() {
        let mut f = base("Foo_3");
        f.is_committed = true;
        f.build_status = BuildStatus::Passing;
        assert_eq!(derive_status(&f, false), FunctionStatus::Committed);
    }

    #[test]
    fn high_match_not_committed_is_matched() {
        let mut f = base("Foo_4");
        f.match_percent = 97.0;
        assert_eq!(derive_status(&f, false), FunctionStatus::Matched);
    }

    #[test]
    fn partial_match_is_in_progress() {
        let mut f = base("Foo_5");
        f.match_percent = 42.0;
        assert_eq!(derive_status(&f, false), FunctionStatus::InProgress);
    }

    #[test]
    fn no_progress_with_claim_is_claimed() {
        let f = base("Foo_6");
        assert_eq!(derive_status(&f, true), FunctionStatus::Claimed);
    }

    #[test]
    fn no_progress_no_claim_is_unclaimed() {
        let f = base("Foo_7");
        assert_eq!(derive_status(&f, false), FunctionStatus::Unclaimed);
    }

    #[test]
    fn open_pr_and_committed_is_in_review() {
        let mut f = base("Foo_8");
        f.is_committed = true;
        f.pr_state = Some(PrState::Open);
        assert_eq!(derive_status(&f, false), FunctionStatus::InReview);
    }

    #[test]
    fn validate_fix_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        let name = FunctionName::new("Foo_9").unwrap();
        store
            .upsert_function(&name, crate::store::functions::FunctionPatch::default(), None)
            .unwrap();
        // Force a divergence directly.
        store.write_status_only(&name, FunctionStatus::Committed).unwrap();

        let divergences = validate(&store).unwrap();
        assert_eq!(divergences.len(), 1);
        fix(&mut store, &divergences).unwrap();

        let divergences_again = validate(&store).unwrap();
        assert!(divergences_again.is_empty());
    }
}
