//! Build-config `NonMatching`/`Matching` annotation flipping.
//!
//! The project's build config enumerates each source file with an
//! `Object(NonMatching, "path/to/file.c")` or `Object(Matching, "path/to/file.c")`
//! entry. The Commit Applier flips a file's entry from `NonMatching` to
//! `Matching` only once every function in that file is a complete (100%)
//! match — otherwise flipping it would break the non-matching build by
//! pulling in the project's prebuilt object instead of the hand-written one.
//!
//! This module operates purely on the build-config text and a caller-supplied
//! match-percent lookup (normally [`crate::store::Store::get_functions_by_source_file`]);
//! it does not parse splits/symbols files itself, matching the project's own
//! treatment of `configure.py`'s annotation syntax as fixed, regex-matchable
//! text distinct from free-form C.

use regex::Regex;

use crate::error::{Result, StoreError};
use crate::model::Function;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationState {
    NonMatching,
    Matching,
}

fn pattern_for(file_path: &str, state: AnnotationState) -> Regex {
    let keyword = match state {
        AnnotationState::NonMatching => "NonMatching",
        AnnotationState::Matching => "Matching",
    };
    let escaped = regex::escape(file_path);
    Regex::new(&format!(r#"Object\({keyword},\s*["']({escaped})["']"#)).expect("valid regex")
}

/// Locate `file_path`'s current annotation state in `content`.
///
/// Returns `None` if the file is not mentioned in the build config at all.
#[must_use]
pub fn find_state(content: &str, file_path: &str) -> Option<AnnotationState> {
    if pattern_for(file_path, AnnotationState::NonMatching).is_match(content) {
        return Some(AnnotationState::NonMatching);
    }
    if pattern_for(file_path, AnnotationState::Matching).is_match(content) {
        return Some(AnnotationState::Matching);
    }
    None
}

/// Whether every function recorded against `source_file` has reached a
/// complete (100%) match, the gate for flipping `NonMatching` to `Matching`.
///
/// Returns the list of functions (with their percentages) blocking the flip,
/// if any. The caller treats "no functions known for this file" as an error
/// rather than an empty, all-clear blocker list, since an unverifiable file
/// should never be flipped.
#[must_use]
pub fn unmatched_blockers(functions_in_file: &[Function]) -> Vec<(String, f64)> {
    functions_in_file
        .iter()
        .filter(|f| f.match_percent < 100.0)
        .map(|f| (f.name.to_string(), f.match_percent))
        .collect()
}

/// Rewrite `file_path`'s entry in `content` from `NonMatching` to `Matching`.
///
/// Returns `Ok(new_content)` on success. Fails if the file isn't present as
/// a `NonMatching` entry (already `Matching`, or not listed at all).
pub fn flip_to_matching(content: &str, file_path: &str) -> Result<String> {
    let pattern = pattern_for(file_path, AnnotationState::NonMatching);
    if !pattern.is_match(content) {
        return Err(StoreError::Invariant(format!(
            "'{file_path}' has no NonMatching entry in the build config"
        )));
    }
    let replaced = pattern.replace(content, |caps: &regex::Captures<'_>| {
        format!(r#"Object(Matching, "{}""#, &caps[1])
    });
    Ok(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Function, FunctionName};
    use chrono::Utc;

    fn func(name: &str, pct: f64) -> Function {
        let now = Utc::now();
        let mut f = Function::new(FunctionName::new(name).unwrap(), now);
        f.source_file = Some("melee/lb/lbcommand.c".to_owned());
        f.match_percent = pct;
        f
    }

    #[test]
    fn finds_nonmatching_entry() {
        let content = r#"Object(NonMatching, "melee/lb/lbcommand.c"),"#;
        assert_eq!(find_state(content, "melee/lb/lbcommand.c"), Some(AnnotationState::NonMatching));
    }

    #[test]
    fn finds_matching_entry() {
        let content = r#"Object(Matching, "melee/lb/lbcommand.c"),"#;
        assert_eq!(find_state(content, "melee/lb/lbcommand.c"), Some(AnnotationState::Matching));
    }

    #[test]
    fn missing_entry_is_none() {
        let content = r#"Object(NonMatching, "melee/lb/other.c"),"#;
        assert_eq!(find_state(content, "melee/lb/lbcommand.c"), None);
    }

    #[test]
    fn flip_rewrites_keyword_only() {
        let content = r#"Object(NonMatching, "melee/lb/lbcommand.c"),"#;
        let out = flip_to_matching(content, "melee/lb/lbcommand.c").unwrap();
        assert_eq!(out, r#"Object(Matching, "melee/lb/lbcommand.c"),"#);
    }

    #[test]
    fn flip_fails_when_already_matching() {
        let content = r#"Object(Matching, "melee/lb/lbcommand.c"),"#;
        assert!(flip_to_matching(content, "melee/lb/lbcommand.c").is_err());
    }

    #[test]
    fn unmatched_blockers_lists_incomplete_functions() {
        let functions = vec![func("Foo_80001000", 100.0), func("Bar_80002000", 87.5)];
        let blockers = unmatched_blockers(&functions);
        assert_eq!(blockers, vec![("Bar_80002000".to_owned(), 87.5)]);
    }

    #[test]
    fn unmatched_blockers_empty_when_all_matched() {
        let functions = vec![func("Foo_80001000", 100.0), func("Bar_80002000", 100.0)];
        assert!(unmatched_blockers(&functions).is_empty());
    }
}
