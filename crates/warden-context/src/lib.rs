//! Context Builder: assembles the C source the scratch service compiles
//! against by stripping function bodies out of a header file, using
//! tree-sitter-c rather than regex so struct/union/enum bodies and
//! declarations are never mangled.

mod error;
mod parser;

use std::collections::HashSet;
use std::path::Path;
use std::process::{Command, Stdio};

pub use error::{ContextError, Result};

const STRIP_MARKER: &str = "/* body stripped for context */";

/// Which function bodies a [`strip_function_bodies`] pass removes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StripScope {
    /// Strip every function body (except names in the `keep` set).
    All,
    /// Strip only bodies of functions declared `inline` (or `static inline`).
    InlineOnly,
}

/// Remove function bodies from `source`, replacing each stripped
/// `function_definition` with a bare declaration (qualifiers `static` and
/// `inline` removed) followed by a comment marker. Names in
/// `keep` are left completely untouched, body included.
///
/// Idempotent: a stripped declaration is no longer a `function_definition`
/// node, so running this again over its own output is a no-op.
pub fn strip_function_bodies(source: &str, scope: StripScope, keep: &HashSet<String>) -> Result<String> {
    let tree = parser::parse(source)?;
    let bytes = source.as_bytes();
    let defs = parser::function_definitions(&tree, bytes);

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    for def in defs {
        let Some(name) = parser::declarator_name(def, bytes) else {
            continue;
        };
        if keep.contains(&name) {
            continue;
        }
        if scope == StripScope::InlineOnly {
            let raw = &source[def.start_byte()..def.end_byte()];
            if !contains_word(raw, "inline") {
                continue;
            }
        }
        let decl = parser::strip_definition_to_declaration(def, source, STRIP_MARKER)?;
        out.push_str(&source[cursor..def.start_byte()]);
        out.push_str(&decl);
        cursor = def.end_byte();
    }
    out.push_str(&source[cursor..]);
    Ok(out)
}

/// Remove only the body of the named target function, leaving every other
/// function's body, and every call site of `target`, untouched. Used to
/// build the scratch-compatible "context" for a function being worked on:
/// its own body is the thing the agent is decompiling, so it must not leak
/// into the context the scratch server compiles against.
pub fn strip_target_function(source: &str, target: &str) -> Result<String> {
    let tree = parser::parse(source)?;
    let bytes = source.as_bytes();
    let defs = parser::function_definitions(&tree, bytes);

    let Some(def) = defs
        .into_iter()
        .find(|d| parser::declarator_name(*d, bytes).as_deref() == Some(target))
    else {
        // Target not defined in this source; nothing to strip.
        return Ok(source.to_string());
    };

    let decl = parser::strip_definition_to_declaration(def, source, STRIP_MARKER)?;
    let mut out = String::with_capacity(source.len());
    out.push_str(&source[..def.start_byte()]);
    out.push_str(&decl);
    out.push_str(&source[def.end_byte()..]);
    Ok(out)
}

/// Build the full decompilation context for `target`: every other
/// function's body stripped to a declaration, and `target`'s own body
/// stripped too, so the scratch server has every symbol it needs to link
/// against without seeing any function body at all.
///
/// Runs as two tree-sitter passes rather than one combined pass: the first
/// strips everything except `target` (so a caller that needs the
/// keep-target intermediate, e.g. a diff preview, can use
/// [`strip_function_bodies`] directly), the second strips `target` itself.
#[tracing::instrument(skip(source))]
pub fn build_context(source: &str, target: &str) -> Result<String> {
    let mut keep = HashSet::with_capacity(1);
    keep.insert(target.to_string());
    let others_stripped = strip_function_bodies(source, StripScope::All, &keep)?;
    strip_target_function(&others_stripped, target)
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric() && c != '_').any(|tok| tok == word)
}

/// Run `source` through the system C preprocessor (`cc -E -P`), expanding
/// macros and includes the way the build actually sees the file. `include_dirs`
/// are passed through as `-I` flags in order.
pub fn preprocess(source: &str, include_dirs: &[&Path]) -> Result<String> {
    let mut cmd = Command::new("cc");
    cmd.arg("-E").arg("-P");
    for dir in include_dirs {
        cmd.arg("-I").arg(dir);
    }
    cmd.arg("-x").arg("c").arg("-");
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    {
        use std::io::Write;
        let stdin = child.stdin.as_mut().ok_or_else(|| ContextError::Preprocessor("no stdin".into()))?;
        stdin.write_all(source.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        tracing::warn!("cc -E failed: {stderr}");
        return Err(ContextError::Preprocessor(stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Strip `_Static_assert(...)` statements, which the game's headers use
/// liberally to pin struct sizes but which add nothing to a compile
/// context and occasionally trip up downstream tooling that doesn't expect
/// them. Finds the matching close paren by depth count rather than regex,
/// since the assert's message argument can itself contain parens.
#[must_use]
pub fn strip_static_asserts(source: &str) -> String {
    const NEEDLE: &str = "_Static_assert";
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(pos) = rest.find(NEEDLE) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + NEEDLE.len()..];
        let Some(open) = after.find('(') else {
            out.push_str(NEEDLE);
            rest = after;
            continue;
        };
        let mut depth = 0i32;
        let mut end = None;
        for (i, c) in after[open..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(open + i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = end else {
            out.push_str(NEEDLE);
            rest = after;
            continue;
        };
        let tail = &after[close..];
        let skip_semi = tail.strip_prefix(';').map_or(0, |_| 1);
        rest = &tail[skip_semi..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_all_replaces_every_definition() {
        let src = "s32 a(void) {\n  return 1;\n}\n\nvoid b(void) {\n  a();\n}\n";
        let out = strip_function_bodies(src, StripScope::All, &HashSet::new()).unwrap();
        assert!(out.contains("s32 a(void);"));
        assert!(out.contains("void b(void);"));
        assert!(!out.contains('{'));
    }

    #[test]
    fn strip_all_keeps_named_function_body() {
        let src = "s32 a(void) {\n  return 1;\n}\n\nvoid b(void) {\n  a();\n}\n";
        let mut keep = HashSet::new();
        keep.insert("b".to_string());
        let out = strip_function_bodies(src, StripScope::All, &keep).unwrap();
        assert!(out.contains("s32 a(void);"));
        assert!(out.contains("void b(void) {\n  a();\n}"));
    }

    #[test]
    fn inline_only_skips_non_inline_functions() {
        let src = "s32 a(void) {\n  return 1;\n}\n\nstatic inline void b(void) {\n  a();\n}\n";
        let out = strip_function_bodies(src, StripScope::InlineOnly, &HashSet::new()).unwrap();
        assert!(out.contains("s32 a(void) {\n  return 1;\n}"));
        assert!(out.contains("void b(void);"));
    }

    #[test]
    fn strip_target_preserves_call_sites_and_other_bodies() {
        let src = "s32 a(void) {\n  return 1;\n}\n\nvoid b(void) {\n  a();\n}\n";
        let out = strip_target_function(src, "a").unwrap();
        assert!(out.contains("s32 a(void);"));
        assert!(out.contains("void b(void) {\n  a();\n}"));
        assert!(out.contains("a();"));
    }

    #[test]
    fn strip_target_missing_function_is_noop() {
        let src = "void b(void) {\n}\n";
        let out = strip_target_function(src, "missing").unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn build_context_strips_target_and_others() {
        let src = "s32 a(void) {\n  return 1;\n}\n\nvoid target(void) {\n  a();\n}\n";
        let out = build_context(src, "target").unwrap();
        assert!(out.contains("s32 a(void);"));
        assert!(out.contains("void target(void);"));
        assert!(!out.contains("return 1;"));
    }

    #[test]
    fn struct_union_enum_bodies_are_byte_identical() {
        let src = "struct Foo {\n  int x;\n  union { int a; float b; } u;\n};\n\nenum Bar { X, Y };\n\nvoid f(void) {\n}\n";
        let out = strip_function_bodies(src, StripScope::All, &HashSet::new()).unwrap();
        assert!(out.contains("struct Foo {\n  int x;\n  union { int a; float b; } u;\n};"));
        assert!(out.contains("enum Bar { X, Y };"));
    }

    #[test]
    fn strip_is_idempotent() {
        let src = "static s32 a(void) {\n  return 1;\n}\n";
        let once = strip_function_bodies(src, StripScope::All, &HashSet::new()).unwrap();
        let twice = strip_function_bodies(&once, StripScope::All, &HashSet::new()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_static_asserts_removes_statement_with_nested_parens() {
        let src = "_Static_assert(sizeof(int) == 4, \"bad size\");\nint x;\n";
        let out = strip_static_asserts(src);
        assert!(!out.contains("_Static_assert"));
        assert!(out.contains("int x;"));
    }
}
