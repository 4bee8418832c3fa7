//! tree-sitter-c plumbing shared by the stripping passes in [`crate::strip`].
//!
//! Everything here works in terms of byte offsets into the original source
//! buffer, since tree-sitter nodes carry byte ranges rather than owned
//! strings; callers rebuild text by slicing the original buffer and splicing
//! in replacements, never by mutating the tree itself.

use tree_sitter::{Node, Parser, Tree};

use crate::error::{ContextError, Result};

pub fn parse(source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_c::LANGUAGE.into())?;
    parser.parse(source, None).ok_or(ContextError::ParseFailed)
}

/// Every `function_definition` node in the tree, in source order, found by
/// walking the whole tree rather than just direct children of the root — a
/// definition can appear nested inside a `preproc_if`/`preproc_ifdef` branch,
/// which tree-sitter still parses as a normal sibling subtree.
pub fn function_definitions<'t>(tree: &'t Tree, source: &[u8]) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    collect_function_definitions(tree.root_node(), source, &mut out);
    out
}

fn collect_function_definitions<'t>(node: Node<'t>, source: &[u8], out: &mut Vec<Node<'t>>) {
    if node.kind() == "function_definition" {
        out.push(node);
        // A function_definition's body is a compound_statement; nested
        // function definitions don't occur in C, so no need to recurse
        // into it looking for more.
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_function_definitions(child, source, out);
    }
}

/// The identifier naming the function a `function_definition` or
/// `function_declarator` node declares, e.g. `lbl_80123456` out of
/// `static s32 lbl_80123456(void)`.
///
/// Declarators nest: a pointer return type wraps the function_declarator in
/// a `pointer_declarator`, and `void (*f(void))(int)`-style declarators
/// nest further. We recurse down through the wrapper kinds tree-sitter-c
/// uses for this until we reach the innermost `identifier`.
#[must_use]
pub fn declarator_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    let declarator = node.child_by_field_name("declarator")?;
    identifier_in_declarator(declarator, source)
}

fn identifier_in_declarator(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => node.utf8_text(source).ok().map(str::to_owned),
        "function_declarator" | "pointer_declarator" | "array_declarator" | "parenthesized_declarator" => {
            let inner = node.child_by_field_name("declarator")?;
            identifier_in_declarator(inner, source)
        }
        _ => {
            // Fall back to a depth-first search for an identifier child;
            // covers declarator shapes not explicitly listed above.
            let mut cursor = node.walk();
            node.children(&mut cursor)
                .find_map(|child| identifier_in_declarator(child, source))
        }
    }
}

/// The `compound_statement` body of a `function_definition`, if present.
#[must_use]
pub fn body_node<'t>(def: Node<'t>) -> Option<Node<'t>> {
    def.child_by_field_name("body")
}

/// Rewrite a `function_definition` node into a bare declaration: its source
/// bytes up to (not including) the body, with `static`/`inline` qualifiers
/// removed and a trailing `;` plus a comment marker appended.
///
/// Per the body-stripping contract, the result must still be a valid
/// top-level declaration so the file keeps parsing (and so a second strip
/// pass is a no-op: there's no `function_definition` node left to find).
pub fn strip_definition_to_declaration(def: Node<'_>, source: &str, marker: &str) -> Result<String> {
    let body = body_node(def).ok_or(ContextError::MissingDeclarator)?;
    let decl_start = def.start_byte();
    let decl_end = body.start_byte();
    let raw = source
        .get(decl_start..decl_end)
        .ok_or(ContextError::MissingDeclarator)?;
    let declaration = strip_storage_qualifiers(raw.trim_end());
    Ok(format!("{declaration}; {marker}"))
}

/// Remove standalone `static`/`inline` keyword tokens from a declaration
/// prefix, leaving everything else (including whitespace runs around the
/// removed token collapsed to a single space) intact.
fn strip_storage_qualifiers(decl: &str) -> String {
    let mut words: Vec<&str> = Vec::new();
    for word in decl.split_whitespace() {
        if word == "static" || word == "inline" {
            continue;
        }
        words.push(word);
    }
    // split_whitespace collapses all runs, including the single space
    // between return type and declarator, so rejoin on a single space.
    // The declarator itself may contain no internal whitespace that
    // matters (`lbl_80123456(void)` stays one token), so this is safe.
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_top_level_definition() {
        let src = "static s32 foo(void) {\n  return 1;\n}\n";
        let tree = parse(src).unwrap();
        let defs = function_definitions(&tree, src.as_bytes());
        assert_eq!(defs.len(), 1);
        assert_eq!(declarator_name(defs[0], src.as_bytes()).as_deref(), Some("foo"));
    }

    #[test]
    fn finds_definition_nested_in_preproc_branch() {
        let src = "#ifdef FOO\nvoid bar(void) {\n  return;\n}\n#endif\n";
        let tree = parse(src).unwrap();
        let defs = function_definitions(&tree, src.as_bytes());
        assert_eq!(defs.len(), 1);
        assert_eq!(declarator_name(defs[0], src.as_bytes()).as_deref(), Some("bar"));
    }

    #[test]
    fn pointer_return_type_declarator_name() {
        let src = "char *make_name(int n) {\n  return 0;\n}\n";
        let tree = parse(src).unwrap();
        let defs = function_definitions(&tree, src.as_bytes());
        assert_eq!(defs.len(), 1);
        assert_eq!(
            declarator_name(defs[0], src.as_bytes()).as_deref(),
            Some("make_name")
        );
    }

    #[test]
    fn strip_removes_static_and_inline() {
        let src = "static inline s32 foo(void) {\n  return 1;\n}\n";
        let tree = parse(src).unwrap();
        let defs = function_definitions(&tree, src.as_bytes());
        let out = strip_definition_to_declaration(defs[0], src, "/* stripped */").unwrap();
        assert_eq!(out, "s32 foo(void); /* stripped */");
    }

    #[test]
    fn strip_keeps_non_qualifier_tokens() {
        let src = "unsigned long foo(int x) {\n  return x;\n}\n";
        let tree = parse(src).unwrap();
        let defs = function_definitions(&tree, src.as_bytes());
        let out = strip_definition_to_declaration(defs[0], src, "/* m */").unwrap();
        assert_eq!(out, "unsigned long foo(int x); /* m */");
    }

    #[test]
    fn struct_specifier_is_not_a_function_definition() {
        let src = "struct Foo { int x; int y; };\n";
        let tree = parse(src).unwrap();
        let defs = function_definitions(&tree, src.as_bytes());
        assert!(defs.is_empty());
    }
}
