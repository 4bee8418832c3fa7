//! Stub marker management: locating, listing, and inserting the `/// #Name`
//! sentinel comments that placeholder unimplemented functions in source
//! files, in address order.
//!
//! Line-based rather than a tree-sitter parse: a stub marker is a comment,
//! invisible to the C grammar, so a plain regex over lines is enough to
//! recognize both a marker and a declarator's name.

use std::path::Path;

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use warden_core::model::FunctionName;

use crate::error::WardenError;
use crate::splits::SplitsMap;

/// Address conventionally encoded in a function's name, if any, tried
/// before falling back to an external [`SplitsMap`].
fn name_embedded_address(name: &str) -> Option<u32> {
    FunctionName::new(name).ok()?.embedded_address()
}

/// One stub marker or function definition found while scanning a file, in
/// the order it was found (not yet address-sorted).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceItem {
    pub line: usize,
    pub address: u32,
    pub kind: ItemKind,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ItemKind {
    Stub,
    Definition,
}

static STUB_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^///\s*#\s*(\w+)\s*$").unwrap());
static DEF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:static\s+)?(?:inline\s+)?[\w*]+[\s*]+(\w+)\s*\(").unwrap());

/// Where (and what kind of thing) a function already appears in `content`,
/// if it does. Returns 1-indexed line numbers.
#[must_use]
pub fn find_existing(content: &str, function: &str) -> Option<(usize, ItemKind)> {
    for (i, line) in content.lines().enumerate() {
        if let Some(caps) = STUB_PATTERN.captures(line)
            && &caps[1] == function
        {
            return Some((i + 1, ItemKind::Stub));
        }
        if let Some(caps) = DEF_PATTERN.captures(line)
            && &caps[1] == function
        {
            return Some((i + 1, ItemKind::Definition));
        }
    }
    None
}

/// Every stub marker and function definition in `content` whose name
/// resolves to an address via `splits`, sorted ascending by address —
/// stubs and definitions in a file are maintained in symbol-address order.
pub fn parse_items(content: &str, splits: &dyn SplitsMap) -> Vec<SourceItem> {
    let mut items = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if let Some(caps) = STUB_PATTERN.captures(line) {
            let name = caps[1].to_string();
            if let Some(addr) = resolve_address(&name, splits) {
                items.push(SourceItem { line: i + 1, address: addr, kind: ItemKind::Stub, name });
            }
            continue;
        }
        if let Some(caps) = DEF_PATTERN.captures(line) {
            let name = caps[1].to_string();
            if let Some(addr) = resolve_address(&name, splits) {
                items.push(SourceItem { line: i + 1, address: addr, kind: ItemKind::Definition, name });
            }
        }
    }
    items.sort_by_key(|i| i.address);
    items
}

fn resolve_address(name: &str, splits: &dyn SplitsMap) -> Option<u32> {
    name_embedded_address(name).or_else(|| splits.address_for(name))
}

/// Find the 1-indexed line a stub for `target_address` should be inserted
/// before, maintaining ascending address order. When the file has no
/// resolvable items yet, inserts after the last `#include` (or at the top).
#[must_use]
pub fn find_insertion_line(content: &str, target_address: u32, splits: &dyn SplitsMap) -> usize {
    let items = parse_items(content, splits);
    if items.is_empty() {
        let last_include = content
            .lines()
            .enumerate()
            .filter(|(_, l)| l.starts_with("#include"))
            .map(|(i, _)| i + 1)
            .next_back();
        return last_include.map_or(1, |l| l + 1);
    }

    for item in &items {
        if target_address < item.address {
            return item.line;
        }
    }

    let last = items.last().expect("checked non-empty above");
    match last.kind {
        ItemKind::Stub => last.line + 1,
        ItemKind::Definition => end_of_function_line(content, last.line) + 1,
    }
}

/// Given the 1-indexed line a function definition starts on, find the
/// 1-indexed line after its closing brace, by brace-depth counting.
fn end_of_function_line(content: &str, def_line: usize) -> usize {
    let lines: Vec<&str> = content.lines().collect();
    let mut depth = 0i32;
    let mut seen_open = false;
    for (i, line) in lines.iter().enumerate().skip(def_line - 1) {
        depth += line.matches('{').count() as i32;
        depth -= line.matches('}').count() as i32;
        if line.contains('{') {
            seen_open = true;
        }
        if seen_open && depth == 0 {
            return i + 1;
        }
    }
    lines.len()
}

/// Insert a stub marker for `function` before 1-indexed `insert_line`,
/// adding blank-line separators so the marker doesn't run into adjacent
/// non-stub content ("surrounded by the appropriate blank lines").
#[must_use]
pub fn insert_stub(content: &str, insert_line: usize, function: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();
    let marker = format!("/// #{function}");
    let idx = (insert_line - 1).min(lines.len());

    let needs_blank_before = idx > 0 && {
        let prev = lines[idx - 1].trim();
        !prev.is_empty() && !prev.starts_with("/// #")
    };
    let needs_blank_after = idx < lines.len() && {
        let next = lines[idx].trim();
        !next.is_empty() && !next.starts_with("/// #")
    };

    let mut insertion = Vec::new();
    if needs_blank_before {
        insertion.push(String::new());
    }
    insertion.push(marker);
    if needs_blank_after {
        insertion.push(String::new());
    }

    for (offset, line) in insertion.into_iter().enumerate() {
        lines.insert(idx + offset, line);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// End-to-end `stub add`: resolve the function's address, find its source
/// file, and insert the marker in the right place. No-ops (returns the
/// existing line/kind) if the function already appears in the file.
pub fn add_stub(
    src_root: &Path,
    function: &str,
    splits: &dyn SplitsMap,
) -> Result<StubAddOutcome, WardenError> {
    let address = name_embedded_address(function)
        .or_else(|| splits.address_for(function))
        .ok_or_else(|| WardenError::SourceFileNotFound { function: function.to_owned() })?;

    let source_file = splits
        .source_file_for(function)
        .ok_or_else(|| WardenError::SourceFileNotFound { function: function.to_owned() })?;

    let full_path = src_root.join(&source_file);
    let content = std::fs::read_to_string(&full_path)?;

    if let Some((line, kind)) = find_existing(&content, function) {
        return Ok(StubAddOutcome::AlreadyExists { source_file, line, kind });
    }

    let insert_line = find_insertion_line(&content, address, splits);
    let new_content = insert_stub(&content, insert_line, function);
    std::fs::write(&full_path, new_content)?;

    Ok(StubAddOutcome::Inserted { source_file, address })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum StubAddOutcome {
    Inserted { source_file: String, address: u32 },
    AlreadyExists { source_file: String, line: usize, kind: ItemKind },
}

/// Replace `function`'s stub marker if one exists, otherwise its existing
/// definition, with `new_code`.
///
/// `new_code` is inserted verbatim, with exactly one blank line before and
/// after it.
pub fn replace_function(content: &str, function: &str, new_code: &str) -> Result<String, WardenError> {
    let (line, kind) = find_existing(content, function)
        .ok_or_else(|| WardenError::SourceFileNotFound { function: function.to_owned() })?;

    let lines: Vec<&str> = content.lines().collect();
    let (start, end) = match kind {
        ItemKind::Stub => (line, line),
        ItemKind::Definition => (line, end_of_function_line(content, line)),
    };

    let mut out_lines: Vec<String> = lines[..start - 1].iter().map(|s| (*s).to_owned()).collect();
    out_lines.push(new_code.trim_end().to_owned());
    out_lines.extend(lines[end..].iter().map(|s| (*s).to_owned()));

    let mut out = out_lines.join("\n");
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splits::JsonSplitsMap;

    #[test]
    fn finds_existing_stub() {
        let content = "#include <foo.h>\n\n/// #Bar_80006000\n";
        assert_eq!(find_existing(content, "Bar_80006000"), Some((3, ItemKind::Stub)));
    }

    #[test]
    fn finds_existing_definition() {
        let content = "void Bar_80006000(void) {\n  return;\n}\n";
        assert_eq!(find_existing(content, "Bar_80006000"), Some((1, ItemKind::Definition)));
    }

    #[test]
    fn insertion_line_empty_file_is_after_includes() {
        let content = "#include <foo.h>\n#include <bar.h>\n";
        let splits = JsonSplitsMap::empty();
        assert_eq!(find_insertion_line(content, 0x8000_1000, &splits), 3);
    }

    #[test]
    fn insertion_respects_address_order() {
        let content = "/// #Foo_80001000\n\n/// #Baz_80003000\n";
        let splits = JsonSplitsMap::empty();
        // Bar_80002000 belongs between Foo and Baz.
        let line = find_insertion_line(content, 0x8000_2000, &splits);
        assert_eq!(line, 3);
    }

    #[test]
    fn insert_stub_adds_blank_separators() {
        let content = "void Foo_80001000(void) {\n  return;\n}\n";
        let out = insert_stub(content, 4, "Bar_80002000");
        assert!(out.contains("}\n\n/// #Bar_80002000\n"));
    }

    #[test]
    fn replace_function_swaps_stub_marker() {
        let content = "#include <foo.h>\n\n/// #Bar_80006000\n";
        let out = replace_function(content, "Bar_80006000", "void Bar_80006000(void) {\n  return;\n}").unwrap();
        assert!(out.contains("void Bar_80006000(void) {\n  return;\n}\n"));
        assert!(!out.contains("/// #Bar_80006000"));
    }

    #[test]
    fn replace_function_swaps_existing_definition() {
        let content = "void Bar_80006000(void) {\n  old_impl();\n}\n\nvoid next(void) {}\n";
        let out = replace_function(content, "Bar_80006000", "void Bar_80006000(void) {\n  new_impl();\n}").unwrap();
        assert!(out.contains("new_impl();"));
        assert!(!out.contains("old_impl();"));
        assert!(out.contains("void next(void) {}"));
    }

    #[test]
    fn replace_function_missing_is_an_error() {
        let content = "void other(void) {}\n";
        assert!(replace_function(content, "Bar_80006000", "void Bar_80006000(void) {}").is_err());
    }
}
