//! Errors from the Context Builder.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to set tree-sitter-c grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    #[error("source did not parse as valid C (tree-sitter returned no tree)")]
    ParseFailed,

    #[error("function definition node had no declarator")]
    MissingDeclarator,

    #[error("declarator text was not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("system preprocessor invocation failed: {0}")]
    Preprocessor(String),

    #[error("I/O error running preprocessor: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContextError>;
