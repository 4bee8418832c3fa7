//! The `warden` CLI binary's modules: context assembly, typed command
//! functions, and output rendering. The binary entry point is in
//! `main.rs`, which owns argument parsing and dispatch.

pub mod commands;
pub mod context;
pub mod output;
