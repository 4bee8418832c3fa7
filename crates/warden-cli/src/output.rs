//! Rendering a command's result (or error) to stdout, in either a
//! human-readable or a `--json` structured form, and the matching process
//! exit code.

use serde::Serialize;
use warden::error::WardenError;

/// Render `result` and return the process exit code.
pub fn finish<T: Serialize>(result: Result<T, WardenError>, json: bool) -> i32 {
    match result {
        Ok(value) => {
            print_ok(&value, json);
            0
        }
        Err(err) => {
            print_err(&err, json);
            err.exit_code()
        }
    }
}

fn print_ok<T: Serialize>(value: &T, json: bool) {
    if json {
        let envelope = serde_json::json!({"success": true, "result": value});
        println!("{envelope}");
    } else if let Ok(pretty) = serde_json::to_string_pretty(value) {
        println!("{pretty}");
    }
}

fn print_err(err: &WardenError, json: bool) {
    if json {
        let (message, hint) = err.message_and_hint();
        let envelope = serde_json::json!({
            "success": false,
            "error": {"kind": err.kind(), "message": message, "hint": hint},
        });
        eprintln!("{envelope}");
    } else {
        eprintln!("error: {err}");
    }
}
