//! State command implementation.

use serde_json::json;
use smuggler_core::OperationState;
use std::path::Path;

/// Prints the incremental export state recorded in `dir`.
pub fn run(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(loaded) = OperationState::load(dir)? else {
        println!("No incremental export state in {:?}", dir);
        return Ok(());
    };
    let state = &loaded.state;

    match format {
        "json" => {
            let value = json!({
                "LastDocEtag": state.last_doc_etag,
                "LastDocDeleteEtag": state.last_doc_delete_etag,
                "Legacy": loaded.legacy,
                "FilePath": state.file_path,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        "text" => {
            println!("Export state of {:?}", dir);
            println!("  Last document etag: {}", state.last_doc_etag);
            if loaded.legacy {
                println!("  Last deletion etag: (not tracked, legacy state file)");
            } else {
                println!("  Last deletion etag: {}", state.last_doc_delete_etag);
            }
            if let Some(path) = &state.file_path {
                println!("  Last file: {:?}", path);
            }
        }
        other => return Err(format!("Unknown format '{}'", other).into()),
    }
    Ok(())
}
