//! Extraction of program event payloads from transaction log messages.
//!
//! Solana logs are flat text. `Program data:` lines carry no program id, so
//! the emitting program is tracked with an invoke stack built from the
//! `invoke [n]` / `success` / `failed` lines around them.

use crate::types::ProgramLog;
use crate::utils::logging::{self, LogLevel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const PROGRAM_PREFIX: &str = "Program ";
const DATA_PREFIX: &str = "Program data: ";

/// Returns the decoded `Program data:` payloads emitted directly by `program_id`.
#[must_use]
pub fn extract_program_data(program_id: &str, logs: &[String]) -> Vec<Vec<u8>> {
    let mut stack: Vec<&str> = Vec::new();
    let mut payloads = Vec::new();

    for line in logs {
        if let Some(encoded) = line.strip_prefix(DATA_PREFIX) {
            if stack.last() != Some(&program_id) {
                continue;
            }
            // sol_log_data writes one base64 chunk per slice, space separated.
            let mut data = Vec::new();
            for chunk in encoded.split_whitespace() {
                match STANDARD.decode(chunk) {
                    Ok(bytes) => data.extend(bytes),
                    Err(e) => {
                        logging::log(
                            LogLevel::Warning,
                            &format!("Skipping undecodable program data: {e}"),
                        );
                        data.clear();
                        break;
                    }
                }
            }
            if !data.is_empty() {
                payloads.push(data);
            }
            continue;
        }

        let Some(rest) = line.strip_prefix(PROGRAM_PREFIX) else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let (Some(id), Some(action)) = (parts.next(), parts.next()) else {
            continue;
        };

        match action {
            "invoke" => stack.push(id),
            "success" | "failed:" | "failed" => {
                if stack.last() == Some(&id) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    payloads
}

/// Wraps every payload from one transaction into a [`ProgramLog`].
#[must_use]
pub fn program_logs(program_id: &str, slot: u64, signature: &str, logs: &[String]) -> Vec<ProgramLog> {
    extract_program_data(program_id, logs)
        .into_iter()
        .map(|data| ProgramLog {
            slot,
            signature: signature.to_string(),
            data,
        })
        .collect()
}
