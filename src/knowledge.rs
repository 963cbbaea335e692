//! Static taxonomy knowledge base indexed for retrieval.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Revision of the compiled-in statements. Bump whenever the text or order changes
/// so persisted stores built from an older revision can be detected.
pub const KNOWLEDGE_VERSION: u32 = 1;

const STATEMENTS: &[&str] = &[
    "eventClass 'System' refers to events related to system operations, startup, shutdown, and core system functions.",
    "eventClass 'Security' refers to events involving authentication, authorization, account management, and security audits.",
    "eventClass 'Application' refers to events related to application lifecycle, crashes, and software operations.",
    "eventClass 'Network' refers to events related to network connectivity, adapters, and network services.",
    "eventClass 'Hardware' refers to events related to hardware components, drivers, and device operations.",
    "eventOutcome 'Success' indicates the operation completed successfully without errors.",
    "eventOutcome 'Failure' indicates the operation failed to complete due to an error or issue.",
    "eventOutcome 'Warning' indicates the operation completed with warnings or potential issues.",
    "eventOutcome 'Information' indicates informational message about system status or operation progress.",
    "eventSeverity 1 is for informational events that provide general information about system operations.",
    "eventSeverity 2 is for low severity events that indicate minor issues not affecting system functionality.",
    "eventSeverity 3 is for medium severity events that may affect some functionality but system remains operational.",
    "eventSeverity 4 is for high severity events that may affect critical system functionality.",
    "eventSeverity 5 is for critical events that may cause system failure or security breach.",
    "eventDeviceCat 'Server' refers to server systems that provide services to clients.",
    "eventDeviceCat 'Workstation' refers to client machines used by end users.",
    "eventDeviceCat 'Network Device' refers to network infrastructure devices like switches, routers, and firewalls.",
    "eventDeviceCat 'Storage' refers to storage devices and systems.",
    "eventDeviceCat 'Security Device' refers to security-related devices and software.",
    "eventDeviceCat 'Application Server' refers to servers running specific applications.",
    "eventOperation 'Create' refers to operations that create new resources or entities.",
    "eventOperation 'Delete' refers to operations that remove resources or entities.",
    "eventOperation 'Modify' refers to operations that change existing resources or entities.",
    "eventOperation 'Read' refers to operations that read or retrieve information.",
    "eventOperation 'Login' refers to user authentication and session establishment.",
    "eventOperation 'Logout' refers to user session termination.",
    "eventOperation 'Start' refers to operations that initiate services or processes.",
    "eventOperation 'Stop' refers to operations that terminate services or processes.",
    "eventOperation 'Restart' refers to operations that restart services or systems.",
    "eventOperation 'Install' refers to operations that install software or updates.",
    "eventOperation 'Update' refers to operations that update existing software or configurations.",
    "eventOperation 'Scan' refers to operations that scan or check system resources.",
];

/// One taxonomy definition sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeStatement {
    /// Ordinal position; equals the vector row in the index.
    pub id: usize,
    /// Definition text.
    pub text: String,
}

/// Returns the compiled-in statements in their canonical order.
pub fn load() -> Vec<KnowledgeStatement> {
    STATEMENTS
        .iter()
        .enumerate()
        .map(|(id, text)| KnowledgeStatement {
            id,
            text: (*text).to_string(),
        })
        .collect()
}

/// Canonical text snapshot, one statement per line.
pub fn snapshot_text() -> String {
    let mut out = String::with_capacity(STATEMENTS.iter().map(|s| s.len() + 1).sum());
    for statement in STATEMENTS {
        out.push_str(statement);
        out.push('\n');
    }
    out
}

/// Writes the canonical snapshot to `path`. Nothing reads it back; it exists so
/// rebuilt stores can be diffed against the text they were embedded from.
pub fn write_snapshot(path: &Path) -> io::Result<()> {
    fs::write(path, snapshot_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{Field, SEVERITY_RANGE};

    #[test]
    fn load_is_deterministic_and_ordered() {
        let first = load();
        let second = load();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.iter().enumerate().all(|(pos, s)| s.id == pos));
    }

    #[test]
    fn every_taxonomy_value_has_a_statement() {
        let statements = load();
        for field in [
            Field::Class,
            Field::Outcome,
            Field::DeviceCategory,
            Field::Operation,
        ] {
            for value in field.domain() {
                let needle = format!("{} '{}'", field.key(), value);
                assert!(
                    statements.iter().any(|s| s.text.starts_with(&needle)),
                    "missing statement for {needle}"
                );
            }
        }
        for level in SEVERITY_RANGE {
            let needle = format!("eventSeverity {level} ");
            assert!(statements.iter().any(|s| s.text.starts_with(&needle)));
        }
    }

    #[test]
    fn snapshot_matches_statements() {
        let snapshot = snapshot_text();
        let lines: Vec<&str> = snapshot.lines().collect();
        assert_eq!(lines.len(), load().len());
        assert_eq!(lines[24], load()[24].text);
    }
}
