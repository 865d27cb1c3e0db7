//! Static node capability profile.
//!
//! The declaration table is the single source for the `caps`,
//! `commands`, and `permissions` views sent in the connect params.

use serde_json::{Map, Value};

pub const MIN_PROTOCOL_VERSION: u32 = 3;
pub const MAX_PROTOCOL_VERSION: u32 = 3;

struct CapabilityDeclaration {
    cap: &'static str,
    command: &'static str,
    default_grant: bool,
}

const CAPABILITY_DECLARATIONS: &[CapabilityDeclaration] = &[
    CapabilityDeclaration {
        cap: "file",
        command: "file.read",
        default_grant: true,
    },
    CapabilityDeclaration {
        cap: "file",
        command: "file.write",
        default_grant: false,
    },
    CapabilityDeclaration {
        cap: "process",
        command: "process.exec",
        default_grant: true,
    },
    CapabilityDeclaration {
        cap: "system",
        command: "system.screenshot",
        default_grant: true,
    },
    CapabilityDeclaration {
        cap: "system",
        command: "system.info",
        default_grant: true,
    },
];

pub fn client_id() -> &'static str {
    "node-host"
}

pub fn client_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Capability categories, unique, in first-occurrence order.
pub fn caps() -> Vec<String> {
    let mut seen = Vec::new();
    for declaration in CAPABILITY_DECLARATIONS {
        if !seen.iter().any(|cap| cap == declaration.cap) {
            seen.push(declaration.cap.to_string());
        }
    }
    seen
}

/// Concrete commands in declaration order.
pub fn commands() -> Vec<String> {
    CAPABILITY_DECLARATIONS
        .iter()
        .map(|declaration| declaration.command.to_string())
        .collect()
}

/// Default permission grants, command → bool.
pub fn permissions() -> Value {
    let mut out = Map::new();
    for declaration in CAPABILITY_DECLARATIONS {
        out.insert(
            declaration.command.to_string(),
            Value::Bool(declaration.default_grant),
        );
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_are_unique_in_first_occurrence_order() {
        assert_eq!(caps(), ["file", "process", "system"]);
    }

    #[test]
    fn commands_follow_declaration_order() {
        assert_eq!(
            commands(),
            [
                "file.read",
                "file.write",
                "process.exec",
                "system.screenshot",
                "system.info",
            ]
        );
    }

    #[test]
    fn permissions_grant_everything_but_file_write() {
        let permissions = permissions();
        assert_eq!(permissions["file.read"], true);
        assert_eq!(permissions["file.write"], false);
        assert_eq!(permissions["process.exec"], true);
        assert_eq!(permissions["system.screenshot"], true);
        assert_eq!(permissions["system.info"], true);
        assert_eq!(permissions.as_object().unwrap().len(), 5);
    }

    #[test]
    fn protocol_versions_match() {
        assert_eq!(MIN_PROTOCOL_VERSION, 3);
        assert_eq!(MAX_PROTOCOL_VERSION, 3);
    }

    #[test]
    fn client_identity_is_stable() {
        assert_eq!(client_id(), "node-host");
        assert!(!client_version().is_empty());
    }
}
