use serde::{Deserialize, Serialize};

/// Sandbox capabilities that can be granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// `list_servers`, `list_tools`, `search_tools`.
    Discover,
    /// `load_tool` and calling the returned binding.
    LoadTool,
    /// `load_state`.
    StateRead,
    /// `save_state`.
    StateWrite,
    /// `print` output captured into stdout.
    Print,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 5] = [
        CapabilityKind::Discover,
        CapabilityKind::LoadTool,
        CapabilityKind::StateRead,
        CapabilityKind::StateWrite,
        CapabilityKind::Print,
    ];
}

/// A capability request with optional scope.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub kind: CapabilityKind,
    pub scope: Option<String>, // e.g., "server/tool", state key
}

impl CapabilityRequest {
    pub fn new(kind: CapabilityKind) -> Self {
        Self { kind, scope: None }
    }

    pub fn with_scope(kind: CapabilityKind, scope: impl Into<String>) -> Self {
        Self {
            kind,
            scope: Some(scope.into()),
        }
    }

    pub fn load_tool(server: &str, name: &str) -> Self {
        Self::with_scope(CapabilityKind::LoadTool, format!("{server}/{name}"))
    }

    pub fn state_write(key: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::StateWrite, key)
    }

    pub fn state_read(key: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::StateRead, key)
    }
}
