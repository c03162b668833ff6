//! Policy configuration and enforcement.

use crate::{CapabilityKind, CapabilityRequest, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Policy configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Tool patterns that may be loaded.
    #[serde(default)]
    pub allow: AllowRules,

    /// Capabilities that are explicitly denied (overrides allow).
    #[serde(default)]
    pub deny: DenyRules,
}

/// Rules for allowed tool loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowRules {
    /// Loadable tools: `*`, `server/*`, or `server/name`.
    #[serde(default = "allow_all")]
    pub tools: Vec<String>,
}

impl Default for AllowRules {
    fn default() -> Self {
        Self { tools: allow_all() }
    }
}

fn allow_all() -> Vec<String> {
    vec!["*".to_string()]
}

/// Rules for denied capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyRules {
    /// Deny all capabilities of these kinds.
    #[serde(default)]
    pub all: HashSet<CapabilityKind>,

    /// Tools that may never be loaded, same pattern syntax as the allowlist.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Result of a capability check.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert into a `Result`, mapping a denial to [`Error::Denied`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(Error::Denied(reason)),
        }
    }
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Everything allowed.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Discovery and reads only: no tool loads, no state writes.
    pub fn read_only() -> Self {
        let mut deny_all = HashSet::new();
        deny_all.insert(CapabilityKind::LoadTool);
        deny_all.insert(CapabilityKind::StateWrite);

        Self {
            allow: AllowRules { tools: Vec::new() },
            deny: DenyRules {
                all: deny_all,
                tools: Vec::new(),
            },
        }
    }

    /// Whether primitives of `kind` should be bound into the namespace at all.
    pub fn exposes(&self, kind: CapabilityKind) -> bool {
        !self.deny.all.contains(&kind)
    }

    /// Check if a capability request is allowed.
    pub fn check(&self, request: &CapabilityRequest) -> Decision {
        if self.deny.all.contains(&request.kind) {
            return Decision::Deny {
                reason: format!("{:?} is denied by policy", request.kind),
            };
        }

        if request.kind != CapabilityKind::LoadTool {
            return Decision::Allow;
        }

        let Some(tool) = request.scope.as_deref() else {
            return if self.allow.tools.is_empty() {
                Decision::Deny {
                    reason: "no tools are allowed by policy".to_string(),
                }
            } else {
                Decision::Allow
            };
        };

        if self.deny.tools.iter().any(|p| tool_matches(p, tool)) {
            return Decision::Deny {
                reason: format!("tool {tool} is denied by policy"),
            };
        }

        if self.allow.tools.iter().any(|p| tool_matches(p, tool)) {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!("tool {tool} not in allowlist"),
            }
        }
    }
}

/// Match `server/name` against `*`, `server/*` or an exact `server/name`.
fn tool_matches(pattern: &str, tool: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(server) = pattern.strip_suffix("/*") {
        return tool
            .split_once('/')
            .is_some_and(|(s, _)| s == server);
    }
    pattern == tool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_everything() {
        let policy = Policy::default();
        for kind in CapabilityKind::ALL {
            assert!(policy.exposes(kind));
        }
        assert!(policy.check(&CapabilityRequest::load_tool("weather", "marine_forecast")).is_allowed());
    }

    #[test]
    fn test_read_only_denies_loads_and_writes() {
        let policy = Policy::read_only();
        assert!(!policy.check(&CapabilityRequest::load_tool("weather", "marine_forecast")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::state_write("favs")).is_allowed());
        assert!(policy.check(&CapabilityRequest::state_read("favs")).is_allowed());
        assert!(!policy.exposes(CapabilityKind::StateWrite));
        assert!(policy.exposes(CapabilityKind::Discover));
    }

    #[test]
    fn test_server_wildcard() {
        assert!(tool_matches("weather/*", "weather/marine_forecast"));
        assert!(!tool_matches("weather/*", "weatherman/forecast"));
        assert!(tool_matches("weather/marine_forecast", "weather/marine_forecast"));
        assert!(!tool_matches("weather/marine_forecast", "weather/tides"));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[allow]
tools = ["maritime-data/*", "weather/marine_forecast"]

[deny]
all = ["print"]
tools = ["maritime-data/port_info"]
"#;
        let policy = Policy::parse(toml).unwrap();

        // Allowed
        assert!(policy.check(&CapabilityRequest::load_tool("maritime-data", "vessel_tracking")).is_allowed());
        assert!(policy.check(&CapabilityRequest::load_tool("weather", "marine_forecast")).is_allowed());

        // Denied
        assert!(!policy.check(&CapabilityRequest::load_tool("maritime-data", "port_info")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::load_tool("berth-management", "check_availability")).is_allowed());
        assert!(!policy.exposes(CapabilityKind::Print));
    }

    #[test]
    fn test_missing_allow_table_defaults_to_all_tools() {
        let policy = Policy::parse("[deny]\nall = [\"state_write\"]\n").unwrap();
        assert!(policy.check(&CapabilityRequest::load_tool("a", "b")).is_allowed());
        assert!(!policy.exposes(CapabilityKind::StateWrite));
    }

    #[test]
    fn test_denial_into_result() {
        let err = Policy::read_only()
            .check(&CapabilityRequest::load_tool("a", "b"))
            .into_result()
            .unwrap_err();
        assert!(err.to_string().starts_with("CapabilityError: "));
    }

    #[test]
    fn test_serializes_to_json() {
        let json = serde_json::to_value(Policy::default()).unwrap();
        assert_eq!(json["allow"]["tools"][0], "*");
    }
}
