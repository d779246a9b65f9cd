use std::collections::HashSet;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadData,
    WriteData,
    ViewAudit,
    ManageAudit,
}

/// Role → capabilities, looked up once per request and passed down
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    pub fn for_role(role: &str) -> Self {
        use Capability::*;
        let granted: &[Capability] = match role.trim().to_ascii_lowercase().as_str() {
            "admin" | "root" => &[ReadData, WriteData, ViewAudit, ManageAudit],
            "editor" => &[ReadData, WriteData],
            "viewer" | "readonly" => &[ReadData],
            _ => &[],
        };
        Self(granted.iter().copied().collect())
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_capabilities() {
        let admin = CapabilitySet::for_role("Admin");
        assert!(admin.allows(Capability::ManageAudit));

        let editor = CapabilitySet::for_role("editor");
        assert!(editor.allows(Capability::WriteData));
        assert!(!editor.allows(Capability::ViewAudit));

        let viewer = CapabilitySet::for_role("viewer");
        assert!(viewer.allows(Capability::ReadData));
        assert!(!viewer.allows(Capability::WriteData));

        assert!(CapabilitySet::for_role("guest").is_empty());
    }
}
