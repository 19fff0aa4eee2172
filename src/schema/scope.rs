//! Billing scope descriptor
//!
//! A scope is an Azure-style billing boundary: a subscription, resource
//! group or management group path over which cost can be queried. The
//! human-readable name is derived once at parse time and used for
//! logging and lineage.

/// One billing scope: the resource path and a derived display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDescriptor {
    /// Scope path as used in the query URL, without surrounding slashes.
    pub path: String,
    /// Short human-readable name.
    pub name: String,
}

impl ScopeDescriptor {
    /// Parse a configured scope path into a descriptor.
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim().trim_matches('/').to_string();
        let name = derive_name(&trimmed);
        Self {
            path: trimmed,
            name,
        }
    }

    /// Parse a list of configured scope paths, skipping blanks.
    pub fn parse_all(paths: &[String]) -> Vec<Self> {
        paths
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| Self::parse(p))
            .collect()
    }
}

impl std::fmt::Display for ScopeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Derive a short name from a scope path.
///
/// `subscriptions/{id}` and management-group paths get stable prefixes;
/// anything else falls back to the last path segment.
fn derive_name(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    if let Some(idx) = parts.iter().position(|p| *p == "subscriptions") {
        if let Some(sub_id) = parts.get(idx + 1) {
            let short: String = sub_id.chars().take(8).collect();
            return format!("subscription-{short}");
        }
    }

    if let Some(idx) = parts.iter().position(|p| *p == "managementGroups") {
        if let Some(mg_id) = parts.get(idx + 1) {
            return format!("mg-{mg_id}");
        }
    }

    match parts.iter().rev().find(|p| !p.is_empty()) {
        Some(last) => last.to_string(),
        None => path.chars().take(20).collect(),
    }
}
