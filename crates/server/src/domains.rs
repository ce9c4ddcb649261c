//! Known federation domains and how to reach them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub domain: String,
    #[serde(default)]
    pub scheme: Scheme,
    /// `host[:port]` the domain's federation traffic goes to. Empty when the
    /// domain is known but not yet reachable.
    #[serde(default)]
    pub host: String,
}

type DomainTable = Arc<BTreeMap<String, DomainInfo>>;

/// Directory of federation domains, replaced as a whole on topology updates.
/// Readers always see one consistent table.
#[derive(Debug, Default)]
pub struct DomainDirectory {
    table: RwLock<DomainTable>,
}

impl DomainDirectory {
    pub fn new(domains: Vec<DomainInfo>) -> Self {
        let dir = Self::default();
        dir.replace(domains);
        dir
    }

    fn current(&self) -> DomainTable {
        match self.table.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn list_all_domains(&self) -> Vec<DomainInfo> {
        self.current().values().cloned().collect()
    }

    pub fn resolve_host(&self, domain: &str) -> Option<String> {
        self.current()
            .get(domain)
            .map(|info| info.host.clone())
            .filter(|host| !host.is_empty())
    }

    pub fn replace(&self, domains: Vec<DomainInfo>) {
        let table: BTreeMap<_, _> = domains
            .into_iter()
            .map(|info| (info.domain.clone(), info))
            .collect();
        tracing::info!(
            name = "domains.replace",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            count = table.len(),
            message = "federation domain table replaced"
        );
        match self.table.write() {
            Ok(mut guard) => *guard = Arc::new(table),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(table),
        }
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(domain: &str, host: &str) -> DomainInfo {
        DomainInfo {
            domain: domain.into(),
            scheme: Scheme::Https,
            host: host.into(),
        }
    }

    #[test]
    fn resolves_only_domains_with_a_host() {
        let dir = DomainDirectory::new(vec![
            info("a.example", "a.example:8448"),
            info("b.example", ""),
        ]);
        assert_eq!(dir.resolve_host("a.example").as_deref(), Some("a.example:8448"));
        assert_eq!(dir.resolve_host("b.example"), None);
        assert_eq!(dir.resolve_host("c.example"), None);
        assert_eq!(dir.list_all_domains().len(), 2);
    }

    #[test]
    fn replace_drops_previous_entries() {
        let dir = DomainDirectory::new(vec![info("a.example", "a")]);
        dir.replace(vec![info("b.example", "b")]);
        assert_eq!(dir.resolve_host("a.example"), None);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn scheme_defaults_to_https() {
        let parsed: DomainInfo = serde_json::from_str(r#"{"domain":"x","host":"x"}"#).unwrap();
        assert_eq!(parsed.scheme, Scheme::Https);
        let plain: DomainInfo =
            serde_json::from_str(r#"{"domain":"x","scheme":"http","host":"x"}"#).unwrap();
        assert_eq!(plain.scheme, Scheme::Http);
    }
}
