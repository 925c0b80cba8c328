//! The pack catalog: which prebuilt native dependency bundles a package
//! needs in its build sandbox.

use serde::{Deserialize, Serialize};

use crate::PlannerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackCatalogEntry {
    pub name: String,
    pub version: String,
    /// Substrings of package names this pack applies to.
    #[serde(default)]
    pub matches: Vec<String>,
    /// Restrict to a build backend (setuptools, maturin, ...) when set.
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub recipe_digest: String,
    /// Names of other packs this pack needs installed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackCatalog {
    pub entries: Vec<PackCatalogEntry>,
}

impl PackCatalog {
    /// Select the packs for a package: substring match on the name plus an
    /// optional backend match, deduplicated by pack name.
    pub fn select(&self, package: &str, backend: Option<&str>) -> Vec<&PackCatalogEntry> {
        let package = package.to_lowercase();
        let mut selected: Vec<&PackCatalogEntry> = Vec::new();
        for entry in &self.entries {
            let name_match = entry
                .matches
                .iter()
                .any(|needle| package.contains(&needle.to_lowercase()));
            let backend_match = match (&entry.backend, backend) {
                (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
                (Some(_), None) => false,
                (None, _) => true,
            };
            if name_match && backend_match && !selected.iter().any(|e| e.name == entry.name) {
                selected.push(entry);
            }
        }
        selected
    }

    pub fn get(&self, name: &str) -> Option<&PackCatalogEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Topologically order a pack set by `depends_on`, erroring on cycles.
    /// Misconfigured catalogs are the only way to encode one.
    pub fn topo_order<'a>(
        &'a self,
        packs: &[&'a PackCatalogEntry],
    ) -> Result<Vec<&'a PackCatalogEntry>, PlannerError> {
        let mut ordered: Vec<&PackCatalogEntry> = Vec::new();
        let mut visiting: Vec<&str> = Vec::new();
        let mut done: Vec<&str> = Vec::new();

        fn visit<'a>(
            catalog: &'a PackCatalog,
            entry: &'a PackCatalogEntry,
            ordered: &mut Vec<&'a PackCatalogEntry>,
            visiting: &mut Vec<&'a str>,
            done: &mut Vec<&'a str>,
        ) -> Result<(), PlannerError> {
            if done.contains(&entry.name.as_str()) {
                return Ok(());
            }
            if visiting.contains(&entry.name.as_str()) {
                return Err(PlannerError::PackCycle(entry.name.clone()));
            }
            visiting.push(&entry.name);
            for dep_name in &entry.depends_on {
                if let Some(dep) = catalog.get(dep_name) {
                    visit(catalog, dep, ordered, visiting, done)?;
                }
            }
            visiting.retain(|name| name != &entry.name.as_str());
            done.push(&entry.name);
            ordered.push(entry);
            Ok(())
        }

        for pack in packs {
            visit(self, pack, &mut ordered, &mut visiting, &mut done)?;
        }
        // Dependencies pulled in transitively stay; restrict to the asked-for
        // set plus their prerequisites already in catalog order.
        Ok(ordered)
    }
}
