//! Two-tier knowledge-base registry.
//!
//! System KBs come from the scanned directory, user KBs from explicit
//! `add_kb` calls. Callers see the merged view, where a user entry shadows
//! a system entry of the same name. At most one entry is active; the
//! registry itself is plain data guarded by the engine mutex.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{RagError, RagResult};
use crate::index::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KbOrigin {
    System,
    User,
}

/// A named, immutable corpus of embedded chunks.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub name: String,
    pub source_path: String,
    pub index: Arc<VectorIndex>,
    pub origin: KbOrigin,
}

/// Listing row exposed by the facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KbSummary {
    pub name: String,
    pub path: String,
    pub active: bool,
}

#[derive(Default)]
pub struct KbRegistry {
    user: BTreeMap<String, Arc<KnowledgeBase>>,
    system: BTreeMap<String, Arc<KnowledgeBase>>,
    active_name: Option<String>,
}

impl KbRegistry {
    /// True when the merged view has no entries.
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.system.is_empty()
    }

    /// Look a name up in the merged view; user shadows system.
    pub fn resolve(&self, name: &str) -> Option<&Arc<KnowledgeBase>> {
        self.user.get(name).or_else(|| self.system.get(name))
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.user.contains_key(name)
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active_name.as_deref()
    }

    /// The active KB, if the pointer still resolves in the merged view.
    pub fn active(&self) -> Option<&Arc<KnowledgeBase>> {
        self.active_name.as_deref().and_then(|n| self.resolve(n))
    }

    pub fn insert_user(&mut self, kb: KnowledgeBase) -> RagResult<Arc<KnowledgeBase>> {
        if self.user.contains_key(&kb.name) {
            return Err(RagError::AlreadyExists(kb.name));
        }
        let kb = Arc::new(kb);
        self.user.insert(kb.name.clone(), kb.clone());
        Ok(kb)
    }

    /// Register a system KB. Returns `false` (skipped) when a user KB of the
    /// same name exists.
    pub fn insert_system(&mut self, kb: KnowledgeBase) -> bool {
        if self.user.contains_key(&kb.name) {
            return false;
        }
        self.system.insert(kb.name.clone(), Arc::new(kb));
        true
    }

    /// Remove by name, user tier first. Clears the active pointer when the
    /// removed entry was active.
    pub fn remove(&mut self, name: &str, allow_system: bool) -> RagResult<Arc<KnowledgeBase>> {
        let removed = match self.user.remove(name) {
            Some(kb) => kb,
            None => {
                if self.system.contains_key(name) && !allow_system {
                    return Err(RagError::InvalidArgument(format!(
                        "removing system knowledge base '{name}' is disabled by configuration"
                    )));
                }
                self.system
                    .remove(name)
                    .ok_or_else(|| RagError::NotFound(name.to_string()))?
            }
        };
        if self.active_name.as_deref() == Some(name) {
            self.active_name = None;
        }
        Ok(removed)
    }

    /// Mark `name` active; any previously active entry loses the flag.
    pub fn set_active(&mut self, name: &str) -> RagResult<Arc<KnowledgeBase>> {
        let kb = self
            .resolve(name)
            .cloned()
            .ok_or_else(|| RagError::NotFound(name.to_string()))?;
        self.active_name = Some(kb.name.clone());
        Ok(kb)
    }

    /// Restore the active pointer from persisted state without failing when
    /// the name no longer resolves (the entry may load later).
    pub fn restore_active(&mut self, name: &str) {
        self.active_name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
    }

    /// Merged view in listing order: system entries first (alphabetical,
    /// minus those shadowed by a user entry), then user entries
    /// (alphabetical).
    pub fn merged(&self) -> Vec<Arc<KnowledgeBase>> {
        self.system
            .iter()
            .filter(|(name, _)| !self.user.contains_key(*name))
            .map(|(_, kb)| kb.clone())
            .chain(self.user.values().cloned())
            .collect()
    }

    pub fn list(&self) -> Vec<KbSummary> {
        self.merged()
            .into_iter()
            .map(|kb| KbSummary {
                active: self.active_name.as_deref() == Some(kb.name.as_str()),
                name: kb.name.clone(),
                path: kb.source_path.clone(),
            })
            .collect()
    }

    /// Lexicographically first name in the merged view.
    pub fn first_name(&self) -> Option<String> {
        let user = self.user.keys().next();
        let system = self.system.keys().next();
        match (user, system) {
            (Some(u), Some(s)) => Some(u.min(s).clone()),
            (Some(u), None) => Some(u.clone()),
            (None, Some(s)) => Some(s.clone()),
            (None, None) => None,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb(name: &str, origin: KbOrigin) -> KnowledgeBase {
        KnowledgeBase {
            name: name.to_string(),
            source_path: format!("/kb/{name}.txt"),
            index: Arc::new(VectorIndex::new(2)),
            origin,
        }
    }

    #[test]
    fn test_user_shadows_system() {
        let mut registry = KbRegistry::default();
        registry.insert_system(kb("guides", KbOrigin::System));
        registry
            .insert_user(kb("guides", KbOrigin::User))
            .unwrap();
        assert_eq!(registry.resolve("guides").unwrap().origin, KbOrigin::User);
        // The merged view holds a single entry for the shadowed name.
        assert_eq!(registry.merged().len(), 1);
    }

    #[test]
    fn test_system_insert_skipped_when_user_name_taken() {
        let mut registry = KbRegistry::default();
        registry.insert_user(kb("guides", KbOrigin::User)).unwrap();
        assert!(!registry.insert_system(kb("guides", KbOrigin::System)));
        assert_eq!(registry.resolve("guides").unwrap().origin, KbOrigin::User);
    }

    #[test]
    fn test_duplicate_user_insert_rejected() {
        let mut registry = KbRegistry::default();
        registry.insert_user(kb("x", KbOrigin::User)).unwrap();
        assert!(matches!(
            registry.insert_user(kb("x", KbOrigin::User)),
            Err(RagError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_list_orders_system_then_user_alphabetically() {
        let mut registry = KbRegistry::default();
        registry.insert_system(kb("zeta", KbOrigin::System));
        registry.insert_system(kb("alpha", KbOrigin::System));
        registry.insert_user(kb("delta", KbOrigin::User)).unwrap();
        registry.insert_user(kb("beta", KbOrigin::User)).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta", "beta", "delta"]);
    }

    #[test]
    fn test_remove_clears_active_pointer() {
        let mut registry = KbRegistry::default();
        registry.insert_user(kb("a", KbOrigin::User)).unwrap();
        registry.set_active("a").unwrap();
        assert_eq!(registry.active_name(), Some("a"));
        registry.remove("a", true).unwrap();
        assert_eq!(registry.active_name(), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let mut registry = KbRegistry::default();
        assert!(matches!(
            registry.remove("ghost", true),
            Err(RagError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_system_respects_policy() {
        let mut registry = KbRegistry::default();
        registry.insert_system(kb("sys", KbOrigin::System));
        assert!(matches!(
            registry.remove("sys", false),
            Err(RagError::InvalidArgument(_))
        ));
        assert!(registry.remove("sys", true).is_ok());
    }

    #[test]
    fn test_switch_moves_active_flag() {
        let mut registry = KbRegistry::default();
        registry.insert_user(kb("a", KbOrigin::User)).unwrap();
        registry.insert_user(kb("b", KbOrigin::User)).unwrap();
        registry.set_active("a").unwrap();
        registry.set_active("b").unwrap();
        let list = registry.list();
        let actives: Vec<&KbSummary> = list.iter().filter(|s| s.active).collect();
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].name, "b");
    }

    #[test]
    fn test_first_name_spans_both_tiers() {
        let mut registry = KbRegistry::default();
        registry.insert_system(kb("mid", KbOrigin::System));
        registry.insert_user(kb("zzz", KbOrigin::User)).unwrap();
        assert_eq!(registry.first_name().as_deref(), Some("mid"));
        registry.insert_user(kb("aaa", KbOrigin::User)).unwrap();
        assert_eq!(registry.first_name().as_deref(), Some("aaa"));
    }
}
