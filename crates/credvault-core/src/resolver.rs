//! Permission resolution.
//!
//! Answers "may this actor do this operation on this credential name?" by
//! expanding the name into its candidate permission paths: the exact name,
//! one `<prefix>/*` wildcard for every `/` after the leading one, and the
//! root wildcard `/*`. Any candidate entry granting the operation is enough.
//!
//! So a grant on `/a/*` covers `/a/b` and `/a/b/c`, while a grant on the
//! exact path `/a` covers neither.
//!
//! Checks never fail: a store error is logged and treated as "not granted".

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::permission::{PermissionEntry, PermissionOperation, PermissionStore};

/// The wildcard that grants over every credential.
pub const ROOT_WILDCARD: &str = "/*";

/// Candidate permission paths for `name`, most specific first.
#[must_use]
pub fn candidate_paths(name: &str) -> Vec<String> {
    let mut paths = vec![name.to_owned()];
    let mut wildcards: Vec<String> = name
        .char_indices()
        .skip(1)
        .filter(|&(_, c)| c == '/')
        .map(|(i, _)| format!("{}*", &name[..=i]))
        .collect();
    wildcards.reverse();
    wildcards.push(ROOT_WILDCARD.to_owned());
    for wildcard in wildcards {
        if !paths.contains(&wildcard) {
            paths.push(wildcard);
        }
    }
    paths
}

/// Whether a set of readable paths (from
/// [`PermissionResolver::find_all_paths_by_actor`]) covers `name`.
#[must_use]
pub fn paths_cover(readable: &BTreeSet<String>, name: &str) -> bool {
    readable.contains(ROOT_WILDCARD)
        || candidate_paths(name)
            .iter()
            .any(|candidate| readable.contains(candidate))
}

/// Answers permission questions against a [`PermissionStore`].
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    store: PermissionStore,
    enforce: bool,
}

impl PermissionResolver {
    /// Create a resolver. With `enforce == false` every check passes.
    #[must_use]
    pub fn new(store: PermissionStore, enforce: bool) -> Self {
        Self { store, enforce }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &PermissionStore {
        &self.store
    }

    /// Whether permission checks are enforced.
    #[must_use]
    pub fn is_enforcing(&self) -> bool {
        self.enforce
    }

    /// Whether `actor` may perform `op` on the credential `name`.
    pub async fn has_permission(&self, actor: &str, name: &str, op: PermissionOperation) -> bool {
        if !self.enforce {
            return true;
        }

        let candidates = candidate_paths(name);
        match self.store.find_by_paths_and_actor(&candidates, actor).await {
            Ok(entries) => {
                let granted = entries.iter().any(|entry| entry.allows(op));
                debug!(actor = %actor, name = %name, operation = %op, granted, "permission check");
                granted
            }
            Err(e) => {
                warn!(
                    actor = %actor,
                    name = %name,
                    operation = %op,
                    error = %e,
                    "permission lookup failed; denying"
                );
                false
            }
        }
    }

    /// Every path on which `actor` holds READ. Contains [`ROOT_WILDCARD`]
    /// when the actor can read everything (or enforcement is off).
    pub async fn find_all_paths_by_actor(&self, actor: &str) -> BTreeSet<String> {
        if !self.enforce {
            return BTreeSet::from([ROOT_WILDCARD.to_owned()]);
        }

        match self.store.find_all_by_actor(actor).await {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| entry.allows(PermissionOperation::Read))
                .map(|entry| entry.path)
                .collect(),
            Err(e) => {
                warn!(actor = %actor, error = %e, "readable path lookup failed; returning none");
                BTreeSet::new()
            }
        }
    }

    /// Keep only the items whose name `actor` may read. Filtering happens
    /// after the query with the same candidate-path matching as
    /// [`has_permission`](Self::has_permission).
    pub async fn filter_readable<T, F>(&self, actor: &str, items: Vec<T>, name_of: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        let readable = self.find_all_paths_by_actor(actor).await;
        if readable.contains(ROOT_WILDCARD) {
            return items;
        }
        items
            .into_iter()
            .filter(|item| paths_cover(&readable, name_of(item)))
            .collect()
    }

    /// Grant `operations` to `actor` on `path`, merging with any existing
    /// entry for the same pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn upsert_permissions(
        &self,
        path: &str,
        actor: &str,
        operations: &BTreeSet<PermissionOperation>,
    ) -> Result<PermissionEntry, StoreError> {
        self.store.upsert(path, actor, operations).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use credvault_storage::MemoryBackend;
    use PermissionOperation::{Read, Write};

    fn resolver() -> PermissionResolver {
        PermissionResolver::new(PermissionStore::new(Arc::new(MemoryBackend::new())), true)
    }

    async fn grant(r: &PermissionResolver, path: &str, actor: &str, op: PermissionOperation) {
        r.upsert_permissions(path, actor, &BTreeSet::from([op]))
            .await
            .unwrap();
    }

    #[test]
    fn candidates_cover_every_prefix() {
        assert_eq!(
            candidate_paths("/a/b/cert"),
            vec!["/a/b/cert", "/a/b/*", "/a/*", "/*"]
        );
        assert_eq!(candidate_paths("/top"), vec!["/top", "/*"]);
        assert_eq!(candidate_paths("/a/*"), vec!["/a/*", "/*"]);
    }

    #[tokio::test]
    async fn wildcard_grants_everything_below_prefix() {
        let r = resolver();
        grant(&r, "/a/*", "actor", Read).await;

        assert!(r.has_permission("actor", "/a/b", Read).await);
        assert!(r.has_permission("actor", "/a/b/c/d", Read).await);
        assert!(!r.has_permission("actor", "/other/x", Read).await);
        assert!(!r.has_permission("actor", "/ab", Read).await);
        assert!(!r.has_permission("someone-else", "/a/b", Read).await);
    }

    #[tokio::test]
    async fn exact_grant_does_not_cover_children() {
        let r = resolver();
        grant(&r, "/a", "actor", Read).await;

        assert!(r.has_permission("actor", "/a", Read).await);
        assert!(!r.has_permission("actor", "/a/b", Read).await);
    }

    #[tokio::test]
    async fn mixed_grants_scenario() {
        let r = resolver();
        grant(&r, "/ca/*", "actor", Read).await;
        grant(&r, "/ca/leaf", "actor", Write).await;

        assert!(r.has_permission("actor", "/ca/leaf", Write).await);
        assert!(!r.has_permission("actor", "/ca/other", Write).await);
        assert!(r.has_permission("actor", "/ca/other", Read).await);
    }

    #[tokio::test]
    async fn root_wildcard_grants_everything() {
        let r = resolver();
        grant(&r, "/*", "admin", Write).await;
        assert!(r.has_permission("admin", "/deep/path/cert", Write).await);
    }

    #[tokio::test]
    async fn readable_paths_only_include_read_grants() {
        let r = resolver();
        grant(&r, "/a/*", "actor", Read).await;
        grant(&r, "/b", "actor", Write).await;

        let paths = r.find_all_paths_by_actor("actor").await;
        assert_eq!(paths, BTreeSet::from(["/a/*".to_owned()]));
    }

    #[tokio::test]
    async fn filter_readable_prunes_with_prefix_matching() {
        let r = resolver();
        grant(&r, "/a/*", "actor", Read).await;
        grant(&r, "/z/exact", "actor", Read).await;

        let names = vec!["/a/one", "/a/b/two", "/b/three", "/z/exact", "/z/exactly"];
        let kept = r.filter_readable("actor", names, |n| *n).await;
        assert_eq!(kept, vec!["/a/one", "/a/b/two", "/z/exact"]);
    }

    #[tokio::test]
    async fn disabled_enforcement_allows_all() {
        let r = PermissionResolver::new(PermissionStore::new(Arc::new(MemoryBackend::new())), false);
        assert!(r.has_permission("anyone", "/x", Write).await);
        assert!(r.find_all_paths_by_actor("anyone").await.contains(ROOT_WILDCARD));
    }
}
