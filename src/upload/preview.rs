// Local previews for files that are not uploaded yet
// A preview is a revocable reference to the picked bytes so the UI can show
// them straight away. Revoking is idempotent: the first revoke releases the
// bytes, later ones are no-ops that report `false`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::resource::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewRef {
    id: Uuid,
    owner: ResourceId,
}

impl PreviewRef {
    pub fn owner(&self) -> ResourceId {
        self.owner
    }

    /// Object-URL style identifier handed to the UI.
    pub fn uri(&self) -> String {
        format!("blob:keepsake/{}", self.id)
    }
}

struct LivePreview {
    owner: ResourceId,
    bytes: Arc<[u8]>,
}

#[derive(Default)]
pub struct PreviewRegistry {
    live: Mutex<HashMap<Uuid, LivePreview>>,
    revoked: AtomicU64,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One live preview per owner: creating a second one for the same owner
    /// revokes the first.
    pub fn create_preview(&self, owner: ResourceId, bytes: Arc<[u8]>) -> PreviewRef {
        let mut live = self.live.lock();

        let stale: Vec<Uuid> = live
            .iter()
            .filter(|(_, p)| p.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            live.remove(&id);
            self.revoked.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(resource = %owner, "Replaced existing preview");
        }

        let id = Uuid::new_v4();
        live.insert(id, LivePreview { owner, bytes });
        PreviewRef { id, owner }
    }

    /// Releases the preview. Returns whether this call did the release.
    pub fn revoke(&self, preview: &PreviewRef) -> bool {
        let removed = self.live.lock().remove(&preview.id).is_some();
        if removed {
            self.revoked.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(resource = %preview.owner, uri = %preview.uri(), "Preview revoked");
        }
        removed
    }

    pub fn resolve(&self, preview: &PreviewRef) -> Option<Arc<[u8]>> {
        self.live.lock().get(&preview.id).map(|p| p.bytes.clone())
    }

    pub fn is_live(&self, preview: &PreviewRef) -> bool {
        self.live.lock().contains_key(&preview.id)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Effective revocations since creation.
    pub fn revoked_count(&self) -> u64 {
        self.revoked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes() -> Arc<[u8]> {
        Arc::from(&b"photo"[..])
    }

    #[test]
    fn create_resolve_revoke() {
        let registry = PreviewRegistry::new();
        let owner = ResourceId::new();
        let preview = registry.create_preview(owner, bytes());

        assert!(preview.uri().starts_with("blob:keepsake/"));
        assert_eq!(preview.owner(), owner);
        assert_eq!(registry.resolve(&preview).as_deref(), Some(&b"photo"[..]));

        assert!(registry.revoke(&preview));
        assert!(registry.resolve(&preview).is_none());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn double_revoke_is_a_noop() {
        let registry = PreviewRegistry::new();
        let preview = registry.create_preview(ResourceId::new(), bytes());

        assert!(registry.revoke(&preview));
        assert!(!registry.revoke(&preview));
        assert_eq!(registry.revoked_count(), 1);
    }

    #[test]
    fn unknown_ref_is_a_noop() {
        let registry = PreviewRegistry::new();
        let other = PreviewRegistry::new();
        let foreign = other.create_preview(ResourceId::new(), bytes());

        assert!(!registry.revoke(&foreign));
        assert!(other.is_live(&foreign));
    }

    #[test]
    fn second_preview_for_same_owner_replaces_first() {
        let registry = PreviewRegistry::new();
        let owner = ResourceId::new();
        let first = registry.create_preview(owner, bytes());
        let second = registry.create_preview(owner, bytes());

        assert!(!registry.is_live(&first));
        assert!(registry.is_live(&second));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.revoked_count(), 1);
    }
}
