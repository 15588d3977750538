// Process-local holder for ProjectSettings.
//
// Settings are loaded from the core store once at startup (with a short
// timeout so a locked store cannot hang boot) and re-read only after an
// explicit invalidate. Hot paths read the in-memory copy.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::repository::CoreStore;
use crate::types::ProjectSettings;

const LOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Explicitly constructed settings holder, passed by handle rather than
/// imported ambiently.
#[derive(Clone, Default)]
pub struct SettingsHolder {
    inner: Arc<RwLock<Option<ProjectSettings>>>,
}

impl SettingsHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from the store, bounded by a short timeout. A miss
    /// or failure leaves the defaults in place and is non-fatal.
    pub async fn init(&self, store: &CoreStore) {
        match tokio::time::timeout(LOAD_TIMEOUT, store.load_project_settings()).await {
            Ok(Ok(Some(settings))) => {
                *self.inner.write() = Some(settings);
                info!("Project settings loaded from store");
            }
            Ok(Ok(None)) => {
                *self.inner.write() = Some(ProjectSettings::default());
                info!("No project settings row; using defaults");
            }
            Ok(Err(e)) => {
                warn!("Failed to load project settings: {e}");
            }
            Err(_) => {
                warn!("Timeout loading project settings; store likely locked");
            }
        }
    }

    /// Current settings, or defaults when never loaded.
    pub fn current(&self) -> ProjectSettings {
        self.inner.read().clone().unwrap_or_default()
    }

    /// Replace the in-memory copy after a settings write.
    pub fn replace(&self, settings: ProjectSettings) {
        *self.inner.write() = Some(settings);
    }

    /// Drop the cached copy; the next `init` re-reads the store.
    pub fn invalidate(&self) {
        *self.inner.write() = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_before_init() {
        let holder = SettingsHolder::new();
        assert!(!holder.is_loaded());
        let s = holder.current();
        assert_eq!(s.cache_ttl_data, 60);
        assert_eq!(s.cache_ttl_count, 300);
        assert!(!s.redis_enabled);
    }

    #[test]
    fn replace_and_invalidate() {
        let holder = SettingsHolder::new();
        let mut s = ProjectSettings::default();
        s.redis_enabled = true;
        holder.replace(s);
        assert!(holder.current().redis_enabled);
        holder.invalidate();
        assert!(!holder.is_loaded());
        assert!(!holder.current().redis_enabled);
    }
}
