//! Presentation view registry.
//!
//! Views are kept in registration order; deliveries notify them in that order.

use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use yarnweave_abstraction::PresentationView;

/// Shared handle to a registered view.
pub type ViewHandle = Arc<dyn PresentationView>;

/// Metadata about a registered view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewMetadata {
    /// The view's name.
    pub name: String,
    /// Whether the view presents lines.
    pub presents_lines: bool,
    /// Whether the view presents options.
    pub presents_options: bool,
}

/// Ordered registry of presentation views.
pub struct ViewRegistry {
    views: RwLock<Vec<ViewHandle>>,
}

impl fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("view_count", &self.views.try_read().map(|v| v.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl ViewRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { views: RwLock::new(Vec::new()) }
    }

    /// Appends a view.
    ///
    /// Registering the same view instance twice is ignored.
    ///
    /// # Returns
    /// Returns `true` if the view was added.
    pub async fn register(&self, view: ViewHandle) -> bool {
        let mut views = self.views.write().await;
        if views.iter().any(|existing| Arc::ptr_eq(existing, &view)) {
            warn!(view = %view.name(), "View already registered");
            return false;
        }

        debug!(view = %view.name(), position = views.len(), "Registering view");
        views.push(view);
        true
    }

    /// Removes every view with the given name.
    ///
    /// # Returns
    /// Returns `true` if at least one view was removed.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut views = self.views.write().await;
        let before = views.len();
        views.retain(|view| view.name() != name);
        let removed = views.len() != before;

        if removed {
            debug!(view = %name, "Unregistered view");
        } else {
            warn!(view = %name, "Attempted to unregister non-existent view");
        }
        removed
    }

    /// Snapshot of every view, in registration order.
    pub async fn all(&self) -> Vec<ViewHandle> {
        self.views.read().await.clone()
    }

    /// Snapshot of the views that present lines.
    pub async fn line_views(&self) -> Vec<ViewHandle> {
        self.views.read().await.iter().filter(|v| v.capabilities().lines).cloned().collect()
    }

    /// Snapshot of the views that present options.
    pub async fn option_views(&self) -> Vec<ViewHandle> {
        self.views.read().await.iter().filter(|v| v.capabilities().options).cloned().collect()
    }

    /// Lists registered views.
    pub async fn list(&self) -> Vec<ViewMetadata> {
        self.views
            .read()
            .await
            .iter()
            .map(|view| {
                let caps = view.capabilities();
                ViewMetadata {
                    name: view.name().to_string(),
                    presents_lines: caps.lines,
                    presents_options: caps.options,
                }
            })
            .collect()
    }

    /// Number of registered views.
    pub async fn len(&self) -> usize {
        self.views.read().await.len()
    }

    /// Returns `true` when no views are registered.
    pub async fn is_empty(&self) -> bool {
        self.views.read().await.is_empty()
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yarnweave_abstraction::ViewCapabilities;

    struct NamedView {
        name: &'static str,
        capabilities: ViewCapabilities,
    }

    impl PresentationView for NamedView {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> ViewCapabilities {
            self.capabilities
        }
    }

    fn view(name: &'static str, capabilities: ViewCapabilities) -> ViewHandle {
        Arc::new(NamedView { name, capabilities })
    }

    #[tokio::test]
    async fn test_register_keeps_order() {
        let registry = ViewRegistry::new();
        registry.register(view("a", ViewCapabilities::ALL)).await;
        registry.register(view("b", ViewCapabilities::ALL)).await;
        registry.register(view("c", ViewCapabilities::ALL)).await;

        let names: Vec<_> = registry.list().await.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_instance_ignored() {
        let registry = ViewRegistry::new();
        let shared = view("a", ViewCapabilities::ALL);
        assert!(registry.register(Arc::clone(&shared)).await);
        assert!(!registry.register(shared).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_capability_filters() {
        let registry = ViewRegistry::new();
        registry.register(view("lines", ViewCapabilities::LINES)).await;
        registry.register(view("options", ViewCapabilities::OPTIONS)).await;
        registry.register(view("both", ViewCapabilities::ALL)).await;

        let lines: Vec<_> = registry.line_views().await.iter().map(|v| v.name().to_string()).collect();
        let options: Vec<_> =
            registry.option_views().await.iter().map(|v| v.name().to_string()).collect();

        assert_eq!(lines, vec!["lines", "both"]);
        assert_eq!(options, vec!["options", "both"]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ViewRegistry::new();
        registry.register(view("a", ViewCapabilities::ALL)).await;

        assert!(registry.unregister("a").await);
        assert!(!registry.unregister("a").await);
        assert!(registry.is_empty().await);
    }
}
