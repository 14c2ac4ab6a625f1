//! Option delivery.
//!
//! Fans an option set out to every option-capable view, keeps the first
//! selection and cancels the other views.

use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};
use yarnweave_abstraction::{CancellationScope, DialogueOption, OptionId, PresentationView};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::events::{RunnerEvent, RunnerEvents};
use crate::registry::ViewRegistry;
use crate::session::SessionState;

/// Single-assignment result slot for an option race.
///
/// The first offer wins; later offers are ignored.
#[derive(Debug, Default)]
pub struct PendingSelection {
    slot: OnceLock<OptionId>,
}

impl PendingSelection {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a selection. Returns `true` if this offer won the slot.
    pub fn offer(&self, id: OptionId) -> bool {
        self.slot.set(id).is_ok()
    }

    /// Returns the winning selection, if any.
    #[must_use]
    pub fn get(&self) -> Option<OptionId> {
        self.slot.get().copied()
    }

    /// Consumes the slot and returns the winning selection.
    #[must_use]
    pub fn into_inner(self) -> Option<OptionId> {
        self.slot.into_inner()
    }
}

/// Coordinates the presentation of one option set at a time.
#[derive(Debug, Clone)]
pub struct OptionCoordinator {
    views: Arc<ViewRegistry>,
    session: Arc<SessionState>,
    events: Arc<RunnerEvents>,
    hide_unavailable: bool,
}

impl OptionCoordinator {
    pub(crate) fn new(
        views: Arc<ViewRegistry>,
        session: Arc<SessionState>,
        events: Arc<RunnerEvents>,
        config: &RunnerConfig,
    ) -> Self {
        Self { views, session, events, hide_unavailable: config.hide_unavailable_options }
    }

    /// Presents options and returns the chosen id.
    ///
    /// `dialogue` is the dialogue-level scope; when it is cancelled while the
    /// views are presenting, this returns `Ok(None)`.
    ///
    /// # Errors
    /// - [`RunnerError::NoOptionViews`] if no view presents options
    /// - [`RunnerError::NoAvailableOptions`] if every option is hidden
    /// - [`RunnerError::NoOptionSelected`] if all views finished without choosing
    pub async fn deliver_options(
        &self,
        options: &[DialogueOption],
        dialogue: Option<&CancellationScope>,
    ) -> Result<Option<OptionId>> {
        let views = self.views.option_views().await;
        if views.is_empty() {
            error!(options = options.len(), "Options delivered with no option views registered");
            return Err(RunnerError::NoOptionViews);
        }

        let presented: Vec<DialogueOption> = if self.hide_unavailable {
            options.iter().filter(|option| option.is_available).cloned().collect()
        } else {
            options.to_vec()
        };
        if presented.is_empty() {
            error!(options = options.len(), "Every option is unavailable and hidden");
            return Err(RunnerError::NoAvailableOptions);
        }

        let scope = dialogue.map_or_else(CancellationScope::new, CancellationScope::child);
        let delivery = self.session.begin_options(&scope);
        let pending = PendingSelection::new();

        debug!(options = presented.len(), views = views.len(), "Delivering options");
        self.events.emit(RunnerEvent::OptionsPresented {
            option_ids: presented.iter().map(|option| option.id).collect(),
        });

        let presentations = views
            .iter()
            .map(|view| present_isolated(view.as_ref(), &presented, &scope, &pending));
        join_all(presentations).await;

        self.session.end_delivery(delivery);

        if dialogue.is_some_and(CancellationScope::is_cancelled) {
            info!("Dialogue cancelled while options were presented");
            return Ok(None);
        }

        match pending.into_inner() {
            Some(id) => {
                self.events.emit(RunnerEvent::OptionSelected { option_id: id });
                Ok(Some(id))
            }
            None => {
                error!("All option views finished without a selection");
                Err(RunnerError::NoOptionSelected)
            }
        }
    }
}

async fn present_isolated(
    view: &dyn PresentationView,
    options: &[DialogueOption],
    scope: &CancellationScope,
    pending: &PendingSelection,
) {
    let result = AssertUnwindSafe(view.present_options(options, scope)).catch_unwind().await;
    match result {
        Ok(Ok(Some(id))) => {
            if !options.iter().any(|option| option.id == id) {
                warn!(view = %view.name(), option_id = %id, "View selected an option that was not offered");
                return;
            }
            if pending.offer(id) {
                debug!(view = %view.name(), option_id = %id, "View selected option");
                scope.cancel();
            } else {
                debug!(view = %view.name(), option_id = %id, "Late selection discarded");
            }
        }
        Ok(Ok(None)) => {
            debug!(view = %view.name(), "View finished without a selection");
        }
        Ok(Err(e)) => {
            warn!(view = %view.name(), error = %e, "View failed to present options");
        }
        Err(_) => {
            error!(view = %view.name(), "View panicked while presenting options");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use yarnweave_abstraction::{LocalizedLine, ViewCapabilities, ViewError};

    fn options(count: usize) -> Vec<DialogueOption> {
        (0..count)
            .map(|i| DialogueOption {
                id: OptionId(i),
                line: LocalizedLine::new(format!("line:opt-{}", i), format!("Option {}", i)),
                is_available: i % 2 == 0,
            })
            .collect()
    }

    /// Chooses a fixed option immediately.
    struct Chooser(OptionId);

    #[async_trait]
    impl PresentationView for Chooser {
        fn name(&self) -> &str {
            "chooser"
        }

        async fn present_options(
            &self,
            _options: &[DialogueOption],
            _scope: &CancellationScope,
        ) -> std::result::Result<Option<OptionId>, ViewError> {
            Ok(Some(self.0))
        }
    }

    /// Waits for cancellation, never chooses.
    struct Watcher;

    #[async_trait]
    impl PresentationView for Watcher {
        fn name(&self) -> &str {
            "watcher"
        }

        async fn present_options(
            &self,
            _options: &[DialogueOption],
            scope: &CancellationScope,
        ) -> std::result::Result<Option<OptionId>, ViewError> {
            scope.cancelled().await;
            Ok(None)
        }
    }

    /// Records the ids it was shown and declines.
    struct Recorder(std::sync::Mutex<Vec<OptionId>>);

    #[async_trait]
    impl PresentationView for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn present_options(
            &self,
            options: &[DialogueOption],
            _scope: &CancellationScope,
        ) -> std::result::Result<Option<OptionId>, ViewError> {
            self.0.lock().unwrap().extend(options.iter().map(|o| o.id));
            Ok(None)
        }
    }

    struct LinesOnly;

    impl PresentationView for LinesOnly {
        fn name(&self) -> &str {
            "lines-only"
        }

        fn capabilities(&self) -> ViewCapabilities {
            ViewCapabilities::LINES
        }
    }

    fn coordinator(config: &RunnerConfig) -> (OptionCoordinator, Arc<ViewRegistry>) {
        let views = Arc::new(ViewRegistry::new());
        let coordinator = OptionCoordinator::new(
            Arc::clone(&views),
            Arc::new(SessionState::new()),
            Arc::new(RunnerEvents::default()),
            config,
        );
        (coordinator, views)
    }

    #[test]
    fn test_pending_selection_first_write_wins() {
        let pending = PendingSelection::new();
        assert!(pending.get().is_none());
        assert!(pending.offer(OptionId(2)));
        assert!(!pending.offer(OptionId(0)));
        assert_eq!(pending.get(), Some(OptionId(2)));
        assert_eq!(pending.into_inner(), Some(OptionId(2)));
    }

    #[tokio::test]
    async fn test_selection_cancels_other_views() {
        let (coordinator, views) = coordinator(&RunnerConfig::default());
        views.register(Arc::new(Watcher)).await;
        views.register(Arc::new(Chooser(OptionId(1)))).await;
        views.register(Arc::new(Watcher)).await;

        let selected = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            coordinator.deliver_options(&options(2), None),
        )
        .await
        .expect("watchers should be released by the selection")
        .unwrap();

        assert_eq!(selected, Some(OptionId(1)));
    }

    #[tokio::test]
    async fn test_no_option_views_is_an_error() {
        let (coordinator, views) = coordinator(&RunnerConfig::default());
        views.register(Arc::new(LinesOnly)).await;

        let result = coordinator.deliver_options(&options(2), None).await;
        assert_eq!(result, Err(RunnerError::NoOptionViews));
    }

    #[tokio::test]
    async fn test_no_selection_is_an_error() {
        let (coordinator, views) = coordinator(&RunnerConfig::default());
        views.register(Arc::new(Recorder(std::sync::Mutex::new(Vec::new())))).await;

        let result = coordinator.deliver_options(&options(2), None).await;
        assert_eq!(result, Err(RunnerError::NoOptionSelected));
    }

    #[tokio::test]
    async fn test_dialogue_cancellation_resolves_with_none() {
        let (coordinator, views) = coordinator(&RunnerConfig::default());
        views.register(Arc::new(Watcher)).await;

        let dialogue = CancellationScope::new();
        let canceller = dialogue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = coordinator.deliver_options(&options(2), Some(&dialogue)).await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_unoffered_selection_is_ignored() {
        let (coordinator, views) = coordinator(&RunnerConfig::default());
        views.register(Arc::new(Chooser(OptionId(7)))).await;

        let result = coordinator.deliver_options(&options(2), None).await;
        assert_eq!(result, Err(RunnerError::NoOptionSelected));
    }

    #[tokio::test]
    async fn test_hidden_unavailable_options() {
        let config = RunnerConfig::default().with_hide_unavailable_options(true);
        let (coordinator, views) = coordinator(&config);
        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        views.register(Arc::clone(&recorder) as Arc<dyn PresentationView>).await;
        views.register(Arc::new(Chooser(OptionId(2)))).await;

        let result = coordinator.deliver_options(&options(4), None).await;

        assert_eq!(result, Ok(Some(OptionId(2))));
        assert_eq!(*recorder.0.lock().unwrap(), vec![OptionId(0), OptionId(2)]);
    }

    #[tokio::test]
    async fn test_all_options_hidden() {
        let config = RunnerConfig::default().with_hide_unavailable_options(true);
        let (coordinator, views) = coordinator(&config);
        views.register(Arc::new(Chooser(OptionId(1)))).await;

        let only_unavailable = vec![options(2).remove(1)];
        let result = coordinator.deliver_options(&only_unavailable, None).await;
        assert_eq!(result, Err(RunnerError::NoAvailableOptions));
    }
}
