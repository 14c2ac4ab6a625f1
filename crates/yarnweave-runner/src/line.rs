//! Line delivery.
//!
//! Fans a line out to every line-capable view and waits for all of them.

use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};
use yarnweave_abstraction::{LineScopes, LocalizedLine, PresentationView};

use crate::events::{RunnerEvent, RunnerEvents};
use crate::registry::ViewRegistry;
use crate::session::SessionState;

/// Coordinates the presentation of one line at a time.
#[derive(Debug, Clone)]
pub struct LineCoordinator {
    views: Arc<ViewRegistry>,
    session: Arc<SessionState>,
    events: Arc<RunnerEvents>,
}

impl LineCoordinator {
    pub(crate) fn new(
        views: Arc<ViewRegistry>,
        session: Arc<SessionState>,
        events: Arc<RunnerEvents>,
    ) -> Self {
        Self { views, session, events }
    }

    /// Presents a line on every line view and returns once all have finished.
    ///
    /// Views run concurrently and share the same line and scopes. A view that
    /// fails or panics is logged and treated as finished.
    pub async fn deliver_line(&self, line: &LocalizedLine) {
        let views = self.views.line_views().await;
        let (delivery, scopes) = self.session.begin_line();

        if views.is_empty() {
            warn!(line_id = %line.text_id, "No line views registered; skipping line");
            self.session.end_delivery(delivery);
            return;
        }

        debug!(line_id = %line.text_id, views = views.len(), "Delivering line");

        let presentations = views.iter().map(|view| present_isolated(view.as_ref(), line, &scopes));
        join_all(presentations).await;

        self.session.end_delivery(delivery);
        self.events.emit(RunnerEvent::LinePresented { line_id: line.text_id.clone() });
    }
}

async fn present_isolated(view: &dyn PresentationView, line: &LocalizedLine, scopes: &LineScopes) {
    match AssertUnwindSafe(view.present_line(line, scopes)).catch_unwind().await {
        Ok(Ok(())) => {
            debug!(view = %view.name(), line_id = %line.text_id, "View finished line");
        }
        Ok(Err(e)) => {
            warn!(view = %view.name(), line_id = %line.text_id, error = %e, "View failed to present line");
        }
        Err(_) => {
            error!(view = %view.name(), line_id = %line.text_id, "View panicked while presenting line");
        }
    }
}
