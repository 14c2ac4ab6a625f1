//! Dialogue session state.
//!
//! Tracks the run lifecycle, the dialogue-level cancellation scope and the one
//! delivery (line or option set) that may be in flight at a time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};
use yarnweave_abstraction::{CancellationScope, LineScopes};

/// Dialogue run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueState {
    /// No dialogue is running.
    Idle,
    /// A dialogue is running.
    Running,
    /// `stop` was requested; the completion path has not finished yet.
    Stopping,
}

impl DialogueState {
    /// Checks if the session can transition to the given state.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct state transition rule
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // From Idle: can only start
            (Self::Idle, Self::Running) => true,
            // From Running: stop requested, or dialogue completed on its own
            (Self::Running, Self::Stopping | Self::Idle) => true,
            // From Stopping: completion path finished
            (Self::Stopping, Self::Idle) => true,
            // Same state is always valid
            (a, b) if *a == b => true,
            _ => false,
        }
    }

    /// Returns `true` for `Running` and `Stopping`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Identifies one delivery so a late disposal cannot clear a newer one.
pub(crate) type DeliveryId = u64;

enum ActiveDelivery {
    None,
    Line { id: DeliveryId, scopes: LineScopes },
    Options { id: DeliveryId, scope: CancellationScope },
}

impl ActiveDelivery {
    fn id(&self) -> Option<DeliveryId> {
        match self {
            Self::None => None,
            Self::Line { id, .. } | Self::Options { id, .. } => Some(*id),
        }
    }

    fn cancel(&self) {
        match self {
            Self::None => {}
            Self::Line { scopes, .. } => scopes.request_next_line(),
            Self::Options { scope, .. } => scope.cancel(),
        }
    }
}

struct SessionInner {
    state: DialogueState,
    dialogue: Option<CancellationScope>,
    delivery: ActiveDelivery,
    next_delivery_id: DeliveryId,
}

/// Shared session bookkeeping.
///
/// The lock is never held across an `.await`.
pub(crate) struct SessionState {
    inner: Mutex<SessionInner>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState").field("state", &self.state()).finish_non_exhaustive()
    }
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: DialogueState::Idle,
                dialogue: None,
                delivery: ActiveDelivery::None,
                next_delivery_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> DialogueState {
        self.lock().state
    }

    /// Moves `Idle → Running` and creates the dialogue scope.
    ///
    /// Returns the current state if the session is not idle.
    pub(crate) fn begin(&self) -> Result<CancellationScope, DialogueState> {
        let mut inner = self.lock();
        if inner.state != DialogueState::Idle {
            return Err(inner.state);
        }

        let dialogue = CancellationScope::new();
        inner.state = DialogueState::Running;
        inner.dialogue = Some(dialogue.clone());
        inner.delivery = ActiveDelivery::None;
        debug!(from = ?DialogueState::Idle, to = ?DialogueState::Running, "State transition");
        Ok(dialogue)
    }

    /// Returns to `Idle` and drops all scopes.
    pub(crate) fn finish(&self) {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(DialogueState::Idle) {
            error!(from = ?inner.state, to = ?DialogueState::Idle, "Invalid state transition");
        }
        debug!(from = ?inner.state, to = ?DialogueState::Idle, "State transition");
        inner.state = DialogueState::Idle;
        inner.dialogue = None;
        inner.delivery = ActiveDelivery::None;
    }

    /// Requests the session to stop.
    ///
    /// Cancels the active delivery and the dialogue scope. Returns `false` when
    /// no dialogue is running.
    pub(crate) fn request_stop(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == DialogueState::Idle {
            debug!("Stop requested while idle; ignoring");
            return false;
        }

        inner.delivery.cancel();
        if let Some(dialogue) = &inner.dialogue {
            dialogue.cancel();
        }
        if inner.state == DialogueState::Running {
            debug!(from = ?DialogueState::Running, to = ?DialogueState::Stopping, "State transition");
            inner.state = DialogueState::Stopping;
        }
        true
    }

    /// Registers fresh line scopes as the active delivery.
    ///
    /// The scopes start cancelled when the dialogue already is.
    pub(crate) fn begin_line(&self) -> (DeliveryId, LineScopes) {
        let mut inner = self.lock();
        let id = Self::next_id(&mut inner);
        let scopes = LineScopes::new();

        if inner.dialogue.as_ref().is_some_and(CancellationScope::is_cancelled) {
            scopes.request_next_line();
        }

        inner.delivery = ActiveDelivery::Line { id, scopes: scopes.clone() };
        (id, scopes)
    }

    /// Registers an option scope as the active delivery.
    pub(crate) fn begin_options(&self, scope: &CancellationScope) -> DeliveryId {
        let mut inner = self.lock();
        let id = Self::next_id(&mut inner);
        inner.delivery = ActiveDelivery::Options { id, scope: scope.clone() };
        id
    }

    /// Disposes a delivery. A no-op if it is no longer the active one.
    pub(crate) fn end_delivery(&self, id: DeliveryId) {
        let mut inner = self.lock();
        if inner.delivery.id() == Some(id) {
            inner.delivery = ActiveDelivery::None;
        }
    }

    /// Cancels the active line's `next_line` scope. Returns `false` without an active line.
    pub(crate) fn request_next_line(&self) -> bool {
        let inner = self.lock();
        match &inner.delivery {
            ActiveDelivery::Line { scopes, .. } => {
                scopes.request_next_line();
                true
            }
            _ => {
                debug!("Next line requested with no active line");
                false
            }
        }
    }

    /// Cancels the active line's `hurry_up` scope. Returns `false` without an active line.
    pub(crate) fn request_hurry_up(&self) -> bool {
        let inner = self.lock();
        match &inner.delivery {
            ActiveDelivery::Line { scopes, .. } => {
                scopes.request_hurry_up();
                true
            }
            _ => {
                debug!("Hurry-up requested with no active line");
                false
            }
        }
    }

    fn next_id(inner: &mut SessionInner) -> DeliveryId {
        debug_assert!(
            inner.delivery.id().is_none(),
            "New delivery registered while another is still active"
        );
        inner.next_delivery_id += 1;
        inner.next_delivery_id
    }
}
