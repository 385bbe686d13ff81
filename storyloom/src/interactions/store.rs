//! In-memory store holding the most recent interaction of every session.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Interaction, InteractionId, SessionId, Update};

struct Slot {
    interaction: Interaction,
    cancel: CancellationToken,
    last_seen: Instant,
}

/// Session-keyed interaction records.
///
/// Every write names the interaction it belongs to. Writes for an interaction that is no longer the
/// session's current one are dropped, so a superseded run can never leak its caption or story into
/// its replacement.
#[derive(Default)]
pub struct InteractionStore {
    sessions: DashMap<SessionId, Slot>,
}

impl InteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new interaction for `session`, cancelling whatever the session was running.
    ///
    /// The returned token is a child of `parent`, so cancelling `parent` (server shutdown) stops
    /// every run.
    pub fn begin(&self, session: SessionId, file_name: &str, parent: &CancellationToken) -> (Interaction, CancellationToken) {
        let interaction = Interaction::received(file_name);
        let cancel = parent.child_token();

        let slot = Slot {
            interaction: interaction.clone(),
            cancel: cancel.clone(),
            last_seen: Instant::now(),
        };

        if let Some(previous) = self.sessions.insert(session, slot) {
            previous.cancel.cancel();
            if !previous.interaction.state.is_terminal() {
                info!(
                    session = %session,
                    replaced = %previous.interaction.id,
                    interaction_id = %interaction.id,
                    "Replaced running interaction"
                );
            }
        }

        (interaction, cancel)
    }

    /// Snapshot of the session's current interaction
    pub fn current(&self, session: SessionId) -> Option<Interaction> {
        self.sessions.get_mut(&session).map(|mut slot| {
            slot.last_seen = Instant::now();
            slot.interaction.clone()
        })
    }

    /// Apply `update` if `id` is still the session's current interaction. Returns whether it was
    /// applied.
    pub fn update(&self, session: SessionId, id: InteractionId, update: Update) -> bool {
        let Some(mut slot) = self.sessions.get_mut(&session) else {
            debug!(session = %session, interaction_id = %id, "Dropping update for forgotten session");
            return false;
        };

        if slot.interaction.id != id {
            debug!(
                session = %session,
                interaction_id = %id,
                current = %slot.interaction.id,
                "Dropping update from superseded interaction"
            );
            return false;
        }

        match slot.interaction.apply(update) {
            Ok(()) => true,
            Err(e) => {
                debug!(session = %session, interaction_id = %id, error = %e, "Ignoring update");
                false
            }
        }
    }

    /// Cancel the session's interaction if it is still running. Returns the resulting snapshot, or
    /// `None` if the session has no interaction.
    pub fn cancel(&self, session: SessionId) -> Option<Interaction> {
        let mut slot = self.sessions.get_mut(&session)?;
        slot.last_seen = Instant::now();

        if !slot.interaction.state.is_terminal() {
            slot.cancel.cancel();
            // Cannot fail: the state is not terminal
            let _ = slot.interaction.apply(Update::Cancelled);
            info!(session = %session, interaction_id = %slot.interaction.id, "Interaction cancelled");
        }

        Some(slot.interaction.clone())
    }

    /// Forget sessions not seen for `idle_timeout`, cancelling anything they still run.
    pub fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| {
            let keep = slot.last_seen.elapsed() < idle_timeout;
            if !keep {
                slot.cancel.cancel();
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactions::InteractionState;

    #[test]
    fn test_begin_and_snapshot() {
        let store = InteractionStore::new();
        let session = SessionId::new();
        assert!(store.current(session).is_none());

        let (interaction, _token) = store.begin(session, "dog.png", &CancellationToken::new());
        let current = store.current(session).unwrap();
        assert_eq!(current.id, interaction.id);
        assert_eq!(current.state, InteractionState::FileReceived);
        assert_eq!(current.file_name, "dog.png");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = InteractionStore::new();
        let (a, b) = (SessionId::new(), SessionId::new());
        let (first, _) = store.begin(a, "a.png", &CancellationToken::new());
        store.begin(b, "b.png", &CancellationToken::new());

        assert!(store.update(a, first.id, Update::CaptioningStarted));
        assert_eq!(store.current(a).unwrap().state, InteractionState::Captioning);
        assert_eq!(store.current(b).unwrap().state, InteractionState::FileReceived);
    }

    #[test]
    fn test_replacement_cancels_and_drops_stale_updates() {
        let store = InteractionStore::new();
        let session = SessionId::new();
        let (first, first_token) = store.begin(session, "first.png", &CancellationToken::new());
        assert!(store.update(session, first.id, Update::CaptioningStarted));

        let (second, second_token) = store.begin(session, "second.png", &CancellationToken::new());
        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());

        // The first run finishes late
        assert!(!store.update(session, first.id, Update::CaptionReady("stale caption".to_string())));

        let current = store.current(session).unwrap();
        assert_eq!(current.id, second.id);
        assert_eq!(current.caption, None);
        assert_eq!(current.file_name, "second.png");
    }

    #[test]
    fn test_cancel() {
        let store = InteractionStore::new();
        let session = SessionId::new();
        assert!(store.cancel(session).is_none());

        let (interaction, token) = store.begin(session, "dog.png", &CancellationToken::new());
        let snapshot = store.cancel(session).unwrap();
        assert_eq!(snapshot.state, InteractionState::Cancelled);
        assert!(token.is_cancelled());

        // Nothing moves a cancelled interaction
        assert!(!store.update(session, interaction.id, Update::CaptioningStarted));
        assert!(!store.update(session, interaction.id, Update::Failed("late".to_string())));
        assert_eq!(store.current(session).unwrap().state, InteractionState::Cancelled);
    }

    #[test]
    fn test_cancel_after_completion_is_a_no_op() {
        let store = InteractionStore::new();
        let session = SessionId::new();
        let (interaction, token) = store.begin(session, "dog.png", &CancellationToken::new());
        store.update(session, interaction.id, Update::Failed("boom".to_string()));

        let snapshot = store.cancel(session).unwrap();
        assert_eq!(snapshot.state, InteractionState::Failed);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_parent_token_cancels_runs() {
        let store = InteractionStore::new();
        let shutdown = CancellationToken::new();
        let (_, token) = store.begin(SessionId::new(), "dog.png", &shutdown);
        shutdown.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_evict_idle() {
        let store = InteractionStore::new();
        let session = SessionId::new();
        let (_, token) = store.begin(session, "dog.png", &CancellationToken::new());

        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.evict_idle(Duration::from_millis(1)), 1);
        assert!(store.is_empty());
        assert!(token.is_cancelled());
    }
}
