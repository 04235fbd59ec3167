//! User gestures: presence and verification prompts the engine blocks on.

mod pinentry;
mod prompt;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use pinentry::PinentryGesture;
pub use prompt::Prompt;

/// Type-level evidence that a presence or verification gesture was granted.
/// Signing operations take one so they cannot run before the user agreed.
pub struct UserPresenceProof {
    _private: (),
}

impl UserPresenceProof {
    pub(crate) fn granted() -> Self {
        Self { _private: () }
    }

    /// Construct a proof for use in tests only.
    /// Do not use in production code: this bypasses user presence.
    #[doc(hidden)]
    pub fn test_only() -> Self {
        Self { _private: () }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    /// Any touch or confirmation.
    Presence,
    /// Confirmation that also establishes who the user is.
    Verification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureOutcome {
    Granted,
    Denied,
    Cancelled,
    TimedOut,
}

/// Shared cancellation flag for a pending gesture.
///
/// Clones observe the same flag, so a transport or timer task can cancel
/// a command that is blocked in the engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait UserGesture: Send + Sync {
    /// Block until the user answers, the token is cancelled or the
    /// implementation's own timeout expires.
    fn request_user_gesture(
        &self,
        kind: GestureKind,
        prompt: &Prompt,
        cancel: &CancelToken,
    ) -> GestureOutcome;

    /// Pick one of several accounts. `None` means the user declined.
    fn select_credential(
        &self,
        _prompt: &Prompt,
        accounts: &[String],
        _cancel: &CancelToken,
    ) -> Option<usize> {
        if accounts.is_empty() { None } else { Some(0) }
    }
}

/// Grants every request. For headless setups and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGrant;

impl UserGesture for AlwaysGrant {
    fn request_user_gesture(
        &self,
        kind: GestureKind,
        prompt: &Prompt,
        cancel: &CancelToken,
    ) -> GestureOutcome {
        if cancel.is_cancelled() {
            return GestureOutcome::Cancelled;
        }
        tracing::debug!(?kind, title = %prompt.title, "Auto-granting gesture");
        GestureOutcome::Granted
    }
}

impl<G: UserGesture + ?Sized> UserGesture for Arc<G> {
    fn request_user_gesture(
        &self,
        kind: GestureKind,
        prompt: &Prompt,
        cancel: &CancelToken,
    ) -> GestureOutcome {
        (**self).request_user_gesture(kind, prompt, cancel)
    }

    fn select_credential(
        &self,
        prompt: &Prompt,
        accounts: &[String],
        cancel: &CancelToken,
    ) -> Option<usize> {
        (**self).select_credential(prompt, accounts, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_always_grant_respects_cancel() {
        let prompt = Prompt::reset();
        let token = CancelToken::new();
        assert_eq!(
            AlwaysGrant.request_user_gesture(GestureKind::Presence, &prompt, &token),
            GestureOutcome::Granted
        );
        token.cancel();
        assert_eq!(
            AlwaysGrant.request_user_gesture(GestureKind::Presence, &prompt, &token),
            GestureOutcome::Cancelled
        );
    }

    #[test]
    fn test_default_selection_picks_first() {
        let prompt = Prompt::reset();
        let token = CancelToken::new();
        let accounts = vec!["alice".to_string(), "bob".to_string()];
        assert_eq!(AlwaysGrant.select_credential(&prompt, &accounts, &token), Some(0));
        assert_eq!(AlwaysGrant.select_credential(&prompt, &[], &token), None);
    }
}
