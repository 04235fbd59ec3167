use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::config::AuthenticatorConfig;

use super::{CancelToken, GestureKind, GestureOutcome, Prompt, UserGesture};

/// How often a pending prompt checks its cancel token.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Confirms gestures through a `pinentry` dialog.
///
/// The dialog runs on its own thread; the caller polls for the answer so it
/// can give up on cancellation or timeout. An abandoned dialog is left for
/// the user to dismiss.
#[derive(Debug, Clone)]
pub struct PinentryGesture {
    binary: String,
    timeout: Duration,
}

impl PinentryGesture {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AuthenticatorConfig) -> Self {
        Self::new(config.pinentry.as_str(), config.gesture_timeout)
    }
}

impl UserGesture for PinentryGesture {
    fn request_user_gesture(
        &self,
        kind: GestureKind,
        prompt: &Prompt,
        cancel: &CancelToken,
    ) -> GestureOutcome {
        if cancel.is_cancelled() {
            return GestureOutcome::Cancelled;
        }

        let (tx, rx) = mpsc::channel();
        let bin = self.binary.clone();
        let title = prompt.title.clone();
        let description = match kind {
            GestureKind::Presence => prompt.description.clone(),
            GestureKind::Verification => {
                format!("{}\n\n(Confirms your identity.)", prompt.description)
            }
        };

        std::thread::spawn(move || {
            let result = match pinentry::PassphraseInput::with_binary(&bin) {
                None => Err(pinentry::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "pinentry binary not found",
                ))),
                Some(mut input) => input
                    .with_title(&title)
                    .with_description(&description)
                    .with_ok("Confirm")
                    .with_cancel("Deny")
                    .interact()
                    .map(|_| ()),
            };
            // The receiver is gone if the request was abandoned.
            let _ = tx.send(result);
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            if cancel.is_cancelled() {
                tracing::info!("Gesture cancelled");
                return GestureOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::info!(timeout_ms = self.timeout.as_millis() as u64, "Gesture timed out");
                return GestureOutcome::TimedOut;
            }
            match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(Ok(())) => return GestureOutcome::Granted,
                Ok(Err(e)) => {
                    tracing::info!(error = %e, "Gesture denied");
                    return GestureOutcome::Denied;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return GestureOutcome::Denied,
            }
        }
    }
}
