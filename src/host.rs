//! Channel front end for an [`Authenticator`].
//!
//! Transport tasks hold a cloneable [`HostHandle`] and submit raw commands;
//! one loop task receives them in order and runs each on the blocking pool,
//! since a command may wait on a user gesture.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::buffer::ByteBuffer;
use crate::ctap2::Authenticator;
use crate::error::Result;
use crate::store::CredentialStore;
use crate::up::{CancelToken, UserGesture};

/// Status returned when a command could not be run at all.
const STATUS_OTHER: u8 = 0x7F;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host loop is not running")]
    Closed,
    #[error("host loop dropped the request")]
    Dropped,
}

struct Request {
    command: ByteBuffer,
    cancel: CancelToken,
    reply: oneshot::Sender<ByteBuffer>,
}

#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<Request>,
}

impl HostHandle {
    pub async fn submit(&self, command: ByteBuffer) -> Result<ByteBuffer> {
        self.submit_with_cancel(command, CancelToken::new()).await
    }

    /// Submit a command the caller may abort by cancelling `cancel`.
    pub async fn submit_with_cancel(
        &self,
        command: ByteBuffer,
        cancel: CancelToken,
    ) -> Result<ByteBuffer> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request {
                command,
                cancel,
                reply,
            })
            .await
            .map_err(|_| HostError::Closed)?;
        Ok(rx.await.map_err(|_| HostError::Dropped)?)
    }

    /// Submit a command that is cancelled if it has not finished after
    /// `timeout`, e.g. while waiting for a gesture.
    pub async fn submit_with_timeout(
        &self,
        command: ByteBuffer,
        timeout: Duration,
    ) -> Result<ByteBuffer> {
        let cancel = CancelToken::new();
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(timeout).await;
                tracing::debug!(?timeout, "Command timed out, cancelling");
                cancel.cancel();
            }
        });
        let result = self.submit_with_cancel(command, cancel).await;
        timer.abort();
        result
    }
}

/// Start the loop on the current runtime. It exits once every handle has
/// been dropped.
pub fn spawn_host<S, G>(
    authenticator: Arc<Authenticator<S, G>>,
    queue_depth: usize,
) -> (HostHandle, JoinHandle<()>)
where
    S: CredentialStore + 'static,
    G: UserGesture + 'static,
{
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let task = tokio::spawn(run_host_loop(rx, authenticator));
    (HostHandle { tx }, task)
}

async fn run_host_loop<S, G>(mut rx: mpsc::Receiver<Request>, authenticator: Arc<Authenticator<S, G>>)
where
    S: CredentialStore + 'static,
    G: UserGesture + 'static,
{
    tracing::info!("Host loop running");

    while let Some(request) = rx.recv().await {
        let Request {
            command,
            cancel,
            reply,
        } = request;
        tracing::debug!(len = command.len(), "Command received");

        let auth = Arc::clone(&authenticator);
        let response = match tokio::task::spawn_blocking(move || {
            auth.process_with_cancel(&command, &cancel)
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Command worker failed");
                ByteBuffer::from([STATUS_OTHER])
            }
        };

        if reply.send(response).is_err() {
            tracing::warn!("Submitter went away before the response was ready");
        }
    }
    tracing::info!("Host loop exiting (all handles dropped)");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::buffer::serialise_byte_buffers;
    use crate::config::AuthenticatorConfig;
    use crate::ctap2::types::OPTION_UP;
    use crate::ec::EcGroup;
    use crate::error::Error;
    use crate::store::SoftwareStore;
    use crate::up::{AlwaysGrant, GestureKind, GestureOutcome, Prompt};

    /// Never answers; waits for the command to be cancelled.
    struct WaitForCancel;

    impl UserGesture for WaitForCancel {
        fn request_user_gesture(&self, _: GestureKind, _: &Prompt, cancel: &CancelToken) -> GestureOutcome {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !cancel.is_cancelled() {
                if Instant::now() > deadline {
                    return GestureOutcome::TimedOut;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            GestureOutcome::Cancelled
        }
    }

    fn make_credential() -> ByteBuffer {
        let mut cmd = ByteBuffer::from([0x01]);
        cmd += serialise_byte_buffers(&[
            ByteBuffer::filled(32, 0x22),
            ByteBuffer::from_text("example.com"),
            ByteBuffer::new(),
            ByteBuffer::from_text("alice"),
            ByteBuffer::new(),
            ByteBuffer::new(),
            serialise_byte_buffers(&[ByteBuffer::from((-7i32).to_be_bytes())]).unwrap(),
            ByteBuffer::new(),
            ByteBuffer::from([OPTION_UP]),
        ])
        .unwrap();
        cmd
    }

    #[tokio::test]
    async fn test_submit_and_shutdown() {
        let auth = Arc::new(Authenticator::new(
            SoftwareStore::in_memory(EcGroup::p256(), 4),
            AlwaysGrant,
            AuthenticatorConfig::default(),
        ));
        let (handle, task) = spawn_host(auth, 4);

        let response = handle.submit(ByteBuffer::from([0x04])).await.unwrap();
        assert_eq!(response[0], 0x00);
        let response = handle.submit(ByteBuffer::new()).await.unwrap();
        assert_eq!(response, ByteBuffer::from([0x12]));

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_cancels_pending_registration() {
        let auth = Arc::new(Authenticator::new(
            SoftwareStore::in_memory(EcGroup::p256(), 4),
            WaitForCancel,
            AuthenticatorConfig::default(),
        ));
        let (handle, _task) = spawn_host(Arc::clone(&auth), 4);

        let response = handle
            .submit_with_timeout(make_credential(), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(response, ByteBuffer::from([0x2D]));
        assert_eq!(auth.with_store(|s| s.credential_count().unwrap()), Some(0));
    }

    #[tokio::test]
    async fn test_submit_after_loop_stopped() {
        let auth = Arc::new(Authenticator::new(
            SoftwareStore::in_memory(EcGroup::p256(), 4),
            AlwaysGrant,
            AuthenticatorConfig::default(),
        ));
        let (handle, task) = spawn_host(auth, 4);
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(matches!(
            handle.submit(ByteBuffer::from([0x04])).await,
            Err(Error::Host(HostError::Closed))
        ));
    }
}
