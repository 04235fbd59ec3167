pub mod buffer;
pub mod config;
pub mod ctap2;
pub mod ec;
pub mod error;
pub mod host;
pub mod store;
pub mod tpm;
pub mod up;

pub use buffer::ByteBuffer;
pub use config::AuthenticatorConfig;
pub use ctap2::{Authenticator, Ctap2Error, EngineState};
pub use ec::EcGroup;
pub use error::{Error, Result};
pub use host::{HostHandle, spawn_host};
pub use store::{Backend, CredentialStore, SoftwareStore, TpmStore};
pub use up::{
    AlwaysGrant, CancelToken, GestureKind, GestureOutcome, PinentryGesture, Prompt, UserGesture,
    UserPresenceProof,
};
