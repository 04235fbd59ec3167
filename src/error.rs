#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Buffer: {0}")]
    Buffer(#[from] crate::buffer::BufferError),
    #[error("EC: {0}")]
    Ec(#[from] crate::ec::EcError),
    #[error("TPM: {0}")]
    Tpm(#[from] crate::tpm::TpmError),
    #[error("Store: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("CTAP2: {0}")]
    Ctap2(#[from] crate::ctap2::Ctap2Error),
    #[error("Host: {0}")]
    Host(#[from] crate::host::HostError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
