use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("IO Error: {0}")]
    IoError(#[source] std::io::Error),

    #[error("TLS Error: {0}")]
    TlsError(#[source] rustls::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("No Gateway found for domain: {0}")]
    NoGatewayForDomain(String),

    #[error("Solver Service not found for pod: {0}")]
    SolverServiceNotFound(String),

    #[error("Missing Label: {0}")]
    MissingLabel(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    /// NB: this is a catch-all for any other errors
    #[error("Other Error: {0}")]
    OtherError(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// True when a kube API error is a 404 for the object that was asked about.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when a kube API error is a 409 on create (object already exists).
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

pub mod cert_controller;
pub mod cert_manager;
pub mod domains;
mod events_helper;
pub mod gateway_controller;
pub mod helper;
pub mod issuer_controller;
pub mod istio;
pub mod labels;
pub mod macros;
pub mod solver_controller;
pub use events_helper::*;

/// Log and trace integrations
pub mod telemetry;
