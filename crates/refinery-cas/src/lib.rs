//! Artifact byte stores: the content-addressed registry and the object store.
//!
//! The CAS speaks the OCI distribution API (`/v2/<repo>/manifests`,
//! `/v2/<repo>/blobs`). Every blob fetched from it is digest-verified before
//! the caller may trust it; a mismatching blob is deleted on the spot.

pub use object_store::ObjectStore;
pub use registry::CasClient;
pub use verify::verify_digest;

mod object_store;
mod registry;
mod verify;

#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("invalid registry URL")]
    Url(#[from] url::ParseError),
    #[error("registry request failed")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status} from {context}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        context: String,
    },
    #[error("blob upload for {digest} returned no Location header")]
    MissingLocation { digest: String },
    #[error("digest mismatch for {path}: expected {expected}, computed {computed}")]
    DigestMismatch {
        path: String,
        expected: String,
        computed: String,
    },
    #[error("artifact digest error")]
    Artifact(#[from] refinery_artifact::Error),
    #[error("object store write failed: {0}")]
    ObjectStore(String),
    #[error("io error on {0}")]
    Io(String, #[source] std::io::Error),
}
