//! Transport seam, XML wire types, and remote task polling for the
//! cloudlift SDK.
//!
//! Everything that talks to the remote API goes through the [`Transport`]
//! trait so the upload and polling machinery can be exercised against a
//! scripted mock in tests.

pub mod task;
pub mod transport;
pub mod types;

pub use task::{Task, TaskError};
pub use transport::{BoxFuture, ContentRange, HttpTransport, Transport};
pub use types::{TaskBody, TaskStatus, UploadEntity};

/// Errors produced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),
}
