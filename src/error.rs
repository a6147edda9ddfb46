//! Error types for sdnctl.
//!
//! A single `thiserror` enum covers the three failure families the core deals
//! with: transport failures talking to the controller, structural problems in
//! discovery payloads, and validation failures on caller input. Lookup misses
//! are not errors; query methods return `Option` for those.

use thiserror::Error;

/// Custom error type for sdnctl operations.
#[derive(Debug, Error)]
pub enum SdnError {
    /// Error making HTTP requests to the controller.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Error parsing or producing JSON payloads.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The controller answered 404 for the given path.
    #[error("Endpoint not found: {0}")]
    NotFound(String),

    /// The controller answered with a non-2xx status.
    #[error("Unexpected response {status} for {path}")]
    UnexpectedStatus { status: u16, path: String },

    /// Error when the controller returns an unexpected data layout.
    #[error("Invalid API response: {0}")]
    InvalidApiResponse(String),

    /// Discovery data is inconsistent (missing fields, dangling links).
    #[error("Malformed discovery data: {0}")]
    Structural(String),

    /// A path failed validation before any write was attempted.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A path endpoint is not a host.
    #[error("Invalid path: terminal node {0} is not a host")]
    NotAHost(String),

    /// A switch on the path has no port facing one of its path neighbours.
    #[error("Invalid path: no port on {node} facing {peer}")]
    UnresolvedPort { node: String, peer: String },

    /// A switch operation named a node that is not a known switch.
    #[error("Unknown switch: {0}")]
    UnknownSwitch(String),

    /// Weight update for a pair of nodes that are not linked.
    #[error("No link between {0} and {1}")]
    NoSuchEdge(String, String),

    /// A flow id was given without the table that holds it.
    #[error("Flow {0} needs a table")]
    FlowWithoutTable(String),

    /// Weight update above the accepted maximum.
    #[error("Weight {weight} for {a} <-> {b} is out of range")]
    WeightOutOfRange { a: String, b: String, weight: u64 },

    /// A path installation failed after some writes already went through.
    #[error("Path installation failed after {} successful writes: {source}", .completed.len())]
    PartialInstall {
        completed: Vec<String>,
        #[source]
        source: Box<SdnError>,
    },

    /// A path installation was cancelled between two writes.
    #[error("Path installation cancelled after {} successful writes", .completed.len())]
    Cancelled { completed: Vec<String> },
}

impl SdnError {
    /// True for failures raised by the controller transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SdnError::HttpRequest(_)
                | SdnError::NotFound(_)
                | SdnError::UnexpectedStatus { .. }
                | SdnError::InvalidApiResponse(_)
        )
    }

    /// Writes that went through before an install stopped, if any.
    pub fn completed_writes(&self) -> &[String] {
        match self {
            SdnError::PartialInstall { completed, .. } | SdnError::Cancelled { completed } => {
                completed
            }
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_install_message_counts_writes() {
        let err = SdnError::PartialInstall {
            completed: vec!["openflow:1/h01-h02-go".into()],
            source: Box::new(SdnError::NotFound("/restconf/x".into())),
        };
        assert_eq!(
            err.to_string(),
            "Path installation failed after 1 successful writes: Endpoint not found: /restconf/x"
        );
        assert_eq!(err.completed_writes().len(), 1);
    }

    #[test]
    fn test_transport_classification() {
        assert!(SdnError::NotFound("x".into()).is_transport());
        assert!(!SdnError::Structural("x".into()).is_transport());
        assert!(SdnError::InvalidPath("x".into()).completed_writes().is_empty());
    }
}
