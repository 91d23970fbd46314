//! Probe executors.
//!
//! Supports HTTP request probes and RPC connection-state probes. Executors
//! are stateless: they take a target and a deadline, and always return a
//! classified [`Outcome`]. An unreachable target is a failed outcome, not
//! an error.

mod http;
mod rpc;

pub use http::*;
pub use rpc::*;

use crate::db::{Method, Protocol, Status};
use std::time::Duration;

/// Classified result of one probe.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    /// HTTP status code, or the RPC connection state code; 0 when no
    /// response was received at all.
    pub status_code: i64,
    pub latency_ms: i64,
    /// Empty on success.
    pub error: String,
}

impl Outcome {
    /// The liveness verdict this outcome records in the probe log.
    pub fn status(&self) -> Status {
        if self.success {
            Status::Up
        } else {
            Status::Down
        }
    }
}

/// Run one probe for the given protocol under the given deadline.
pub async fn run_probe(
    protocol: Protocol,
    method: Method,
    url: &str,
    timeout: Duration,
) -> Outcome {
    match protocol {
        Protocol::Http => run_http_probe(method, url, timeout).await,
        Protocol::Rpc => run_rpc_probe(url, timeout).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status_classification() {
        let up = Outcome {
            success: true,
            status_code: 200,
            latency_ms: 3,
            error: String::new(),
        };
        assert_eq!(up.status(), Status::Up);

        let down = Outcome {
            success: false,
            status_code: 0,
            latency_ms: 3,
            error: "connection refused".to_string(),
        };
        assert_eq!(down.status(), Status::Down);
    }
}
