//! RPC connection-state probe implementation.

use super::Outcome;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Connection states reported by the RPC probe. The numeric codes land in
/// the probe log's `status_code` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
    Shutdown = 4,
}

/// Attempt to reach READY connection state within the deadline.
///
/// Success means the endpoint accepted a connection before the deadline.
/// A refused connection reports TRANSIENT_FAILURE; running out the deadline
/// reports the attempt still CONNECTING.
pub async fn run_rpc_probe(url: &str, timeout: Duration) -> Outcome {
    let address = endpoint_address(url);
    let start = Instant::now();

    let attempt = tokio::time::timeout(timeout, TcpStream::connect(address)).await;
    let latency_ms = start.elapsed().as_millis() as i64;

    match attempt {
        Ok(Ok(_stream)) => Outcome {
            success: true,
            status_code: ConnState::Ready as i64,
            latency_ms,
            error: String::new(),
        },
        Ok(Err(e)) => Outcome {
            success: false,
            status_code: ConnState::TransientFailure as i64,
            latency_ms,
            error: format!("connection failed: {}", e),
        },
        Err(_) => Outcome {
            success: false,
            status_code: ConnState::Connecting as i64,
            latency_ms,
            error: format!("connection not ready within {:?}", timeout),
        },
    }
}

/// Reduce an RPC endpoint URL to a host:port dial target.
fn endpoint_address(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    match rest.find('/') {
        Some(idx) => &rest[..idx],
        None => rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_address_strips_scheme_and_path() {
        assert_eq!(endpoint_address("rpc://host:50051"), "host:50051");
        assert_eq!(endpoint_address("rpc://host:50051/svc"), "host:50051");
        assert_eq!(endpoint_address("host:50051"), "host:50051");
    }

    #[tokio::test]
    async fn test_rpc_probe_ready_when_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let outcome = run_rpc_probe(&format!("rpc://{}", addr), Duration::from_secs(1)).await;
        assert!(outcome.success);
        assert_eq!(outcome.status_code, ConnState::Ready as i64);
    }

    #[tokio::test]
    async fn test_rpc_probe_refused_is_transient_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = run_rpc_probe(&format!("rpc://{}", addr), Duration::from_secs(1)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, ConnState::TransientFailure as i64);
        assert!(!outcome.error.is_empty());
    }
}
