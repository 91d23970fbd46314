//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Liveness state of a monitored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "UP" => Some(Status::Up),
            "DOWN" => Some(Status::Down),
            _ => None,
        }
    }
}

/// Probe transport for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "RPC")]
    Rpc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Rpc => "RPC",
        }
    }

    pub fn parse(s: &str) -> Option<Protocol> {
        match s {
            "HTTP" => Some(Protocol::Http),
            "RPC" => Some(Protocol::Rpc),
            _ => None,
        }
    }
}

/// HTTP method used by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "PATCH")]
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "PATCH" => Some(Method::Patch),
            _ => None,
        }
    }
}

/// A monitored external service and its latest liveness state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub protocol: Protocol,
    pub method: Method,
    #[serde(rename = "timeout")]
    pub timeout_secs: i64,
    #[serde(rename = "interval")]
    pub interval_secs: i64,
    pub failure_threshold: i64,
    pub status: Status,
    pub consecutive_failures: i64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// Probe deadline for this service.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(0) as u64)
    }
}

/// Registration request for a new service.
///
/// `protocol` and `method` arrive as free text and are validated by the
/// store, so an unknown value is a rejection rather than a deserialization
/// failure.
#[derive(Debug, Clone, Deserialize)]
pub struct NewService {
    pub name: String,
    pub url: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(rename = "timeout", default)]
    pub timeout_secs: i64,
    #[serde(rename = "interval", default)]
    pub interval_secs: i64,
    #[serde(default)]
    pub failure_threshold: i64,
}

fn default_protocol() -> String {
    "HTTP".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

/// One appended probe outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeLog {
    pub id: i64,
    pub service_id: i64,
    pub status: Status,
    pub status_code: i64,
    pub response_time_ms: i64,
    pub error_message: String,
    pub checked_at: DateTime<Utc>,
}

/// A crossing of the stored status between UP and DOWN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: Status,
    pub to: Status,
}
