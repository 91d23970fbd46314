//! HTTP probe implementation.

use super::Outcome;
use crate::db::Method;
use std::time::{Duration, Instant};

/// Issue one bodyless HTTP request and classify the response.
///
/// Success means a response arrived with a status below 400. Latency is
/// wall-clock from issue to response or error; the supplied timeout bounds
/// the entire request. A transport error records status code 0 and the
/// error text.
pub async fn run_http_probe(method: Method, url: &str, timeout: Duration) -> Outcome {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            return Outcome {
                success: false,
                status_code: 0,
                latency_ms: 0,
                error: e.to_string(),
            }
        }
    };

    let start = Instant::now();
    let result = client.request(to_reqwest_method(method), url).send().await;
    let latency_ms = start.elapsed().as_millis() as i64;

    match result {
        Ok(response) => {
            let status_code = response.status().as_u16() as i64;
            Outcome {
                success: status_code < 400,
                status_code,
                latency_ms,
                error: String::new(),
            }
        }
        Err(e) => Outcome {
            success: false,
            status_code: 0,
            latency_ms,
            error: e.to_string(),
        },
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
    }
}
