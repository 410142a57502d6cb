use std::time::Duration;

use reqwest::{Client, Url};

use crate::error::{GeneratorError, Result};

/// Build an HTTP client for one call against `base_url`.
///
/// Loopback targets bypass any system proxy; a `timeout_secs` of 0 means no
/// overall request timeout.
pub fn client_for(base_url: &str, timeout_secs: u64) -> Result<Client> {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(30));
    if timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(timeout_secs));
    }
    if is_loopback(base_url) {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|e| GeneratorError::Config(format!("failed to create HTTP client: {e}")))
}

fn is_loopback(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return false;
    };
    matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    )
}
