//! Frontière HTTP sortante : le cœur ne connaît que le trait
//! [`UpnpRequester`], l'implémentation par défaut repose sur `ureq`.

use std::io::Read;
use std::time::Duration;

use ureq::{Agent, http};

use crate::DEFAULT_HTTP_TIMEOUT;
use crate::errors::TransportError;

/// Raw HTTP response, enough for SUBSCRIBE/UNSUBSCRIBE/GET handling.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header with this name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP transport. Implementations perform the verb and report
/// status + headers + body; transient-retry policy belongs to them.
pub trait UpnpRequester: Send + Sync {
    fn http_request(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Default requester: one `ureq` agent, non-standard verbs allowed, HTTP
/// error statuses reported as plain responses.
pub struct UreqRequester {
    agent: Agent,
}

impl UreqRequester {
    pub fn new(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl Default for UreqRequester {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

impl UpnpRequester for UreqRequester {
    fn http_request(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = http::Request::builder().method(method).uri(url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let response = match body {
            Some(bytes) => self.agent.run(
                builder
                    .body(bytes.to_vec())
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
            ),
            None => self.agent.run(
                builder
                    .body(())
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
            ),
        }
        .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        let (parts, body) = response.into_parts();
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let mut buf = Vec::new();
        body.into_reader()
            .read_to_end(&mut buf)
            .map_err(TransportError::Io)?;

        Ok(HttpResponse {
            status,
            headers,
            body: buf,
        })
    }
}
