//! The `networkCall` capability with security controls.
//!
//! Scripts get no ambient network access. When the host configures a
//! [`NetworkConfig`], `networkCall(url, options?)` performs an HTTP request
//! on the host's behalf, subject to:
//!
//! - **Host allowlist**: wildcard patterns such as `*.example.com`
//! - **SSRF protection**: private, loopback, shared and multicast addresses
//!   are refused by default, and the connection is pinned to the address
//!   that was checked
//! - **Method allowlist**: only configured HTTP methods
//! - **Timeout** and **response size limit**, enforced while streaming
//!
//! Without a configuration, the capability is still bound but every call
//! fails with "network access is disabled".
//!
//! # Example
//!
//! ```rust,ignore
//! use dashscript::{HttpMethod, NetworkConfig, Sandbox};
//! use std::time::Duration;
//!
//! let config = NetworkConfig::builder()
//!     .allowed_hosts(vec!["api.example.com"])
//!     .timeout(Duration::from_secs(5))
//!     .allowed_methods(vec![HttpMethod::Get])
//!     .build();
//!
//! let sandbox = Sandbox::builder().with_network(config).build()?;
//!
//! // In a script:
//! // const res = networkCall("https://api.example.com/rates");
//! // log(res.status, JSON.parse(res.body).usd);
//! ```

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::callback::{Callback, CallbackError, CallbackFuture, positional};

/// HTTP methods `networkCall` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP GET request
    Get,
    /// HTTP POST request
    Post,
    /// HTTP PUT request
    Put,
    /// HTTP DELETE request
    Delete,
    /// HTTP PATCH request
    Patch,
    /// HTTP HEAD request
    Head,
}

impl HttpMethod {
    const ALL: [HttpMethod; 6] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
    ];

    const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Case-insensitive lookup by name.
    fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(name))
    }

    fn to_reqwest(self) -> reqwest::Method {
        reqwest::Method::from_bytes(self.as_str().as_bytes()).unwrap_or_default()
    }

    fn carries_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy for `networkCall`. The default allows nothing.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Host patterns a request may target, e.g. `api.example.com` or
    /// `*.example.com`. `"*"` matches any host; an empty list matches none.
    pub allowed_hosts: Vec<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Largest response body handed back to the script.
    pub max_response_bytes: usize,
    /// Methods scripts may use.
    pub allowed_methods: Vec<HttpMethod>,
    /// Whether requests may target private, loopback or link-local addresses.
    pub allow_private_ips: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            timeout: Duration::from_secs(10),
            max_response_bytes: 2 * 1024 * 1024,
            allowed_methods: vec![HttpMethod::Get],
            allow_private_ips: false,
        }
    }
}

impl NetworkConfig {
    /// Start from the closed default policy.
    #[must_use]
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`NetworkConfig`]; unset fields keep their defaults.
#[derive(Debug, Clone)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl NetworkConfigBuilder {
    /// Hosts scripts may reach.
    ///
    /// `"*.example.com"` matches `api.example.com` but not `example.com`.
    #[must_use]
    pub fn allowed_hosts(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Response body cap.
    #[must_use]
    pub fn max_response_bytes(mut self, limit: usize) -> Self {
        self.config.max_response_bytes = limit;
        self
    }

    /// Methods scripts may use.
    #[must_use]
    pub fn allowed_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.config.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Let requests reach private address ranges.
    #[must_use]
    pub fn allow_private_ips(mut self, allow: bool) -> Self {
        self.config.allow_private_ips = allow;
        self
    }

    /// Finish the policy.
    #[must_use]
    pub fn build(self) -> NetworkConfig {
        self.config
    }
}

/// Second argument of `networkCall`.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct RequestOptions {
    /// HTTP method (default: GET).
    #[serde(default)]
    pub method: Option<String>,
    /// Request headers.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Request body, for POST, PUT and PATCH.
    #[serde(default)]
    pub body: Option<String>,
}

const DESCRIPTION: &str = "Make an HTTP request: networkCall(url, {method?, headers?, body?}). \
     Returns {status, headers, body}.";

fn parameters_schema() -> Value {
    let options = serde_json::to_value(schemars::schema_for!(RequestOptions)).unwrap_or_default();
    json!({
        "type": "array",
        "prefixItems": [{ "type": "string", "format": "uri" }, options],
        "minItems": 1,
    })
}

/// A request target that passed validation.
#[derive(Debug)]
struct Target {
    url: reqwest::Url,
    /// Address the host name was checked against; connections go there.
    pinned: Option<SocketAddr>,
}

/// Append `chunk` unless the body would grow past `limit` bytes.
///
/// On overflow the body is left untouched and the size it would have
/// reached is returned.
fn append_within_limit(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), usize> {
    let size = body.len().saturating_add(chunk.len());
    if size > limit {
        return Err(size);
    }
    body.extend_from_slice(chunk);
    Ok(())
}

/// `networkCall` backed by a configured HTTP client.
#[derive(Debug)]
pub struct NetworkCallback {
    config: NetworkConfig,
    client: reqwest::Client,
}

impl NetworkCallback {
    /// Create the capability with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError::ExecutionFailed`] if the HTTP client cannot be built.
    pub fn new(config: NetworkConfig) -> Result<Self, CallbackError> {
        let client = Self::client_builder(&config)
            .build()
            .map_err(|e| CallbackError::ExecutionFailed(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn client_builder(config: &NetworkConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
    }

    /// The client for one request, connecting only to the pinned address
    /// when there is one.
    fn client_for(&self, target: &Target) -> Result<reqwest::Client, CallbackError> {
        let (Some(addr), Some(host)) = (target.pinned, target.url.host_str()) else {
            return Ok(self.client.clone());
        };
        Self::client_builder(&self.config)
            .resolve(host, addr)
            .build()
            .map_err(|e| CallbackError::ExecutionFailed(format!("failed to create HTTP client: {e}")))
    }

    fn is_host_allowed(&self, host: &str) -> bool {
        self.config
            .allowed_hosts
            .iter()
            .any(|pattern| pattern == "*" || wildmatch::WildMatch::new(pattern).matches(host))
    }

    /// Whether `ip` is loopback, private, link-local or otherwise not public.
    fn is_private_ip(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ipv4) => {
                let octets = ipv4.octets();
                ipv4.is_loopback()
                    || ipv4.is_private()
                    || ipv4.is_link_local()
                    || ipv4.is_broadcast()
                    || ipv4.is_unspecified()
                    || ipv4.is_multicast()
                    // "This network" 0.0.0.0/8
                    || octets[0] == 0
                    // Shared address space 100.64.0.0/10
                    || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                    // Documentation ranges
                    || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                    || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                    || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
            }
            IpAddr::V6(ipv6) => {
                if let Some(mapped) = ipv6.to_ipv4_mapped() {
                    return Self::is_private_ip(IpAddr::V4(mapped));
                }
                let segments = ipv6.segments();
                ipv6.is_loopback()
                    || ipv6.is_unspecified()
                    || ipv6.is_multicast()
                    // Unique local fc00::/7
                    || (segments[0] & 0xfe00) == 0xfc00
                    // Link-local fe80::/10
                    || (segments[0] & 0xffc0) == 0xfe80
            }
        }
    }

    async fn validate_url(&self, raw: &str) -> Result<Target, CallbackError> {
        let url = reqwest::Url::parse(raw)
            .map_err(|e| CallbackError::InvalidArguments(format!("invalid URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CallbackError::InvalidArguments(format!(
                "unsupported URL scheme '{}': use http or https",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| CallbackError::InvalidArguments(format!("URL '{raw}' has no host")))?;

        if !self.is_host_allowed(host) {
            return Err(CallbackError::InvalidArguments(format!(
                "host '{host}' is not in the allowed list"
            )));
        }

        if self.config.allow_private_ips {
            return Ok(Target { url, pinned: None });
        }

        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            if Self::is_private_ip(ip) {
                return Err(CallbackError::InvalidArguments(format!(
                    "requests to private IP addresses are blocked: {ip}"
                )));
            }
            return Ok(Target { url, pinned: None });
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| CallbackError::ExecutionFailed(format!("could not resolve host '{host}': {e}")))?
            .collect();
        if let Some(addr) = addrs.iter().find(|addr| Self::is_private_ip(addr.ip())) {
            return Err(CallbackError::InvalidArguments(format!(
                "host '{host}' resolves to private IP address: {}",
                addr.ip()
            )));
        }
        let pinned = addrs.first().copied().ok_or_else(|| {
            CallbackError::ExecutionFailed(format!("host '{host}' resolved to no addresses"))
        })?;

        Ok(Target {
            url,
            pinned: Some(pinned),
        })
    }

    async fn request(&self, args: Value) -> Result<Value, CallbackError> {
        let url = positional(&args, 0).as_str().ok_or_else(|| {
            CallbackError::InvalidArguments("networkCall expects a URL string".to_string())
        })?;
        let options: RequestOptions = match positional(&args, 1) {
            Value::Null => RequestOptions::default(),
            raw => serde_json::from_value(raw.clone())
                .map_err(|e| CallbackError::InvalidArguments(format!("networkCall: {e}")))?,
        };

        let method_name = options.method.as_deref().unwrap_or("GET");
        let method = HttpMethod::parse(method_name).ok_or_else(|| {
            CallbackError::InvalidArguments(format!("unsupported HTTP method: {method_name}"))
        })?;
        if !self.config.allowed_methods.contains(&method) {
            return Err(CallbackError::InvalidArguments(format!(
                "HTTP method {method} is not allowed. Allowed methods: {:?}",
                self.config.allowed_methods
            )));
        }

        let target = self.validate_url(url).await?;
        let client = self.client_for(&target)?;

        tracing::info!(url = %target.url, method = %method, pinned = ?target.pinned, "networkCall: making HTTP request");

        let mut request = client.request(method.to_reqwest(), target.url);
        for (name, value) in options.headers.unwrap_or_default() {
            request = request.header(name, value);
        }
        if let Some(body) = options.body {
            if method.carries_body() {
                request = request.body(body);
            } else {
                tracing::warn!(method = %method, "networkCall: ignoring body for method without one");
            }
        }

        let mut response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CallbackError::Timeout
            } else {
                CallbackError::ExecutionFailed(format!("request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let mut headers = serde_json::Map::new();
        for (name, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                headers.insert(name.to_string(), Value::String(text.to_string()));
            }
        }

        let limit = self.config.max_response_bytes;
        let too_large = |size: u64| {
            CallbackError::ExecutionFailed(format!(
                "response body of {size} bytes exceeds the {limit} byte limit"
            ))
        };
        if let Some(declared) = response.content_length()
            && declared > limit as u64
        {
            return Err(too_large(declared));
        }

        let mut body_bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CallbackError::ExecutionFailed(format!("reading response body: {e}")))?
        {
            append_within_limit(&mut body_bytes, &chunk, limit)
                .map_err(|size| too_large(size as u64))?;
        }

        tracing::info!(status, body_size = body_bytes.len(), "networkCall: HTTP request completed");

        Ok(json!({
            "status": status,
            "headers": headers,
            "body": String::from_utf8_lossy(&body_bytes),
        }))
    }
}

impl Callback for NetworkCallback {
    fn name(&self) -> &str {
        "networkCall"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema()
    }

    fn invoke(&self, args: Value) -> CallbackFuture<'_> {
        Box::pin(self.request(args))
    }
}

/// `networkCall` when no network access was configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNetwork;

impl Callback for DisabledNetwork {
    fn name(&self) -> &str {
        "networkCall"
    }

    fn description(&self) -> &str {
        "Network access is disabled for this console."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema()
    }

    fn invoke(&self, _args: Value) -> CallbackFuture<'_> {
        Box::pin(async {
            Err(CallbackError::ExecutionFailed(
                "network access is disabled".to_string(),
            ))
        })
    }
}
