//! `http.request` — outbound HTTP with SSRF defense at every hop.
//!
//! Redirects are followed manually so the same host validation runs
//! before every connection the request makes: domain allow/deny rules,
//! then DNS resolution (A + AAAA union), then fail-closed checks that no
//! resolved address is private or inside a denied CIDR.  A DNS answer is
//! never trusted across hops — each redirect target is resolved and
//! validated from scratch.

use std::collections::HashMap;
use std::net::IpAddr;

use futures_util::StreamExt;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use gk_canonical::ip::{ip_in_cidr, is_private_addr, parse_ip};
use gk_policy::{domain_matches, ToolPolicy};

use crate::ExecOutcome;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_REDIRECTS: u32 = 3;

/// Applied when the policy sets no `deny_ip_ranges`.
const DEFAULT_DENY_IP_RANGES: &[&str] = &[
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "0.0.0.0/8",
];

/// Response headers forwarded to the caller; everything else is dropped.
const RESPONSE_HEADER_ALLOWLIST: &[&str] = &[
    "content-type",
    "content-length",
    "cache-control",
    "etag",
    "last-modified",
    "date",
    "x-request-id",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpRequestArgs {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One shared client for all requests; redirect handling is ours, not
/// reqwest's, so every hop passes host validation.
pub struct HttpExecutor {
    client: reqwest::Client,
    /// `host:port` pairs that stand in for hosts with public DNS answers,
    /// letting a loopback stub server play a public origin.  Only
    /// constructible from this crate's tests.
    #[cfg(test)]
    stub_public_hosts: Vec<String>,
}

impl HttpExecutor {
    pub fn new() -> gk_domain::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("gatekeeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| gk_domain::Error::Execution(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            #[cfg(test)]
            stub_public_hosts: Vec::new(),
        })
    }

    #[cfg(test)]
    fn with_stub_public_hosts(hosts: Vec<String>) -> Self {
        let mut executor = Self::new().expect("client builds");
        executor.stub_public_hosts = hosts;
        executor
    }

    /// Per-hop validation entry point.  In tests, stub hosts skip the
    /// address checks; every other host goes through the real path.
    async fn validate_hop(&self, url: &Url, policy: &ToolPolicy) -> Result<(), String> {
        if self.is_stub_public_host(url) {
            return Ok(());
        }
        validate_host(url, policy).await
    }

    #[cfg(test)]
    fn is_stub_public_host(&self, url: &Url) -> bool {
        let hop = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or(80),
        );
        self.stub_public_hosts.iter().any(|h| h == &hop)
    }

    #[cfg(not(test))]
    fn is_stub_public_host(&self, _url: &Url) -> bool {
        false
    }

    /// Run the request under a single deadline covering every hop and the
    /// body read.  The deadline aborts the in-flight hop when it fires.
    pub async fn execute(&self, args: &HttpRequestArgs, policy: &ToolPolicy) -> ExecOutcome {
        let timeout_ms = policy.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let deadline = std::time::Duration::from_millis(timeout_ms);
        match tokio::time::timeout(deadline, self.run(args, policy)).await {
            Ok(outcome) => outcome,
            Err(_) => ExecOutcome::fail(format!("Request timeout ({timeout_ms}ms exceeded)")),
        }
    }

    async fn run(&self, args: &HttpRequestArgs, policy: &ToolPolicy) -> ExecOutcome {
        let method_str = args.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let Ok(method) = Method::from_bytes(method_str.as_bytes()) else {
            return ExecOutcome::fail(format!("invalid method '{method_str}'"));
        };

        let mut url = match Url::parse(&args.url) {
            Ok(u) => u,
            Err(e) => return ExecOutcome::fail(format!("invalid url: {e}")),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return ExecOutcome::fail(format!(
                "blocked scheme '{}': only http and https are allowed",
                url.scheme()
            ));
        }

        let max_redirects = policy.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS);
        let mut hops: u32 = 0;

        loop {
            if let Err(reason) = self.validate_hop(&url, policy).await {
                return ExecOutcome::fail(reason);
            }

            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(headers) = &args.headers {
                for (name, value) in headers {
                    request = request.header(name, value);
                }
            }
            if hops == 0 {
                if let Some(body) = &args.body {
                    request = match body {
                        Value::String(s) => request.body(s.clone()),
                        other => request.json(other),
                    };
                }
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => return ExecOutcome::fail(format!("request failed: {e}")),
            };

            if is_redirect(response.status()) {
                // Only GET may follow redirects.
                if method != Method::GET {
                    return ExecOutcome::fail(format!(
                        "redirect blocked: {method_str} requests may not follow redirects"
                    ));
                }
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                else {
                    return ExecOutcome::fail("redirect response without a Location header");
                };
                // The redirect body is never read.
                drop(response);

                url = match url.join(&location) {
                    Ok(u) => u,
                    Err(e) => {
                        return ExecOutcome::fail(format!("invalid redirect location: {e}"))
                    }
                };
                tracing::debug!(hop = hops + 1, target = %url, "following redirect");
                hops += 1;
                if hops > max_redirects {
                    return ExecOutcome::fail(format!(
                        "too many redirects (limit {max_redirects})"
                    ));
                }
                continue;
            }

            return read_response(response, policy).await;
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Stream the terminal response body up to the byte cap.
async fn read_response(response: reqwest::Response, policy: &ToolPolicy) -> ExecOutcome {
    let status = response.status().as_u16();
    let cap = policy.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES) as usize;

    let mut headers = serde_json::Map::new();
    for name in RESPONSE_HEADER_ALLOWLIST {
        if let Some(value) = response.headers().get(*name).and_then(|v| v.to_str().ok()) {
            headers.insert((*name).to_string(), Value::String(value.to_string()));
        }
    }

    let mut body: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => return ExecOutcome::fail(format!("error reading response body: {e}")),
        };
        let room = cap.saturating_sub(body.len());
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }
    drop(stream);

    ExecOutcome::ok(json!({
        "status": status,
        "headers": Value::Object(headers),
        "body": String::from_utf8_lossy(&body).into_owned(),
        "truncated": truncated,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Host validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a hop's target before any connection: domain rules, then
/// every resolved address against the private ranges and denied CIDRs.
async fn validate_host(url: &Url, policy: &ToolPolicy) -> Result<(), String> {
    let host = url.host_str().ok_or("url has no host")?;

    if policy
        .deny_domains
        .iter()
        .any(|d| d.eq_ignore_ascii_case(host))
    {
        return Err(format!("domain '{host}' is on the deny list"));
    }
    if !policy.allowed_domains.is_empty()
        && !policy.allowed_domains.iter().any(|d| domain_matches(host, d))
    {
        return Err(format!("domain '{host}' is not in the allowed domain list"));
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let resolved: Vec<IpAddr> = match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => addrs.map(|sa| sa.ip()).collect(),
        Err(_) => Vec::new(),
    };
    let addrs = if resolved.is_empty() {
        match parse_ip(host) {
            Some(literal) => vec![literal],
            None => return Err(format!("DNS resolution returned no addresses for {host}")),
        }
    } else {
        resolved
    };

    check_addrs(host, &addrs, policy)
}

/// Fail-closed address checks, shared by every hop.
fn check_addrs(host: &str, addrs: &[IpAddr], policy: &ToolPolicy) -> Result<(), String> {
    let configured = &policy.deny_ip_ranges;
    let default_ranges: Vec<String>;
    let ranges: &[String] = if configured.is_empty() {
        default_ranges = DEFAULT_DENY_IP_RANGES.iter().map(|s| s.to_string()).collect();
        &default_ranges
    } else {
        configured
    };

    for addr in addrs {
        if is_private_addr(addr) {
            return Err(format!(
                "blocked request to private address: {host} resolves to {addr}"
            ));
        }
        let addr_text = addr.to_string();
        for range in ranges {
            if ip_in_cidr(&addr_text, range) {
                return Err(format!(
                    "blocked request: {host} resolves to {addr} inside denied range {range}"
                ));
            }
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
