//! End-to-end tests against a live gateway on an ephemeral port.
//!
//! Each test boots the full runtime (policy store, durable stores, audit
//! sink, local notifier) with its own temp directories, then drives it
//! over real HTTP.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

use gk_domain::config::{Config, DataConfig, NotifyConfig, PolicyConfig, ServerConfig};
use gk_gateway::api;
use gk_gateway::bootstrap::build_app_state;
use gk_gateway::state::AppState;

const SECRET: &str = "an-integration-test-secret-with-length";

struct TestGateway {
    base: String,
    state: AppState,
    client: reqwest::Client,
    _policy_dir: TempDir,
    data_dir: TempDir,
}

async fn spawn_gateway(policy_yaml: &str, demo_mode: bool) -> TestGateway {
    spawn_gateway_with_ttl(policy_yaml, demo_mode, 3600).await
}

async fn spawn_gateway_with_ttl(policy_yaml: &str, demo_mode: bool, ttl: u64) -> TestGateway {
    let policy_dir = TempDir::new().unwrap();
    let policy_path = policy_dir.path().join("policy.yaml");
    std::fs::write(&policy_path, policy_yaml).unwrap();
    let data_dir = TempDir::new().unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let config = Config {
        server: ServerConfig {
            port: addr.port(),
            base_url: base.clone(),
            secret: SECRET.into(),
            demo_mode,
            default_role: None,
        },
        policy: PolicyConfig::file(policy_path.to_string_lossy().into_owned()),
        data: DataConfig {
            dir: data_dir.path().to_path_buf(),
            approval_ttl_secs: ttl,
            sweep_interval_secs: 0,
        },
        notify: NotifyConfig::default(),
    };

    let state = build_app_state(Arc::new(config)).unwrap();
    let app = api::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestGateway {
        base,
        state,
        client: reqwest::Client::new(),
        _policy_dir: policy_dir,
        data_dir,
    }
}

fn envelope(args: Value) -> Value {
    json!({
        "requestId": Uuid::new_v4(),
        "actor": { "type": "agent", "name": "pilot" },
        "args": args,
    })
}

impl TestGateway {
    async fn post_tool(&self, tool: &str, body: &Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}/tool/{tool}", self.base))
            .json(body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, url: &str) -> (u16, Value) {
        let response = self.client.get(url).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

fn flags(body: &Value) -> Vec<String> {
    body["riskFlags"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: deny by tool pattern
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_pattern_denies_with_explanation() {
    let gw = spawn_gateway(
        "tools:\n  shell.exec:\n    decision: approve\n    deny_patterns: [\"rm -rf\", sudo]\n",
        false,
    )
    .await;

    let (status, body) = gw
        .post_tool("shell.exec", &envelope(json!({"command": "rm -rf /"})))
        .await;

    assert_eq!(status, 403);
    assert_eq!(body["decision"], "deny");
    assert_eq!(body["reasonCode"], "TOOL_DENY_PATTERN");
    assert!(body["humanExplanation"].as_str().unwrap().contains("rm -rf"));
    assert!(flags(&body).contains(&"pattern_match:rm -rf".to_string()));
    assert_eq!(body["policyVersion"], gw.state.policy.hash());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: approve, then single-use callback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn approval_callback_is_single_use() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: approve\n", true).await;

    let (status, body) = gw
        .post_tool("shell.exec", &envelope(json!({"command": "echo approved-run"})))
        .await;
    assert_eq!(status, 202);
    assert_eq!(body["decision"], "approve");
    assert_eq!(body["reasonCode"], "POLICY_APPROVAL_REQUIRED");
    assert!(body["approvalId"].is_string());
    assert!(body["expiresAt"].is_string());
    let approve_url = body["approveUrl"].as_str().unwrap().to_string();

    // First callback executes the frozen command.
    let (status, callback_body) = gw.get(&approve_url).await;
    assert_eq!(status, 200, "{callback_body}");
    assert_eq!(callback_body["status"], "approved");
    assert_eq!(callback_body["success"], true);
    assert!(callback_body["result"]["stdout"]
        .as_str()
        .unwrap()
        .contains("approved-run"));
    assert!(callback_body["executionReceipt"]["durationMs"].is_i64());

    // Second identical callback is refused.
    let (status, replay_body) = gw.get(&approve_url).await;
    assert_eq!(status, 409);
    assert!(replay_body["error"]
        .as_str()
        .unwrap()
        .contains("already approved"));
}

#[tokio::test]
async fn deny_callback_refuses_and_is_terminal() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: approve\n", true).await;

    let (_, body) = gw
        .post_tool("shell.exec", &envelope(json!({"command": "echo nope"})))
        .await;
    let deny_url = body["denyUrl"].as_str().unwrap().to_string();
    let approve_url = body["approveUrl"].as_str().unwrap().to_string();

    let (status, deny_body) = gw.get(&deny_url).await;
    assert_eq!(status, 200);
    assert_eq!(deny_body["status"], "denied");

    // The approve URL can no longer fire.
    let (status, after) = gw.get(&approve_url).await;
    assert_eq!(status, 409);
    assert!(after["error"].as_str().unwrap().contains("already denied"));
}

#[tokio::test]
async fn expired_approval_callback_is_a_410() {
    let gw = spawn_gateway_with_ttl("tools:\n  shell.exec:\n    decision: approve\n", true, 0).await;

    let (_, body) = gw
        .post_tool("shell.exec", &envelope(json!({"command": "echo late"})))
        .await;
    let approve_url = body["approveUrl"].as_str().unwrap().to_string();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let (status, err) = gw.get(&approve_url).await;
    assert_eq!(status, 410);
    assert!(err["error"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn tampered_callback_signature_is_rejected() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: approve\n", true).await;

    let (_, body) = gw
        .post_tool("shell.exec", &envelope(json!({"command": "echo x"})))
        .await;
    let approve_url = body["approveUrl"].as_str().unwrap();
    let tampered = approve_url.replace("sig=", "sig=0000");

    let (status, err) = gw.get(&tampered).await;
    assert_eq!(status, 403);
    assert!(err["error"].as_str().unwrap().contains("Invalid signature"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: SSRF target blocked at execution time
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn metadata_endpoint_is_blocked_inside_an_allow() {
    let gw = spawn_gateway("tools:\n  http.request:\n    decision: allow\n", false).await;

    let (status, body) = gw
        .post_tool(
            "http.request",
            &envelope(json!({"url": "http://169.254.169.254/latest/meta-data/"})),
        )
        .await;

    // The decision was allow; the execution itself failed closed.
    assert_eq!(status, 200);
    assert_eq!(body["decision"], "allow");
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("private"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: idempotency replay and conflict
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn same_key_replays_byte_identical_response() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: allow\n", false).await;

    let mut request = envelope(json!({"command": "date +%s%N"}));
    request["idempotencyKey"] = json!("k1");

    let (first_status, first_body) = gw.post_tool("shell.exec", &request).await;
    let (second_status, second_body) = gw.post_tool("shell.exec", &request).await;

    assert_eq!(first_status, 200);
    assert_eq!(second_status, first_status);
    // Byte-identical: the nanosecond timestamp would differ on re-execution.
    assert_eq!(second_body, first_body);
}

#[tokio::test]
async fn same_key_different_args_conflicts() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: allow\n", false).await;

    let mut request = envelope(json!({"command": "echo one"}));
    request["idempotencyKey"] = json!("k2");
    gw.post_tool("shell.exec", &request).await;

    let mut other = envelope(json!({"command": "echo two"}));
    other["idempotencyKey"] = json!("k2");
    let (status, body) = gw.post_tool("shell.exec", &other).await;

    assert_eq!(status, 409);
    assert_eq!(body["reasonCode"], "IDEMPOTENCY_KEY_CONFLICT");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: capability token upgrades approve to allow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn capability_token_bypasses_approval_for_exact_args() {
    let gw = spawn_gateway("tools:\n  files.write:\n    decision: approve\n", false).await;

    let target = gw.data_dir.path().join("cap.txt");
    let args = json!({"path": target.to_string_lossy(), "content": "hi"});
    let args_hash = gk_canonical::sha256_hex(&gk_canonical::canonicalize(&args));

    let token = gk_tokens::issue(
        &gk_tokens::CapabilityPayload {
            tool: "files.write".into(),
            args_hash,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(60),
            actor_role: Some("navigator".into()),
            actor_name: None,
        },
        SECRET,
    )
    .unwrap();

    let mut request = envelope(args);
    request["actor"] = json!({ "type": "agent", "name": "pilot", "role": "navigator" });
    request["capabilityToken"] = json!(token);

    let (status, body) = gw.post_tool("files.write", &request).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["decision"], "allow");
    assert_eq!(body["reasonCode"], "CAPABILITY_TOKEN_ALLOW");
    assert!(flags(&body).contains(&"capability_token".to_string()));
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hi");
}

#[tokio::test]
async fn invalid_token_flags_but_does_not_deny() {
    let gw = spawn_gateway("tools:\n  files.write:\n    decision: approve\n", false).await;

    let target = gw.data_dir.path().join("x.txt");
    let mut request = envelope(json!({"path": target.to_string_lossy(), "content": "hi"}));
    request["capabilityToken"] = json!("garbage-token");

    let (status, body) = gw.post_tool("files.write", &request).await;
    assert_eq!(status, 202);
    assert_eq!(body["decision"], "approve");
    assert!(flags(&body)
        .iter()
        .any(|f| f.starts_with("capability_token_invalid:")));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: external taint denies system write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tainted_system_write_is_denied() {
    let gw = spawn_gateway("tools:\n  files.write:\n    decision: allow\n", false).await;

    let mut request = envelope(json!({"path": "/etc/passwd", "content": "pwned"}));
    request["taint"] = json!(["external"]);

    let (status, body) = gw.post_tool("files.write", &request).await;
    assert_eq!(status, 403);
    assert_eq!(body["reasonCode"], "TAINTED_WRITE_SYSTEM_PATH");
    let f = flags(&body);
    for flag in ["tainted_write", "system_path", "external_content"] {
        assert!(f.contains(&flag.to_string()), "{flag}");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope, health, dry-run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unknown_envelope_field_is_a_400() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: allow\n", false).await;

    let mut request = envelope(json!({"command": "ls"}));
    request["capabiltyToken"] = json!("typo");
    let (status, body) = gw.post_tool("shell.exec", &request).await;
    assert_eq!(status, 400);
    assert_eq!(body["reasonCode"], "INVALID_ENVELOPE");
}

#[tokio::test]
async fn unknown_tool_is_a_404() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: allow\n", false).await;

    let (status, body) = gw
        .post_tool("memory.graph", &envelope(json!({"query": "x"})))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["reasonCode"], "UNKNOWN_TOOL");
}

#[tokio::test]
async fn unknown_arg_field_is_a_403() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: allow\n", false).await;

    let (status, body) = gw
        .post_tool("shell.exec", &envelope(json!({"command": "ls", "shell": "zsh"})))
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["reasonCode"], "INVALID_ARGS");
}

#[tokio::test]
async fn dry_run_evaluates_without_executing() {
    let gw = spawn_gateway("tools:\n  files.write:\n    decision: allow\n", false).await;

    let target = gw.data_dir.path().join("never.txt");
    let mut request = envelope(json!({"path": target.to_string_lossy(), "content": "x"}));
    request["dryRun"] = json!(true);

    let (status, body) = gw.post_tool("files.write", &request).await;
    assert_eq!(status, 200);
    assert_eq!(body["decision"], "allow");
    assert_eq!(body["dryRun"], true);
    assert!(!target.exists());
}

#[tokio::test]
async fn health_reports_the_policy_hash_used_in_responses() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: allow\n", false).await;

    let (status, health) = gw.get(&format!("{}/health", gw.base)).await;
    assert_eq!(status, 200);
    assert_eq!(health["pendingApprovals"], 0);
    assert_eq!(health["providers"]["approval"], "local");

    let mut request = envelope(json!({"command": "true"}));
    request["dryRun"] = json!(true);
    let (_, body) = gw.post_tool("shell.exec", &request).await;
    assert_eq!(body["policyVersion"], health["policyHash"]);
}

#[tokio::test]
async fn pending_approvals_listing_and_count() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: approve\n", false).await;

    gw.post_tool("shell.exec", &envelope(json!({"command": "echo a"})))
        .await;
    gw.post_tool("shell.exec", &envelope(json!({"command": "echo b"})))
        .await;

    let (status, listing) = gw.get(&format!("{}/approvals", gw.base)).await;
    assert_eq!(status, 200);
    assert_eq!(listing["count"], 2);

    let (_, health) = gw.get(&format!("{}/health", gw.base)).await;
    assert_eq!(health["pendingApprovals"], 2);
}

#[tokio::test]
async fn approve_urls_are_hidden_outside_demo_mode() {
    let gw = spawn_gateway("tools:\n  shell.exec:\n    decision: approve\n", false).await;

    let (status, body) = gw
        .post_tool("shell.exec", &envelope(json!({"command": "echo hidden"})))
        .await;
    assert_eq!(status, 202);
    assert!(body.get("approveUrl").is_none());
    assert!(body.get("denyUrl").is_none());
}

#[tokio::test]
async fn audit_trail_grows_append_only() {
    let gw = spawn_gateway(
        "tools:\n  shell.exec:\n    decision: allow\n    deny_patterns: [sudo]\n",
        false,
    )
    .await;

    gw.post_tool("shell.exec", &envelope(json!({"command": "echo one"})))
        .await;
    let audit_dir = gw.data_dir.path().join("audit");
    let read_audit = || {
        let mut lines = Vec::new();
        for entry in std::fs::read_dir(&audit_dir).unwrap() {
            let content = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            lines.extend(content.lines().map(str::to_string));
        }
        lines
    };

    let before = read_audit();
    // allow + executed
    assert_eq!(before.len(), 2);

    gw.post_tool("shell.exec", &envelope(json!({"command": "sudo reboot"})))
        .await;
    let after = read_audit();
    // + one deny record; earlier records unchanged
    assert_eq!(after.len(), 3);
    assert_eq!(&after[..before.len()], &before[..]);

    let denied: Value = serde_json::from_str(&after[2]).unwrap();
    assert_eq!(denied["decision"], "deny");
    assert_eq!(denied["reasonCode"], "TOOL_DENY_PATTERN");
    assert!(denied["policyHash"].as_str().unwrap().starts_with("sha256:"));
}
