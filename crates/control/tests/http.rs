// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the control-plane HTTP API.
//!
//! Uses `axum_test::TestServer`, no real TCP needed.

use std::time::Duration;

use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};

use meshctl::channel::RealtimeChannel;
use meshctl::config::ControlConfig;
use meshctl::credential::signature;
use meshctl::credential::SigningMode;
use meshctl::fanout::DiagnosticCommand;
use meshctl::test_support::{TestControl, TEST_EPOCH_MS};
use meshctl::transport::build_router;

const AGENT_KEY: HeaderName = HeaderName::from_static("x-agent-key");
const SIG_TS: HeaderName = HeaderName::from_static("x-signature-timestamp");
const SIG: HeaderName = HeaderName::from_static("x-signature");
const SIG_NONCE: HeaderName = HeaderName::from_static("x-signature-nonce");

fn test_server(t: &TestControl) -> anyhow::Result<TestServer> {
    Ok(TestServer::new(build_router(t.state.clone()))?)
}

fn header(value: &str) -> anyhow::Result<HeaderValue> {
    Ok(HeaderValue::from_str(value)?)
}

fn bearer(token: &str) -> anyhow::Result<HeaderValue> {
    header(&format!("Bearer {token}"))
}

fn admin_token(t: &TestControl) -> String {
    t.state.config.admin_token.clone().unwrap_or_default()
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

/// The `name=value` part of the response's refresh cookie.
fn refresh_cookie(resp: &axum_test::TestResponse) -> anyhow::Result<HeaderValue> {
    let raw = resp
        .headers()
        .get(SET_COOKIE)
        .ok_or_else(|| anyhow::anyhow!("no set-cookie header"))?
        .to_str()?;
    let pair = raw.split(';').next().unwrap_or_default();
    header(pair)
}

async fn register(server: &TestServer, key: &str, id: &str) -> anyhow::Result<Value> {
    let resp = server
        .post("/api/v1/agents/register")
        .add_header(AGENT_KEY, header(key)?)
        .json(&json!({ "agent_id": id, "hostname": format!("{id}.lan") }))
        .await;
    resp.assert_status_ok();
    Ok(resp.json())
}

/// Log in with the admin token as `subject` with `role`; returns the access
/// token and the refresh cookie.
async fn login(
    server: &TestServer,
    t: &TestControl,
    subject: &str,
    role: &str,
) -> anyhow::Result<(String, HeaderValue)> {
    let resp = server
        .post("/api/v1/auth/login")
        .json(&json!({ "token": admin_token(t), "subject": subject, "role": role }))
        .await;
    resp.assert_status_ok();
    let cookie = refresh_cookie(&resp)?;
    let body: Value = resp.json();
    let token = body["access_token"].as_str().unwrap_or_default().to_owned();
    Ok((token, cookie))
}

#[tokio::test]
async fn health_needs_no_auth() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;

    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["signing_mode"], "soft");
    assert_eq!(body["active_sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn register_then_heartbeat() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;
    let key = t.agent_key().to_owned();

    let agent = register(&server, &key, "edge-1").await?;
    assert_eq!(agent["id"], "edge-1");
    assert_eq!(agent["status"], "ONLINE");
    assert_eq!(agent["metadata"]["hostname"], "edge-1.lan");

    let resp = server
        .post("/api/v1/agents/edge-1/heartbeat")
        .add_header(AGENT_KEY, header(&key)?)
        .json(&json!({ "metrics": { "cpu_percent": 12.5, "uptime_secs": 30 } }))
        .await;
    resp.assert_status_ok();
    let ack: Value = resp.json();
    assert_eq!(ack["status"], "ONLINE");
    assert_eq!(ack["previous"], "ONLINE");
    assert_eq!(t.store.heartbeat_count(), 1);
    Ok(())
}

#[tokio::test]
async fn agent_auth_failures() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;
    let key = t.agent_key().to_owned();
    register(&server, &key, "edge-1").await?;

    let resp = server.post("/api/v1/agents/edge-1/heartbeat").json(&json!({})).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&resp.json()), "UNAUTHORIZED");

    let resp = server
        .post("/api/v1/agents/edge-1/heartbeat")
        .add_header(AGENT_KEY, header("mk_live_wrong-credential-0123456789abcdefgh")?)
        .json(&json!({}))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server
        .post("/api/v1/agents/ghost/heartbeat")
        .add_header(AGENT_KEY, header(&key)?)
        .json(&json!({}))
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(error_code(&resp.json()), "AGENT_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn unknown_fields_are_rejected() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;

    let resp = server
        .post("/api/v1/agents/register")
        .add_header(AGENT_KEY, header(t.agent_key())?)
        .json(&json!({ "agent_id": "edge-1", "is_admin": true }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&resp.json()), "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn signed_heartbeat_cannot_be_replayed() -> anyhow::Result<()> {
    let config = ControlConfig { signing_mode: SigningMode::Enforced, ..ControlConfig::test() };
    let t = TestControl::with_config(config)?;
    t.register("edge-1")
        .err()
        .ok_or_else(|| anyhow::anyhow!("unsigned registration must fail when enforced"))?;

    let server = test_server(&t)?;
    let key = t.agent_key().to_owned();
    let ts = (TEST_EPOCH_MS / 1000).to_string();

    let body = Bytes::from_static(br#"{"agent_id":"edge-1"}"#);
    let resp = server
        .post("/api/v1/agents/register")
        .add_header(AGENT_KEY, header(&key)?)
        .add_header(SIG_TS, header(&ts)?)
        .add_header(SIG, header(&signature::sign(&key, &ts, &body))?)
        .add_header(SIG_NONCE, header("nonce-1")?)
        .bytes(body)
        .await;
    resp.assert_status_ok();

    let body = Bytes::from_static(br#"{"metrics":{}}"#);
    let sig = signature::sign(&key, &ts, &body);
    let send = || {
        Ok::<_, anyhow::Error>(
            server
                .post("/api/v1/agents/edge-1/heartbeat")
                .add_header(AGENT_KEY, header(&key)?)
                .add_header(SIG_TS, header(&ts)?)
                .add_header(SIG, header(&sig)?)
                .add_header(SIG_NONCE, header("nonce-2")?)
                .bytes(body.clone()),
        )
    };
    send()?.await.assert_status_ok();

    let replay = send()?.await;
    replay.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&replay.json()), "REPLAY_DETECTED");

    let unsigned = server
        .post("/api/v1/agents/edge-1/heartbeat")
        .add_header(AGENT_KEY, header(&key)?)
        .bytes(body.clone())
        .await;
    unsigned.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&unsigned.json()), "SIGNATURE_REQUIRED");
    Ok(())
}

#[tokio::test]
async fn partial_signature_headers_are_invalid() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;

    let resp = server
        .post("/api/v1/agents/register")
        .add_header(AGENT_KEY, header(t.agent_key())?)
        .add_header(SIG_TS, header(&(TEST_EPOCH_MS / 1000).to_string())?)
        .json(&json!({ "agent_id": "edge-1" }))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&resp.json()), "INVALID_SIGNATURE");
    Ok(())
}

#[tokio::test]
async fn operator_routes_require_a_token() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;
    register(&server, t.agent_key(), "edge-1").await?;

    let resp = server.get("/api/v1/agents").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server.get("/api/v1/agents").add_header(AUTHORIZATION, bearer("nonsense")?).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp =
        server.get("/api/v1/agents").add_header(AUTHORIZATION, bearer(&admin_token(&t))?).await;
    resp.assert_status_ok();
    let agents: Value = resp.json();
    assert_eq!(agents.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn login_refresh_reuse_and_logout() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;

    let resp = server.post("/api/v1/auth/login").json(&json!({ "token": "wrong" })).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let (access, first) = login(&server, &t, "alice", "admin").await?;
    let resp = server.get("/api/v1/agents").add_header(AUTHORIZATION, bearer(&access)?).await;
    resp.assert_status_ok();

    let resp = server.post("/api/v1/auth/refresh").add_header(COOKIE, first.clone()).await;
    resp.assert_status_ok();
    let second = refresh_cookie(&resp)?;
    assert_ne!(first, second);
    let set_cookie = resp.headers().get(SET_COOKIE).map(|v| v.to_str().unwrap_or_default());
    assert!(set_cookie.is_some_and(|c| c.contains("HttpOnly") && c.contains("SameSite=Strict")));

    // Presenting the superseded value revokes the whole family.
    let resp = server.post("/api/v1/auth/refresh").add_header(COOKIE, first).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&resp.json()), "REFRESH_REUSED");
    let resp = server.post("/api/v1/auth/refresh").add_header(COOKIE, second.clone()).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server.post("/api/v1/auth/logout").add_header(COOKIE, second.clone()).await;
    resp.assert_status_ok();
    let resp = server.post("/api/v1/auth/logout").add_header(COOKIE, second).await;
    resp.assert_status_ok();
    let resp = server.post("/api/v1/auth/logout").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["revoked"], false);
    Ok(())
}

#[tokio::test]
async fn credential_rotation_is_admin_only() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;
    let old_key = t.agent_key().to_owned();
    register(&server, &old_key, "edge-1").await?;

    let (viewer, _) = login(&server, &t, "bob", "viewer").await?;
    let resp = server.post("/api/v1/credential/rotate").add_header(AUTHORIZATION, bearer(&viewer)?).await;
    resp.assert_status(StatusCode::FORBIDDEN);
    let resp = server.get("/api/v1/credential").add_header(AUTHORIZATION, bearer(&viewer)?).await;
    resp.assert_status(StatusCode::FORBIDDEN);

    let admin = bearer(&admin_token(&t))?;
    let resp = server.post("/api/v1/credential/rotate").add_header(AUTHORIZATION, admin.clone()).await;
    resp.assert_status_ok();
    let rotated: Value = resp.json();
    let new_key = rotated["new_value"].as_str().unwrap_or_default().to_owned();
    assert!(new_key.starts_with("mk_live_"));
    assert_eq!(rotated["grace_until_ms"], TEST_EPOCH_MS + 24 * 3600 * 1000);

    // Both keys work during grace.
    for key in [&old_key, &new_key] {
        let resp = server
            .post("/api/v1/agents/edge-1/heartbeat")
            .add_header(AGENT_KEY, header(key)?)
            .json(&json!({}))
            .await;
        resp.assert_status_ok();
    }

    let resp = server.get("/api/v1/credential").add_header(AUTHORIZATION, admin).await;
    resp.assert_status_ok();
    let inspection: Value = resp.json();
    assert_eq!(inspection["grace_active"], true);
    assert!(!inspection.to_string().contains(&new_key));
    Ok(())
}

#[tokio::test]
async fn fanout_round_trip() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;
    let key = t.agent_key().to_owned();
    register(&server, &key, "edge-1").await?;
    register(&server, &key, "edge-2").await?;

    // Only edge-1 is listening for commands; edge-2 is unreachable.
    let mut commands = t.channel.subscribe("meshctl.agent.edge-1.command".into()).await?;

    let (alice, _) = login(&server, &t, "alice", "viewer").await?;
    let resp = server
        .post("/api/v1/sessions")
        .add_header(AUTHORIZATION, bearer(&alice)?)
        .json(&json!({ "target": "1.1.1.1", "deadline_secs": 30 }))
        .await;
    resp.assert_status_ok();
    let started: Value = resp.json();
    assert_eq!(started["target_count"], 2);
    let session_id = started["session_id"].as_str().unwrap_or_default().to_owned();

    let msg = tokio::time::timeout(Duration::from_secs(1), commands.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("no command delivered"))?;
    let command: DiagnosticCommand = serde_json::from_slice(&msg.payload)?;
    assert_eq!(command.session_id, session_id);
    assert_eq!(command.target, "1.1.1.1");

    let resp = server
        .post("/api/v1/agents/edge-1/diagnostics")
        .add_header(AGENT_KEY, header(&key)?)
        .json(&json!({ "session_id": session_id, "success": true, "latency_ms": 12.5 }))
        .await;
    resp.assert_status_ok();
    let ack: Value = resp.json();
    assert_eq!(ack["ingested"], true);

    let resp = server
        .get(&format!("/api/v1/sessions/{session_id}/results"))
        .add_query_param("wait", "true")
        .add_header(AUTHORIZATION, bearer(&alice)?)
        .await;
    resp.assert_status_ok();
    let results: Value = resp.json();
    assert_eq!(results["complete"], true);
    assert_eq!(results["stats"]["counts"]["success"], 1);
    assert_eq!(results["stats"]["counts"]["failed"], 1);
    assert_eq!(results["stats"]["latency"]["avg_ms"], 12.5);

    // Another viewer cannot see alice's session; an admin can.
    let (bob, _) = login(&server, &t, "bob", "viewer").await?;
    let path = format!("/api/v1/sessions/{session_id}/results");
    let resp = server.get(&path).add_header(AUTHORIZATION, bearer(&bob)?).await;
    resp.assert_status(StatusCode::FORBIDDEN);
    let resp = server.get(&path).add_header(AUTHORIZATION, bearer(&admin_token(&t))?).await;
    resp.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn session_errors() -> anyhow::Result<()> {
    let t = TestControl::new()?;
    let server = test_server(&t)?;
    let admin = bearer(&admin_token(&t))?;

    let resp = server.get("/api/v1/sessions/nope/results").add_header(AUTHORIZATION, admin.clone()).await;
    resp.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(error_code(&resp.json()), "SESSION_NOT_FOUND");

    let resp = server
        .post("/api/v1/sessions")
        .add_header(AUTHORIZATION, admin.clone())
        .json(&json!({ "target": "1.1.1.1", "deadline_secs": 600 }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    // No online agents: completes immediately with nothing to wait for.
    let resp = server
        .post("/api/v1/sessions")
        .add_header(AUTHORIZATION, admin.clone())
        .json(&json!({ "target": "1.1.1.1" }))
        .await;
    resp.assert_status_ok();
    let started: Value = resp.json();
    assert_eq!(started["target_count"], 0);
    let session_id = started["session_id"].as_str().unwrap_or_default();

    let resp = server
        .get(&format!("/api/v1/sessions/{session_id}/results"))
        .add_query_param("wait", "true")
        .add_header(AUTHORIZATION, admin)
        .await;
    resp.assert_status_ok();
    let results: Value = resp.json();
    assert_eq!(results["complete"], true);
    assert_eq!(results["entries"], json!([]));
    Ok(())
}
