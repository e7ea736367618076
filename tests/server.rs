use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aichat::chat::{ApiCredentials, ChatCompletion, ChatError, ChatRequest, OpenAiClient};
use aichat::config::AppPaths;
use aichat::conversations::{Message, Role};
use aichat::server::{self, AppState, SharedState};
use aichat::update::progress::TracingRenderer;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;

/// Echoes the last user message, or fails with a canned error.
#[derive(Default)]
struct ScriptedChat {
    fail_with: Mutex<Option<ChatError>>,
    seen: Mutex<Vec<ChatRequest>>,
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    async fn complete(&self, _creds: &ApiCredentials, request: &ChatRequest) -> Result<String, ChatError> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(format!("echo: {last}"))
    }
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

struct Harness {
    _dir: TempDir,
    base: String,
    chat: Arc<ScriptedChat>,
    http: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempdir().expect("tempdir");
        let chat = Arc::new(ScriptedChat::default());
        let state: SharedState = Arc::new(
            AppState::load(AppPaths::new(dir.path()), chat.clone(), Arc::new(TracingRenderer))
                .await
                .expect("state"),
        );
        let addr = spawn(server::router(state)).await;
        Self { _dir: dir, base: format!("http://{addr}"), chat, http: reqwest::Client::new() }
    }

    async fn get(&self, path: &str) -> Value {
        self.http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("json")
    }

    async fn post(&self, path: &str, body: Value) -> Value {
        self.http
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("json")
    }

    async fn configure(&self) {
        let body = json!({ "api_key": "sk-test", "base_url": "http://127.0.0.1:1/v1" });
        assert_eq!(self.post("/api/config", body).await["status"], "success");
    }
}

#[tokio::test]
async fn index_serves_the_embedded_page() {
    let h = Harness::start().await;
    let resp = h.http.get(&h.base).send().await.expect("send");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(resp.text().await.expect("body").contains("AI-Chat2"));
}

#[tokio::test]
async fn fresh_install_has_defaults_and_a_default_conversation() {
    let h = Harness::start().await;

    let config = h.get("/api/config").await;
    assert_eq!(config["model"], aichat::config::DEFAULT_MODEL);
    assert_eq!(config["api_key"], "");

    let data = h.get("/api/conversations").await;
    assert_eq!(data["conversations"]["default"][0]["role"], "system");
    assert_eq!(data["conversation_titles"]["default"], "新对话 1");
}

#[tokio::test]
async fn message_requires_configuration_and_fields() {
    let h = Harness::start().await;

    let res = h.post("/api/message", json!({ "conversation_id": "default", "message": "hi" })).await;
    assert_eq!(res["error"], "请先配置API密钥和地址");

    h.configure().await;
    let res = h.post("/api/message", json!({ "conversation_id": "default" })).await;
    assert_eq!(res["error"], "缺少对话ID或消息内容");
    assert!(h.chat.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn successful_message_is_persisted_with_reply() {
    let h = Harness::start().await;
    h.configure().await;

    let res = h.post("/api/message", json!({ "conversation_id": "c1", "message": "hello" })).await;
    assert_eq!(res["content"], "echo: hello");

    let data = h.get("/api/conversations").await;
    let stored: Vec<Message> = serde_json::from_value(data["conversations"]["c1"].clone()).expect("messages");
    let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(stored[2].content, "echo: hello");
}

#[tokio::test]
async fn failed_completion_is_localized_and_not_persisted() {
    let h = Harness::start().await;
    h.configure().await;
    *h.chat.fail_with.lock().unwrap() = Some(ChatError::Auth("bad key".into()));

    let res = h.post("/api/message", json!({ "conversation_id": "c2", "message": "hello" })).await;
    assert_eq!(res["error"], "API认证失败，请检查API密钥");

    let data = h.get("/api/conversations").await;
    assert!(data["conversations"].get("c2").is_none());
}

#[tokio::test]
async fn system_prompt_change_rewrites_existing_conversations() {
    let h = Harness::start().await;
    h.configure().await;
    h.post("/api/message", json!({ "conversation_id": "c1", "message": "q" })).await;

    h.post("/api/config", json!({ "system_prompt": "be terse" })).await;

    let data = h.get("/api/conversations").await;
    assert_eq!(data["conversations"]["default"][0]["content"], "be terse");
    assert_eq!(data["conversations"]["c1"][0]["content"], "be terse");
    assert_eq!(data["conversations"]["c1"][1]["content"], "q");
}

#[tokio::test]
async fn conversations_can_be_replaced_wholesale() {
    let h = Harness::start().await;
    let doc = json!({
        "conversations": { "x": [{ "role": "user", "content": "saved" }] },
        "conversation_titles": { "x": "X" }
    });

    assert_eq!(h.post("/api/conversations", doc.clone()).await["status"], "success");
    assert_eq!(h.get("/api/conversations").await, doc);
}

#[tokio::test]
async fn check_update_reports_through_the_api() {
    let version = spawn(Router::new().route("/aichat.txt", get(|| async { "99.0.0" }))).await;
    let h = Harness::start().await;
    h.post("/api/config", json!({ "update_url": format!("http://{version}/aichat.txt") })).await;

    let res = h.get("/api/check-update").await;
    assert_eq!(res["current_version"], aichat::update::APP_VERSION);
    assert_eq!(res["latest_version"], "99.0.0");
    assert_eq!(res["update_available"], true);
    assert!(res.get("error").is_none());
}

#[tokio::test]
async fn openai_client_talks_to_compatible_endpoint() {
    let upstream = spawn(Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<Value>| async move {
            let model = body["model"].as_str().unwrap_or_default().to_string();
            Json(json!({ "choices": [{ "message": { "role": "assistant", "content": model } }] }))
        }),
    ))
    .await;
    let client = OpenAiClient::new(Duration::from_secs(5)).expect("client");
    let creds = ApiCredentials { api_key: "sk".into(), base_url: format!("http://{upstream}/v1/") };

    let reply = client
        .complete(&creds, &ChatRequest::new("m-1", vec![Message::user("hi")]))
        .await
        .expect("completion");
    assert_eq!(reply, "m-1");
}

#[tokio::test]
async fn openai_client_maps_rate_limits() {
    let upstream = spawn(Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": { "message": "slow down" } })))
        }),
    ))
    .await;
    let client = OpenAiClient::new(Duration::from_secs(5)).expect("client");
    let creds = ApiCredentials { api_key: "sk".into(), base_url: format!("http://{upstream}/v1") };

    let err = client
        .complete(&creds, &ChatRequest::new("m", vec![Message::user("hi")]))
        .await
        .expect_err("429");
    assert!(matches!(err, ChatError::RateLimit(ref d) if d == "slow down"), "{err}");
}
