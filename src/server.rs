use crate::chat::{ApiCredentials, ChatCompletion, ChatError, ChatRequest};
use crate::config::{AppPaths, ConfigStore};
use crate::conversations::{ConversationData, ConversationStore, Message};
use crate::update::check::CheckResult;
use crate::update::progress::ProgressRenderer;
use crate::update::UpdateService;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

const INDEX_HTML: &str = include_str!("ui/index.html");

/// Everything the handlers share. Persistence happens around each mutation.
pub struct AppState {
    paths: AppPaths,
    config: Mutex<ConfigStore>,
    conversations: Mutex<ConversationStore>,
    chat: Arc<dyn ChatCompletion>,
    renderer: Arc<dyn ProgressRenderer>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub async fn load(
        paths: AppPaths,
        chat: Arc<dyn ChatCompletion>,
        renderer: Arc<dyn ProgressRenderer>,
    ) -> anyhow::Result<Self> {
        paths.ensure().await?;
        let config = ConfigStore::load(&paths.config_file).await;
        let conversations = ConversationStore::load(
            &paths.chat_history_file,
            config.system_prompt(),
            config.locale().messages().default_title,
        )
        .await?;
        tracing::info!(
            config = %config.path().display(),
            history = %conversations.path().display(),
            "app state loaded"
        );

        Ok(Self {
            paths,
            config: Mutex::new(config),
            conversations: Mutex::new(conversations),
            chat,
            renderer,
        })
    }
}

pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = format!("{:#}", self.0);
        tracing::error!(error = %message, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
    }
}

fn success() -> Json<Value> {
    Json(json!({ "status": "success" }))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn get_config(State(state): State<SharedState>) -> Json<Value> {
    let config = state.config.lock().await;
    Json(Value::Object(config.values().clone()))
}

async fn post_config(
    State(state): State<SharedState>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let Some(Json(Value::Object(patch))) = body else {
        return Ok(success());
    };

    let prompt = {
        let mut config = state.config.lock().await;
        config.merge(patch);
        config.save().await?;
        config.system_prompt().to_string()
    };

    let mut conversations = state.conversations.lock().await;
    conversations.apply_system_prompt(&prompt);
    conversations.save().await?;
    Ok(success())
}

async fn get_conversations(State(state): State<SharedState>) -> Json<ConversationData> {
    Json(state.conversations.lock().await.data().clone())
}

async fn post_conversations(
    State(state): State<SharedState>,
    body: Option<Json<ConversationData>>,
) -> Result<Json<Value>, ApiError> {
    if let Some(Json(data)) = body {
        state.conversations.lock().await.replace(data).await?;
    }
    Ok(success())
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MessageResponse {
    Content { content: String },
    Error { error: String },
}

impl MessageResponse {
    fn error(text: impl Into<String>) -> Json<Self> {
        Json(Self::Error { error: text.into() })
    }
}

async fn post_message(
    State(state): State<SharedState>,
    body: Option<Json<MessageRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let (creds, model, prompt, m) = {
        let config = state.config.lock().await;
        (
            ApiCredentials {
                api_key: config.api_key().to_string(),
                base_url: config.base_url().to_string(),
            },
            config.model().to_string(),
            config.system_prompt().to_string(),
            config.locale().messages(),
        )
    };

    let Some(Json(req)) = body else {
        return Ok(MessageResponse::error(m.missing_body));
    };
    let (Some(id), Some(text)) = (
        req.conversation_id.filter(|s| !s.is_empty()),
        req.message.filter(|s| !s.is_empty()),
    ) else {
        return Ok(MessageResponse::error(m.missing_fields));
    };
    if creds.api_key.is_empty() || creds.base_url.is_empty() {
        return Ok(MessageResponse::error(m.api_not_configured));
    }

    let mut messages = state.conversations.lock().await.history(&id, &prompt);
    messages.push(Message::user(text));

    let request = ChatRequest::new(model, messages);
    let content = match state.chat.complete(&creds, &request).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(conversation = %id, error = %e, "chat completion failed");
            let text = match e {
                ChatError::Auth(_) => m.auth_failed.to_string(),
                ChatError::RateLimit(_) => m.rate_limited.to_string(),
                ChatError::Api(detail) => format!("{}: {}", m.api_failed, detail),
                ChatError::Network(e) => format!("{}: {}", m.generic_failed, e),
            };
            return Ok(MessageResponse::error(text));
        }
    };

    let mut messages = request.messages;
    messages.push(Message::assistant(content.clone()));
    state.conversations.lock().await.commit(&id, messages).await?;

    Ok(Json(MessageResponse::Content { content }))
}

async fn check_update(State(state): State<SharedState>) -> Json<CheckResult> {
    let (settings, locale) = {
        let config = state.config.lock().await;
        (config.update_settings(), config.locale())
    };
    let service = UpdateService::new(settings, &state.paths.temp_dir, locale, state.renderer.clone());
    Json(service.check().await)
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/conversations", get(get_conversations).post(post_conversations))
        .route("/api/message", post(post_message))
        .route("/api/check-update", get(check_update))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: SharedState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "http server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
