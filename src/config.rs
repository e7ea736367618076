//! Settings persisted as a flat JSON object in the app data directory.

use crate::i18n::Locale;
use crate::update::UpdateSettings;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "AI-Chat2";
const APP_DIR_NAME: &str = "AI_Chat2";
const DATA_DIR_ENV: &str = "AICHAT_DATA_DIR";

pub const MAX_UPDATE_THREADS: u64 = 64;
pub const MAX_UPDATE_CHUNK_MB: u64 = 1024;
const MAX_UPDATE_TIMEOUT_SECS: u64 = 3600;

pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-R1-0528-Qwen3-8B";
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个智能助手，帮助用户解决问题。";

/// Where everything lives on disk.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub chat_history_file: PathBuf,
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            config_file: data_dir.join("config.json"),
            chat_history_file: data_dir.join("chat_history.json"),
            temp_dir: data_dir.join("temp"),
            log_dir: data_dir.join("logs"),
            data_dir,
        }
    }

    /// Explicit override, then `$AICHAT_DATA_DIR`, then the platform data dir.
    pub fn resolve(override_dir: Option<PathBuf>) -> Self {
        Self::new(override_dir.unwrap_or_else(app_data_dir))
    }

    pub async fn ensure(&self) -> anyhow::Result<()> {
        for dir in [&self.data_dir, &self.temp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Documents")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read file, using defaults");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid JSON, using defaults");
            None
        }
    }
}

/// Pretty JSON via a sibling temp file and a rename.
pub(crate) async fn write_json(path: &Path, value: &impl Serialize) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl ConfigStore {
    pub fn defaults() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("api_key".into(), Value::from(""));
        m.insert("base_url".into(), Value::from(""));
        m.insert("model".into(), Value::from(DEFAULT_MODEL));
        m.insert("system_prompt".into(), Value::from(DEFAULT_SYSTEM_PROMPT));
        m.insert("locale".into(), Value::from("zh"));
        m
    }

    pub fn in_memory(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), values: Self::defaults() }
    }

    /// Missing or unreadable files load as defaults.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::in_memory(path);
        if let Some(Value::Object(saved)) = read_json::<Value>(&store.path).await {
            store.merge(saved);
        }
        store
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        write_json(&self.path, &self.values).await?;
        tracing::debug!(path = %self.path.display(), "config saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn merge(&mut self, patch: Map<String, Value>) {
        self.values.extend(patch);
    }

    pub fn get_str(&self, key: &str) -> &str {
        self.values.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn api_key(&self) -> &str {
        self.get_str("api_key")
    }

    pub fn base_url(&self) -> &str {
        self.get_str("base_url")
    }

    pub fn model(&self) -> &str {
        match self.get_str("model") {
            "" => DEFAULT_MODEL,
            m => m,
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.get_str("system_prompt")
    }

    pub fn locale(&self) -> Locale {
        Locale::parse(self.get_str("locale"))
    }

    pub fn update_settings(&self) -> UpdateSettings {
        let mut s = UpdateSettings::default();
        match self.get_str("update_url").trim() {
            "" => {}
            url => s.version_url = url.to_string(),
        }
        if let Some(n) = self.get_u64("update_threads") {
            s.thread_count = n.clamp(1, MAX_UPDATE_THREADS) as usize;
        }
        if let Some(n) = self.get_u64("update_chunk_mb") {
            s.chunk_size_mb = n.clamp(1, MAX_UPDATE_CHUNK_MB);
        }
        if let Some(n) = self.get_u64("update_timeout_secs") {
            s.primary_timeout = Duration::from_secs(n.clamp(1, MAX_UPDATE_TIMEOUT_SECS));
        }
        if let Some(n) = self.get_u64("update_fallback_timeout_secs") {
            s.fallback_timeout = Duration::from_secs(n.clamp(1, MAX_UPDATE_TIMEOUT_SECS));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).await;
        assert_eq!(store.model(), DEFAULT_MODEL);
        assert_eq!(store.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(store.api_key(), "");
        assert_eq!(store.locale(), Locale::Zh);
    }

    #[tokio::test]
    async fn corrupt_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = ConfigStore::load(&path).await;
        assert_eq!(store.values(), &ConfigStore::defaults());
    }

    #[tokio::test]
    async fn save_then_load_keeps_known_and_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut store = ConfigStore::load(&path).await;
        store.merge(json!({"api_key": "sk-1", "theme": "dark"}).as_object().unwrap().clone());
        store.save().await.unwrap();

        let reloaded = ConfigStore::load(&path).await;
        assert_eq!(reloaded.api_key(), "sk-1");
        assert_eq!(reloaded.get("theme"), Some(&json!("dark")));
        assert_eq!(reloaded.model(), DEFAULT_MODEL);
    }

    #[test]
    fn update_settings_read_overrides_and_defaults() {
        let mut store = ConfigStore::in_memory("unused.json");
        assert_eq!(store.update_settings().version_url, crate::update::VERSION_URL);

        store.set("update_url", "http://127.0.0.1:9/v.txt");
        store.set("update_threads", 2);
        store.set("update_chunk_mb", "0");
        store.set("update_timeout_secs", 5);
        let s = store.update_settings();
        assert_eq!(s.version_url, "http://127.0.0.1:9/v.txt");
        assert_eq!(s.thread_count, 2);
        assert_eq!(s.chunk_size_mb, 1);
        assert_eq!(s.primary_timeout, Duration::from_secs(5));
        assert_eq!(s.fallback_timeout, Duration::from_secs(15));
    }

    #[test]
    fn oversized_update_settings_are_clamped() {
        let mut store = ConfigStore::in_memory("unused.json");
        store.set("update_chunk_mb", u64::MAX);
        store.set("update_threads", u64::MAX);
        store.set("update_timeout_secs", u64::MAX);
        store.set("update_fallback_timeout_secs", u64::MAX);

        let s = store.update_settings();
        assert_eq!(s.chunk_size_mb, MAX_UPDATE_CHUNK_MB);
        assert_eq!(s.thread_count, MAX_UPDATE_THREADS as usize);
        assert_eq!(s.primary_timeout, Duration::from_secs(MAX_UPDATE_TIMEOUT_SECS));
        assert_eq!(s.fallback_timeout, Duration::from_secs(MAX_UPDATE_TIMEOUT_SECS));

        let hints = crate::core::model::TransferHints::new(s.thread_count, s.chunk_size_mb);
        assert_eq!(hints.chunk_size, MAX_UPDATE_CHUNK_MB * 1024 * 1024);
    }

    #[test]
    fn paths_hang_off_the_data_dir() {
        let p = AppPaths::new("/data/AI_Chat2");
        assert_eq!(p.config_file, PathBuf::from("/data/AI_Chat2/config.json"));
        assert_eq!(p.temp_dir, PathBuf::from("/data/AI_Chat2/temp"));
    }
}
