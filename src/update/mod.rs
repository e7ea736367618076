pub mod check;
pub mod fetch;
pub mod progress;
pub mod version;

use crate::core::engine::Engine;
use crate::core::model::{RunLabel, TransferHints};
use crate::i18n::Locale;
use crate::transport::http::HttpDriver;
use crate::transport::DriverContext;
use anyhow::Context;
use check::{CheckResult, UpdateChecker};
use fetch::{EngineFetch, InsecureFetch};
use progress::{ProgressConsumer, ProgressRenderer};
use sanitize_filename::sanitize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

pub const VERSION_URL: &str = "https://raw.githubusercontent.com/xiaohuihuib/AI-Chat2/refs/heads/main/aichat.txt";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub version_url: String,
    pub thread_count: usize,
    pub chunk_size_mb: u64,
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    pub driver_ctx: DriverContext,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            version_url: VERSION_URL.to_string(),
            thread_count: 8,
            chunk_size_mb: 1,
            primary_timeout: Duration::from_secs(30),
            fallback_timeout: Duration::from_secs(15),
            driver_ctx: DriverContext { timeout_secs: 15, ..DriverContext::default() },
        }
    }
}

/// Per-check file name: `<uuid>-<last URL segment>`.
pub fn version_file_name(url: &str) -> String {
    let base = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .map(|s| sanitize(s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "version.txt".to_string());
    format!("{}-{}", Uuid::new_v4(), base)
}

/// Builds a fresh checker for every call, so concurrent checks share nothing.
pub struct UpdateService {
    settings: UpdateSettings,
    temp_dir: PathBuf,
    locale: Locale,
    renderer: Arc<dyn ProgressRenderer>,
}

impl UpdateService {
    pub fn new(
        settings: UpdateSettings,
        temp_dir: impl Into<PathBuf>,
        locale: Locale,
        renderer: Arc<dyn ProgressRenderer>,
    ) -> Self {
        Self { settings, temp_dir: temp_dir.into(), locale, renderer }
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    fn build_checker(&self) -> anyhow::Result<UpdateChecker<EngineFetch, InsecureFetch>> {
        let driver = HttpDriver::new().context("build http driver")?;
        let engine = Engine::new(
            Arc::new(driver),
            TransferHints::new(self.settings.thread_count, self.settings.chunk_size_mb),
            self.settings.driver_ctx.clone(),
        );
        let label = RunLabel {
            name: "version-probe".to_string(),
            show_name: self.locale.messages().update_label.to_string(),
        };
        let primary = EngineFetch::new(
            engine,
            ProgressConsumer::new(self.locale, self.renderer.clone()),
            label,
            self.settings.primary_timeout,
        );
        let fallback = InsecureFetch::new(self.settings.fallback_timeout, &self.settings.driver_ctx.user_agent)
            .context("build fallback client")?;
        Ok(UpdateChecker::new(primary, fallback, APP_VERSION, self.locale))
    }

    pub async fn check(&self) -> CheckResult {
        let dir = &self.temp_dir;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "could not create temp dir");
        }
        let dest = dir.join(version_file_name(&self.settings.version_url));

        match self.build_checker() {
            Ok(checker) => checker.check(&self.settings.version_url, &dest).await,
            Err(e) => CheckResult::failed(
                APP_VERSION,
                format!("{}: {:#}", self.locale.messages().update_check_failed, e),
            ),
        }
    }
}
