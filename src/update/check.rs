use crate::i18n::{Locale, Messages};
use crate::update::fetch::{FallbackFetch, FallbackFetchError, PrimaryFetch, PrimaryFetchError};
use crate::update::version::is_newer;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of one update check, handed to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn failed(current_version: &str, error: impl Into<String>) -> Self {
        Self {
            current_version: current_version.to_string(),
            latest_version: None,
            update_available: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Fallback,
}

#[derive(Debug)]
enum CheckState {
    Idle,
    PrimaryAttempt,
    PrimaryFailed(Option<PrimaryFetchError>),
    FallbackAttempt(Option<PrimaryFetchError>),
    Success(Tier),
    FallbackFailed(String),
    Done(CheckResult),
}

impl CheckState {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PrimaryAttempt => "primary-attempt",
            Self::PrimaryFailed(_) => "primary-failed",
            Self::FallbackAttempt(_) => "fallback-attempt",
            Self::Success(_) => "success",
            Self::FallbackFailed(_) => "fallback-failed",
            Self::Done(_) => "done",
        }
    }
}

/// Primary tier, then fallback tier, then version comparison. Never fails:
/// every error ends up in [`CheckResult::error`].
pub struct UpdateChecker<P, F> {
    primary: P,
    fallback: F,
    current_version: String,
    messages: &'static Messages,
}

impl<P: PrimaryFetch, F: FallbackFetch> UpdateChecker<P, F> {
    pub fn new(primary: P, fallback: F, current_version: impl Into<String>, locale: Locale) -> Self {
        Self {
            primary,
            fallback,
            current_version: current_version.into(),
            messages: locale.messages(),
        }
    }

    /// `dest` must be private to this check.
    pub async fn check(&self, url: &str, dest: &Path) -> CheckResult {
        let mut state = CheckState::Idle;
        loop {
            tracing::debug!(state = state.name(), "update check");
            state = match state {
                CheckState::Idle => CheckState::PrimaryAttempt,
                CheckState::PrimaryAttempt => match self.primary.fetch(url, dest).await {
                    Ok(()) if tokio::fs::try_exists(dest).await.unwrap_or(false) => {
                        CheckState::Success(Tier::Primary)
                    }
                    Ok(()) => {
                        tracing::info!(path = %dest.display(), "version file missing after primary download");
                        CheckState::PrimaryFailed(None)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "primary download failed");
                        CheckState::PrimaryFailed(Some(e))
                    }
                },
                CheckState::PrimaryFailed(raised) => CheckState::FallbackAttempt(raised),
                CheckState::FallbackAttempt(raised) => match self.fallback.fetch(url, dest).await {
                    Ok(()) => CheckState::Success(Tier::Fallback),
                    Err(e) => {
                        tracing::warn!(error = %e, "fallback download failed");
                        CheckState::FallbackFailed(self.failure_text(raised.as_ref(), &e))
                    }
                },
                CheckState::Success(tier) => CheckState::Done(self.read_result(tier, dest).await),
                CheckState::FallbackFailed(error) => {
                    CheckState::Done(CheckResult::failed(&self.current_version, error))
                }
                CheckState::Done(result) => return result,
            };
        }
    }

    fn failure_text(&self, primary: Option<&PrimaryFetchError>, fallback: &FallbackFetchError) -> String {
        let m = self.messages;
        match primary {
            Some(p) => format!("{}: {}\n{}: {}", m.update_check_failed, p, m.fallback_failed, fallback),
            None => format!("{}: {}", m.version_download_failed, fallback),
        }
    }

    async fn read_result(&self, tier: Tier, dest: &Path) -> CheckResult {
        let content = match tokio::fs::read_to_string(dest).await {
            Ok(c) => c,
            Err(e) => {
                return CheckResult::failed(
                    &self.current_version,
                    format!("{}: {}", self.messages.version_read_failed, e),
                )
            }
        };
        if let Err(e) = tokio::fs::remove_file(dest).await {
            tracing::debug!(path = %dest.display(), error = %e, "could not remove version file");
        }

        let latest = content.trim().to_string();
        let update_available = is_newer(&latest, &self.current_version);
        tracing::info!(
            ?tier,
            current = %self.current_version,
            latest = %latest,
            update_available,
            "update check finished"
        );

        CheckResult {
            current_version: self.current_version.clone(),
            latest_version: Some(latest),
            update_available,
            error: None,
        }
    }
}
