//! Turns engine events into display lines.
//!
//! Dispatch is stateless: every `(Event, Payload)` pair maps to at most one
//! [`ProgressLine`], which a [`ProgressRenderer`] then shows. Whether a `msg`
//! event reads as a failure is left to a [`FailureClassifier`], because the
//! engine does not always route failures through `err`.

use crate::core::events::{
    Event, EventKind, Payload, KEY_DOWNLOADED, KEY_ERROR, KEY_INDEX, KEY_TEXT, KEY_TOTAL, KEY_URL,
};
use crate::i18n::{Locale, Messages};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_FAILURE_TOKENS: [&str; 3] = ["错误", "Error", "失败"];

pub trait FailureClassifier: Send + Sync {
    fn is_failure(&self, text: &str) -> bool;
}

/// Flags text containing any of a fixed set of tokens.
pub struct KeywordClassifier {
    tokens: Vec<String>,
}

impl KeywordClassifier {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { tokens: tokens.into_iter().map(Into::into).collect() }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_TOKENS)
    }
}

impl FailureClassifier for KeywordClassifier {
    fn is_failure(&self, text: &str) -> bool {
        !text.is_empty() && self.tokens.iter().any(|t| text.contains(t.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    Progress { label: String, downloaded: u64, total: u64, percent: f64 },
    Info { label: String, text: String },
    Error { label: String, text: String },
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress { label, downloaded, total, percent } => {
                write!(f, "{label}: {downloaded}/{total} bytes ({percent:.2}%)")
            }
            Self::Info { label, text } | Self::Error { label, text } => write!(f, "{label}: {text}"),
        }
    }
}

pub trait ProgressRenderer: Send + Sync {
    fn render(&self, line: &ProgressLine);
}

/// Writes lines to the log; used by the HTTP service.
pub struct TracingRenderer;

impl ProgressRenderer for TracingRenderer {
    fn render(&self, line: &ProgressLine) {
        match line {
            ProgressLine::Progress { .. } => tracing::debug!(target: "aichat::progress", "{line}"),
            ProgressLine::Info { .. } => tracing::info!(target: "aichat::progress", "{line}"),
            ProgressLine::Error { .. } => tracing::error!(target: "aichat::progress", "{line}"),
        }
    }
}

pub struct ProgressConsumer {
    messages: &'static Messages,
    classifier: Box<dyn FailureClassifier>,
    renderer: Arc<dyn ProgressRenderer>,
}

fn non_negative(v: Option<i64>) -> u64 {
    v.unwrap_or(0).max(0) as u64
}

impl ProgressConsumer {
    pub fn new(locale: Locale, renderer: Arc<dyn ProgressRenderer>) -> Self {
        Self {
            messages: locale.messages(),
            classifier: Box::new(KeywordClassifier::default()),
            renderer,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn describe(&self, event: &Event, payload: &Payload) -> Option<ProgressLine> {
        let Some(kind) = event.kind() else {
            tracing::debug!(event_type = %event.event_type, "ignoring unknown event type");
            return None;
        };
        let label = format!("{} ({})", event.show_name, event.id);
        let m = self.messages;

        let file_line = |verb: &str| {
            let url = payload.text(KEY_URL).unwrap_or_default();
            let index = non_negative(payload.int(KEY_INDEX));
            let total = non_negative(payload.int(KEY_TOTAL));
            format!("{verb}: {url} ({index}/{total})")
        };

        match kind {
            EventKind::Update => {
                let total = non_negative(payload.int(KEY_TOTAL));
                let downloaded = non_negative(payload.int(KEY_DOWNLOADED));
                if total == 0 {
                    return None;
                }
                let percent = downloaded as f64 / total as f64 * 100.0;
                Some(ProgressLine::Progress { label, downloaded, total, percent })
            }
            EventKind::Start => Some(ProgressLine::Info { label, text: m.run_started.to_string() }),
            EventKind::End => Some(ProgressLine::Info { label, text: m.run_finished.to_string() }),
            EventKind::StartOne => Some(ProgressLine::Info { label, text: file_line(m.file_started) }),
            EventKind::EndOne => Some(ProgressLine::Info { label, text: file_line(m.file_finished) }),
            EventKind::Message => {
                let text = payload.text(KEY_TEXT).unwrap_or_default();
                if self.classifier.is_failure(text) {
                    Some(ProgressLine::Error { label, text: format!("{}: {}", m.error_prefix, text) })
                } else {
                    Some(ProgressLine::Info { label, text: text.to_string() })
                }
            }
            EventKind::Error => {
                let text = payload.text(KEY_ERROR).unwrap_or_default();
                Some(ProgressLine::Error { label, text: format!("{}: {}", m.error_prefix, text) })
            }
        }
    }

    pub fn consume(&self, event: &Event, payload: &Payload) {
        if let Some(line) = self.describe(event, payload) {
            self.renderer.render(&line);
        }
    }
}

/// Admits only events whose `ID` belongs to a run the owner is waiting on.
#[derive(Debug, Default)]
pub struct Correlator {
    known: HashSet<String>,
}

impl Correlator {
    pub fn for_run(id: impl Into<String>) -> Self {
        let mut known = HashSet::new();
        known.insert(id.into());
        Self { known }
    }

    pub fn admit(&mut self, event: &Event) -> bool {
        if !self.known.contains(&event.id) {
            tracing::debug!(id = %event.id, event_type = %event.event_type, "correlation gap, event ignored");
            return false;
        }
        if event.kind() == Some(EventKind::End) {
            self.known.remove(&event.id);
        }
        true
    }
}
