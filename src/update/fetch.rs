use crate::core::engine::Engine;
use crate::core::events::{EventKind, EventMsg};
use crate::core::model::{DownloadTask, RunLabel};
use crate::update::progress::{Correlator, ProgressConsumer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[derive(thiserror::Error, Debug)]
pub enum PrimaryFetchError {
    #[error("download engine did not finish within {0:?}")]
    Timeout(Duration),

    #[error("download engine event stream closed before the run ended")]
    Disconnected,
}

#[derive(thiserror::Error, Debug)]
pub enum FallbackFetchError {
    #[error("failed to build fallback client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("http status error: {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// First tier. Returning `Ok` says nothing about whether `dest` exists.
#[async_trait]
pub trait PrimaryFetch: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), PrimaryFetchError>;
}

/// Second and last tier. `Ok` means `dest` holds the complete body.
#[async_trait]
pub trait FallbackFetch: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FallbackFetchError>;
}

/// Runs one URL through the download engine and waits for the run's `end` event.
pub struct EngineFetch {
    engine: Engine,
    consumer: ProgressConsumer,
    label: RunLabel,
    timeout: Duration,
}

impl EngineFetch {
    pub fn new(engine: Engine, consumer: ProgressConsumer, label: RunLabel, timeout: Duration) -> Self {
        Self { engine, consumer, label, timeout }
    }
}

#[async_trait]
impl PrimaryFetch for EngineFetch {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), PrimaryFetchError> {
        let mut rx = self.engine.subscribe();
        let run_id = self.engine.start(
            vec![DownloadTask { url: url.to_string(), save_path: dest.to_path_buf() }],
            self.label.clone(),
        );
        let correlator = Correlator::for_run(run_id.to_string());
        let pump = wait_for_run(&mut rx, correlator, &self.consumer, dest);

        tokio::time::timeout(self.timeout, pump)
            .await
            .map_err(|_| PrimaryFetchError::Timeout(self.timeout))?
    }
}

/// Feeds the run's events to `consumer` until the run is over.
///
/// Normally that is the `end` event. After the receiver has lagged the `end`
/// may be gone, so an `endOne` or an existing `dest` also counts.
async fn wait_for_run(
    rx: &mut broadcast::Receiver<EventMsg>,
    mut correlator: Correlator,
    consumer: &ProgressConsumer,
    dest: &Path,
) -> Result<(), PrimaryFetchError> {
    let mut lagged = false;
    loop {
        match rx.recv().await {
            Ok(msg) => {
                if !correlator.admit(&msg.event) {
                    continue;
                }
                consumer.consume(&msg.event, &msg.payload);
                match msg.event.kind() {
                    Some(EventKind::End) => return Ok(()),
                    Some(EventKind::EndOne) if lagged => return Ok(()),
                    _ => {}
                }
            }
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "progress consumer lagged");
                lagged = true;
                if tokio::fs::try_exists(dest).await.unwrap_or(false) {
                    return Ok(());
                }
            }
            Err(RecvError::Closed) => return Err(PrimaryFetchError::Disconnected),
        }
    }
}

/// Single-shot GET that skips certificate validation.
///
/// The client is private to this type and only ever used for the version
/// probe file; nothing else may borrow it.
pub struct InsecureFetch {
    client: reqwest::Client,
}

impl InsecureFetch {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FallbackFetchError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(FallbackFetchError::Client)?;
        Ok(Self { client })
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".download");
    PathBuf::from(name)
}

#[async_trait]
impl FallbackFetch for InsecureFetch {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FallbackFetchError> {
        let resp = self.client.get(url).send().await.map_err(FallbackFetchError::Request)?;
        if !resp.status().is_success() {
            return Err(FallbackFetchError::Status(resp.status()));
        }
        let body = resp.bytes().await.map_err(FallbackFetchError::Request)?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| FallbackFetchError::Io { path, source }
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        // 先写临时文件再改名
        let staging = staging_path(dest);
        if let Err(e) = tokio::fs::write(&staging, &body).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_err(&staging)(e));
        }
        if let Err(e) = tokio::fs::rename(&staging, dest).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_err(dest)(e));
        }

        tracing::info!(url, bytes = body.len(), "fallback fetch completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::tests::MemoryDriver;
    use crate::core::model::TransferHints;
    use crate::i18n::Locale;
    use crate::transport::DriverContext;
    use crate::update::progress::tests::RecordingRenderer;
    use crate::update::progress::ProgressLine;
    use crate::core::events::{Event, Payload};
    use std::sync::Arc;

    fn engine_fetch(driver: MemoryDriver, rec: Arc<RecordingRenderer>) -> EngineFetch {
        let engine = Engine::new(
            Arc::new(driver),
            TransferHints { thread_count: 4, chunk_size: 2 },
            DriverContext::default(),
        );
        EngineFetch::new(
            engine,
            ProgressConsumer::new(Locale::En, rec),
            RunLabel { name: "version-probe".into(), show_name: "Update check".into() },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn returns_after_end_with_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("aichat.txt");
        let rec = Arc::new(RecordingRenderer::default());
        let fetch = engine_fetch(MemoryDriver::serving("2.1.0", true), rec.clone());

        fetch.fetch("https://example.com/aichat.txt", &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "2.1.0");
        let lines = rec.lines.lock().unwrap();
        assert!(lines.iter().any(|l| matches!(l, ProgressLine::Progress { percent, .. } if *percent >= 100.0)));
    }

    #[tokio::test]
    async fn failed_run_returns_ok_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("aichat.txt");
        let rec = Arc::new(RecordingRenderer::default());
        let fetch = engine_fetch(MemoryDriver::failing(), rec.clone());

        fetch.fetch("https://example.com/aichat.txt", &dest).await.unwrap();

        assert!(!dest.exists());
        let lines = rec.lines.lock().unwrap();
        assert!(lines.iter().any(|l| matches!(l, ProgressLine::Error { .. })));
    }

    fn run_msg(kind: EventKind, payload: Payload) -> EventMsg {
        EventMsg { event: Event::new(kind, "version-probe", "Update check", "run-1"), payload }
    }

    fn quiet_consumer() -> ProgressConsumer {
        ProgressConsumer::new(Locale::En, Arc::new(RecordingRenderer::default()))
    }

    #[tokio::test]
    async fn end_one_after_lag_finishes_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = broadcast::channel(2);
        for n in 1..=5u64 {
            tx.send(run_msg(EventKind::Update, Payload::progress(10, n))).unwrap();
        }
        tx.send(run_msg(EventKind::EndOne, Payload::file("https://example.com/v.txt", 1, 1))).unwrap();

        let consumer = quiet_consumer();
        let out_path = dir.path().join("v.txt");
        let wait = wait_for_run(&mut rx, Correlator::for_run("run-1"), &consumer, &out_path);
        let res = tokio::time::timeout(Duration::from_secs(2), wait).await;

        assert!(matches!(res, Ok(Ok(()))));
        drop(tx);
    }

    #[tokio::test]
    async fn lag_with_file_in_place_finishes_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v.txt");
        std::fs::write(&dest, "2.1.0").unwrap();
        let (tx, mut rx) = broadcast::channel(1);
        for n in 1..=3u64 {
            tx.send(run_msg(EventKind::Update, Payload::progress(10, n))).unwrap();
        }

        let consumer = quiet_consumer();
        let wait = wait_for_run(&mut rx, Correlator::for_run("run-1"), &consumer, &dest);
        let res = tokio::time::timeout(Duration::from_secs(2), wait).await;

        assert!(matches!(res, Ok(Ok(()))));
        drop(tx);
    }

    #[tokio::test]
    async fn end_one_without_lag_keeps_waiting_for_end() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = broadcast::channel(16);
        tx.send(run_msg(EventKind::EndOne, Payload::file("https://example.com/v.txt", 1, 1))).unwrap();

        let consumer = quiet_consumer();
        let out_path = dir.path().join("v.txt");
        let wait = wait_for_run(&mut rx, Correlator::for_run("run-1"), &consumer, &out_path);
        let res = tokio::time::timeout(Duration::from_millis(200), wait).await;

        assert!(res.is_err(), "returned before the run's end event");
        drop(tx);
    }

    #[test]
    fn staging_path_is_a_sibling() {
        let p = staging_path(Path::new("/tmp/x/aichat.txt"));
        assert_eq!(p, PathBuf::from("/tmp/x/aichat.txt.download"));
    }
}
