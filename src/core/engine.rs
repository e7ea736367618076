use crate::core::assembler::Assembler;
use crate::core::events::{Event, EventKind, EventMsg, Payload};
use crate::core::model::*;
use crate::core::planner::plan_ranges;
use crate::transport::{DriverContext, TransferDriver};
use anyhow::Context;
use futures::stream::{self, FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

/// Multi-threaded downloader. A run covers a list of tasks and reports
/// through the broadcast event stream; subscribe before calling [`Engine::start`].
#[derive(Clone)]
pub struct Engine {
    driver: Arc<dyn TransferDriver>,
    hints: TransferHints,
    driver_ctx: DriverContext,
    event_tx: broadcast::Sender<EventMsg>,
}

struct RunScope<'a> {
    id: String,
    label: &'a RunLabel,
}

impl Engine {
    pub fn new(driver: Arc<dyn TransferDriver>, hints: TransferHints, driver_ctx: DriverContext) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            driver,
            hints: TransferHints {
                thread_count: hints.thread_count.max(1),
                chunk_size: hints.chunk_size.max(1),
            },
            driver_ctx,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventMsg> {
        self.event_tx.subscribe()
    }

    pub fn start(&self, tasks: Vec<DownloadTask>, label: RunLabel) -> RunId {
        let run_id = Uuid::new_v4();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(run_id, tasks, label).await;
        });
        run_id
    }

    fn emit(&self, scope: &RunScope<'_>, kind: EventKind, payload: Payload) {
        let event = Event::new(kind, &scope.label.name, &scope.label.show_name, &scope.id);
        let _ = self.event_tx.send(EventMsg { event, payload });
    }

    /// Returns the number of failed tasks.
    async fn run(&self, run_id: RunId, tasks: Vec<DownloadTask>, label: RunLabel) -> usize {
        let scope = RunScope { id: run_id.to_string(), label: &label };
        let total = tasks.len();
        tracing::info!(run = %run_id, tasks = total, driver = self.driver.name(), "download run started");
        self.emit(&scope, EventKind::Start, Payload::new());

        let outcomes: Vec<bool> = stream::iter(tasks.into_iter().enumerate())
            .map(|(i, task)| self.run_task(&scope, i + 1, total, task))
            .buffer_unordered(self.hints.thread_count)
            .collect()
            .await;
        let failed = outcomes.iter().filter(|ok| !**ok).count();

        self.emit(&scope, EventKind::End, Payload::new());
        tracing::info!(run = %run_id, failed, "download run finished");
        failed
    }

    async fn run_task(&self, scope: &RunScope<'_>, index: usize, total: usize, task: DownloadTask) -> bool {
        self.emit(scope, EventKind::StartOne, Payload::file(&task.url, index, total));

        let ok = match self.download_file(scope, &task).await {
            Ok(()) => true,
            Err(e) => {
                let err = format!("{:#}", e);
                tracing::warn!(run = %scope.id, url = %task.url, error = %err, "download failed");
                self.emit(scope, EventKind::Error, Payload::error(err));
                false
            }
        };

        self.emit(scope, EventKind::EndOne, Payload::file(&task.url, index, total));
        ok
    }

    async fn download_file(&self, scope: &RunScope<'_>, task: &DownloadTask) -> anyhow::Result<()> {
        url::Url::parse(&task.url).with_context(|| format!("invalid url {}", task.url))?;

        let (total, supports_ranges) = match self.driver.probe(&task.url, &self.driver_ctx).await {
            Ok(p) => p,
            Err(e) => {
                // 探测失败不致命，退回单连接下载
                self.emit(
                    scope,
                    EventKind::Message,
                    Payload::message(format!("Error probing {}: {:#}; using a single stream", task.url, e)),
                );
                (None, false)
            }
        };
        tracing::debug!(url = %task.url, ?total, supports_ranges, "probe");

        let assembler = Assembler::create(&task.save_path, total).await?;
        let outcome = match total {
            Some(t) if supports_ranges && t > 0 => self.fetch_ranges(scope, &task.url, &assembler, t).await,
            _ => self.fetch_whole(scope, &task.url, &assembler, total).await,
        };

        match outcome {
            Ok(()) => assembler.commit(&task.save_path).await,
            Err(e) => {
                assembler.discard().await;
                Err(e)
            }
        }
    }

    async fn fetch_ranges(
        &self,
        scope: &RunScope<'_>,
        url: &str,
        assembler: &Assembler,
        total: u64,
    ) -> anyhow::Result<()> {
        let downloaded = Mutex::new(0u64);
        let downloaded = &downloaded;
        let mut pending = plan_ranges(total, self.hints.chunk_size);

        while !pending.is_empty() {
            let batch: Vec<Fragment> = pending.drain(0..pending.len().min(self.hints.thread_count)).collect();
            let mut futs = FuturesUnordered::new();

            for frag in batch {
                futs.push(async move {
                    let bytes = self
                        .driver
                        .download_range(url, &self.driver_ctx, frag.offset, frag.end_inclusive())
                        .await?;
                    if bytes.len() as u64 != frag.len {
                        anyhow::bail!(
                            "fragment at {} returned {} bytes, expected {}",
                            frag.offset,
                            bytes.len(),
                            frag.len
                        );
                    }
                    assembler.write_at(frag.offset, &bytes).await?;

                    let now = {
                        let mut d = downloaded.lock().await;
                        *d += bytes.len() as u64;
                        *d
                    };
                    self.emit(scope, EventKind::Update, Payload::progress(total, now));
                    Ok::<(), anyhow::Error>(())
                });
            }

            while let Some(res) = futs.next().await {
                res?;
            }
        }
        Ok(())
    }

    async fn fetch_whole(
        &self,
        scope: &RunScope<'_>,
        url: &str,
        assembler: &Assembler,
        total: Option<u64>,
    ) -> anyhow::Result<()> {
        let bytes = self.driver.download_all(url, &self.driver_ctx).await?;
        assembler.write_at(0, &bytes).await?;
        let len = bytes.len() as u64;
        self.emit(scope, EventKind::Update, Payload::progress(total.unwrap_or(len), len));
        Ok(())
    }
}
