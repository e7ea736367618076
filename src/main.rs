use aichat::chat::{OpenAiClient, DEFAULT_TIMEOUT};
use aichat::config::{AppPaths, ConfigStore, APP_NAME, MAX_UPDATE_CHUNK_MB, MAX_UPDATE_THREADS};
use aichat::logging::{init_logging, LoggingDestination};
use aichat::server::{self, AppState};
use aichat::update::progress::{ProgressLine, ProgressRenderer, TracingRenderer};
use aichat::update::UpdateService;
use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

const DEFAULT_PORT: u16 = 5000;

fn data_dir_arg() -> Arg {
    Arg::new("data_dir")
        .long("data-dir")
        .help("Override the application data directory")
        .value_parser(value_parser!(PathBuf))
        .num_args(1)
}

fn serve_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("port")
            .long("port")
            .help("Port to listen on (127.0.0.1 only)")
            .value_parser(value_parser!(u16))
            .default_value("5000")
            .num_args(1),
    )
    .arg(
        Arg::new("no_window")
            .long("no-window")
            .help("Do not open the UI in a browser window")
            .action(ArgAction::SetTrue),
    )
}

fn build_cli() -> Command {
    let serve = serve_args(Command::new("serve").about("Run the chat service and open the UI"));

    let check = Command::new("check-update")
        .about("Check the published version once and print the result as JSON")
        .arg(
            Arg::new("url")
                .long("url")
                .help("Version document URL")
                .num_args(1),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .help("Parallel fragments for the primary download")
                .value_parser(value_parser!(usize))
                .num_args(1),
        )
        .arg(
            Arg::new("chunk_mb")
                .long("chunk-mb")
                .help("Fragment size in MB")
                .value_parser(value_parser!(u64))
                .num_args(1),
        );

    serve_args(Command::new("aichat"))
        .about(format!("{APP_NAME} desktop chat client"))
        .version(env!("CARGO_PKG_VERSION"))
        .arg(data_dir_arg().global(true))
        .subcommand(serve)
        .subcommand(check)
}

/// Terminal progress for `check-update`; stdout stays reserved for the JSON result.
struct IndicatifRenderer {
    bar: ProgressBar,
}

impl IndicatifRenderer {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {bytes}/{total_bytes} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressRenderer for IndicatifRenderer {
    fn render(&self, line: &ProgressLine) {
        match line {
            ProgressLine::Progress { label, downloaded, total, .. } => {
                if self.bar.length() != Some(*total) {
                    self.bar.set_length(*total);
                }
                self.bar.set_prefix(label.clone());
                self.bar.set_position((*downloaded).min(*total));
            }
            ProgressLine::Info { .. } => self.bar.println(format!("[INFO] {line}")),
            ProgressLine::Error { .. } => self.bar.println(format!("[ERR] {line}")),
        }
    }
}

impl Drop for IndicatifRenderer {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

async fn run_serve(paths: AppPaths, m: &ArgMatches) -> anyhow::Result<()> {
    let port = m.get_one::<u16>("port").copied().unwrap_or(DEFAULT_PORT);
    let no_window = m.get_flag("no_window");

    match init_logging(LoggingDestination::FileAndStderr(paths.log_dir.clone())) {
        Ok(Some(path)) => eprintln!("logging to {}", path.display()),
        Ok(None) => {}
        Err(e) => eprintln!("logging disabled: {e}"),
    }

    let chat = OpenAiClient::new(DEFAULT_TIMEOUT).context("build chat client")?;
    let state = AppState::load(paths, Arc::new(chat), Arc::new(TracingRenderer)).await?;

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("bind 127.0.0.1:{port}"))?;
    let url = format!("http://{}", listener.local_addr()?);

    if no_window {
        tracing::info!(%url, "window disabled");
    } else if let Err(e) = open::that(&url) {
        // 打不开浏览器时服务照常运行
        tracing::warn!(%url, error = %e, "could not open window");
    }

    server::serve(listener, Arc::new(state)).await
}

async fn run_check(paths: AppPaths, m: &ArgMatches) -> anyhow::Result<()> {
    if let Err(e) = init_logging(LoggingDestination::StderrOnly) {
        eprintln!("logging disabled: {e}");
    }

    let config = ConfigStore::load(&paths.config_file).await;
    let mut settings = config.update_settings();
    if let Some(url) = m.get_one::<String>("url") {
        settings.version_url = url.clone();
    }
    if let Some(n) = m.get_one::<usize>("threads") {
        settings.thread_count = (*n).clamp(1, MAX_UPDATE_THREADS as usize);
    }
    if let Some(n) = m.get_one::<u64>("chunk_mb") {
        settings.chunk_size_mb = (*n).clamp(1, MAX_UPDATE_CHUNK_MB);
    }

    let service = UpdateService::new(
        settings,
        &paths.temp_dir,
        config.locale(),
        Arc::new(IndicatifRenderer::new()),
    );
    tracing::info!(url = %service.settings().version_url, "checking for updates");

    let result = service.check().await;
    drop(service);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();
    let paths = AppPaths::resolve(matches.get_one::<PathBuf>("data_dir").cloned());

    match matches.subcommand() {
        Some(("check-update", m)) => run_check(paths, m).await,
        Some(("serve", m)) => run_serve(paths, m).await,
        _ => run_serve(paths, &matches).await,
    }
}
