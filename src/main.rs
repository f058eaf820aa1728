use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use inbox_assist::api::{ApiState, api_routes};
use inbox_assist::channels::{ImapTransport, MailboxWatcher, SmtpMailer, spawn_email_poller};
use inbox_assist::config::AppConfig;
use inbox_assist::llm::{LanguageModel, create_provider};
use inbox_assist::pipeline::ResponsePipeline;
use inbox_assist::scheduler::{ActionScheduler, CadenceSchedules, JobRegistry};
use inbox_assist::store::LibSqlBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // ── Tracing ─────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📬 Inbox Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!(
        "   Mailbox: {}@{}:{}/{}",
        config.email.username, config.email.imap_host, config.email.imap_port, config.email.mailbox
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── LLM ─────────────────────────────────────────────────────────────
    let provider = create_provider(&config.llm)?;
    let lm = Arc::new(LanguageModel::new(
        provider,
        store.clone(),
        config.generation.clone(),
    ));

    // ── Email ───────────────────────────────────────────────────────────
    let mailer = Arc::new(SmtpMailer::new(config.email.clone()));
    let pipeline = Arc::new(
        ResponsePipeline::new(store.clone(), lm.clone(), mailer.clone())
            .with_signature(config.signature.clone()),
    );
    let watcher = Arc::new(MailboxWatcher::new(
        Arc::new(ImapTransport::new(config.email.clone())),
        pipeline,
    ));

    let poller = if config.email.poll_interval_secs > 0 {
        eprintln!("   Polling: every {}s", config.email.poll_interval_secs);
        Some(spawn_email_poller(
            watcher.clone(),
            config.email.poll_interval_secs,
        ))
    } else {
        eprintln!("   Polling: on demand (POST /api/mail/poll)");
        None
    };

    // ── Scheduler ───────────────────────────────────────────────────────
    let schedules = CadenceSchedules::new(&config.hourly_cron, &config.daily_cron)?;
    let scheduler = Arc::new(ActionScheduler::new(
        store.clone(),
        lm,
        mailer,
        Arc::new(JobRegistry::new()),
        schedules,
    ));

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = api_routes(ApiState {
        scheduler: scheduler.clone(),
        watcher,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    eprintln!("   API: http://0.0.0.0:{}\n", config.port);
    tracing::info!(port = config.port, "Control server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await?;

    // ── Shutdown ────────────────────────────────────────────────────────
    tracing::info!("Shutting down");
    if let Some((handle, shutdown)) = poller {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        handle.abort();
    }
    scheduler.shutdown().await;

    Ok(())
}
