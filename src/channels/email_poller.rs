//! Mailbox watcher: fetch unseen → parse → respond, one task per message.
//!
//! Fetching and dispatch overlap. The transport pushes each raw message into
//! a bounded channel as soon as it is read, and the watcher spawns its
//! processing immediately, so a slow model call never holds up intake.
//! Messages are marked seen by the fetch itself and are never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::channels::email_types::{RawMessage, parse_message};
use crate::channels::imap::MailboxTransport;
use crate::error::{MailboxError, PipelineError};
use crate::pipeline::ResponsePipeline;

/// Raw messages buffered between the transport and dispatch.
const FETCH_BUFFER: usize = 16;

/// Outcome counts for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub fetched: usize,
    pub replied: usize,
    pub dropped: usize,
}

enum Outcome {
    Replied,
    Dropped,
}

pub struct MailboxWatcher {
    transport: Arc<dyn MailboxTransport>,
    pipeline: Arc<ResponsePipeline>,
}

impl MailboxWatcher {
    pub fn new(transport: Arc<dyn MailboxTransport>, pipeline: Arc<ResponsePipeline>) -> Self {
        Self {
            transport,
            pipeline,
        }
    }

    /// Run one poll and wait for every dispatched message to finish.
    ///
    /// A transport failure is returned only after the messages fetched
    /// before it have been processed.
    pub async fn poll_once(&self) -> Result<PollReport, MailboxError> {
        let (tx, mut rx) = mpsc::channel::<RawMessage>(FETCH_BUFFER);

        let fetch = self.transport.fetch_unseen(tx);
        let dispatch = async {
            let mut tasks = JoinSet::new();
            while let Some(raw) = rx.recv().await {
                let pipeline = Arc::clone(&self.pipeline);
                tasks.spawn(process_message(pipeline, raw));
            }
            tasks
        };
        let (fetched, mut tasks) = tokio::join!(fetch, dispatch);

        let mut report = PollReport::default();
        while let Some(joined) = tasks.join_next().await {
            report.fetched += 1;
            match joined {
                Ok(Outcome::Replied) => report.replied += 1,
                Ok(Outcome::Dropped) => report.dropped += 1,
                Err(e) => {
                    error!(error = %e, "Message task panicked");
                    report.dropped += 1;
                }
            }
        }

        match fetched {
            Ok(n) => {
                if n > 0 {
                    info!(
                        fetched = report.fetched,
                        replied = report.replied,
                        dropped = report.dropped,
                        "Mailbox poll complete"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, processed = report.fetched, "Mailbox poll aborted");
                Err(e)
            }
        }
    }
}

async fn process_message(pipeline: Arc<ResponsePipeline>, raw: RawMessage) -> Outcome {
    let uid = raw.uid;
    let parsed = match parse_message(&raw.bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(uid, error = %e, "Dropping unparseable message");
            return Outcome::Dropped;
        }
    };
    drop(raw);

    let sender = parsed.sender.clone();
    match pipeline.handle(parsed).await {
        Ok(()) => Outcome::Replied,
        Err(PipelineError::UserNotFound { email }) => {
            info!(uid, sender = %email, "No user for sender, ignoring message");
            Outcome::Dropped
        }
        Err(PipelineError::EmptyModelResponse { .. }) => {
            warn!(uid, sender = %sender, "Model returned no text, no reply sent");
            Outcome::Dropped
        }
        Err(e) => {
            error!(uid, sender = %sender, error = %e, "Failed to answer message");
            Outcome::Dropped
        }
    }
}

/// Spawn a background task that polls the mailbox every `interval_secs`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_email_poller(
    watcher: Arc<MailboxWatcher>,
    interval_secs: u64,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs, "Email poller started");

        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Email poller shutting down");
                return;
            }

            if let Err(e) = watcher.poll_once().await {
                debug!(error = %e, "Poll failed, waiting for next tick");
            }
        }
    });

    (handle, shutdown_flag)
}
