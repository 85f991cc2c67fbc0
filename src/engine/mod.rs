mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::free_intervals;
pub use error::EngineError;
pub use mutations::UpdateOutcome;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::{Event, Timeline};
use crate::wal::Wal;

pub type SharedTimeline = Arc<RwLock<Timeline>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then handle the
                            // non-append command.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The reservation conflict & availability engine.
///
/// All mutations go through a single write lock on the timeline; the lock is
/// held across the whole check-and-commit sequence, which is what makes two
/// concurrent creates for overlapping ranges linearizable — at most one wins.
pub struct Engine {
    pub(super) timeline: SharedTimeline,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the WAL and start the group-commit writer task.
    /// Must run inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut timeline = Timeline::new();
        for event in &events {
            timeline.apply(event);
        }

        Ok(Self {
            timeline: Arc::new(RwLock::new(timeline)),
            wal_tx,
        })
    }

    /// Write an event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply, in that order: if the append fails, nothing is
    /// applied and no partial mutation becomes visible.
    pub(super) async fn persist_and_apply(
        &self,
        timeline: &mut Timeline,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        timeline.apply(event);
        Ok(())
    }
}
