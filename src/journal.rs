use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::wal::Wal;

/// Durable sink for engine events. An append that returns `Ok` survives a
/// crash; the engine applies an event in memory only after that.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, event: &Event) -> io::Result<()>;

    /// Replace the journal with a minimal event set that recreates current state.
    async fn compact(&self, events: Vec<Event>) -> io::Result<()>;

    async fn appends_since_compact(&self) -> u64;
}

enum WalCommand {
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

/// WAL-backed journal. A background task owns the file and group-commits:
/// every append already queued when it wakes shares one fsync.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Recover the WAL at `path` and start the writer task. Returns the
    /// journal plus the replayed history. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (wal, history) = Wal::recover(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Ok((Self { tx }, history))
    }

    async fn request<T: Send>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand + Send,
    ) -> io::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| io::Error::other("journal writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("journal writer dropped response"))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, event: &Event) -> io::Result<()> {
        let event = event.clone();
        self.request(|response| WalCommand::Append { event, response })
            .await?
    }

    async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        self.request(|response| WalCommand::Compact { events, response })
            .await?
    }

    async fn appends_since_compact(&self) -> u64 {
        self.request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}

/// 1. Block until a command arrives.
/// 2. For an append, drain every append already queued (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
/// 4. A non-append command found while draining runs after the batch is flushed.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_other(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_other(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    // The batch fails as a whole: drop whatever part of it was buffered.
    if let Err(e) = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
    {
        wal.discard_pending();
        return Err(e);
    }
    wal.flush_sync()
}

fn handle_other(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside a batch")));
        }
    }
}
