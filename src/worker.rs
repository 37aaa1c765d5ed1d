use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::error::StoreError;
use crate::store::Table;

// Work queued for the persistence worker
pub enum PersistJob {
    Write { table: Table, contents: Vec<u8> },
    Audit(String),
    Flush(oneshot::Sender<()>), // acked once every job queued before it is done
}

// Writes queued but not yet on disk, per table
#[derive(Default)]
pub struct PendingWrites {
    counts: [AtomicUsize; 3],
}

impl PendingWrites {
    pub fn begin(&self, table: Table) {
        self.counts[table.index()].fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self, table: Table) {
        self.counts[table.index()].fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self, table: Table) -> usize {
        self.counts[table.index()].load(Ordering::SeqCst)
    }
}

// Background worker -> applies writes and audit appends one by one, in queue order
pub async fn persist_worker(
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
    backend: Arc<dyn Backend>,
    pending: Arc<PendingWrites>,
) {
    info!("persistence worker started");

    while let Some(job) = rx.recv().await {
        match job {
            PersistJob::Write { table, contents } => {
                let backend = Arc::clone(&backend);
                let result =
                    tokio::task::spawn_blocking(move || backend.write(table, &contents)).await;

                match result {
                    Ok(Ok(())) => debug!(%table, "table saved"),
                    Ok(Err(source)) => {
                        let e = StoreError::Io { table, source };
                        error!(error = %e, "failed to save table");
                    }
                    Err(e) => error!(error = %e, %table, "save task panicked"),
                }
                pending.finish(table);
            }
            PersistJob::Audit(line) => {
                let backend = Arc::clone(&backend);
                let result =
                    tokio::task::spawn_blocking(move || backend.append_audit(&line)).await;

                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(source)) => {
                        let e = StoreError::Audit(source);
                        error!(error = %e, "audit entry dropped");
                    }
                    Err(e) => error!(error = %e, "audit task panicked"),
                }
            }
            PersistJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    info!("persistence worker stopped");
}
