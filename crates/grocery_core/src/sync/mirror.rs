//! Ordered, fire-and-forget remote mirroring.
//!
//! One worker task drains an unbounded queue, so remote calls are issued in
//! exactly the order the engine applied the matching local writes.

use crate::model::item::ListItem;
use crate::remote::item_remote::{ItemPatch, RemoteResult, RemoteStore};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One queued remote write.
#[derive(Debug)]
pub(crate) enum MirrorOp {
    Upsert(ListItem),
    Patch { name: String, patch: ItemPatch },
    Delete(String),
    DeleteFulfilled,
    DeleteAll,
    Flush(oneshot::Sender<()>),
}

impl MirrorOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Patch { .. } => "patch",
            Self::Delete(_) => "delete",
            Self::DeleteFulfilled => "delete_fulfilled",
            Self::DeleteAll => "delete_all",
            Self::Flush(_) => "flush",
        }
    }
}

pub(crate) struct RemoteMirror {
    remote: Arc<dyn RemoteStore>,
    queue: mpsc::UnboundedSender<MirrorOp>,
}

impl RemoteMirror {
    /// Starts the worker on the current Tokio runtime.
    ///
    /// # Panics
    /// When called outside a Tokio runtime.
    pub(crate) fn spawn(remote: Arc<dyn RemoteStore>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(remote.clone(), rx));
        Self { remote, queue }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.remote.is_configured()
    }

    pub(crate) async fn fetch_all(&self) -> RemoteResult<Vec<ListItem>> {
        self.remote.fetch_all().await
    }

    /// Queues `op`; skipped entirely in local-only mode.
    pub(crate) fn enqueue(&self, op: MirrorOp) {
        if !self.is_enabled() {
            return;
        }
        let name = op.name();
        if self.queue.send(op).is_err() {
            warn!("event=remote_mirror module=sync status=error op={name} reason=worker_stopped");
        }
    }

    /// Resolves once every previously queued op has finished.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.queue.send(MirrorOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn run_worker(remote: Arc<dyn RemoteStore>, mut rx: mpsc::UnboundedReceiver<MirrorOp>) {
    while let Some(op) = rx.recv().await {
        let name = op.name();
        let result = match op {
            MirrorOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            MirrorOp::Upsert(item) => remote.upsert(&item).await,
            MirrorOp::Patch { name, patch } => remote.patch(&name, &patch).await,
            MirrorOp::Delete(name) => remote.delete(&name).await,
            MirrorOp::DeleteFulfilled => remote.delete_fulfilled().await,
            MirrorOp::DeleteAll => remote.delete_all().await,
        };
        match result {
            Ok(()) => debug!("event=remote_mirror module=sync status=ok op={name}"),
            Err(err) => warn!("event=remote_mirror module=sync status=error op={name} error={err}"),
        }
    }
    debug!("event=remote_mirror module=sync status=ok reason=worker_stopped");
}
