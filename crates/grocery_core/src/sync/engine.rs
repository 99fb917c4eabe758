//! Reconciliation engine: the single writer of the canonical list.
//!
//! # Responsibility
//! - Apply list mutations to the local store, then the in-memory list, then
//!   queue the matching remote mirror call.
//! - Publish a fresh list snapshot after every applied mutation.
//! - Forward robot commands to an attached command sink.
//!
//! # Invariants
//! - All mutations run under one async mutex, in submission order per caller.
//! - A failed local write leaves the canonical list unchanged and returns the
//!   error; nothing is mirrored for it.
//! - Remote mirror failures are logged only.

use crate::link::codec::Command;
use crate::link::connection::CommandSink;
use crate::model::item::ListItem;
use crate::model::now_epoch_ms;
use crate::model::telemetry::CameraMode;
use crate::remote::item_remote::{ItemPatch, RemoteStore};
use crate::repo::item_repo::{LocalStore, StoreError, StoreResult};
use crate::sync::detection::UnmatchedPolicy;
use crate::sync::mirror::{MirrorOp, RemoteMirror};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Result of feeding one detected object name into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// An open item matched and is now fulfilled.
    Fulfilled(ListItem),
    /// No item matched; a fulfilled one was recorded.
    Created(ListItem),
    /// Every matching item was already fulfilled.
    AlreadyFulfilled,
    /// Blank name, or no match under `UnmatchedPolicy::Ignore`.
    Ignored,
}

struct EngineState<S> {
    store: S,
    items: BTreeMap<String, ListItem>,
}

impl<S> EngineState<S> {
    fn snapshot(&self) -> Vec<ListItem> {
        sorted_snapshot(self.items.values())
    }
}

pub struct ReconciliationEngine<S: LocalStore> {
    state: Mutex<EngineState<S>>,
    mirror: RemoteMirror,
    snapshots: watch::Sender<Vec<ListItem>>,
    commands: Option<Arc<dyn CommandSink>>,
}

impl<S: LocalStore> ReconciliationEngine<S> {
    /// Loads the canonical list from `store` and starts the mirror worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(store: S, remote: Arc<dyn RemoteStore>) -> StoreResult<Self> {
        let items = store
            .list_items()?
            .into_iter()
            .map(|item| (item.name.clone(), item))
            .collect::<BTreeMap<_, _>>();
        let state = EngineState { store, items };
        let (snapshots, _) = watch::channel(state.snapshot());
        let mirror = RemoteMirror::spawn(remote);
        info!(
            "event=engine_open module=sync status=ok items={} remote_configured={}",
            state.items.len(),
            mirror.is_enabled()
        );

        Ok(Self {
            state: Mutex::new(state),
            mirror,
            snapshots,
            commands: None,
        })
    }

    /// Attaches the sink used by the command operations.
    pub fn with_command_sink(mut self, sink: Arc<dyn CommandSink>) -> Self {
        self.commands = Some(sink);
        self
    }

    /// Startup protocol: fetch every remote row and upsert it locally.
    ///
    /// Returns the number of seeded items. A remote failure seeds nothing and
    /// is not an error; a local write failure is.
    pub async fn seed_from_remote(&self) -> StoreResult<usize> {
        if !self.mirror.is_enabled() {
            debug!("event=engine_seed module=sync status=skip reason=remote_unconfigured");
            return Ok(0);
        }
        let fetched = match self.mirror.fetch_all().await {
            Ok(items) => items,
            Err(err) => {
                warn!("event=engine_seed module=sync status=error error={err}");
                return Ok(0);
            }
        };

        let mut state = self.state.lock().await;
        for item in &fetched {
            state.store.upsert_item(item)?;
            state.items.insert(item.name.clone(), item.clone());
        }
        self.publish(&*state);
        info!("event=engine_seed module=sync status=ok items={}", fetched.len());
        Ok(fetched.len())
    }

    /// Creates or replaces the open item `name`.
    ///
    /// Returns `None` without touching anything when the name is blank.
    pub async fn add(&self, name: &str, quantity: u32) -> StoreResult<Option<ListItem>> {
        if name.trim().is_empty() {
            debug!("event=list_add module=sync status=skip reason=blank_name");
            return Ok(None);
        }
        let item = ListItem::new(name, quantity, now_epoch_ms());

        let mut state = self.state.lock().await;
        state.store.upsert_item(&item)?;
        state.items.insert(item.name.clone(), item.clone());
        self.publish(&*state);
        self.mirror.enqueue(MirrorOp::Upsert(item.clone()));
        debug!(
            "event=list_add module=sync status=ok name={} quantity={}",
            item.name, item.quantity
        );
        Ok(Some(item))
    }

    pub async fn toggle_fulfilled(&self, name: &str) -> StoreResult<ListItem> {
        let mut state = self.state.lock().await;
        let mut item = lookup(&*state, name)?;
        item.toggle_fulfilled(now_epoch_ms());
        self.commit_update(&mut *state, item, ItemPatch::fulfillment_of)
    }

    /// Sets the quantity, clamped to a minimum of 1.
    pub async fn set_quantity(&self, name: &str, quantity: u32) -> StoreResult<ListItem> {
        let mut state = self.state.lock().await;
        let mut item = lookup(&*state, name)?;
        item.quantity = quantity.max(1);
        self.commit_update(&mut *state, item, |item| ItemPatch::Quantity(item.quantity))
    }

    /// Removes `name` locally and remotely. Returns whether it existed locally.
    pub async fn delete(&self, name: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.store.delete_item(name)?;
        state.items.remove(name);
        self.publish(&*state);
        self.mirror.enqueue(MirrorOp::Delete(name.to_string()));
        debug!("event=list_delete module=sync status=ok name={name} removed={removed}");
        Ok(removed)
    }

    pub async fn clear_fulfilled(&self) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let removed = state.store.delete_fulfilled()?;
        state.items.retain(|_, item| !item.fulfilled);
        self.publish(&*state);
        self.mirror.enqueue(MirrorOp::DeleteFulfilled);
        info!("event=list_clear module=sync status=ok scope=fulfilled removed={removed}");
        Ok(removed)
    }

    pub async fn clear_all(&self) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let removed = state.store.delete_all()?;
        state.items.clear();
        self.publish(&*state);
        self.mirror.enqueue(MirrorOp::DeleteAll);
        info!("event=list_clear module=sync status=ok scope=all removed={removed}");
        Ok(removed)
    }

    /// Matches a detected object against the list and fulfils it.
    ///
    /// Matching is case-insensitive and prefers an open item when several
    /// names differ only by case. The lookup and the write happen under one
    /// lock acquisition.
    pub async fn fulfill_detected(
        &self,
        name: &str,
        policy: UnmatchedPolicy,
    ) -> StoreResult<DetectionOutcome> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(DetectionOutcome::Ignored);
        }
        let now = now_epoch_ms();

        let mut state = self.state.lock().await;
        let mut matches = state.items.values().filter(|item| item.matches_name(name));
        let open_match = matches.find(|item| !item.fulfilled).cloned();
        let any_match = state.items.values().any(|item| item.matches_name(name));

        if let Some(mut item) = open_match {
            item.set_fulfilled(true, now);
            let item = self.commit_update(&mut *state, item, ItemPatch::fulfillment_of)?;
            debug!("event=detection_apply module=sync status=ok outcome=fulfilled name={name}");
            return Ok(DetectionOutcome::Fulfilled(item));
        }
        if any_match {
            debug!("event=detection_apply module=sync status=skip reason=already_fulfilled name={name}");
            return Ok(DetectionOutcome::AlreadyFulfilled);
        }

        match policy {
            UnmatchedPolicy::Ignore => {
                debug!("event=detection_apply module=sync status=skip reason=unmatched name={name}");
                Ok(DetectionOutcome::Ignored)
            }
            UnmatchedPolicy::CreateFulfilled => {
                let item = ListItem::fulfilled_on_detection(name, now);
                state.store.upsert_item(&item)?;
                state.items.insert(item.name.clone(), item.clone());
                self.publish(&*state);
                self.mirror.enqueue(MirrorOp::Upsert(item.clone()));
                debug!("event=detection_apply module=sync status=ok outcome=created name={name}");
                Ok(DetectionOutcome::Created(item))
            }
        }
    }

    /// Current canonical list, newest first.
    pub fn items(&self) -> Vec<ListItem> {
        self.snapshots.borrow().clone()
    }

    pub async fn get(&self, name: &str) -> Option<ListItem> {
        self.state.lock().await.items.get(name).cloned()
    }

    /// List snapshots, replaced after every applied mutation.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ListItem>> {
        self.snapshots.subscribe()
    }

    pub fn remote_configured(&self) -> bool {
        self.mirror.is_enabled()
    }

    /// Waits until every queued remote mirror call has finished.
    pub async fn flush_remote(&self) {
        self.mirror.flush().await;
    }

    pub fn calibrate(&self) -> bool {
        self.forward(Command::Calibrate)
    }

    pub fn start_tracking(&self) -> bool {
        self.forward(Command::StartTracking)
    }

    pub fn stop_tracking(&self) -> bool {
        self.forward(Command::StopTracking)
    }

    pub fn emergency_stop(&self) -> bool {
        self.forward(Command::EmergencyStop)
    }

    pub fn set_mode(&self, mode: CameraMode) -> bool {
        self.forward(Command::SetMode(mode))
    }

    fn forward(&self, command: Command) -> bool {
        match &self.commands {
            Some(sink) => sink.dispatch(command.pending()),
            None => {
                debug!(
                    "event=command_forward module=sync status=skip command={} reason=no_sink",
                    command.name()
                );
                false
            }
        }
    }

    fn commit_update(
        &self,
        state: &mut EngineState<S>,
        item: ListItem,
        patch: impl FnOnce(&ListItem) -> ItemPatch,
    ) -> StoreResult<ListItem> {
        state.store.update_item(&item)?;
        state.items.insert(item.name.clone(), item.clone());
        self.publish(state);
        self.mirror.enqueue(MirrorOp::Patch {
            name: item.name.clone(),
            patch: patch(&item),
        });
        Ok(item)
    }

    fn publish(&self, state: &EngineState<S>) {
        self.snapshots.send_replace(state.snapshot());
    }
}

fn lookup<S>(state: &EngineState<S>, name: &str) -> StoreResult<ListItem> {
    state
        .items
        .get(name)
        .cloned()
        .ok_or_else(|| StoreError::NotFound(name.to_string()))
}

fn sorted_snapshot<'a>(items: impl Iterator<Item = &'a ListItem>) -> Vec<ListItem> {
    let mut snapshot = items.cloned().collect::<Vec<_>>();
    snapshot.sort_by(|a, b| {
        b.created_at_ms
            .cmp(&a.created_at_ms)
            .then_with(|| a.name.cmp(&b.name))
    });
    snapshot
}

#[cfg(test)]
mod tests {
    use super::sorted_snapshot;
    use crate::model::item::ListItem;

    #[test]
    fn snapshot_orders_newest_first_then_by_name() {
        let items = [
            ListItem::new("bread", 1, 10),
            ListItem::new("apples", 1, 20),
            ListItem::new("milk", 1, 20),
        ];
        let names = sorted_snapshot(items.iter())
            .into_iter()
            .map(|item| item.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["apples", "milk", "bread"]);
    }
}
