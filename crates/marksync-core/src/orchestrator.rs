//! Per-replica sync state machine.
//!
//! A replica is either `Idle` or `Syncing`. At most one cycle runs at a time;
//! a second request while `Syncing` is turned away. Browser change events are
//! debounced into a single sync, and events arriving mid-sync queue exactly
//! one follow-up cycle. Mutations the engine makes itself are applied with a
//! sync-driven flag raised; events seen in that window are held back and only
//! those for nodes the engine did not touch are recorded as user edits.
//!
//! Failures never escape a cycle: each maps to one [`SyncOutcome`] variant
//! and the replica returns to `Idle`.

use crate::browser::{BrowserError, BrowserTree, CreateDetails};
use crate::checksum::checksum;
use crate::clock::Clock;
use crate::codec::flatten;
use crate::config::SyncConfig;
use crate::events::{ChangeEvent, EventBus, Subscription, SyncEvent};
use crate::model::{Item, ItemKey, Millis, Tombstone, TreeNode};
use crate::path::{join_path, normalize_path, root_segment, split_parent, CanonicalRoot};
use crate::reconcile::{self, LocalOp, Placement};
use crate::remote::{RemoteError, RemoteStore};
use crate::service::PushRequest;
use crate::state::{self, LocalState, StateStore};
use crate::tombstone::{merge_tombstones, prune_expired, visible_items};

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Syncing,
}

/// Counts for a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Local nodes created from remote items.
    pub created: usize,
    /// Local nodes moved or retitled.
    pub updated: usize,
    /// Local nodes removed by tombstones.
    pub deleted: usize,
    /// Items the remote had not seen before.
    pub pushed_added: usize,
    /// Remote items our push changed.
    pub pushed_updated: usize,
    /// Local checksum after the cycle.
    pub checksum: String,
}

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SyncOutcome {
    Synced(SyncReport),
    /// Nothing changed locally since the last sync.
    UpToDate,
    /// Another cycle is running. Not an error.
    AlreadyInProgress,
    /// Transport or storage failure; retried on the next trigger.
    Failed { message: String },
    /// The remote wants new credentials.
    AuthRequired { message: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_) | SyncOutcome::UpToDate)
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Merge { force: bool },
    ForcePush,
    ForcePull,
}

/// Who asked for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// An explicit `sync`/`force_*` call.
    Request,
    /// The debounce timer task.
    Timer,
}

struct Control {
    phase: Phase,
    sync_driven: bool,
    /// Changes observed while `sync_driven` was raised.
    deferred: Vec<ChangeEvent>,
    pending: bool,
    debounce: Option<JoinHandle<()>>,
    persist: Option<JoinHandle<()>>,
    state: LocalState,
}

/// Browser-path to node-id index used while applying ops.
struct FolderIndex {
    paths: HashMap<String, String>,
    fallback: Option<String>,
}

impl FolderIndex {
    fn build(root: &TreeNode) -> Self {
        let mut paths = HashMap::new();
        let mut fallback = None;
        for container in root.children().iter().filter(|node| node.is_folder()) {
            let path = normalize_path(container.title());
            if path == CanonicalRoot::Other.as_str() || fallback.is_none() {
                fallback = Some(container.id.clone());
            }
            index_folders(container, &path, &mut paths);
            paths.insert(path, container.id.clone());
        }
        Self { paths, fallback }
    }
}

fn index_folders(node: &TreeNode, path: &str, paths: &mut HashMap<String, String>) {
    for child in node.children().iter().filter(|child| child.is_folder()) {
        if child.title().is_empty() {
            index_folders(child, path, paths);
            continue;
        }
        let child_path = join_path(path, child.title());
        index_folders(child, &child_path, paths);
        paths.entry(child_path).or_insert_with(|| child.id.clone());
    }
}

/// Tombstones the user created after `start` was captured.
fn recorded_since(state: &LocalState, start: &[Tombstone]) -> Vec<Tombstone> {
    state
        .tombstones
        .iter()
        .filter(|t| !start.contains(t))
        .cloned()
        .collect()
}

/// Path a folder item occupies once created.
fn own_path(item: &Item) -> String {
    join_path(&normalize_path(item.folder_path()), item.title())
}

/// Deletes for local items the remote has no counterpart for.
///
/// A local folder survives when any remote item lives at or below its path,
/// even if the remote never listed the folder itself. Items inside a doomed
/// folder go with it and get no op of their own.
fn stray_deletes(local: &[Item], remote: &[Item]) -> Vec<LocalOp> {
    let keys: HashSet<ItemKey> = remote.iter().map(Item::key).collect();
    let mut occupied: HashSet<String> = HashSet::new();
    for item in remote {
        let mut path = normalize_path(item.folder_path());
        if item.is_folder() {
            path = own_path(item);
        }
        while !path.is_empty() {
            let parent = split_parent(&path).map(|(parent, _)| parent.to_string());
            occupied.insert(path);
            path = parent.unwrap_or_default();
        }
    }

    let strays: Vec<&Item> = local
        .iter()
        .filter(|item| item.id().is_some() && !keys.contains(&item.key()))
        .filter(|item| !item.is_folder() || !occupied.contains(&own_path(item)))
        .collect();
    let doomed_folders: Vec<String> = strays
        .iter()
        .filter(|item| item.is_folder())
        .map(|item| own_path(item))
        .collect();
    let inside_doomed = |item: &Item| {
        let path = normalize_path(item.folder_path());
        doomed_folders
            .iter()
            .any(|folder| path == *folder || path.starts_with(&format!("{folder}/")))
    };

    strays
        .into_iter()
        .filter(|item| !inside_doomed(*item))
        .filter_map(|item| {
            item.id().map(|id| LocalOp::Delete {
                id: id.to_string(),
                url: item.url().map(str::to_string),
            })
        })
        .collect()
}

/// Drives sync cycles for one replica.
pub struct SyncOrchestrator<B, R> {
    browser: Arc<B>,
    remote: Arc<R>,
    store: Arc<dyn StateStore>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus<SyncEvent>>,
    runtime: Handle,
    control: Mutex<Control>,
}

impl<B, R> SyncOrchestrator<B, R>
where
    B: BrowserTree + 'static,
    R: RemoteStore + 'static,
{
    /// Load persisted state and build an orchestrator. Timers are spawned on
    /// the current Tokio runtime.
    pub async fn open(
        browser: Arc<B>,
        remote: Arc<R>,
        store: Arc<dyn StateStore>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> state::Result<Arc<Self>> {
        let state = store.load().await?;
        debug!(
            "Loaded sync state: last checksum {:?}, {} tracked ids, {} tombstones",
            state.last_checksum,
            state.modified_ids.len(),
            state.tombstones.len()
        );
        Ok(Arc::new(Self {
            browser,
            remote,
            store,
            config,
            clock,
            events: Arc::new(EventBus::new()),
            runtime: Handle::current(),
            control: Mutex::new(Control {
                phase: Phase::Idle,
                sync_driven: false,
                deferred: Vec::new(),
                pending: false,
                debounce: None,
                persist: None,
                state,
            }),
        }))
    }

    pub fn browser(&self) -> &Arc<B> {
        &self.browser
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn events(&self) -> Arc<EventBus<SyncEvent>> {
        Arc::clone(&self.events)
    }

    pub fn phase(&self) -> Phase {
        self.control().phase
    }

    pub fn is_syncing(&self) -> bool {
        self.phase() == Phase::Syncing
    }

    /// Snapshot of the in-memory sync state.
    pub fn state(&self) -> LocalState {
        self.control().state.clone()
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> Millis {
        self.clock.now_millis()
    }

    /// Run a merge cycle. Unless `force` is set, the remote round-trip is
    /// skipped when the local checksum still matches the last synced one.
    pub async fn sync(&self, force: bool) -> SyncOutcome {
        self.execute(Mode::Merge { force }, Trigger::Request).await
    }

    /// Overwrite the remote record with the local snapshot and tombstones.
    pub async fn force_push(&self) -> SyncOutcome {
        self.execute(Mode::ForcePush, Trigger::Request).await
    }

    /// Replace every local item with the remote's visible items.
    pub async fn force_pull(&self) -> SyncOutcome {
        self.execute(Mode::ForcePull, Trigger::Request).await
    }

    /// Feed browser change notifications into this orchestrator.
    pub fn listen(self: &Arc<Self>, changes: &Arc<EventBus<ChangeEvent>>) -> Subscription {
        let orchestrator = Arc::downgrade(self);
        changes.subscribe(move |event| {
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator.on_local_change(&event);
            }
        })
    }

    /// Record a browser change and schedule a debounced sync.
    ///
    /// Changes raised while the engine applies a pull are held until the
    /// apply ends. Removals become tombstones and are persisted immediately.
    pub fn on_local_change(self: &Arc<Self>, event: &ChangeEvent) {
        let mut control = self.control();
        if control.sync_driven {
            control.deferred.push(event.clone());
            return;
        }

        if self.record_change(&mut control, event) {
            self.save_in_background(control.state.clone(), "tombstones");
        } else {
            if let Some(handle) = control.persist.take() {
                handle.abort();
            }
            control.persist = Some(self.spawn_persist());
        }

        if control.phase == Phase::Syncing {
            debug!("Change during sync; queueing follow-up");
            control.pending = true;
            return;
        }

        if let Some(handle) = control.debounce.take() {
            handle.abort();
        }
        control.debounce = Some(self.spawn_debounced_sync());
    }

    /// Track a user edit. Returns whether tombstones were recorded.
    fn record_change(&self, control: &mut Control, event: &ChangeEvent) -> bool {
        control.state.modified_ids.insert(event.id().to_string());

        let ChangeEvent::Removed { urls, .. } = event else {
            return false;
        };
        let now = self.now();
        let deleted: Vec<Tombstone> = urls.iter().map(|url| Tombstone::new(url, now)).collect();
        control.state.tombstones = merge_tombstones(&control.state.tombstones, &deleted);
        debug!("Recorded {} tombstones for removed node {}", deleted.len(), event.id());
        true
    }

    fn save_in_background(&self, snapshot: LocalState, what: &'static str) {
        let store = Arc::clone(&self.store);
        self.runtime.spawn(async move {
            if let Err(e) = store.save(&snapshot).await {
                warn!("Failed to persist {}: {}", what, e);
            }
        });
    }

    fn spawn_debounced_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        let delay = self.config.debounce();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator.execute(Mode::Merge { force: false }, Trigger::Timer).await;
            }
        })
    }

    fn spawn_persist(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        let delay = self.config.persist_debounce();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(orchestrator) = orchestrator.upgrade() {
                let snapshot = orchestrator.state();
                if let Err(e) = orchestrator.store.save(&snapshot).await {
                    warn!("Failed to persist modified ids: {}", e);
                }
            }
        })
    }

    /// Enter `Syncing`. When busy, a timer-driven request queues a follow-up
    /// instead of being dropped.
    ///
    /// A pending debounce timer is cancelled, except when it is the caller:
    /// aborting the running task would cancel this very cycle.
    fn begin(&self, trigger: Trigger) -> bool {
        let mut control = self.control();
        if control.phase == Phase::Syncing {
            if trigger == Trigger::Timer {
                control.pending = true;
            }
            return false;
        }
        control.phase = Phase::Syncing;
        let timer = control.debounce.take();
        if let (Some(handle), Trigger::Request) = (timer, trigger) {
            handle.abort();
        }
        true
    }

    /// Leave a cycle. Returns whether a follow-up cycle is due, in which case
    /// the replica stays `Syncing`.
    async fn finish(&self, outcome: &SyncOutcome) -> bool {
        let (follow_up, unsaved) = {
            let mut control = self.control();
            control.sync_driven = false;
            if let Some(handle) = control.persist.take() {
                handle.abort();
            }
            let follow_up = std::mem::take(&mut control.pending);
            if !follow_up {
                control.phase = Phase::Idle;
            }
            let unsaved = (!outcome.is_success()).then(|| control.state.clone());
            (follow_up, unsaved)
        };

        if let Some(state) = unsaved {
            if let Err(e) = self.store.save(&state).await {
                warn!("Failed to persist sync state: {}", e);
            }
        }
        follow_up
    }

    async fn execute(&self, mut mode: Mode, trigger: Trigger) -> SyncOutcome {
        if !self.begin(trigger) {
            info!("Sync already in progress");
            return SyncOutcome::AlreadyInProgress;
        }

        loop {
            let outcome = match mode {
                Mode::Merge { force } => self.run_merge(force).await,
                Mode::ForcePush => self.run_force_push().await,
                Mode::ForcePull => self.run_force_pull().await,
            };
            if !self.finish(&outcome).await {
                return outcome;
            }
            debug!("Running follow-up sync");
            mode = Mode::Merge { force: false };
        }
    }

    async fn read_local(&self) -> Result<(TreeNode, Vec<Item>), SyncOutcome> {
        match self.browser.get_tree().await {
            Ok(tree) => {
                let items = flatten(&tree);
                Ok((tree, items))
            }
            Err(e) => Err(self.failed(format!("Failed to read bookmark tree: {e}"))),
        }
    }

    async fn run_merge(&self, force: bool) -> SyncOutcome {
        let started = self.now();
        self.events.emit(SyncEvent::SyncStarted {
            force,
            timestamp: started,
        });

        let (tree, local) = match self.read_local().await {
            Ok(read) => read,
            Err(outcome) => return outcome,
        };
        let local_checksum = checksum(&local);
        let (last_checksum, touched, start_tombstones) = {
            let control = self.control();
            (
                control.state.last_checksum.clone(),
                control.state.modified_ids.clone(),
                control.state.tombstones.clone(),
            )
        };

        if !force && last_checksum.as_deref() == Some(local_checksum.as_str()) {
            debug!("Local checksum unchanged; skipping sync");
            // Every tracked edit is already reflected in the last push.
            let cleared = {
                let mut control = self.control();
                let before = control.state.modified_ids.len();
                control.state.modified_ids.retain(|id| !touched.contains(id));
                (control.state.modified_ids.len() != before).then(|| control.state.clone())
            };
            if let Some(state) = cleared {
                if let Err(e) = self.store.save(&state).await {
                    warn!("Failed to persist sync state: {}", e);
                }
            }
            self.events.emit(SyncEvent::SyncSkipped {
                checksum: local_checksum,
                timestamp: self.now(),
            });
            return SyncOutcome::UpToDate;
        }

        let remote = match self.remote.fetch().await {
            Ok(remote) => remote,
            Err(e) => return self.remote_failed("fetch", e),
        };

        let plan = reconcile::plan(
            &local,
            &remote,
            &start_tombstones,
            &touched,
            started,
            self.config.tombstone_retention(),
        );
        debug!(
            "Planned {} creates, {} updates, {} deletes",
            plan.stats.created, plan.stats.updated, plan.stats.deleted
        );

        if let Err(e) = self.apply_ops(&tree, &plan.ops).await {
            return self.failed(format!("Failed to apply remote changes: {e}"));
        }

        let (_, items) = match self.read_local().await {
            Ok(read) => read,
            Err(outcome) => return outcome,
        };
        let request = PushRequest {
            items: items.iter().map(Item::without_local_id).collect(),
            tombstones: merge_tombstones(
                &plan.tombstones,
                &recorded_since(&self.control().state, &start_tombstones),
            ),
        };
        let receipt = match self.remote.push(request).await {
            Ok(receipt) => receipt,
            Err(e) => return self.remote_failed("push", e),
        };

        let report = SyncReport {
            created: plan.stats.created,
            updated: plan.stats.updated,
            deleted: plan.stats.deleted,
            pushed_added: receipt.added,
            pushed_updated: receipt.updated,
            checksum: checksum(&items),
        };
        self.commit(&report.checksum, &touched, &start_tombstones, plan.tombstones)
            .await;
        self.completed(report)
    }

    async fn run_force_push(&self) -> SyncOutcome {
        self.events.emit(SyncEvent::SyncStarted {
            force: true,
            timestamp: self.now(),
        });

        let (_, items) = match self.read_local().await {
            Ok(read) => read,
            Err(outcome) => return outcome,
        };
        let (touched, tombstones) = {
            let control = self.control();
            (
                control.state.modified_ids.clone(),
                control.state.tombstones.clone(),
            )
        };

        let request = PushRequest {
            items: items.iter().map(Item::without_local_id).collect(),
            tombstones: tombstones.clone(),
        };
        let receipt = match self.remote.replace(request).await {
            Ok(receipt) => receipt,
            Err(e) => return self.remote_failed("replace", e),
        };
        info!("Replaced remote record with {} local items", items.len());

        let report = SyncReport {
            pushed_added: receipt.added,
            pushed_updated: receipt.updated,
            checksum: checksum(&items),
            ..Default::default()
        };
        self.commit(&report.checksum, &touched, &tombstones, tombstones.clone())
            .await;
        self.completed(report)
    }

    /// Make the local tree mirror the remote's visible items.
    ///
    /// Matching local nodes are moved and retitled in place and missing ones
    /// created; local nodes with no remote counterpart are removed last, so
    /// a failure part way through never leaves less than was there before.
    async fn run_force_pull(&self) -> SyncOutcome {
        let started = self.now();
        self.events.emit(SyncEvent::SyncStarted {
            force: true,
            timestamp: started,
        });

        let remote = match self.remote.fetch().await {
            Ok(remote) => remote,
            Err(e) => return self.remote_failed("fetch", e),
        };
        let (tree, local) = match self.read_local().await {
            Ok(read) => read,
            Err(outcome) => return outcome,
        };
        let (touched, start_tombstones) = {
            let control = self.control();
            (
                control.state.modified_ids.clone(),
                control.state.tombstones.clone(),
            )
        };

        let plan = reconcile::plan(
            &local,
            &remote,
            &[],
            &BTreeSet::new(),
            started,
            self.config.tombstone_retention(),
        );
        let strays = stray_deletes(
            &visible_items(&local, &plan.tombstones),
            &visible_items(&remote.items, &plan.tombstones),
        );
        let deleted = plan.stats.deleted + strays.len();
        let mut ops = plan.ops;
        ops.extend(strays);

        if let Err(e) = self.apply_ops(&tree, &ops).await {
            return self.failed(format!("Failed to replace local bookmarks: {e}"));
        }

        let (_, items) = match self.read_local().await {
            Ok(read) => read,
            Err(outcome) => return outcome,
        };
        info!("Replaced local bookmarks with {} remote items", items.len());

        let report = SyncReport {
            created: plan.stats.created,
            updated: plan.stats.updated,
            deleted,
            checksum: checksum(&items),
            ..Default::default()
        };
        self.commit(&report.checksum, &touched, &start_tombstones, plan.tombstones)
            .await;
        self.completed(report)
    }

    /// Apply ops with the sync-driven flag raised, then record any change
    /// seen meanwhile that touched a node the ops did not.
    async fn apply_ops(&self, tree: &TreeNode, ops: &[LocalOp]) -> Result<(), BrowserError> {
        self.control().sync_driven = true;
        let mut applied = HashSet::new();
        let result = self.apply_ops_inner(tree, ops, &mut applied).await;

        let mut control = self.control();
        control.sync_driven = false;
        let deferred = std::mem::take(&mut control.deferred);
        let mut removed = false;
        for event in deferred.iter().filter(|event| !applied.contains(event.id())) {
            debug!("Change to {} arrived during apply; tracking it", event.id());
            removed |= self.record_change(&mut control, event);
            control.pending = true;
        }
        if removed {
            self.save_in_background(control.state.clone(), "tombstones");
        }
        result
    }

    async fn apply_ops_inner(
        &self,
        tree: &TreeNode,
        ops: &[LocalOp],
        applied: &mut HashSet<String>,
    ) -> Result<(), BrowserError> {
        let mut folders = FolderIndex::build(tree);
        // Set once a subtree has been removed; the index may name dead folders.
        let mut stale = false;

        for op in ops {
            if stale && !matches!(op, LocalOp::Delete { .. }) {
                folders = FolderIndex::build(&self.browser.get_tree().await?);
                stale = false;
            }
            match op {
                LocalOp::Delete { id, url } => {
                    applied.insert(id.clone());
                    match self.browser.remove_tree(id).await {
                        Ok(()) => {
                            debug!("Removed {} ({:?})", id, url);
                            stale = true;
                        }
                        Err(BrowserError::NotFound(_)) => debug!("Node {} already gone", id),
                        Err(e) => return Err(e),
                    }
                }
                LocalOp::Create { item } => {
                    let path = normalize_path(item.folder_path());
                    if item.is_folder() {
                        let own_path = join_path(&path, item.title());
                        if folders.paths.contains_key(&own_path) {
                            continue;
                        }
                        let parent_id = self.ensure_folder(&mut folders, &path, applied).await?;
                        let node = self
                            .browser
                            .create(CreateDetails {
                                parent_id,
                                title: item.title().to_string(),
                                url: None,
                                index: Some(item.index()),
                            })
                            .await?;
                        applied.insert(node.id.clone());
                        folders.paths.insert(own_path, node.id);
                    } else {
                        let parent_id = self.ensure_folder(&mut folders, &path, applied).await?;
                        let node = self
                            .browser
                            .create(CreateDetails {
                                parent_id,
                                title: item.title().to_string(),
                                url: item.url().map(str::to_string),
                                index: Some(item.index()),
                            })
                            .await?;
                        applied.insert(node.id);
                    }
                }
                LocalOp::Update {
                    id,
                    title,
                    placement,
                } => {
                    applied.insert(id.clone());
                    let updated = self
                        .update_node(&mut folders, id, title.as_deref(), placement.as_ref(), applied)
                        .await;
                    match updated {
                        Err(BrowserError::NotFound(_)) => debug!("Node {} vanished before update", id),
                        other => other?,
                    }
                }
            }
        }
        Ok(())
    }

    async fn update_node(
        &self,
        folders: &mut FolderIndex,
        id: &str,
        title: Option<&str>,
        placement: Option<&Placement>,
        applied: &mut HashSet<String>,
    ) -> Result<(), BrowserError> {
        if let Some(title) = title {
            self.browser.update(id, title).await?;
        }
        if let Some(placement) = placement {
            let parent_id = self
                .ensure_folder(folders, &placement.folder_path, applied)
                .await?;
            self.browser
                .move_node(id, &parent_id, Some(placement.index))
                .await?;
        }
        Ok(())
    }

    /// Node id of the folder at `path`, creating missing segments. Paths under
    /// an unknown root land in the "other" container.
    async fn ensure_folder(
        &self,
        folders: &mut FolderIndex,
        path: &str,
        applied: &mut HashSet<String>,
    ) -> Result<String, BrowserError> {
        if let Some(id) = folders.paths.get(path) {
            return Ok(id.clone());
        }

        let root = root_segment(path);
        let mut parent_id = match folders.paths.get(root).or(folders.fallback.as_ref()) {
            Some(id) => id.clone(),
            None => {
                return Err(BrowserError::InvalidOperation(
                    "bookmark tree has no root containers".into(),
                ));
            }
        };
        if !folders.paths.contains_key(root) {
            debug!("Unknown root {:?}; placing under fallback container", root);
        }

        let mut current = root.to_string();
        for segment in path.split('/').skip(1) {
            current = join_path(&current, segment);
            if let Some(id) = folders.paths.get(&current) {
                parent_id = id.clone();
                continue;
            }
            let node = self
                .browser
                .create(CreateDetails {
                    parent_id,
                    title: segment.to_string(),
                    url: None,
                    index: None,
                })
                .await?;
            applied.insert(node.id.clone());
            folders.paths.insert(current.clone(), node.id.clone());
            parent_id = node.id;
        }
        Ok(parent_id)
    }

    /// Persist a successful cycle. Ids and tombstones recorded after the cycle
    /// started are kept for the next one.
    async fn commit(
        &self,
        checksum: &str,
        consumed_ids: &BTreeSet<String>,
        start_tombstones: &[Tombstone],
        tombstones: Vec<Tombstone>,
    ) {
        let now = self.now();
        let snapshot = {
            let mut control = self.control();
            let state = &mut control.state;
            let recorded = recorded_since(state, start_tombstones);
            state.last_checksum = Some(checksum.to_string());
            state.last_sync_at = Some(now);
            state.modified_ids.retain(|id| !consumed_ids.contains(id));
            state.tombstones = prune_expired(
                &merge_tombstones(&tombstones, &recorded),
                now,
                self.config.tombstone_retention(),
            );
            state.clone()
        };
        if let Err(e) = self.store.save(&snapshot).await {
            warn!("Failed to persist sync state: {}", e);
        }
    }

    fn completed(&self, report: SyncReport) -> SyncOutcome {
        info!(
            "Sync complete: {} created, {} updated, {} deleted locally; {} added, {} updated remotely",
            report.created, report.updated, report.deleted, report.pushed_added, report.pushed_updated
        );
        self.events.emit(SyncEvent::SyncCompleted {
            created: report.created,
            updated: report.updated,
            deleted: report.deleted,
            checksum: report.checksum.clone(),
            timestamp: self.now(),
        });
        SyncOutcome::Synced(report)
    }

    fn failed(&self, message: String) -> SyncOutcome {
        warn!("{}", message);
        self.events.emit(SyncEvent::SyncFailed {
            message: message.clone(),
            timestamp: self.now(),
        });
        SyncOutcome::Failed { message }
    }

    fn remote_failed(&self, stage: &str, err: RemoteError) -> SyncOutcome {
        match err {
            RemoteError::Unauthorized(message) => {
                warn!("Remote {} requires re-authentication: {}", stage, message);
                self.events.emit(SyncEvent::AuthRequired {
                    message: message.clone(),
                    timestamp: self.now(),
                });
                SyncOutcome::AuthRequired { message }
            }
            other => self.failed(format!("Remote {stage} failed: {other}")),
        }
    }
}
