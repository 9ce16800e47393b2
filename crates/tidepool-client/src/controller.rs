//! Controllers: request/response plumbing and the model-tracking lifecycle
//!
//! [`BaseController`] owns one connection and provides correlated
//! request/response semantics on top of it. [`ModelController`] layers the
//! full lifecycle on top: identify the peer, load the object inventory,
//! register for change tracking and keep an [`ObjectModel`] current from
//! notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info};

use tidepool_core::message::{self, commands, notifications, ObjectChanges, ObjectRequest};
use tidepool_core::model;
use tidepool_core::{DeviceObject, Envelope, ObjectModel, ObjectParams, Request, SystemInfo};
use tidepool_transport::{
    ConnectionHandle, EventReceiver, LineConnection, TransportConfig, TransportEvent,
};

use crate::error::{ClientError, Result};
use crate::pending::PendingTable;
use crate::sink::EventSink;

/// How many objects go into one change-tracking registration request;
/// larger batches make the peer drop the connection.
const SUBSCRIPTION_BATCH_SIZE: usize = 30;

/// Attributes requested when identifying the peer
const IDENTIFY_KEYS: [&str; 4] = ["SNAME", "VER", "PROPNAME", "MODE"];

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// TCP port the peer listens on
    pub port: u16,
    pub transport: TransportConfig,
    /// How long a caller waits for a correlated reply
    pub request_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: tidepool_core::DEFAULT_PORT,
            transport: TransportConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Correlated request/response access to one peer
pub struct BaseController {
    host: String,
    config: ControllerConfig,
    handle: Arc<RwLock<Option<ConnectionHandle>>>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    /// Bumped on every connect and abort; lets a connection's dispatch
    /// task tell whether it has been superseded
    generation: Arc<AtomicU64>,
    system_info: Arc<RwLock<Option<SystemInfo>>>,
}

impl BaseController {
    pub fn new(host: impl Into<String>, config: ControllerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            handle: Arc::new(RwLock::new(None)),
            pending: Arc::new(PendingTable::new()),
            next_id: AtomicU64::new(1),
            generation: Arc::new(AtomicU64::new(0)),
            system_info: Arc::new(RwLock::new(None)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_connected(&self) -> bool {
        self.handle
            .read()
            .as_ref()
            .map_or(false, ConnectionHandle::is_connected)
    }

    /// Identity reported by the peer, once [`identify`](Self::identify) ran
    pub fn system_info(&self) -> Option<SystemInfo> {
        self.system_info.read().clone()
    }

    /// Open the connection and reset the per-connection message counter
    pub(crate) async fn connect(&self) -> Result<EventReceiver> {
        let addr = format!("{}:{}", self.host, self.config.port);
        let (handle, events) =
            LineConnection::connect(&addr, self.config.transport.clone()).await?;
        self.next_id.store(1, Ordering::SeqCst);
        // supersede any lingering dispatch task before the handle is visible
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.handle.write() = Some(handle);
        Ok(events)
    }

    fn next_message_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn current_handle(&self) -> Result<ConnectionHandle> {
        self.handle.read().clone().ok_or(ClientError::Disconnected)
    }

    /// Send a command and wait for its reply
    pub async fn request(
        &self,
        command: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Envelope> {
        let handle = self.current_handle()?;
        let id = self.next_message_id();
        let mut request = Request::new(&id, command);
        if let Some(params) = params {
            request = request.with_params(params);
        }
        let line = request.to_line().map_err(ClientError::Protocol)?;

        let rx = self.pending.register_waiting(&id);
        if let Err(err) = handle.send(line).await {
            self.pending.remove(&id);
            return Err(err.into());
        }

        match time::timeout(self.config.request_timeout, rx).await {
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::Timeout)
            }
            // the dispatch task dropped the sender: connection went away
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Ok(Ok(result)) => result,
        }
    }

    /// Send a command without waiting; the eventual reply is dropped
    pub async fn send(&self, command: &str, params: Option<Map<String, Value>>) -> Result<()> {
        let handle = self.current_handle()?;
        let id = self.next_message_id();
        let mut request = Request::new(&id, command);
        if let Some(params) = params {
            request = request.with_params(params);
        }
        let line = request.to_line().map_err(ClientError::Protocol)?;

        self.pending.register_fire_and_forget(&id);
        if let Err(err) = handle.send(line).await {
            self.pending.remove(&id);
            return Err(err.into());
        }
        Ok(())
    }

    /// Write attribute values on one object. With `wait` the reply is
    /// returned; otherwise the write is fire-and-forget.
    pub async fn request_changes(
        &self,
        objnam: &str,
        changes: &HashMap<String, String>,
        wait: bool,
    ) -> Result<Option<Envelope>> {
        let params = message::write_params(objnam, changes);
        if wait {
            Ok(Some(self.request(commands::SET_PARAM_LIST, Some(params)).await?))
        } else {
            self.send(commands::SET_PARAM_LIST, Some(params)).await?;
            Ok(None)
        }
    }

    /// Ask the peer who it is and remember the answer
    pub async fn identify(&self) -> Result<SystemInfo> {
        let params = message::param_list_query(
            "OBJTYP=SYSTEM",
            &[ObjectRequest::new("INCR", IDENTIFY_KEYS)],
        );
        let reply = self.request(commands::GET_PARAM_LIST, Some(params)).await?;
        let objects: Vec<ObjectParams> = reply.decode_object_list();
        let first = objects
            .into_iter()
            .next()
            .ok_or(ClientError::UnexpectedResponse("no SYSTEM object in reply"))?;
        let info = SystemInfo::from_params(&first.params)?;
        *self.system_info.write() = Some(info.clone());
        Ok(info)
    }

    /// Fetch the full object inventory. `keys` defaults to the known
    /// attribute catalog; self-valued attributes are pruned from the result.
    pub async fn get_all_objects(&self, keys: Option<&[&str]>) -> Result<Vec<ObjectParams>> {
        let keys = keys.unwrap_or(tidepool_core::attributes::ALL_KNOWN_ATTRIBUTES);
        let params = message::param_list_query(
            "",
            &[ObjectRequest::new("INCR", keys.iter().copied())],
        );
        let reply = self.request(commands::GET_PARAM_LIST, Some(params)).await?;
        let mut objects: Vec<ObjectParams> = reply.decode_object_list();
        for object in &mut objects {
            object.params = model::prune(std::mem::take(&mut object.params));
        }
        Ok(objects)
    }

    /// Run a named query and return its `answer` payload
    pub async fn get_query(&self, query_name: &str, arguments: &str) -> Result<Value> {
        let params = message::query_params(query_name, arguments);
        let reply = self.request(commands::GET_QUERY, Some(params)).await?;
        reply
            .answer
            .ok_or(ClientError::UnexpectedResponse("query reply without answer"))
    }

    pub async fn get_circuit_names(&self) -> Result<Value> {
        self.get_query("GetCircuitNames", "").await
    }

    /// Circuit type codes mapped to their human-readable names
    pub async fn get_circuit_types(&self) -> Result<HashMap<String, String>> {
        #[derive(Deserialize)]
        struct CircuitType {
            #[serde(rename = "systemValue")]
            system_value: String,
            #[serde(rename = "readableValue")]
            readable_value: String,
        }

        let answer = self.get_query("GetCircuitTypes", "").await?;
        let entries: Vec<CircuitType> =
            serde_json::from_value(answer).map_err(tidepool_core::Error::from)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.system_value, entry.readable_value))
            .collect())
    }

    pub async fn get_hardware_definition(&self) -> Result<Value> {
        Ok(model::prune_value(
            self.get_query("GetHardwareDefinition", "").await?,
        ))
    }

    pub async fn get_configuration(&self) -> Result<Value> {
        self.get_query("GetConfiguration", "").await
    }

    /// Fail every waiter and drop the connection
    pub fn stop(&self) {
        self.pending.fail_all();
        if let Some(handle) = self.handle.write().take() {
            handle.close();
        }
    }

    /// Tear down a connection whose start sequence failed. The generation
    /// bump makes the connection's dispatch task exit without firing
    /// lifecycle hooks or clearing state owned by a later attempt.
    pub(crate) fn abort_connection(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop();
    }
}

/// Lifecycle operations shared by every controller flavor, as seen by a
/// [`ConnectionSupervisor`](crate::supervisor::ConnectionSupervisor)
#[async_trait]
pub trait Controller: Send + Sync {
    /// Bring the controller fully up; on error the caller may retry
    async fn start(&self) -> Result<()>;

    /// Tear the connection down and fail in-flight requests
    fn stop(&self);

    fn host(&self) -> &str;

    /// Channel signaled with the close reason each time an established
    /// connection is lost. Yields the receiving half once; later calls
    /// return `None`.
    fn take_connection_lost(&self) -> Option<mpsc::Receiver<Option<String>>>;
}

/// Controller keeping an [`ObjectModel`] synchronized with the peer
pub struct ModelController {
    base: BaseController,
    model: Arc<RwLock<ObjectModel>>,
    sink: Arc<dyn EventSink>,
    lost_tx: mpsc::Sender<Option<String>>,
    lost_rx: Mutex<Option<mpsc::Receiver<Option<String>>>>,
}

impl ModelController {
    pub fn new(
        host: impl Into<String>,
        model: ObjectModel,
        sink: Arc<dyn EventSink>,
        config: ControllerConfig,
    ) -> Self {
        let (lost_tx, lost_rx) = mpsc::channel(4);
        Self {
            base: BaseController::new(host, config),
            model: Arc::new(RwLock::new(model)),
            sink,
            lost_tx,
            lost_rx: Mutex::new(Some(lost_rx)),
        }
    }

    pub fn base(&self) -> &BaseController {
        &self.base
    }

    /// Read access to the tracked object model
    pub fn model(&self) -> RwLockReadGuard<'_, ObjectModel> {
        self.model.read()
    }

    pub fn system_info(&self) -> Option<SystemInfo> {
        self.base.system_info()
    }

    pub fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    pub async fn request_changes(
        &self,
        objnam: &str,
        changes: &HashMap<String, String>,
        wait: bool,
    ) -> Result<Option<Envelope>> {
        self.base.request_changes(objnam, changes, wait).await
    }

    async fn start_inner(&self) -> Result<()> {
        let events = self.base.connect().await?;
        let ctx = DispatchCtx {
            generation: self.base.generation.load(Ordering::SeqCst),
            latest_generation: self.base.generation.clone(),
            pending: self.base.pending.clone(),
            handle: self.base.handle.clone(),
            model: self.model.clone(),
            sink: self.sink.clone(),
            lost_tx: self.lost_tx.clone(),
        };
        tokio::spawn(run_dispatch(events, ctx));

        // a failed handshake must not leave the connection behind to
        // sabotage the next attempt
        if let Err(err) = self.bring_up().await {
            self.base.abort_connection();
            return Err(err);
        }
        Ok(())
    }

    async fn bring_up(&self) -> Result<()> {
        let info = self.base.identify().await?;
        info!(
            "connected to {} (version {})",
            info.prop_name(),
            info.sw_version()
        );

        let objects = self.base.get_all_objects(None).await?;
        ingest_config(&self.model, objects);
        info!("model now contains {} objects", self.model.read().len());

        if let Err(err) = self.register_tracking().await {
            // tracking is best effort; the connection stays usable
            error!("failed to register attribute tracking: {err}");
        }
        Ok(())
    }

    /// Register the tracked attributes of every admitted object, in
    /// batches. Each reply carries the current values, which are applied
    /// like any other update.
    async fn register_tracking(&self) -> Result<()> {
        let batches = {
            let model = self.model.read();
            let mut batches = Vec::new();
            let mut batch = Vec::new();
            for object in model.iter() {
                let keys = model.tracked_attributes(object);
                if keys.is_empty() {
                    continue;
                }
                batch.push(ObjectRequest::new(object.objnam(), keys));
                if batch.len() >= SUBSCRIPTION_BATCH_SIZE {
                    batches.push(std::mem::take(&mut batch));
                }
            }
            if !batch.is_empty() {
                batches.push(batch);
            }
            batches
        };

        for batch in batches {
            let reply = self
                .base
                .request(
                    commands::REQUEST_PARAM_LIST,
                    Some(message::subscription_query(&batch)),
                )
                .await?;
            let updates: Vec<ObjectParams> = reply.decode_object_list();
            let changed = apply_updates(&self.model, &updates);
            if !changed.is_empty() {
                self.sink.updated(changed).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for ModelController {
    async fn start(&self) -> Result<()> {
        self.start_inner().await
    }

    fn stop(&self) {
        self.base.stop();
    }

    fn host(&self) -> &str {
        self.base.host()
    }

    fn take_connection_lost(&self) -> Option<mpsc::Receiver<Option<String>>> {
        self.lost_rx.lock().take()
    }
}

/// Everything the dispatch task needs, detached from the controller so the
/// task owns its context outright
struct DispatchCtx {
    /// Generation of the connection this task serves
    generation: u64,
    /// Latest generation opened by the controller
    latest_generation: Arc<AtomicU64>,
    pending: Arc<PendingTable>,
    handle: Arc<RwLock<Option<ConnectionHandle>>>,
    model: Arc<RwLock<ObjectModel>>,
    sink: Arc<dyn EventSink>,
    lost_tx: mpsc::Sender<Option<String>>,
}

impl DispatchCtx {
    /// True once a newer connection (or an abort) superseded this one
    fn is_stale(&self) -> bool {
        self.latest_generation.load(Ordering::SeqCst) != self.generation
    }
}

async fn run_dispatch(mut events: EventReceiver, ctx: DispatchCtx) {
    while let Some(event) = events.recv().await {
        if ctx.is_stale() {
            debug!("connection superseded, dispatch task exiting");
            break;
        }
        match event {
            TransportEvent::Connected => debug!("connection established"),
            TransportEvent::Message(envelope) => {
                if let Some(notification) = ctx.pending.resolve(envelope) {
                    process_notification(&ctx, notification).await;
                }
            }
            TransportEvent::Disconnected { reason } => {
                ctx.pending.fail_all();
                *ctx.handle.write() = None;
                ctx.sink.disconnected(reason.clone()).await;
                let _ = ctx.lost_tx.send(reason).await;
                break;
            }
        }
    }
}

async fn process_notification(ctx: &DispatchCtx, envelope: Envelope) {
    debug!("received {} notification", envelope.command);
    match envelope.command.as_str() {
        notifications::NOTIFY_LIST => {
            let updates: Vec<ObjectParams> = envelope.decode_object_list();
            deliver_updates(ctx, &updates).await;
        }
        notifications::WRITE_PARAM_LIST => {
            // applied values are nested inside the first objectList entry
            let entries: Vec<ObjectChanges> = envelope.decode_object_list();
            if let Some(entry) = entries.into_iter().next() {
                deliver_updates(ctx, &entry.changes).await;
            }
        }
        notifications::SEND_QUERY => {
            ctx.sink
                .query_result(
                    envelope.query_name.clone().unwrap_or_default(),
                    envelope.answer.clone(),
                )
                .await;
        }
        notifications::SEND_PARAM_LIST => {
            // the peer resends its configuration after internal changes
            ingest_config(&ctx.model, envelope.decode_object_list());
        }
        other => debug!("ignoring notification {other}"),
    }
}

async fn deliver_updates(ctx: &DispatchCtx, updates: &[ObjectParams]) {
    let changed = apply_updates(&ctx.model, updates);
    debug!("{} of {} objects updated", changed.len(), updates.len());
    if !changed.is_empty() {
        ctx.sink.updated(changed).await;
    }
}

/// Merge updates into the model, returning snapshots of the objects that
/// actually changed
fn apply_updates(model: &RwLock<ObjectModel>, updates: &[ObjectParams]) -> Vec<DeviceObject> {
    let mut model = model.write();
    let changed = model.apply_updates(updates);
    changed
        .iter()
        .filter_map(|objnam| model.get(objnam).cloned())
        .collect()
}

fn ingest_config(model: &RwLock<ObjectModel>, objects: Vec<ObjectParams>) {
    let mut model = model.write();
    for ObjectParams { objnam, params } in objects {
        if let Err(err) = model.add_object(&objnam, params) {
            error!("problem creating object {objnam}: {err}");
        }
    }
}
