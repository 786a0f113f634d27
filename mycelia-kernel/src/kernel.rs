//! The trusted mediator (§4.5): identity bootstrap, `send_protected`,
//! channel fan-out, one-shot reply settlement, subsystem lifecycle and
//! the reserved `kernel://` command/event surface.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use mycelia_acl::RwsStore;
use mycelia_core::{
    CapabilityContext, CapabilityRegistry, CreatePrincipalOptions, KernelConfig, Message, MessageId,
    MessageType, Pkr, PrincipalKind, PrincipalRegistry, ProfileStore,
};
use mycelia_router::{Handler, HandlerOutcome, RouteMetadata, Router};
use mycelia_scheduler::{AcceptOptions, GlobalScheduler, Processor, QueueEntry, TimeSlice};

use crate::channel::{ChannelManager, ChannelRecord};
use crate::error::KernelError;
use crate::error_store::ErrorManager;
use crate::registry::{SubsystemHandle, SubsystemOptions, SubsystemRegistry, SubsystemState};
use crate::response::{ReplyOutcome, ResponseManager};

/// The kernel's five kernel-authority children (§4.5 Bootstrap): they
/// share the kernel's private key (`is_kernel` is true for all of
/// them) but carry distinguishable `PrincipalKind::Child` PKRs.
pub struct KernelChildren {
    pub access_control: Pkr,
    pub error_manager: Pkr,
    pub response_manager: Pkr,
    pub channel_manager: Pkr,
    pub profile_registry: Pkr,
}

impl KernelChildren {
    fn bootstrap(registry: &PrincipalRegistry, kernel_pkr: &Pkr) -> Self {
        let child = || {
            registry.create_principal(
                PrincipalKind::Child,
                CreatePrincipalOptions {
                    owner: Some(kernel_pkr.public_key),
                    metadata: None,
                },
            )
        };
        KernelChildren {
            access_control: child(),
            error_manager: child(),
            response_manager: child(),
            channel_manager: child(),
            profile_registry: child(),
        }
    }
}

/// What the caller's declared one-shot request looks like. `timeout`
/// left `None` falls back to [`KernelConfig::default_response_timeout`].
#[derive(Clone, Default)]
pub struct ResponseRequirement {
    pub reply_channel: String,
    pub timeout: Option<Duration>,
}

/// Options accepted by [`Kernel::send_protected`].
#[derive(Clone, Default)]
pub struct SendOptions {
    pub response_required: Option<ResponseRequirement>,
}

/// The outcome of a `send_protected` call. Which variant comes back
/// depends on the message's dispatch mode (§4.5 step 5-6).
pub enum SendOutcome {
    /// `processImmediately`/synchronous dispatch: the handler already
    /// ran and this is its result.
    Processed(HandlerOutcome),
    /// Queued for the subsystem's scheduler; no immediate result.
    Enqueued,
    /// A one-shot request was registered; await this to get the
    /// eventual [`ReplyOutcome`].
    Awaiting(oneshot::Receiver<ReplyOutcome>),
    /// The destination was a channel route: one outcome per
    /// participant subsystem, in participant order.
    FannedOut(Vec<Result<Option<HandlerOutcome>, KernelError>>),
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// The trusted mediator. Owns the principal registry, the two
/// permission-store layers, every registered subsystem, the global
/// scheduler, and the four kernel-authority managers (response,
/// channel, error, and the profile registry which is simply
/// `ProfileStore` wearing a child PKR).
pub struct Kernel {
    pub config: KernelConfig,
    principals: Arc<PrincipalRegistry>,
    profiles: Arc<ProfileStore>,
    rws: Arc<RwsStore>,
    subsystems: SubsystemRegistry,
    global_scheduler: Arc<GlobalScheduler>,
    response_manager: Arc<ResponseManager>,
    channel_manager: Arc<ChannelManager>,
    error_manager: Arc<ErrorManager>,
    kernel_pkr: Pkr,
    children: KernelChildren,
    events: broadcast::Sender<Message>,
}

impl Kernel {
    /// Bootstraps a fresh kernel using environment-derived
    /// configuration (§9 ambient config layer).
    pub fn bootstrap() -> Arc<Self> {
        Self::bootstrap_with_config(KernelConfig::from_env())
    }

    /// Bootstraps a fresh kernel with an explicit configuration.
    /// Creates the kernel principal, its five authority-sharing
    /// children, and the default (fifo) global scheduler, then hands
    /// control back for `register_subsystem` calls (§4.5 Bootstrap
    /// steps 1-4; route registration happens per-subsystem, not here,
    /// since "subsystem-registered" is the event step 4 refers to).
    pub fn bootstrap_with_config(config: KernelConfig) -> Arc<Self> {
        let (principal_registry, kernel_pkr) = PrincipalRegistry::new();
        let principals = Arc::new(principal_registry);
        let profiles = Arc::new(ProfileStore::new());
        let rws = Arc::new(RwsStore::new(Arc::clone(&principals)));
        let children = KernelChildren::bootstrap(&principals, &kernel_pkr);
        let error_capacity = config.error_store_capacity;
        let time_slice = TimeSlice {
            duration: config.time_slice,
            message_cap: config.time_slice_message_cap,
        };
        let (events, _) = broadcast::channel(256);

        info!("mycelia kernel bootstrapped");
        Arc::new(Kernel {
            config,
            principals,
            profiles,
            rws,
            subsystems: SubsystemRegistry::new(),
            global_scheduler: GlobalScheduler::new(time_slice),
            response_manager: ResponseManager::new(),
            channel_manager: Arc::new(ChannelManager::new()),
            error_manager: Arc::new(ErrorManager::new(error_capacity)),
            kernel_pkr,
            children,
            events,
        })
    }

    pub fn kernel_pkr(&self) -> &Pkr {
        &self.kernel_pkr
    }

    pub fn children(&self) -> &KernelChildren {
        &self.children
    }

    pub fn principals(&self) -> &Arc<PrincipalRegistry> {
        &self.principals
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn rws(&self) -> &Arc<RwsStore> {
        &self.rws
    }

    pub fn errors(&self) -> &Arc<ErrorManager> {
        &self.error_manager
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channel_manager
    }

    pub fn global_scheduler(&self) -> &Arc<GlobalScheduler> {
        &self.global_scheduler
    }

    /// Starts the global scheduler's cooperative tick loop.
    pub fn start(self: &Arc<Self>) {
        self.global_scheduler.start();
    }

    /// Stops the global scheduler and awaits its shutdown.
    pub async fn stop(&self) {
        self.global_scheduler.stop().await;
    }

    /// Subscribes to kernel-reserved lifecycle events
    /// (`kernel://event/subsystem-registered`,
    /// `kernel://event/subsystem-disposed`).
    pub fn subscribe_events(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    fn emit_event(&self, path: &str, body: serde_json::Value) {
        match Message::new(path, body) {
            Ok(message) => {
                let _ = self.events.send(message);
            }
            Err(err) => warn!(%err, path, "kernel: failed to construct reserved event message"),
        }
    }

    // ---- Principal Registry passthrough (§4.1) -----------------------

    pub fn create_principal(&self, kind: PrincipalKind, options: CreatePrincipalOptions) -> Pkr {
        self.principals.create_principal(kind, options)
    }

    pub fn is_kernel(&self, pkr: &Pkr) -> bool {
        self.principals.is_kernel(pkr)
    }

    // ---- Subsystem lifecycle (§4.5 state machine) ---------------------

    /// `Unregistered -> Built -> Registered`: allocates a top-level
    /// identity owned by the kernel, builds the subsystem's router,
    /// queue and scheduler, registers it with the global scheduler,
    /// and emits `kernel://event/subsystem-registered`.
    pub fn register_subsystem(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: SubsystemOptions,
    ) -> Result<Pkr, KernelError> {
        self.register_subsystem_with_capabilities_resolved(name, options, CapabilityContext::new())
    }

    /// Same as [`Kernel::register_subsystem`], but first resolves a
    /// declared capability dependency graph (the build plan: topological
    /// sort, cycle detection, in-order instantiation) and makes the
    /// result available through `SubsystemHandle::capability`. A cyclic
    /// or unsatisfiable graph is fatal to this subsystem's build only —
    /// the kernel process and its other subsystems are unaffected.
    pub async fn register_subsystem_with_capabilities(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: SubsystemOptions,
        capabilities: CapabilityRegistry,
    ) -> Result<Pkr, KernelError> {
        let context = capabilities.resolve().await?;
        self.register_subsystem_with_capabilities_resolved(name, options, context)
    }

    fn register_subsystem_with_capabilities_resolved(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: SubsystemOptions,
        capabilities: CapabilityContext,
    ) -> Result<Pkr, KernelError> {
        let name = name.into();
        SubsystemRegistry::validate_name(&name)?;

        let identity = self.principals.create_principal(
            PrincipalKind::TopLevel,
            CreatePrincipalOptions {
                owner: Some(self.kernel_pkr.public_key),
                metadata: options.metadata.clone(),
            },
        );
        let router = Router::new(
            Arc::clone(&self.profiles),
            Arc::clone(&self.principals),
            Arc::clone(&self.rws),
            self.config.router_cache_capacity,
        );
        let processor = self.build_processor(name.clone());
        let handle = SubsystemRegistry::build(
            name.clone(),
            identity.clone(),
            &self.config,
            &options,
            router,
            processor,
            capabilities,
        );
        self.subsystems.register(Arc::clone(&handle))?;
        self.global_scheduler
            .register_subsystem(name.clone(), Arc::clone(&handle.scheduler));

        self.emit_event(
            "kernel://event/subsystem-registered",
            serde_json::json!({
                "subsystem": name,
                "subsystemName": name,
                "options": {
                    "synchronous": options.synchronous,
                    "priority": options.priority,
                },
                "timestamp": now_millis(),
            }),
        );
        info!(subsystem = %name, "subsystem registered");
        Ok(identity)
    }

    pub fn get_subsystem(&self, name: &str) -> Option<Arc<SubsystemHandle>> {
        self.subsystems.get(name)
    }

    pub fn subsystem_names(&self) -> Vec<String> {
        self.subsystems.names()
    }

    /// `Registered -> Disposed`: stops the subsystem's scheduler,
    /// drains its queue under a bounded grace deadline (processing
    /// what it can, dropping the remainder per the spec's no-
    /// persistence non-goal), and removes it from the registry.
    pub async fn dispose_subsystem(self: &Arc<Self>, name: &str) -> Result<(), KernelError> {
        let handle = self
            .subsystems
            .remove(name)
            .ok_or_else(|| KernelError::UnknownSubsystem { name: name.to_string() })?;
        handle.scheduler.cancel();
        self.global_scheduler.unregister_subsystem(name);

        let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
        while let Some(entry) = handle.queue.dequeue() {
            if tokio::time::Instant::now() >= deadline {
                warn!(subsystem = name, "dispose: grace deadline exceeded, dropping remaining queue");
                break;
            }
            self.process_entry(name, entry).await;
        }
        handle.set_state(SubsystemState::Disposed);

        self.emit_event(
            "kernel://event/subsystem-disposed",
            serde_json::json!({ "subsystem": name, "timestamp": now_millis() }),
        );
        info!(subsystem = name, "subsystem disposed");
        Ok(())
    }

    /// Stops the global scheduler, disposes every live subsystem, and
    /// shuts down the response manager's sweep loop.
    pub async fn dispose(self: &Arc<Self>) {
        self.global_scheduler.stop().await;
        for name in self.subsystems.names() {
            let _ = self.dispose_subsystem(&name).await;
        }
        self.response_manager.shutdown();
    }

    // ---- Route registration on behalf of a subsystem -------------------

    pub async fn register_route(
        &self,
        subsystem: &str,
        pattern: impl Into<String>,
        handler: Handler,
        metadata: RouteMetadata,
    ) -> Result<(), KernelError> {
        let handle = self
            .subsystems
            .get(subsystem)
            .ok_or_else(|| KernelError::UnknownSubsystem { name: subsystem.to_string() })?;
        let mut router = handle.router.write().await;
        router.register_route(pattern, handler, metadata)?;
        Ok(())
    }

    // ---- Channels (§4.5 Channel manager) --------------------------------

    pub fn create_channel(
        &self,
        owner_subsystem: &str,
        local_name: &str,
        participants: Vec<Pkr>,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, KernelError> {
        self.channel_manager
            .create_channel(owner_subsystem, local_name, participants, metadata)
    }

    pub fn destroy_channel(&self, route: &str) -> Result<(), KernelError> {
        self.channel_manager.destroy_channel(route)
    }

    async fn route_channel(
        self: &Arc<Self>,
        caller: &Pkr,
        message: Message,
        channel: ChannelRecord,
    ) -> Result<SendOutcome, KernelError> {
        let dispatches = channel.participants.iter().filter_map(|participant| {
            let name = self.subsystems.find_name_by_identity(participant)?;
            let message = message.clone();
            let caller = caller.clone();
            let kernel_pkr = self.kernel_pkr.clone();
            Some(async move {
                self.route_and_record(&name, message, Some(caller), Some(kernel_pkr)).await
            })
        });
        // Participants are independent routes; nothing here depends on
        // delivery order, so fan out concurrently rather than one at a time.
        let results = futures_util::future::join_all(dispatches).await;
        Ok(SendOutcome::FannedOut(results))
    }

    // ---- The single secure entry point (§4.5 send_protected) ------------

    /// Performs, in order: (1) resolve the caller's authority, (2)
    /// settle any reply this message itself carries, (3) fan out to a
    /// channel if the path names one, (4) resolve the destination
    /// subsystem from the path's scheme, (5) register a one-shot reply
    /// binding if requested, (6) dispatch — synchronously if
    /// `processImmediately`/the subsystem is synchronous, otherwise by
    /// enqueueing onto the destination's bounded queue.
    pub async fn send_protected(
        self: &Arc<Self>,
        caller: &Pkr,
        message: Message,
        options: SendOptions,
    ) -> Result<SendOutcome, KernelError> {
        self.principals.resolve_pkr(caller)?;

        if message.meta.in_reply_to().is_some() {
            self.response_manager.deliver_response(message.clone())?;
            return Ok(SendOutcome::Enqueued);
        }

        if let Some(channel) = self.channel_manager.get(&message.path) {
            return self.route_channel(caller, message, channel).await;
        }

        let scheme = message.scheme().to_string();

        if scheme == "kernel" {
            return self.handle_kernel_message(caller, &message).await;
        }

        let handle = self
            .subsystems
            .get(&scheme)
            .ok_or_else(|| KernelError::UnknownDestination { scheme: scheme.clone() })?;

        let process_immediately = message.meta.process_immediately() || handle.synchronous;

        if process_immediately {
            let outcome = self
                .route_and_record(&scheme, message.clone(), Some(caller.clone()), Some(self.kernel_pkr.clone()))
                .await?;
            return match outcome {
                Some(outcome) => Ok(SendOutcome::Processed(outcome)),
                None => Err(KernelError::RouteNotFound { path: message.path.clone() }),
            };
        }

        let receiver = options.response_required.map(|requirement| {
            let timeout = requirement.timeout.unwrap_or(self.config.default_response_timeout);
            self.response_manager.register_reply(
                message.id,
                requirement.reply_channel,
                caller.clone(),
                timeout,
            )
        });

        let entry = QueueEntry {
            message: message.clone(),
            accept_options: AcceptOptions {
                caller_id: Some(caller.clone()),
                caller_id_set_by: Some(self.kernel_pkr.clone()),
                deadline: None,
            },
        };
        match handle.queue.enqueue(entry, &scheme) {
            Ok(()) => Ok(match receiver {
                Some(receiver) => SendOutcome::Awaiting(receiver),
                None => SendOutcome::Enqueued,
            }),
            Err(err) => {
                let err: KernelError = err.into();
                self.error_manager.add(&scheme, &err, Some(message.path.clone()));
                Err(err)
            }
        }
    }

    async fn handle_kernel_message(
        self: &Arc<Self>,
        _caller: &Pkr,
        message: &Message,
    ) -> Result<SendOutcome, KernelError> {
        match message.segments().as_slice() {
            ["command", "register-subsystem"] => {
                let name = message
                    .body
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| KernelError::InvalidPath {
                        detail: "kernel://command/register-subsystem requires body.name".into(),
                    })?;
                let options = SubsystemOptions {
                    synchronous: message.body.get("synchronous").and_then(|v| v.as_bool()).unwrap_or(false),
                    priority: message.body.get("priority").and_then(|v| v.as_i64()).unwrap_or(0),
                    ..Default::default()
                };
                let identity = self.register_subsystem(name, options)?;
                Ok(SendOutcome::Processed(HandlerOutcome::Success(serde_json::json!({
                    "uuid": identity.uuid.to_string(),
                }))))
            }
            ["command", "dispose-subsystem"] => {
                let name = message
                    .body
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| KernelError::InvalidPath {
                        detail: "kernel://command/dispose-subsystem requires body.name".into(),
                    })?;
                self.dispose_subsystem(name).await?;
                Ok(SendOutcome::Processed(HandlerOutcome::Success(serde_json::json!({
                    "disposed": name,
                }))))
            }
            _ => Err(KernelError::RouteNotFound { path: message.path.clone() }),
        }
    }

    async fn route_and_record(
        &self,
        scheme: &str,
        message: Message,
        caller_id: Option<Pkr>,
        caller_id_set_by: Option<Pkr>,
    ) -> Result<Option<HandlerOutcome>, KernelError> {
        let handle = self
            .subsystems
            .get(scheme)
            .ok_or_else(|| KernelError::UnknownDestination { scheme: scheme.to_string() })?;
        let router = handle.router.read().await;
        let result = router.route(message.clone(), caller_id, caller_id_set_by).await;
        drop(router);
        match result {
            Ok(outcome) => {
                if let Some(HandlerOutcome::Failure(ref detail)) = outcome {
                    self.error_manager.add(
                        scheme,
                        &KernelError::HandlerFailure { detail: detail.clone() },
                        Some(message.path.clone()),
                    );
                }
                Ok(outcome)
            }
            Err(router_err) => {
                let err: KernelError = router_err.into();
                self.error_manager.add(scheme, &err, Some(message.path.clone()));
                Err(err)
            }
        }
    }

    fn build_processor(self: &Arc<Self>, subsystem_name: String) -> Processor {
        let weak = Arc::downgrade(self);
        Arc::new(move |entry: QueueEntry| {
            let weak = weak.clone();
            let subsystem_name = subsystem_name.clone();
            Box::pin(async move {
                if let Some(kernel) = weak.upgrade() {
                    kernel.process_entry(&subsystem_name, entry).await;
                }
            })
        })
    }

    /// Drains one queued entry: routes it, then — only if a one-shot
    /// binding is still waiting on this message id — synthesizes a
    /// response message and settles it (§4.5 step 6). A handler may
    /// also settle the same binding itself via
    /// [`Kernel::get_reply_to`] + a manual `send_protected`; whichever
    /// happens first wins, the second is a silent no-op.
    async fn process_entry(&self, scheme: &str, entry: QueueEntry) {
        let QueueEntry { message, accept_options } = entry;
        let message_id = message.id;
        match self
            .route_and_record(scheme, message.clone(), accept_options.caller_id, accept_options.caller_id_set_by)
            .await
        {
            Ok(Some(outcome)) => self.settle_from_outcome(message_id, scheme, &outcome),
            Ok(None) => {
                let err = KernelError::RouteNotFound { path: message.path.clone() };
                self.error_manager.add(scheme, &err, Some(message.path.clone()));
                self.settle_with_error(message_id, scheme, &err);
            }
            Err(err) => self.settle_with_error(message_id, scheme, &err),
        }
    }

    fn settle_from_outcome(&self, message_id: MessageId, scheme: &str, outcome: &HandlerOutcome) {
        if self.response_manager.get_reply_to(message_id).is_none() {
            return;
        }
        let (body, success) = match outcome {
            HandlerOutcome::Success(value) => (value.clone(), true),
            HandlerOutcome::Failure(value) => (value.clone(), false),
        };
        let Ok(mut response) = Message::new(format!("{scheme}://response"), body) else {
            return;
        };
        let error_detail = response.body.clone();
        response.message_type = MessageType::Response;
        response.meta.set_success(success);
        if !success {
            response.meta.set_error(error_detail);
        }
        response.meta.set_in_reply_to(message_id);
        let _ = self.response_manager.deliver_response(response);
    }

    fn settle_with_error(&self, message_id: MessageId, scheme: &str, err: &KernelError) {
        if self.response_manager.get_reply_to(message_id).is_none() {
            return;
        }
        let Ok(mut response) = Message::new(format!("{scheme}://response"), serde_json::json!({})) else {
            return;
        };
        response.message_type = MessageType::Response;
        response.meta.set_success(false);
        response.meta.set_error(serde_json::json!({ "error": err.to_string() }));
        response.meta.set_in_reply_to(message_id);
        let _ = self.response_manager.deliver_response(response);
    }

    /// Where a handler should send its reply for `message_id`, if a
    /// binding is still active (§4.5 Response manager `getReplyTo`).
    pub fn get_reply_to(&self, message_id: MessageId) -> Option<String> {
        self.response_manager.get_reply_to(message_id)
    }
}
