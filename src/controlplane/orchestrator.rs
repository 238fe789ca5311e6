//! Async Operation Orchestrator
//!
//! Turns a mutating request into a tracked long-running operation:
//! - `submit` persists an `Accepted` record, enqueues the work and returns
//!   immediately
//! - workers dequeue, move the record to its in-progress state, run the
//!   registered controller and record the terminal state
//! - long executions renew their queue lease; each renewal is reported as an
//!   "extended" event
//! - retryable failures are requeued with backoff up to a bounded number of
//!   attempts; everything else fails the operation on the first error

use crate::config::OrchestratorSettings;
use crate::domain::operation::{
    ErrorDetail, OperationMethod, OperationState, OperationStatus, OperationType,
};
use crate::domain::ports::{
    BackendResponse, OperationQueue, OperationQueueRef, QueueMessage, TelemetrySinkRef,
};
use crate::domain::resource_id::ResourceId;
use crate::error::{Error, ErrorAction, Result};
use crate::store::{StorageClient, StorageClientRef, StorageObject};
use crate::sync::AsyncValue;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Namespace used for operations on scopes
pub const SCOPE_OPERATION_NAMESPACE: &str = "System.Resources";

// =============================================================================
// Controllers
// =============================================================================

/// Input handed to a controller
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub operation_id: Uuid,
    pub resource_id: ResourceId,
    pub operation_type: OperationType,
    pub body: Option<Value>,
    pub api_version: Option<String>,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Executes one kind of operation
#[async_trait]
pub trait OperationController: Send + Sync {
    async fn run(&self, request: &OperationRequest) -> Result<()>;
}

pub type OperationControllerRef = Arc<dyn OperationController>;

struct ControllerRegistration {
    /// Lowercase resource type; a trailing `*` makes it a prefix
    pattern: String,
    method: OperationMethod,
    controller: OperationControllerRef,
}

impl ControllerRegistration {
    fn method_matches(&self, method: &OperationMethod) -> bool {
        match (&self.method, method) {
            (OperationMethod::Action(a), OperationMethod::Action(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => a == b,
        }
    }

    /// Match quality: exact beats the longest prefix
    fn score(&self, resource_type: &str) -> Option<usize> {
        match self.pattern.strip_suffix('*') {
            Some(prefix) if resource_type.starts_with(prefix) => Some(prefix.len()),
            Some(_) => None,
            None if self.pattern == resource_type => Some(usize::MAX),
            None => None,
        }
    }
}

/// Build the status ID for an operation on `resource_id`
///
/// `{rootScope}/providers/{namespace}/locations/global/operationStatuses/{id}`
pub fn operation_status_id(resource_id: &ResourceId, operation_id: Uuid) -> Result<ResourceId> {
    let namespace = resource_id
        .provider_namespace()
        .unwrap_or(SCOPE_OPERATION_NAMESPACE);
    let root = if resource_id.is_scope() {
        resource_id.truncate()
    } else {
        ResourceId::from_segments(resource_id.scope_segments().to_vec(), Vec::new())
    };
    root.append_type(&format!("{}/locations", namespace), "global")?
        .append_type("operationStatuses", &operation_id.to_string())
}

/// Operation resource type: the resource type, or `System.Resources/{scopeType}` for scopes
pub fn operation_resource_type(id: &ResourceId) -> String {
    if id.is_scope() {
        return id
            .scope_segments()
            .last()
            .map(|s| format!("{}/{}", SCOPE_OPERATION_NAMESPACE, s.scope_type))
            .unwrap_or_default();
    }
    id.resource_type()
}

/// True if `id` addresses an operation status record
pub fn is_operation_status(id: &ResourceId) -> bool {
    id.type_segments()
        .last()
        .is_some_and(|t| t.type_name.eq_ignore_ascii_case("operationStatuses"))
}

// =============================================================================
// Orchestrator
// =============================================================================

enum Outcome {
    Finished(Result<()>),
    TimedOut,
    Shutdown,
}

/// Tracks and executes long-running operations
pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: StorageClientRef,
    queue: OperationQueueRef,
    telemetry: TelemetrySinkRef,
    controllers: RwLock<Vec<ControllerRegistration>>,
    /// Completion boxes for operations still running in this process
    completions: DashMap<Uuid, Arc<AsyncValue<OperationStatus>>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        store: StorageClientRef,
        queue: OperationQueueRef,
        telemetry: TelemetrySinkRef,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            store,
            queue,
            telemetry,
            controllers: RwLock::new(Vec::new()),
            completions: DashMap::new(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Register a controller for a resource type (exact or `prefix*`) and method
    pub fn register_controller(
        &self,
        pattern: &str,
        method: OperationMethod,
        controller: OperationControllerRef,
    ) {
        info!("Registering controller for {} {}", pattern, method);
        self.controllers.write().push(ControllerRegistration {
            pattern: pattern.to_lowercase(),
            method,
            controller,
        });
    }

    fn find_controller(&self, operation_type: &OperationType) -> Option<OperationControllerRef> {
        let resource_type = operation_type.resource_type.to_lowercase();
        self.controllers
            .read()
            .iter()
            .filter(|r| r.method_matches(&operation_type.method))
            .filter_map(|r| r.score(&resource_type).map(|score| (score, r)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, r)| Arc::clone(&r.controller))
    }

    // -------------------------------------------------------------------------
    // Request path
    // -------------------------------------------------------------------------

    /// Accept a mutating request and enqueue it
    ///
    /// Fails synchronously (no operation is created) when no controller
    /// handles the operation type.
    pub async fn submit(
        &self,
        resource_id: &ResourceId,
        method: OperationMethod,
        body: Option<Value>,
        api_version: Option<String>,
    ) -> Result<OperationStatus> {
        let operation_type = OperationType::new(operation_resource_type(resource_id), method);
        if self.find_controller(&operation_type).is_none() {
            return Err(Error::ControllerNotFound {
                operation_type: operation_type.to_string(),
            });
        }

        let operation_id = Uuid::new_v4();
        let status_id = operation_status_id(resource_id, operation_id)?;
        let status = OperationStatus::accepted(
            operation_id,
            status_id.to_string(),
            resource_id.clone(),
            operation_type.clone(),
        );
        self.store
            .save(StorageObject::from_typed(status_id, &status)?, None)
            .await?;
        self.completions
            .insert(operation_id, Arc::new(AsyncValue::new()));

        let message = QueueMessage {
            message_id: Uuid::new_v4(),
            operation_id,
            resource_id: resource_id.clone(),
            operation_type: operation_type.clone(),
            body,
            api_version,
            dequeue_count: 0,
        };
        if let Err(e) = self.queue.enqueue(message).await {
            self.completions.remove(&operation_id);
            return Err(e);
        }

        self.telemetry.operation_queued(&operation_type);
        info!("Accepted operation {} ({}) for {}", operation_id, operation_type, resource_id);
        Ok(status)
    }

    /// Accept a request and build the 202 response for it
    pub async fn submit_accepted(
        &self,
        resource_id: &ResourceId,
        method: OperationMethod,
        body: Option<Value>,
        api_version: Option<String>,
    ) -> Result<BackendResponse> {
        let status = self.submit(resource_id, method, body, api_version).await?;
        Ok(BackendResponse::Accepted {
            location: status.name.clone(),
            body: serde_json::to_value(&status)?,
        })
    }

    /// Run the registered controller in the caller's task
    ///
    /// No record is stored and nothing is queued. Used for work nested in an
    /// operation that already holds a worker.
    pub async fn run_inline(
        &self,
        resource_id: &ResourceId,
        method: OperationMethod,
        body: Option<Value>,
        api_version: Option<String>,
    ) -> Result<()> {
        let operation_type = OperationType::new(operation_resource_type(resource_id), method);
        let controller = self
            .find_controller(&operation_type)
            .ok_or_else(|| Error::ControllerNotFound {
                operation_type: operation_type.to_string(),
            })?;

        let request = OperationRequest {
            operation_id: Uuid::new_v4(),
            resource_id: resource_id.clone(),
            operation_type,
            body,
            api_version,
            attempt: 1,
        };
        debug!("Running {} inline for {}", request.operation_type, resource_id);
        tokio::time::timeout(self.settings.operation_timeout(), controller.run(&request))
            .await
            .map_err(|_| Error::DeadlineExceeded)?
    }

    /// Load an operation record by its status ID
    pub async fn get_status(&self, status_id: &ResourceId) -> Result<OperationStatus> {
        self.store.get(status_id).await?.as_typed()
    }

    /// Wait for an operation to reach a terminal state
    pub async fn wait(&self, status_id: &ResourceId, timeout: Duration) -> Result<OperationStatus> {
        let operation_id = Uuid::parse_str(status_id.name()).map_err(|_| Error::ObjectNotFound {
            id: status_id.to_string(),
        })?;

        let completion = self.completions.get(&operation_id).map(|r| Arc::clone(r.value()));
        if let Some(completion) = completion {
            return completion.get(timeout).await;
        }

        // Not running here any more: the stored record is authoritative
        let status = self.get_status(status_id).await?;
        if status.is_terminal() {
            Ok(status)
        } else {
            Err(Error::DeadlineExceeded)
        }
    }

    // -------------------------------------------------------------------------
    // Workers
    // -------------------------------------------------------------------------

    /// Spawn the worker pool
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        for index in 0..self.settings.worker_count {
            let orchestrator = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                orchestrator.run_worker(index).await;
            }));
        }
        info!("Started {} operation workers", self.settings.worker_count);
    }

    /// Stop workers; in-flight messages are left for redelivery
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Operation worker ended abnormally: {}", e);
            }
        }
        info!("Operation workers stopped");
    }

    async fn run_worker(self: Arc<Self>, index: usize) {
        debug!("Operation worker {} started", index);
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = self.queue.dequeue() => next,
            };

            match next {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => break,
                Err(e) => {
                    error!("Worker {} failed to dequeue: {}", index, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        debug!("Operation worker {} stopped", index);
    }

    /// Handle one delivery of a message
    pub async fn process(&self, message: QueueMessage) {
        let operation_id = message.operation_id;
        if let Err(e) = self.process_inner(&message).await {
            error!("Operation {} could not be processed: {}", operation_id, e);
        }
    }

    async fn process_inner(&self, message: &QueueMessage) -> Result<()> {
        let status_id = operation_status_id(&message.resource_id, message.operation_id)?;
        let mut status = match self.get_status(&status_id).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => {
                warn!("Dropping message for unknown operation {}", message.operation_id);
                return self.queue.finish(message).await;
            }
            Err(e) => return Err(e),
        };

        if status.is_terminal() {
            debug!("Skipping redelivered message for finished operation {}", status.id);
            return self.queue.finish(message).await;
        }

        let Some(controller) = self.find_controller(&status.operation_type) else {
            let err = Error::ControllerNotFound {
                operation_type: status.operation_type.to_string(),
            };
            return self
                .complete(&status_id, status, OperationState::Failed, Some(ErrorDetail::from(&err)), message)
                .await;
        };

        let in_progress = status.operation_type.method.in_progress_state();
        if status.status != in_progress {
            status.transition(in_progress)?;
        }
        status.attempts += 1;
        self.save_status(&status_id, &status).await?;

        let request = OperationRequest {
            operation_id: status.id,
            resource_id: message.resource_id.clone(),
            operation_type: status.operation_type.clone(),
            body: message.body.clone(),
            api_version: message.api_version.clone(),
            attempt: status.attempts,
        };

        info!(
            "Running operation {} ({}) attempt {}",
            status.id, status.operation_type, status.attempts
        );
        match self.execute(controller, &request, message, &status_id, &mut status).await {
            Outcome::Finished(Ok(())) => {
                self.complete(&status_id, status, OperationState::Succeeded, None, message)
                    .await
            }
            Outcome::Finished(Err(err)) => self.handle_failure(&status_id, status, err, message).await,
            Outcome::TimedOut => {
                let detail = ErrorDetail::new(
                    "OperationTimedOut",
                    format!(
                        "operation exceeded {}s",
                        self.settings.operation_timeout().as_secs()
                    ),
                );
                self.complete(&status_id, status, OperationState::Canceled, Some(detail), message)
                    .await
            }
            Outcome::Shutdown => {
                info!("Leaving operation {} for redelivery on shutdown", status.id);
                Ok(())
            }
        }
    }

    /// Run the controller while renewing the lease and enforcing the timeout
    async fn execute(
        &self,
        controller: OperationControllerRef,
        request: &OperationRequest,
        message: &QueueMessage,
        status_id: &ResourceId,
        status: &mut OperationStatus,
    ) -> Outcome {
        let run = controller.run(request);
        tokio::pin!(run);
        let deadline = tokio::time::sleep(self.settings.operation_timeout());
        tokio::pin!(deadline);

        let lease = self.settings.lease_duration();
        let renew_every = (lease / 2).max(Duration::from_millis(10));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);

        loop {
            tokio::select! {
                result = &mut run => return Outcome::Finished(result),
                _ = &mut deadline => return Outcome::TimedOut,
                _ = self.shutdown.cancelled() => return Outcome::Shutdown,
                _ = renew.tick() => {
                    if let Err(e) = self.queue.extend(message, lease).await {
                        warn!("Failed to extend lease for operation {}: {}", status.id, e);
                        continue;
                    }
                    status.renew();
                    if let Err(e) = self.save_status(status_id, status).await {
                        warn!("Failed to record lease renewal for {}: {}", status.id, e);
                    }
                    self.telemetry.operation_extended(&status.operation_type);
                    debug!("Extended lease for operation {}", status.id);
                }
            }
        }
    }

    async fn handle_failure(
        &self,
        status_id: &ResourceId,
        status: OperationStatus,
        err: Error,
        message: &QueueMessage,
    ) -> Result<()> {
        let delay = match err.action() {
            ErrorAction::NoRequeue => None,
            _ if status.attempts >= self.settings.max_attempts => {
                warn!(
                    "Operation {} exhausted {} attempts",
                    status.id, self.settings.max_attempts
                );
                None
            }
            ErrorAction::RequeueAfter(delay) => Some(delay),
            ErrorAction::RequeueWithBackoff => Some(self.retry_delay(status.attempts)),
        };

        let Some(delay) = delay else {
            error!("Operation {} failed: {}", status.id, err);
            return self
                .complete(status_id, status, OperationState::Failed, Some(ErrorDetail::from(&err)), message)
                .await;
        };

        warn!(
            "Operation {} attempt {} failed, retrying in {:?}: {}",
            status.id, status.attempts, delay, err
        );
        self.queue.finish(message).await?;
        let retry = QueueMessage {
            message_id: Uuid::new_v4(),
            ..message.clone()
        };
        self.queue.enqueue_after(retry, delay).await
    }

    /// Exponential backoff delay before the next attempt
    fn retry_delay(&self, attempt: u32) -> Duration {
        let mut policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.settings.retry_initial_interval())
            .with_max_interval(self.settings.retry_max_interval())
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let mut delay = self.settings.retry_initial_interval();
        for _ in 0..attempt.max(1) {
            if let Some(next) = policy.next_backoff() {
                delay = next;
            }
        }
        delay
    }

    async fn save_status(&self, status_id: &ResourceId, status: &OperationStatus) -> Result<()> {
        self.store
            .save(StorageObject::from_typed(status_id.clone(), status)?, None)
            .await
            .map(|_| ())
    }

    /// Record a terminal state, wake waiters and acknowledge the message
    async fn complete(
        &self,
        status_id: &ResourceId,
        mut status: OperationStatus,
        state: OperationState,
        detail: Option<ErrorDetail>,
        message: &QueueMessage,
    ) -> Result<()> {
        match detail {
            Some(detail) => status.fail(state, detail)?,
            None => status.transition(state)?,
        }
        self.save_status(status_id, &status).await?;

        let elapsed = (Utc::now() - status.start_time).to_std().unwrap_or_default();
        self.telemetry
            .operation_completed(&status.operation_type, state, elapsed);
        info!("Operation {} finished as {}", status.id, state);

        if let Some((_, completion)) = self.completions.remove(&status.id) {
            completion.put(status);
        }
        self.queue.finish(message).await
    }
}
