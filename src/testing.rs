//! In-crate fakes shared by unit tests

use crate::controlplane::backends::aws::{composite_identifier, PatchOperation};
use crate::domain::output_resource::OutputResource;
use crate::domain::ports::{
    AwsScope, CloudControlClient, ProgressEvent, ProgressStatus, ResourceDeleter, ResourceDescription,
    TypeSchema,
};
use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

// =============================================================================
// Fake Cloud Control
// =============================================================================

struct PendingRequest {
    remaining: usize,
    outcome: ProgressEvent,
}

#[derive(Default)]
struct CloudState {
    resources: BTreeMap<(String, String), Value>,
    schemas: HashMap<String, TypeSchema>,
    requests: HashMap<String, PendingRequest>,
    failure: Option<(String, String)>,
    last_patch: Option<Value>,
    pending_polls: usize,
}

/// In-memory cloud-control API
///
/// Mutations are applied when requested; `set_pending_polls` makes the
/// request token report `IN_PROGRESS` that many times first.
#[derive(Default)]
pub struct FakeCloudControl {
    state: Mutex<CloudState>,
    describe_calls: AtomicUsize,
}

impl FakeCloudControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_schema(&self, type_name: &str, schema: TypeSchema) {
        self.state.lock().schemas.insert(type_name.to_string(), schema);
    }

    pub fn insert(&self, type_name: &str, identifier: &str, properties: Value) {
        self.state
            .lock()
            .resources
            .insert((type_name.to_string(), identifier.to_string()), properties);
    }

    pub fn properties(&self, type_name: &str, identifier: &str) -> Option<Value> {
        self.state
            .lock()
            .resources
            .get(&(type_name.to_string(), identifier.to_string()))
            .cloned()
    }

    pub fn set_pending_polls(&self, polls: usize) {
        self.state.lock().pending_polls = polls;
    }

    /// Make the next mutating request end `FAILED` with `error_code`
    pub fn fail_next_request(&self, error_code: &str, message: &str) {
        self.state.lock().failure = Some((error_code.to_string(), message.to_string()));
    }

    pub fn last_patch(&self) -> Option<Value> {
        self.state.lock().last_patch.clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    fn schema_for(state: &CloudState, type_name: &str) -> TypeSchema {
        state.schemas.get(type_name).cloned().unwrap_or_else(|| TypeSchema {
            primary_identifier: vec!["/properties/Name".to_string()],
            ..Default::default()
        })
    }

    /// Apply `mutate` unless a failure is scripted, then issue a request token
    fn start_request(
        &self,
        identifier: &str,
        mutate: impl FnOnce(&mut CloudState) -> Result<()>,
    ) -> Result<ProgressEvent> {
        let mut state = self.state.lock();
        let token = Uuid::new_v4().to_string();

        let outcome = match state.failure.take() {
            Some((code, message)) => ProgressEvent {
                request_token: token.clone(),
                operation_status: ProgressStatus::Failed,
                identifier: Some(identifier.to_string()),
                error_code: Some(code),
                status_message: Some(message),
            },
            None => {
                mutate(&mut state)?;
                ProgressEvent {
                    request_token: token.clone(),
                    operation_status: ProgressStatus::Success,
                    identifier: Some(identifier.to_string()),
                    error_code: None,
                    status_message: None,
                }
            }
        };

        if state.pending_polls == 0 {
            return Ok(outcome);
        }
        let in_progress = ProgressEvent {
            operation_status: ProgressStatus::InProgress,
            error_code: None,
            status_message: None,
            ..outcome.clone()
        };
        let remaining = state.pending_polls;
        state.requests.insert(token, PendingRequest { remaining, outcome });
        Ok(in_progress)
    }
}

fn not_found(type_name: &str, identifier: &str) -> Error {
    Error::DownstreamNotFound {
        resource: format!("{}/{}", type_name, identifier),
    }
}

fn apply_patch(target: &mut Value, patch: &[PatchOperation]) {
    for operation in patch {
        let (path, value) = match operation {
            PatchOperation::Add { path, value } | PatchOperation::Replace { path, value } => {
                (path, Some(value))
            }
            PatchOperation::Remove { path } => (path, None),
        };
        let Some((parent, key)) = path.rsplit_once('/') else {
            continue;
        };
        let key = key.replace("~1", "/").replace("~0", "~");
        let Some(Value::Object(map)) = target.pointer_mut(parent) else {
            continue;
        };
        match value {
            Some(value) => {
                map.insert(key, value.clone());
            }
            None => {
                map.remove(&key);
            }
        }
    }
}

#[async_trait]
impl CloudControlClient for FakeCloudControl {
    async fn get_resource(&self, _scope: &AwsScope, type_name: &str, identifier: &str) -> Result<ResourceDescription> {
        self.properties(type_name, identifier)
            .map(|properties| ResourceDescription {
                identifier: identifier.to_string(),
                properties,
            })
            .ok_or_else(|| not_found(type_name, identifier))
    }

    async fn list_resources(&self, _scope: &AwsScope, type_name: &str) -> Result<Vec<ResourceDescription>> {
        Ok(self
            .state
            .lock()
            .resources
            .iter()
            .filter(|((t, _), _)| t == type_name)
            .map(|((_, identifier), properties)| ResourceDescription {
                identifier: identifier.clone(),
                properties: properties.clone(),
            })
            .collect())
    }

    async fn create_resource(&self, _scope: &AwsScope, type_name: &str, desired_state: &Value) -> Result<ProgressEvent> {
        let identifier = {
            let state = self.state.lock();
            composite_identifier(desired_state, &Self::schema_for(&state, type_name), type_name)?
        };
        let key = (type_name.to_string(), identifier.clone());
        let desired = desired_state.clone();
        self.start_request(&identifier, move |state| {
            state.resources.insert(key, desired);
            Ok(())
        })
    }

    async fn update_resource(
        &self,
        _scope: &AwsScope,
        type_name: &str,
        identifier: &str,
        patch: &Value,
    ) -> Result<ProgressEvent> {
        let operations: Vec<PatchOperation> = serde_json::from_value(patch.clone())?;
        let key = (type_name.to_string(), identifier.to_string());
        let patch = patch.clone();
        self.start_request(identifier, move |state| {
            let current = state
                .resources
                .get_mut(&key)
                .ok_or_else(|| not_found(&key.0, &key.1))?;
            apply_patch(current, &operations);
            state.last_patch = Some(patch);
            Ok(())
        })
    }

    async fn delete_resource(&self, _scope: &AwsScope, type_name: &str, identifier: &str) -> Result<ProgressEvent> {
        let key = (type_name.to_string(), identifier.to_string());
        if !self.state.lock().resources.contains_key(&key) {
            return Err(not_found(type_name, identifier));
        }
        self.start_request(identifier, move |state| {
            state.resources.remove(&key);
            Ok(())
        })
    }

    async fn get_resource_request_status(&self, _scope: &AwsScope, request_token: &str) -> Result<ProgressEvent> {
        let mut state = self.state.lock();
        let Some(pending) = state.requests.get_mut(request_token) else {
            return Err(Error::DownstreamFatal {
                backend: "fake".into(),
                reason: format!("unknown request token {}", request_token),
            });
        };
        if pending.remaining > 1 {
            pending.remaining -= 1;
            return Ok(ProgressEvent {
                operation_status: ProgressStatus::InProgress,
                error_code: None,
                status_message: None,
                ..pending.outcome.clone()
            });
        }
        state
            .requests
            .remove(request_token)
            .map(|p| p.outcome)
            .ok_or_else(|| Error::Internal("request vanished".into()))
    }

    async fn describe_type(&self, _scope: &AwsScope, type_name: &str) -> Result<TypeSchema> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::schema_for(&self.state.lock(), type_name))
    }
}

// =============================================================================
// Recording Deleter
// =============================================================================

/// Records delete calls and replays scripted failures per resource
#[derive(Default)]
pub struct RecordingDeleter {
    calls: Mutex<Vec<ResourceId>>,
    failures: Mutex<HashMap<ResourceId, VecDeque<Error>>>,
}

impl RecordingDeleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next deletes of `id` with `errors`, in order
    pub fn fail_with(&self, id: &ResourceId, errors: Vec<Error>) {
        self.failures.lock().insert(id.clone(), errors.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, id: &ResourceId) -> usize {
        self.calls.lock().iter().filter(|c| *c == id).count()
    }
}

#[async_trait]
impl ResourceDeleter for RecordingDeleter {
    async fn delete(&self, resource: &OutputResource) -> Result<()> {
        self.calls.lock().push(resource.id.clone());
        match self
            .failures
            .lock()
            .get_mut(&resource.id)
            .and_then(|errors| errors.pop_front())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
