//! Cloud-control client over the AWS SDK
//!
//! Resource calls go to the Cloud Control API and type schemas come from
//! CloudFormation's type registry. Credentials come from the default
//! provider chain; one pair of clients is kept per region.

use crate::domain::ports::{
    AwsScope, CloudControlClient, ProgressEvent, ProgressStatus, ResourceDescription, TypeSchema,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudcontrol::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::RegistryType;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const BACKEND: &str = "aws";
const THROTTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct RegionClients {
    cloudcontrol: aws_sdk_cloudcontrol::Client,
    cloudformation: aws_sdk_cloudformation::Client,
}

/// [`CloudControlClient`] backed by the AWS SDK
#[derive(Default)]
pub struct SdkCloudControl {
    regions: DashMap<String, RegionClients>,
    endpoint_url: Option<String>,
}

impl SdkCloudControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send every call to `endpoint_url`, e.g. a local emulator
    pub fn with_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self {
            regions: DashMap::new(),
            endpoint_url: Some(endpoint_url.into()),
        }
    }

    async fn clients(&self, scope: &AwsScope) -> RegionClients {
        if let Some(clients) = self.regions.get(&scope.region) {
            return clients.clone();
        }

        debug!("Loading AWS configuration for region {}", scope.region);
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(scope.region.clone()));
        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let clients = RegionClients {
            cloudcontrol: aws_sdk_cloudcontrol::Client::new(&shared),
            cloudformation: aws_sdk_cloudformation::Client::new(&shared),
        };
        self.regions
            .entry(scope.region.clone())
            .or_insert(clients)
            .clone()
    }
}

/// Map an SDK failure onto the downstream error kinds
fn sdk_error<E, R>(err: SdkError<E, R>, resource: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let reason = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    match err.code() {
        Some("ResourceNotFoundException" | "TypeNotFoundException") => Error::DownstreamNotFound {
            resource: resource.to_string(),
        },
        Some("ThrottlingException") => Error::DownstreamThrottled {
            backend: BACKEND.to_string(),
            retry_after: THROTTLE_DELAY,
        },
        Some(
            "ConcurrentOperationException"
            | "NetworkFailureException"
            | "ServiceInternalErrorException"
            | "HandlerInternalFailureException",
        ) => Error::DownstreamTransient {
            backend: BACKEND.to_string(),
            reason,
        },
        _ if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) => {
            Error::DownstreamTransient {
                backend: BACKEND.to_string(),
                reason,
            }
        }
        _ => Error::DownstreamFatal {
            backend: BACKEND.to_string(),
            reason,
        },
    }
}

fn progress_event(event: Option<&aws_sdk_cloudcontrol::types::ProgressEvent>) -> Result<ProgressEvent> {
    let event = event.ok_or_else(|| Error::DownstreamFatal {
        backend: BACKEND.to_string(),
        reason: "response carried no progress event".to_string(),
    })?;
    let operation_status = match event.operation_status().map(|s| s.as_str()) {
        Some("PENDING") => ProgressStatus::Pending,
        Some("IN_PROGRESS") => ProgressStatus::InProgress,
        Some("SUCCESS") => ProgressStatus::Success,
        Some("CANCEL_IN_PROGRESS") => ProgressStatus::CancelInProgress,
        Some("CANCEL_COMPLETE") => ProgressStatus::CancelComplete,
        _ => ProgressStatus::Failed,
    };
    Ok(ProgressEvent {
        request_token: event.request_token().unwrap_or_default().to_string(),
        operation_status,
        identifier: event.identifier().map(str::to_string),
        error_code: event.error_code().map(|c| c.as_str().to_string()),
        status_message: event.status_message().map(str::to_string),
    })
}

fn description(description: &aws_sdk_cloudcontrol::types::ResourceDescription) -> Result<ResourceDescription> {
    let properties = match description.properties() {
        Some(raw) => serde_json::from_str(raw)?,
        None => Value::Object(Default::default()),
    };
    Ok(ResourceDescription {
        identifier: description.identifier().unwrap_or_default().to_string(),
        properties,
    })
}

#[async_trait]
impl CloudControlClient for SdkCloudControl {
    async fn get_resource(&self, scope: &AwsScope, type_name: &str, identifier: &str) -> Result<ResourceDescription> {
        let resource = format!("{}/{}", type_name, identifier);
        let output = self
            .clients(scope)
            .await
            .cloudcontrol
            .get_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await
            .map_err(|e| sdk_error(e, &resource))?;
        match output.resource_description() {
            Some(found) => description(found),
            None => Err(Error::DownstreamNotFound { resource }),
        }
    }

    async fn list_resources(&self, scope: &AwsScope, type_name: &str) -> Result<Vec<ResourceDescription>> {
        let client = self.clients(scope).await.cloudcontrol;
        let mut resources = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = client
                .list_resources()
                .type_name(type_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error(e, type_name))?;
            for found in output.resource_descriptions() {
                resources.push(description(found)?);
            }
            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(resources)
    }

    async fn create_resource(&self, scope: &AwsScope, type_name: &str, desired_state: &Value) -> Result<ProgressEvent> {
        let output = self
            .clients(scope)
            .await
            .cloudcontrol
            .create_resource()
            .type_name(type_name)
            .desired_state(desired_state.to_string())
            .send()
            .await
            .map_err(|e| sdk_error(e, type_name))?;
        progress_event(output.progress_event())
    }

    async fn update_resource(
        &self,
        scope: &AwsScope,
        type_name: &str,
        identifier: &str,
        patch: &Value,
    ) -> Result<ProgressEvent> {
        let output = self
            .clients(scope)
            .await
            .cloudcontrol
            .update_resource()
            .type_name(type_name)
            .identifier(identifier)
            .patch_document(patch.to_string())
            .send()
            .await
            .map_err(|e| sdk_error(e, &format!("{}/{}", type_name, identifier)))?;
        progress_event(output.progress_event())
    }

    async fn delete_resource(&self, scope: &AwsScope, type_name: &str, identifier: &str) -> Result<ProgressEvent> {
        let output = self
            .clients(scope)
            .await
            .cloudcontrol
            .delete_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await
            .map_err(|e| sdk_error(e, &format!("{}/{}", type_name, identifier)))?;
        progress_event(output.progress_event())
    }

    async fn get_resource_request_status(&self, scope: &AwsScope, request_token: &str) -> Result<ProgressEvent> {
        let output = self
            .clients(scope)
            .await
            .cloudcontrol
            .get_resource_request_status()
            .request_token(request_token)
            .send()
            .await
            .map_err(|e| sdk_error(e, request_token))?;
        progress_event(output.progress_event())
    }

    async fn describe_type(&self, scope: &AwsScope, type_name: &str) -> Result<TypeSchema> {
        let output = self
            .clients(scope)
            .await
            .cloudformation
            .describe_type()
            .r#type(RegistryType::Resource)
            .type_name(type_name)
            .send()
            .await
            .map_err(|e| sdk_error(e, type_name))?;
        let schema = output.schema().ok_or_else(|| Error::DownstreamFatal {
            backend: BACKEND.to_string(),
            reason: format!("type {} has no schema", type_name),
        })?;
        Ok(serde_json::from_str(schema)?)
    }
}
