//! Long-running operation records
//!
//! An [`OperationStatus`] tracks one mutating action from the moment it is
//! accepted until it reaches a terminal state. Only the worker executing the
//! action (or its lease-renewal heartbeat) mutates the record.

use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Operation State
// =============================================================================

/// Lifecycle state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    Accepted,
    Provisioning,
    Updating,
    Deleting,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationState {
    /// Terminal states are final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::Canceled
        )
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            OperationState::Provisioning | OperationState::Updating | OperationState::Deleting
        )
    }

    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        match self {
            // Success is only reachable through an in-progress state
            OperationState::Accepted => {
                next.is_in_progress() || matches!(next, OperationState::Failed | OperationState::Canceled)
            }
            s if s.is_in_progress() => next == *s || next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::Accepted => "Accepted",
            OperationState::Provisioning => "Provisioning",
            OperationState::Updating => "Updating",
            OperationState::Deleting => "Deleting",
            OperationState::Succeeded => "Succeeded",
            OperationState::Failed => "Failed",
            OperationState::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Operation Method / Type
// =============================================================================

/// The mutating verb an operation performs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMethod {
    Put,
    Patch,
    Delete,
    /// Custom action such as `listSecrets`
    Action(String),
}

impl OperationMethod {
    /// The in-progress state a worker moves the operation into
    pub fn in_progress_state(&self) -> OperationState {
        match self {
            OperationMethod::Put => OperationState::Provisioning,
            OperationMethod::Delete => OperationState::Deleting,
            OperationMethod::Patch | OperationMethod::Action(_) => OperationState::Updating,
        }
    }
}

impl fmt::Display for OperationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationMethod::Put => write!(f, "PUT"),
            OperationMethod::Patch => write!(f, "PATCH"),
            OperationMethod::Delete => write!(f, "DELETE"),
            OperationMethod::Action(name) => write!(f, "{}", name.to_uppercase()),
        }
    }
}

/// Resource type plus method, e.g. `AWS.KINESIS/STREAM|PUT`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationType {
    pub resource_type: String,
    pub method: OperationMethod,
}

impl OperationType {
    pub fn new(resource_type: impl Into<String>, method: OperationMethod) -> Self {
        Self {
            resource_type: resource_type.into(),
            method,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.resource_type.to_uppercase(), self.method)
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Error detail recorded on a failed or canceled operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl From<&Error> for ErrorDetail {
    fn from(err: &Error) -> Self {
        ErrorDetail::new(err.code(), err.to_string())
    }
}

/// Persisted record of one long-running operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    /// Operation token
    pub id: Uuid,
    /// Address of the status record itself
    pub name: String,
    /// Resource the operation acts on
    pub resource_id: ResourceId,
    pub operation_type: OperationType,
    pub status: OperationState,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub last_renewed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Number of execution attempts so far
    #[serde(default)]
    pub attempts: u32,
}

impl OperationStatus {
    /// Create a record in `Accepted`
    pub fn accepted(
        id: Uuid,
        name: impl Into<String>,
        resource_id: ResourceId,
        operation_type: OperationType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            resource_id,
            operation_type,
            status: OperationState::Accepted,
            start_time: now,
            end_time: None,
            last_renewed_at: now,
            error: None,
            attempts: 0,
        }
    }

    /// Move to `next`, rejecting any move out of a terminal state
    pub fn transition(&mut self, next: OperationState) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        let now = Utc::now();
        self.last_renewed_at = now;
        if next.is_terminal() {
            self.end_time = Some(now);
        }
        Ok(())
    }

    /// Terminal transition that records an error detail
    pub fn fail(&mut self, state: OperationState, detail: ErrorDetail) -> Result<()> {
        self.transition(state)?;
        self.error = Some(detail);
        Ok(())
    }

    /// Record a lease renewal
    pub fn renew(&mut self) {
        self.last_renewed_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn status() -> OperationStatus {
        let id = ResourceId::parse(
            "/planes/aws/aws/accounts/0/regions/us-east-1/providers/AWS.Kinesis/Stream/s1",
        )
        .unwrap();
        OperationStatus::accepted(
            Uuid::new_v4(),
            "op",
            id,
            OperationType::new("AWS.Kinesis/Stream", OperationMethod::Put),
        )
    }

    #[test]
    fn test_lifecycle() {
        let mut op = status();
        assert_eq!(op.status, OperationState::Accepted);
        op.transition(OperationMethod::Put.in_progress_state()).unwrap();
        assert_eq!(op.status, OperationState::Provisioning);
        op.transition(OperationState::Succeeded).unwrap();
        assert!(op.is_terminal());
        assert!(op.end_time.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut op = status();
        op.fail(OperationState::Failed, ErrorDetail::new("Boom", "boom"))
            .unwrap();
        assert_matches!(
            op.transition(OperationState::Provisioning),
            Err(Error::InvalidStateTransition { .. })
        );
        assert_matches!(
            op.transition(OperationState::Succeeded),
            Err(Error::InvalidStateTransition { .. })
        );
        assert_eq!(op.error.as_ref().unwrap().code, "Boom");
    }

    #[test]
    fn test_in_progress_cannot_switch_kind() {
        assert!(!OperationState::Deleting.can_transition_to(OperationState::Provisioning));
        assert!(OperationState::Deleting.can_transition_to(OperationState::Deleting));
        assert!(OperationState::Accepted.can_transition_to(OperationState::Canceled));
    }

    #[test]
    fn test_accepted_cannot_skip_to_success() {
        let mut op = status();
        assert_matches!(
            op.transition(OperationState::Succeeded),
            Err(Error::InvalidStateTransition { .. })
        );
        assert_eq!(op.status, OperationState::Accepted);

        assert!(OperationState::Accepted.can_transition_to(OperationState::Deleting));
        assert!(OperationState::Accepted.can_transition_to(OperationState::Failed));
        assert!(!OperationState::Accepted.can_transition_to(OperationState::Accepted));
    }

    #[test]
    fn test_operation_type_display() {
        let t = OperationType::new("Applications.Core/containers", OperationMethod::Delete);
        assert_eq!(t.to_string(), "APPLICATIONS.CORE/CONTAINERS|DELETE");
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let op = status();
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["status"], "Accepted");
        assert!(json.get("resourceId").is_some());
        assert!(json.get("endTime").is_none());
    }
}
