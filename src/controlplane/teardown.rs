//! Concurrent teardown of output resources
//!
//! Every managed resource is deleted in its own task. Providers listed as
//! eventually consistent get a bounded number of fixed-interval retries;
//! everything else gets one attempt. The first failure cancels the shared
//! token so no new retry starts, and is the error returned to the caller.

use crate::config::TeardownSettings;
use crate::controlplane::router::Router;
use crate::domain::output_resource::OutputResource;
use crate::domain::ports::{BackendResponse, ResourceDeleter, ResourceDeleterRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retry policy per provider
#[derive(Debug, Clone)]
pub struct TeardownPolicy {
    eventually_consistent: Vec<String>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl TeardownPolicy {
    pub fn new(eventually_consistent: &[String], max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            eventually_consistent: eventually_consistent.iter().map(|p| p.to_lowercase()).collect(),
            max_attempts: max_attempts.max(1),
            retry_interval,
        }
    }

    /// Attempts allowed for a resource of `provider`
    pub fn attempts_for(&self, provider: &str) -> u32 {
        if self
            .eventually_consistent
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider))
        {
            self.max_attempts
        } else {
            1
        }
    }
}

impl From<&TeardownSettings> for TeardownPolicy {
    fn from(settings: &TeardownSettings) -> Self {
        Self::new(
            &settings.eventually_consistent_providers,
            settings.max_attempts,
            settings.retry_interval(),
        )
    }
}

/// Deletes sets of output resources concurrently
pub struct Teardown {
    deleter: ResourceDeleterRef,
    policy: TeardownPolicy,
}

impl Teardown {
    pub fn new(deleter: ResourceDeleterRef, policy: TeardownPolicy) -> Self {
        Self { deleter, policy }
    }

    /// Delete every managed resource; unmanaged ones are skipped
    ///
    /// Returns after all started tasks have finished.
    pub async fn delete_all(&self, resources: &[OutputResource]) -> Result<()> {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for resource in resources {
            if !resource.is_managed() {
                info!("Skipping deletion of unmanaged resource {}", resource.id);
                continue;
            }

            let attempts = self.policy.attempts_for(resource.provider());
            let interval = self.policy.retry_interval;
            let deleter = Arc::clone(&self.deleter);
            let cancel = cancel.clone();
            let resource = resource.clone();

            tasks.spawn(async move {
                let result = delete_with_retry(&deleter, &resource, attempts, interval, &cancel).await;
                if result.is_err() {
                    cancel.cancel();
                }
                (resource.id, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (id, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    cancel.cancel();
                    let err = Error::Internal(format!("teardown task failed: {}", e));
                    record_failure(&mut first_error, "unknown", err);
                    continue;
                }
            };
            match result {
                Ok(()) => debug!("Deleted {}", id),
                Err(e) => record_failure(&mut first_error, id.as_str(), e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn record_failure(first_error: &mut Option<Error>, id: &str, err: Error) {
    if first_error.is_none() {
        error!("Failed to delete {}: {}", id, err);
        *first_error = Some(err);
    } else {
        warn!("Additional teardown failure for {}: {}", id, err);
    }
}

async fn delete_with_retry(
    deleter: &ResourceDeleterRef,
    resource: &OutputResource,
    attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match deleter.delete(resource).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Resource {} is already gone", resource.id);
                return Ok(());
            }
            Err(e) if attempt >= attempts || cancel.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(
                    "Attempt {}/{} to delete {} failed, retrying in {:?}: {}",
                    attempt, attempts, resource.id, interval, e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tokio::time::sleep(interval) => {}
                }
                attempt += 1;
            }
        }
    }
}

// =============================================================================
// Router-backed deleter
// =============================================================================

/// Deletes output resources through the router without queueing
///
/// The delete runs in the calling task, so teardown inside an operation
/// never waits for a free worker.
pub struct RouterDeleter {
    router: Weak<Router>,
}

impl RouterDeleter {
    pub fn new(router: &Arc<Router>) -> Self {
        Self {
            router: Arc::downgrade(router),
        }
    }
}

#[async_trait]
impl ResourceDeleter for RouterDeleter {
    async fn delete(&self, resource: &OutputResource) -> Result<()> {
        let router = self
            .router
            .upgrade()
            .ok_or_else(|| Error::Internal("router has been shut down".into()))?;

        let path = format!("{}{}", router.base_path(), resource.id);
        match router.delete_inline(&path).await? {
            BackendResponse::Accepted { location, .. } => {
                debug!("Delete of {} accepted by a remote provider at {}", resource.id, location);
            }
            _ => debug!("Deleted {} through the router", resource.id),
        }
        Ok(())
    }
}
