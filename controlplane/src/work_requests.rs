/*
Copyright 2024 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use loadbalancer::models::{WorkRequest, WorkRequestState};
use loadbalancer::LoadBalancerClient;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Blocks until a load balancer work request reaches a terminal state.
#[derive(Clone)]
pub struct WorkRequestWaiter {
    client: Arc<dyn LoadBalancerClient>,
    poll_interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl WorkRequestWaiter {
    pub fn new(
        client: Arc<dyn LoadBalancerClient>,
        poll_interval: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        WorkRequestWaiter {
            client,
            poll_interval,
            timeout,
            shutdown,
        }
    }

    pub async fn wait_for(&self, work_request_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let work_request = self.fetch(work_request_id, deadline).await?;
            match work_request.lifecycle_state {
                WorkRequestState::Succeeded => {
                    debug!(work_request = work_request_id, "work request succeeded");
                    return Ok(());
                }
                WorkRequestState::Failed | WorkRequestState::Canceled => {
                    let message = if work_request.error_details.is_empty() {
                        work_request.message
                    } else {
                        work_request
                            .error_details
                            .iter()
                            .map(|e| format!("{}: {}", e.error_code, e.message))
                            .collect::<Vec<_>>()
                            .join("; ")
                    };
                    warn!(
                        work_request = work_request_id,
                        state = %work_request.lifecycle_state,
                        %message,
                        "work request did not succeed"
                    );
                    return Err(Error::WorkRequestFailed {
                        id: work_request_id.to_string(),
                        state: work_request.lifecycle_state.to_string(),
                        message,
                    });
                }
                state => {
                    debug!(work_request = work_request_id, %state, "waiting for work request");
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::WorkRequestTimeout(work_request_id.to_string()));
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    // Transport and 5xx errors are retried with exponential backoff until the deadline.
    async fn fetch(&self, work_request_id: &str, deadline: Instant) -> Result<WorkRequest> {
        let policy = ExponentialBackoff {
            current_interval: self.poll_interval,
            initial_interval: self.poll_interval,
            max_interval: self.poll_interval * 8,
            max_elapsed_time: Some(deadline.saturating_duration_since(Instant::now())),
            ..Default::default()
        };
        let operation = move || {
            let client = self.client.clone();
            async move {
                client.get_work_request(work_request_id).await.map_err(|e| {
                    if e.is_transient() {
                        warn!(work_request = work_request_id, error = %e, "retrying work request poll");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = backoff::future::retry(policy, operation) => {
                result.map_err(|e| Error::lb(format!("get work request {work_request_id}"), e))
            }
        }
    }
}
