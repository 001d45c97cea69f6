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

use std::time::Duration;

use clap::Parser;

use crate::Settings;

/// Command line configuration of the controller binary.
#[derive(Debug, Parser, Clone)]
#[clap(name = "controller", about = "Gateway API controller for a managed L7 load balancer")]
pub struct ControllerConfig {
    /// Base URL of the load balancer REST API.
    #[clap(long, env = "LB_API_ENDPOINT")]
    pub lb_api_endpoint: String,
    /// Bearer token sent with every load balancer API request.
    #[clap(long, env = "LB_API_TOKEN", hide_env_values = true)]
    pub lb_api_token: Option<String>,
    /// Timeout of a single load balancer API request, in seconds.
    #[clap(long, env = "LB_API_TIMEOUT_SECONDS", default_value = "30")]
    pub lb_api_timeout_seconds: u64,
    #[clap(long, env = "WORK_REQUEST_POLL_SECONDS", default_value = "2")]
    pub work_request_poll_seconds: u64,
    #[clap(long, env = "WORK_REQUEST_TIMEOUT_SECONDS", default_value = "1200")]
    pub work_request_timeout_seconds: u64,
    /// Interval at which successfully reconciled resources are checked again.
    #[clap(long, env = "RESYNC_SECONDS", default_value = "300")]
    pub resync_seconds: u64,
    /// Upper bound of the backoff applied to failed reconciles.
    #[clap(long, env = "MAX_ERROR_REQUEUE_SECONDS", default_value = "300")]
    pub max_error_requeue_seconds: u64,
}

impl ControllerConfig {
    pub fn settings(&self) -> Settings {
        Settings {
            work_request_poll_interval: Duration::from_secs(self.work_request_poll_seconds.max(1)),
            work_request_timeout: Duration::from_secs(self.work_request_timeout_seconds),
            resync_interval: Duration::from_secs(self.resync_seconds),
            max_error_requeue: Duration::from_secs(self.max_error_requeue_seconds.max(1)),
        }
    }

    pub fn lb_api_timeout(&self) -> Duration {
        Duration::from_secs(self.lb_api_timeout_seconds)
    }
}
