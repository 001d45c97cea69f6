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

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

/// Per-object exponential backoff for failed reconciles.
pub struct RequeueBackoff {
    max_interval: Duration,
    entries: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl RequeueBackoff {
    pub fn new(max_interval: Duration) -> Self {
        RequeueBackoff {
            max_interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next attempt for `key`, growing with every consecutive failure.
    pub fn next_delay(&self, key: &str) -> Duration {
        let Ok(mut entries) = self.entries.lock() else {
            return self.max_interval;
        };
        let max_interval = self.max_interval;
        entries
            .entry(key.to_string())
            .or_insert_with(|| ExponentialBackoff {
                current_interval: Duration::from_secs(1).min(max_interval),
                initial_interval: Duration::from_secs(1).min(max_interval),
                max_interval,
                max_elapsed_time: None,
                ..Default::default()
            })
            .next_backoff()
            .map_or(max_interval, |delay| delay.min(max_interval))
    }

    pub fn reset(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}
