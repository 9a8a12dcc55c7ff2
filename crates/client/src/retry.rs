// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{future::Future, time::Duration};

use backon::ConstantBuilder;
use bon::Builder;
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

/// Retry loop for one class of failure.
///
/// A failure is retried only when its kind matches, and, with a message
/// filter set, only when its message contains the filter. Anything else is
/// returned on the spot without touching the budget. Delays are constant.
///
/// Policies stack by nesting `execute` calls; every call starts a fresh
/// budget.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    kind:           ErrorKind,
    #[builder(default = 3)]
    max_retries:    usize,
    #[builder(default = Duration::ZERO)]
    backoff:        Duration,
    #[builder(into)]
    message_filter: Option<String>,
}

impl RetryPolicy {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind { self.kind }

    #[must_use]
    pub const fn max_retries(&self) -> usize { self.max_retries }

    #[must_use]
    pub const fn backoff(&self) -> Duration { self.backoff }

    #[must_use]
    pub fn message_filter(&self) -> Option<&str> { self.message_filter.as_deref() }

    /// Whether `err` falls under this policy.
    #[must_use]
    pub fn should_retry(&self, err: &Error) -> bool {
        if err.kind() != self.kind {
            return false;
        }
        self.message_filter.as_deref().is_none_or(|filter| {
            err.message()
                .is_some_and(|message| message.contains(filter))
        })
    }

    fn backoff_builder(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.backoff)
            .with_max_times(self.max_retries)
    }

    fn log_retry(&self, attempt: usize, err: &Error, delay: Duration) {
        debug!(
            kind = %self.kind,
            attempt,
            max_retries = self.max_retries,
            ?delay,
            error = %err,
            "retrying failed operation"
        );
    }

    /// Run `op` until it succeeds, fails with an error outside this policy,
    /// or the budget runs out.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        use backon::Retryable;

        let mut attempt = 0;
        op.retry(self.backoff_builder())
            .when(|err| self.should_retry(err))
            .notify(|err, delay| {
                attempt += 1;
                self.log_retry(attempt, err, delay);
            })
            .await
    }

    /// Like [`execute`](Self::execute), but threads owned state through every
    /// attempt so the operation can repair it before the next one.
    pub async fn execute_with_context<C, T, F, Fut>(&self, context: C, op: F) -> (C, Result<T>)
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = (C, Result<T>)>,
    {
        use backon::RetryableWithContext;

        let mut attempt = 0;
        op.retry(self.backoff_builder())
            .context(context)
            .when(|err| self.should_retry(err))
            .notify(|err, delay| {
                attempt += 1;
                self.log_retry(attempt, err, delay);
            })
            .await
    }
}
