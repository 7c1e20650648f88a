// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Streaming request events and cancellation.
//!
//! A streaming request emits zero or more [`StreamEvent::Delta`] events in
//! arrival order followed by exactly one [`StreamEvent::Final`].  The final
//! event carries the normalized contract built from the accumulated text and
//! replaces whatever the deltas showed; it is a correction, not an append.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::types::InsightResponse;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Raw provider text, in arrival order.
    Delta(String),
    /// The authoritative result.  Always the last event.
    Final(Box<InsightResponse>),
}

/// Cooperative cancellation flag shared between a caller and a streaming
/// request.  A stream waiting on its provider wakes as soon as the token is
/// cancelled.
///
/// # Examples
///
/// ```rust
/// use insight_governance_core::stream::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify:    Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_for_waiters_and_late_callers() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });

        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled()).await.unwrap();
    }
}
