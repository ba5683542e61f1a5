//! Mock transport for testing
//!
//! This adapter stands in for a device without any network. It provides:
//! - Replies scripted per command text
//! - Controllable failure injection
//! - Simulated latency
//! - Call logging for test verification

use super::Transport;
use crate::error::{RoughError, RoughResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Scripted device
///
/// Clones share state, so a test can keep one handle while a driver owns another.
///
/// # Example
///
/// ```
/// use roughd::adapters::{MockAdapter, Transport};
///
/// # tokio_test_block_on(async {
/// let adapter = MockAdapter::new("pump");
/// adapter.respond("?S801", "=S801 nXDS;D396;P184;1800");
/// let reply = adapter.send(b"?S801").await.unwrap();
/// assert_eq!(reply, b"=S801 nXDS;D396;P184;1800\r");
/// assert_eq!(adapter.call_log(), vec!["?S801".to_string()]);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct MockAdapter {
    name: String,
    replies: Arc<Mutex<HashMap<String, String>>>,
    default_reply: Arc<Mutex<Option<String>>>,
    latency: Arc<Mutex<Duration>>,
    fail_next: Arc<AtomicBool>,
    fail_always: Arc<AtomicBool>,
    call_log: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAdapter {
    /// Create a mock device that knows no commands yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Arc::new(Mutex::new(HashMap::new())),
            default_reply: Arc::new(Mutex::new(None)),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            fail_next: Arc::new(AtomicBool::new(false)),
            fail_always: Arc::new(AtomicBool::new(false)),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reply `reply` (terminator appended) whenever `command` is sent.
    pub fn respond(&self, command: &str, reply: &str) -> &Self {
        lock(&self.replies).insert(command.to_string(), reply.to_string());
        self
    }

    /// Reply used for commands without a scripted answer.
    pub fn set_default_reply(&self, reply: &str) {
        *lock(&self.default_reply) = Some(reply.to_string());
    }

    /// Delay every exchange by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = latency;
        self
    }

    /// Make the next exchange time out.
    pub fn inject_next_failure(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every exchange time out until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_always.store(unreachable, Ordering::SeqCst);
    }

    /// Commands sent so far, without terminator.
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.call_log).clone()
    }

    /// Number of commands sent so far.
    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        lock(&self.call_log).clear();
    }

    fn timeout_error(&self) -> RoughError {
        RoughError::ReadTimeout {
            device: self.name.clone(),
            timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Transport for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, command: &[u8]) -> RoughResult<Vec<u8>> {
        let command = String::from_utf8_lossy(command).into_owned();
        lock(&self.call_log).push(command.clone());

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.fail_next.swap(false, Ordering::SeqCst) || self.fail_always.load(Ordering::SeqCst)
        {
            return Err(self.timeout_error());
        }

        let reply = lock(&self.replies)
            .get(&command)
            .cloned()
            .or_else(|| lock(&self.default_reply).clone());

        match reply {
            Some(reply) => {
                let mut bytes = reply.into_bytes();
                bytes.push(super::EOL);
                Ok(bytes)
            }
            None => Err(self.timeout_error()),
        }
    }
}
