//! Mock destination sender for testing
//!
//! Records every send and replays scripted outcomes, so scheduler and queue
//! behaviour can be verified without network access. Clones share state:
//! keep one handle in the test and give another to the engine.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use super::DestinationSender;
use crate::error::DeliveryError;

/// One recorded call to [`MockSender::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub token: String,
    pub text: String,
}

#[derive(Default)]
struct MockState {
    /// Outcomes consumed in order before falling back to `default_outcome`
    script: VecDeque<Result<(), DeliveryError>>,
    default_outcome: Option<DeliveryError>,
    sent: Vec<SentMessage>,
}

#[derive(Clone, Default)]
pub struct MockSender {
    state: Arc<Mutex<MockState>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockSender {
    /// A sender that accepts everything
    pub fn success() -> Self {
        Self::default()
    }

    /// A sender that fails every call with `error`
    pub fn failing(error: DeliveryError) -> Self {
        let sender = Self::default();
        sender.lock().default_outcome = Some(error);
        sender
    }

    /// A sender that sleeps before completing each call
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Queue the outcome of the next unscripted call
    pub fn push_outcome(&self, outcome: Result<(), DeliveryError>) {
        self.lock().script.push_back(outcome);
    }

    pub fn send_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.lock().sent.iter().map(|m| m.text.clone()).collect()
    }

    /// Highest number of sends that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DestinationSender for MockSender {
    async fn send(&self, token: &SecretString, text: &str) -> Result<(), DeliveryError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        {
            let mut state = self.lock();
            state.sent.push(SentMessage {
                token: token.expose_secret().to_string(),
                text: text.to_string(),
            });
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let outcome = {
            let mut state = self.lock();
            match state.script.pop_front() {
                Some(outcome) => outcome,
                None => match &state.default_outcome {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                },
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
