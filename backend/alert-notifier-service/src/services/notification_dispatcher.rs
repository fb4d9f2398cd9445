//! Resolve-then-deliver use case driven by the alert consumer
//!
//! The dispatcher owns exactly two failure boundaries: resolving the client's
//! destination, and sending to it. It performs no retries; callers decide what
//! a failure means (the consumer logs it and acknowledges the message anyway).

use crate::models::{AlertEvent, Destination};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, Instrument};

/// Errors from looking up a client's destination
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No registration exists for the client id
    #[error("no destination registered for client {0}")]
    NotFound(String),

    /// The client id can never match a registration
    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    /// The lookup itself failed (store unavailable, timeout, ...)
    #[error("destination lookup failed: {0}")]
    Backend(String),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound(_))
    }

    /// Failures that may succeed if tried again later
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Backend(_))
    }
}

/// Errors from sending a notification over the channel
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Request never got a usable answer (connect, timeout, TLS, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// The channel API refused the message
    #[error("rejected by channel (status {status}): {description}")]
    Rejected { status: u16, description: String },

    /// The channel answered with something we could not interpret
    #[error("invalid response from channel: {0}")]
    InvalidResponse(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Rejected { status, .. } => *status == 429 || *status >= 500,
            DeliveryError::InvalidResponse(_) => false,
        }
    }
}

/// Failure of a single `notify` call, tagged with the step that failed
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("resolve destination for client {client_id}: {source}")]
    Resolve {
        client_id: String,
        #[source]
        source: ResolveError,
    },

    #[error("deliver notification to {destination}: {source}")]
    Deliver {
        destination: Destination,
        #[source]
        source: DeliveryError,
    },
}

/// Looks up where a client's notifications go
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    async fn get_destination(&self, client_id: &str) -> Result<Destination, ResolveError>;
}

/// Sends one formatted notification; must tolerate concurrent calls
#[async_trait]
pub trait DeliverySender: Send + Sync {
    async fn send(&self, destination: &Destination, event: &AlertEvent)
        -> Result<(), DeliveryError>;
}

/// Anything that can handle a decoded alert (the dispatcher, or a test double)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<(), DispatchError>;
}

/// Composes a resolver and a sender
#[derive(Clone)]
pub struct NotificationDispatcher {
    resolver: Arc<dyn DestinationResolver>,
    sender: Arc<dyn DeliverySender>,
}

impl NotificationDispatcher {
    pub fn new(resolver: Arc<dyn DestinationResolver>, sender: Arc<dyn DeliverySender>) -> Self {
        Self { resolver, sender }
    }

    async fn resolve_and_send(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let destination = self
            .resolver
            .get_destination(&event.client_id)
            .await
            .map_err(|source| DispatchError::Resolve {
                client_id: event.client_id.clone(),
                source,
            })?;

        debug!(destination = %destination, "Destination resolved");

        self.sender
            .send(&destination, event)
            .await
            .map_err(|source| DispatchError::Deliver {
                destination: destination.clone(),
                source,
            })?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn notify(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let span = tracing::info_span!(
            "notify",
            request_id = %event.request_id,
            client_id = %event.client_id,
            error = tracing::field::Empty,
        );

        let result = self.resolve_and_send(event).instrument(span.clone()).await;
        if let Err(e) = &result {
            span.record("error", tracing::field::display(e));
        }
        result
    }
}
