//! Sync-side collaborator traits and result types: the remote identity
//! client, the channel id source, the clock, and per-run outcomes.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;

use crate::mutation::{AttributeMutation, TagGroupsMutation};
use crate::queue::ContactOperation;
use crate::types::ContactIdentity;

// ============================================================================
// ContactApi: remote identity client
// ============================================================================

/// Failure classes of a remote identity call. Together with `Ok` these form
/// the five outcomes the reconciliation engine distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactApiError {
    #[error("Server error (status {status})")]
    Server { status: u16 },

    #[error("Rate limited")]
    RateLimited,

    #[error("Client error (status {status}): {message}")]
    Client { status: u16, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Whether a failure may succeed if retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Server 5xx, 429, transport failure. Retry the same operation later.
    Transient,
    /// Can never succeed. Drop the operation and move on.
    Permanent,
}

impl ContactApiError {
    /// Classify a non-2xx HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited,
            500..=599 => Self::Server { status },
            _ => Self::Client {
                status,
                message: message.into(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Server { .. } | Self::RateLimited | Self::Transport(_) => ErrorKind::Transient,
            Self::Client { .. } => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type ApiResult<T> = std::result::Result<T, ContactApiError>;

/// User-provided network layer for the four identity calls.
///
/// Implementations own request signing, TLS and timeouts; a timeout should
/// surface as [`ContactApiError::Transport`].
#[async_trait]
pub trait ContactApi: Send + Sync {
    async fn resolve(&self, channel_id: &str) -> ApiResult<ContactIdentity>;

    /// `contact_id` is passed only when the current contact is anonymous, so
    /// the server can merge it into the named contact.
    async fn identify(
        &self,
        named_user_id: &str,
        channel_id: &str,
        contact_id: Option<&str>,
    ) -> ApiResult<ContactIdentity>;

    async fn reset(&self, channel_id: &str) -> ApiResult<ContactIdentity>;

    async fn update(
        &self,
        contact_id: &str,
        tag_group_mutations: &[TagGroupsMutation],
        attribute_mutations: &[AttributeMutation],
    ) -> ApiResult<()>;
}

// ============================================================================
// Channel id and clock
// ============================================================================

/// Supplies the device channel id, once the channel has been created.
pub trait ChannelIdSource: Send + Sync {
    fn channel_id(&self) -> Option<String>;
}

impl<F> ChannelIdSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn channel_id(&self) -> Option<String> {
        self()
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

impl<F> Clock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_ms(&self) -> i64 {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

// ============================================================================
// Run outcome
// ============================================================================

/// Terminal state of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The log progressed (or there was nothing to do).
    Completed,
    /// The head operation stays put; run again after a backoff.
    RetryScheduled,
}

/// An error folded into a run outcome. Reported, never thrown.
#[derive(Debug, Clone, PartialEq)]
pub struct RunError {
    pub operation: Option<ContactOperation>,
    pub error: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// The operation attempted in this run, post-collapse.
    pub operation: Option<ContactOperation>,
    pub error: Option<RunError>,
    /// Whether the log still holds work after this run.
    pub has_more: bool,
}

impl RunOutcome {
    pub fn idle() -> Self {
        Self {
            status: RunStatus::Completed,
            operation: None,
            error: None,
            has_more: false,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.status == RunStatus::RetryScheduled
    }
}
