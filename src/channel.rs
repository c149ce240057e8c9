//! The browser-control channel: a capability-style seam between the engine
//! and whatever drives the live document.
//!
//! The engine only ever talks to [`DocumentChannel`]. The production
//! implementation ([`chromium::ChromiumChannel`]) speaks CDP through
//! chromiumoxide; tests drive the same trait against an in-memory document.
//! Every wait in the engine goes through [`wait_until`], so suspension is
//! always bounded by an explicit deadline and fails with
//! [`ChannelError::Timeout`] instead of retrying silently.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::classifier::{PageProbe, StateMarkers};
use crate::dom::InspectReport;
use crate::extract::AncestorStep;
use crate::locator::Candidate;
use crate::modal::OverlaySnapshot;

pub mod chromium;

/// Opaque reference to a resolved element, valid for the current page
/// generation. The chromium channel stores an absolute XPath inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(String);

const CONFIRM_KEY_HANDLE: &str = "synthetic:confirm-key";

impl ElementHandle {
    pub fn new(token: impl Into<String>) -> Self {
        ElementHandle(token.into())
    }

    /// Sentinel handle produced when a [`Candidate::confirm_key`] matches.
    pub fn confirm_key() -> Self {
        ElementHandle(CONFIRM_KEY_HANDLE.to_string())
    }

    pub fn is_confirm_key(&self) -> bool {
        self.0 == CONFIRM_KEY_HANDLE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Errors surfaced by the browser-control channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("failed to decode {context} probe result")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("element not interactable: {0}")]
    ElementNotInteractable(String),
    #[error("timed out after {waited_ms} ms waiting for {condition}")]
    Timeout { condition: String, waited_ms: u64 },
    #[error("browser channel not initialized")]
    NotInitialized,
    #[error("channel feature unsupported: {0}")]
    Unsupported(&'static str),
}

/// Capability interface to a remote, script-executing document surface.
///
/// All operations are strictly sequential per channel; a channel is owned by
/// exactly one [`Session`](crate::session::Session) at a time.
#[async_trait]
pub trait DocumentChannel: Send + Sync {
    /// Load `url` and suspend until a minimal readiness condition holds.
    async fn navigate(&self, url: &str) -> Result<(), ChannelError>;

    async fn current_url(&self) -> Result<String, ChannelError>;

    async fn title(&self) -> Result<String, ChannelError>;

    /// Execute a script in document context and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<JsonValue, ChannelError>;

    /// Test a candidate against the live document, returning a handle to the
    /// first visible match.
    async fn query_visible(
        &self,
        candidate: &Candidate,
    ) -> Result<Option<ElementHandle>, ChannelError>;

    async fn click(&self, handle: &ElementHandle) -> Result<(), ChannelError>;

    async fn type_into(&self, handle: &ElementHandle, text: &str) -> Result<(), ChannelError>;

    async fn read_text(&self, handle: &ElementHandle) -> Result<String, ChannelError>;

    /// Dispatch the synthetic confirm keystroke to the focused element.
    async fn press_confirm(&self) -> Result<(), ChannelError>;

    /// Flattened page text for free-text extractors and marker checks.
    async fn body_text(&self) -> Result<String, ChannelError>;

    /// Gather all classification signals in one round trip.
    async fn page_probe(&self, markers: &StateMarkers) -> Result<PageProbe, ChannelError>;

    /// Enumerate blocking-overlay candidates with their close controls.
    async fn overlays(&self, markers: &StateMarkers) -> Result<Vec<OverlaySnapshot>, ChannelError>;

    /// Last-resort overlay removal: make the element non-visible so it no
    /// longer intercepts input.
    async fn force_hide(&self, handle: &ElementHandle) -> Result<(), ChannelError>;

    /// Labeled-cell lookup: value cell adjacent to a label cell.
    async fn label_value(&self, labels: &[String]) -> Result<Option<String>, ChannelError>;

    /// Class/attribute-token lookup: text of the first element whose class
    /// list contains `token`.
    async fn class_token_value(&self, token: &str) -> Result<Option<String>, ChannelError>;

    /// Resolve `anchor` and report its ancestor chain for container scoring.
    async fn anchor_ancestors(
        &self,
        anchor: &Candidate,
        max_depth: usize,
    ) -> Result<Vec<AncestorStep>, ChannelError>;

    /// Serialize an element subtree for the persistence collaborator.
    async fn outer_markup(&self, handle: &ElementHandle) -> Result<String, ChannelError>;

    async fn capture_screenshot(&self) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::Unsupported("screenshot capture"))
    }

    /// Catalogue plausible search controls on the current page.
    async fn inspect(&self) -> Result<InspectReport, ChannelError> {
        Err(ChannelError::Unsupported("structure inspection"))
    }

    /// Release the underlying browser resources. Safe to call more than once.
    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Poll `probe` until it reports true or `deadline` elapses.
///
/// Cancellation-safe: dropping the returned future between polls leaves the
/// channel untouched, so the session can be reused after an abort.
pub async fn wait_until<F, Fut>(
    condition: &str,
    deadline: Duration,
    poll_interval: Duration,
    mut probe: F,
) -> Result<(), ChannelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ChannelError>>,
{
    let started = Instant::now();
    loop {
        if probe().await? {
            return Ok(());
        }
        if started.elapsed() >= deadline {
            return Err(ChannelError::Timeout {
                condition: condition.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        sleep(poll_interval.min(deadline.saturating_sub(started.elapsed()))).await;
    }
}

/// Decode a JSON probe result into its typed shape, tagging failures with the
/// probe name so they never surface as a bare serde error.
pub fn decode<T: DeserializeOwned>(
    context: &'static str,
    value: JsonValue,
) -> Result<T, ChannelError> {
    serde_json::from_value(value).map_err(|source| ChannelError::Decode { context, source })
}
