//! The action executor: one semantic action against one semantic target.
//!
//! `perform` resolves the target through the strategy resolver — polling
//! until the per-attempt deadline so late-appearing elements still resolve —
//! and then applies the action to the winning element. An intervening overlay
//! surfaces as [`ActionErrorKind::Blocked`]; the executor deliberately does
//! not dismiss it, so the retry policy stays visible in the calling workflow.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep};

use crate::channel::{ChannelError, DocumentChannel};
use crate::locator::Locator;
use crate::resolver::{ResolveError, resolve};

const RESOLVE_POLL: Duration = Duration::from_millis(100);

/// One semantic action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Fill { value: String },
    Click,
    Submit,
    ReadText,
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Action::Fill { .. } => "fill",
            Action::Click => "click",
            Action::Submit => "submit",
            Action::ReadText => "read-text",
        }
    }
}

/// Why an action failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionErrorKind {
    /// No candidate matched before the deadline.
    NotFound { attempted: usize },
    /// The target is occluded by an overlay; callers should dismiss and retry.
    Blocked,
    /// A wait inside the action exceeded its deadline.
    Timeout,
    /// The channel failed in a way the executor cannot classify.
    Channel { message: String },
}

/// Outcome of one `perform` call. Failures are encoded, not thrown, so the
/// calling workflow always gets the diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub target: String,
    pub action: &'static str,
    pub success: bool,
    /// Index of the candidate that matched, if resolution got that far.
    pub candidate_index: Option<usize>,
    pub elapsed: Duration,
    /// Text payload for `ReadText`.
    pub text: Option<String>,
    pub error: Option<ActionErrorKind>,
}

impl ActionResult {
    fn success(
        target: &str,
        action: &'static str,
        candidate_index: usize,
        elapsed: Duration,
        text: Option<String>,
    ) -> Self {
        ActionResult {
            target: target.to_string(),
            action,
            success: true,
            candidate_index: Some(candidate_index),
            elapsed,
            text,
            error: None,
        }
    }

    fn failure(
        target: &str,
        action: &'static str,
        candidate_index: Option<usize>,
        elapsed: Duration,
        error: ActionErrorKind,
    ) -> Self {
        ActionResult {
            target: target.to_string(),
            action,
            success: false,
            candidate_index,
            elapsed,
            text: None,
            error: Some(error),
        }
    }
}

fn classify_channel_error(err: ChannelError) -> ActionErrorKind {
    match err {
        ChannelError::ElementNotInteractable(_) => ActionErrorKind::Blocked,
        ChannelError::Timeout { .. } => ActionErrorKind::Timeout,
        other => ActionErrorKind::Channel {
            message: other.to_string(),
        },
    }
}

/// Perform `action` against `target`, bounded by `timeout`.
pub async fn perform(
    channel: &dyn DocumentChannel,
    target: &Locator,
    action: Action,
    timeout: Duration,
) -> ActionResult {
    let label = action.label();
    let started = Instant::now();

    // Resolution poll: the element may appear late (navigation, rendering),
    // so keep re-resolving until the deadline instead of failing on the
    // first miss.
    let resolution = loop {
        match resolve(channel, target).await {
            Ok(resolution) => break resolution,
            Err(ResolveError::NotFound { attempted, .. }) => {
                if started.elapsed() >= timeout {
                    return ActionResult::failure(
                        target.name(),
                        label,
                        None,
                        started.elapsed(),
                        ActionErrorKind::NotFound { attempted },
                    );
                }
                sleep(RESOLVE_POLL.min(timeout.saturating_sub(started.elapsed()))).await;
            }
            Err(ResolveError::Channel(err)) => {
                return ActionResult::failure(
                    target.name(),
                    label,
                    None,
                    started.elapsed(),
                    classify_channel_error(err),
                );
            }
        }
    };

    let applied = match &action {
        Action::Fill { value } => {
            if resolution.handle.is_confirm_key() {
                Err(ChannelError::Unsupported(
                    "confirm-key candidates cannot receive text",
                ))
            } else {
                channel.type_into(&resolution.handle, value).await
            }
        }
        Action::Click | Action::Submit => {
            if resolution.handle.is_confirm_key() {
                channel.press_confirm().await
            } else {
                channel.click(&resolution.handle).await
            }
        }
        Action::ReadText => match channel.read_text(&resolution.handle).await {
            Ok(text) => {
                return ActionResult::success(
                    target.name(),
                    label,
                    resolution.candidate_index,
                    started.elapsed(),
                    Some(text),
                );
            }
            Err(err) => Err(err),
        },
    };

    match applied {
        Ok(()) => ActionResult::success(
            target.name(),
            label,
            resolution.candidate_index,
            started.elapsed(),
            None,
        ),
        Err(err) => ActionResult::failure(
            target.name(),
            label,
            Some(resolution.candidate_index),
            started.elapsed(),
            classify_channel_error(err),
        ),
    }
}
