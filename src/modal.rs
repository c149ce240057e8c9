//! Modal dismissal: detect blocking overlays and get them out of the way.
//!
//! Each attempt re-checks the blocking predicate first, so running the engine
//! against a clean page is a no-op. Candidate overlays come back from the
//! channel as typed snapshots and the close-control choice is a pure weighted
//! score over them; when no control can be activated the overlay is forcibly
//! hidden so it at least stops intercepting input.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelError, DocumentChannel, ElementHandle, wait_until};
use crate::classifier::StateMarkers;
use crate::dom::Rect;

/// Literal glyphs that mark a close control on their own.
const CLOSE_GLYPHS: &[&str] = &["×", "✕", "╳", "x", "X"];

/// Terms that mark a close control through text, class, ARIA or title.
const CLOSE_TERMS: &[&str] = &["close", "dismiss", "閉じる"];

/// Outcome of a dismissal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissOutcome {
    /// Nothing blocks anymore; `attempts` scoring passes were needed.
    Dismissed { attempts: usize },
    /// The overlay survived every attempt; callers should expect subsequent
    /// actions to fail blocked.
    Persisted { attempts: usize },
}

impl DismissOutcome {
    pub fn is_dismissed(&self) -> bool {
        matches!(self, DismissOutcome::Dismissed { .. })
    }

    pub fn attempts(&self) -> usize {
        match self {
            DismissOutcome::Dismissed { attempts } | DismissOutcome::Persisted { attempts } => {
                *attempts
            }
        }
    }
}

/// A candidate close control inside an overlay, decoded from the enumeration
/// probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloseControl {
    #[serde(rename = "xpath")]
    pub handle: ElementHandle,
    pub rect: Rect,
    pub text: String,
    pub classes: Vec<String>,
    pub aria_label: Option<String>,
    pub role: Option<String>,
    pub title: Option<String>,
}

/// A blocking-overlay candidate with its plausible close controls.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlaySnapshot {
    #[serde(rename = "xpath")]
    pub handle: ElementHandle,
    pub rect: Rect,
    pub text: String,
    pub close_controls: Vec<CloseControl>,
}

fn contains_close_term(value: &str) -> bool {
    let lowered = value.to_lowercase();
    CLOSE_TERMS.iter().any(|term| lowered.contains(term))
}

/// Weighted score of one close control relative to its overlay. Pure.
pub fn score_close_control(overlay: &Rect, control: &CloseControl) -> f64 {
    let mut score = 0.0;

    // Close controls live near the overlay's top-right corner.
    let distance = control.rect.distance_to_top_right(overlay);
    if distance <= 80.0 {
        score += 3.0 * (1.0 - distance / 80.0);
    }

    let text = control.text.trim();
    if CLOSE_GLYPHS.contains(&text) {
        score += 4.0;
    } else if contains_close_term(text) {
        score += 3.0;
    }

    if control
        .classes
        .iter()
        .any(|class| contains_close_term(class))
    {
        score += 2.0;
    }

    if control
        .aria_label
        .as_deref()
        .map_or(false, contains_close_term)
    {
        score += 2.0;
    }
    if control.role.as_deref() == Some("button") {
        score += 0.5;
    }
    if control.title.as_deref().map_or(false, contains_close_term) {
        score += 1.0;
    }

    score
}

/// Highest-scoring close control of an overlay, requiring a positive score.
/// Ties resolve to the earlier enumerated control.
pub fn best_close_control(overlay: &OverlaySnapshot) -> Option<&CloseControl> {
    let mut best: Option<(&CloseControl, f64)> = None;
    for control in &overlay.close_controls {
        let score = score_close_control(&overlay.rect, control);
        if score <= 0.0 {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((control, score)),
        }
    }
    best.map(|(control, _)| control)
}

/// Run the dismissal loop for at most `max_attempts` scoring passes.
///
/// The `settle` window bounds how long each attempt waits for the page to
/// react before re-checking; it is a condition poll, not a fixed sleep.
pub async fn dismiss(
    channel: &dyn DocumentChannel,
    markers: &StateMarkers,
    max_attempts: usize,
    settle: Duration,
) -> Result<DismissOutcome, ChannelError> {
    for attempt in 0..max_attempts {
        let probe = channel.page_probe(markers).await?;
        if !probe.overlay_blocking {
            return Ok(DismissOutcome::Dismissed { attempts: attempt });
        }

        let overlays = channel.overlays(markers).await?;
        // Largest overlay first: the principal blocker is what we want gone.
        let principal = overlays
            .iter()
            .max_by(|a, b| a.rect.area().total_cmp(&b.rect.area()));
        let Some(overlay) = principal else {
            // The blocking predicate held but enumeration found nothing
            // actionable; nothing to click, nothing to hide.
            continue;
        };

        match best_close_control(overlay) {
            Some(control) => {
                if channel.click(&control.handle).await.is_err() {
                    channel.force_hide(&overlay.handle).await?;
                }
            }
            None => {
                channel.force_hide(&overlay.handle).await?;
            }
        }

        // Give the page a bounded window to settle; expiry just moves on to
        // the next attempt.
        let _ = wait_until(
            "overlay to clear",
            settle,
            settle.min(Duration::from_millis(50)).max(Duration::from_millis(1)),
            || async { Ok(!channel.page_probe(markers).await?.overlay_blocking) },
        )
        .await;
    }

    let probe = channel.page_probe(markers).await?;
    if probe.overlay_blocking {
        Ok(DismissOutcome::Persisted {
            attempts: max_attempts,
        })
    } else {
        Ok(DismissOutcome::Dismissed {
            attempts: max_attempts,
        })
    }
}
