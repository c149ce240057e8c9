//! Page state classification.
//!
//! One probe gathers every signal in a single evaluation round trip, then
//! [`classify_probe`] applies the fixed precedence. Precedence is a design
//! constant: an overlay masking a login form still classifies as
//! `ModalBlocking`, and callers are expected to dismiss it before asking
//! again. States are computed fresh on every call and never cached across
//! navigations.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelError, DocumentChannel};

/// Classification of the screen currently displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageState {
    /// Email + password inputs are present.
    LoginEmailPassword,
    /// A company/store selection control is present (phone-verification flow).
    LoginPhoneVerification,
    /// A blocking overlay intercepts input.
    ModalBlocking,
    /// At least one result card is present.
    ResultsFound,
    /// The page explicitly signals zero matches.
    ResultsEmpty,
    /// None of the known predicates held.
    Unknown,
}

/// Site-specific signals the classifier and modal engine evaluate.
///
/// Injected via the [`SiteProfile`](crate::profile::SiteProfile) so the same
/// engine drives different portal versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMarkers {
    /// Selector list detecting an email-type input.
    pub email_input_selector: String,
    /// Selector list detecting a password-type input.
    pub password_input_selector: String,
    /// Selector list detecting the company/store selection control.
    pub company_select_selector: String,
    /// Selector matching per-result detail anchors.
    pub result_anchor_selector: String,
    /// Literal phrases that signal zero matches.
    pub no_results_phrases: Vec<String>,
    /// Per-card status marker ("recruiting" in the target portal).
    pub status_marker: String,
    /// Minimum overlay width before it counts as blocking, CSS px.
    pub overlay_min_width: f64,
    /// Minimum overlay height before it counts as blocking, CSS px.
    pub overlay_min_height: f64,
    /// Minimum z-index for a positioned element to count as an overlay.
    pub overlay_z_threshold: i64,
    /// Cap on the flattened body text shipped back by probes.
    pub body_text_limit: usize,
}

/// Raw classification signals decoded from the page probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageProbe {
    pub overlay_blocking: bool,
    pub has_email_input: bool,
    pub has_password_input: bool,
    pub has_company_select: bool,
    pub result_anchor_count: u64,
    pub body_text: String,
}

/// Parse the first "N件" result count from flattened page text.
pub fn parse_result_count(text: &str) -> Option<u64> {
    static COUNT: OnceLock<Regex> = OnceLock::new();
    let pattern = COUNT.get_or_init(|| Regex::new(r"(\d+)\s*件").expect("count pattern compiles"));
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|group| group.as_str().parse().ok())
}

/// Apply the fixed state precedence to a decoded probe. Pure.
pub fn classify_probe(probe: &PageProbe, markers: &StateMarkers) -> PageState {
    if probe.overlay_blocking {
        return PageState::ModalBlocking;
    }
    if probe.has_email_input && probe.has_password_input {
        return PageState::LoginEmailPassword;
    }
    if probe.has_company_select {
        return PageState::LoginPhoneVerification;
    }

    let count = parse_result_count(&probe.body_text);
    let no_results_phrase = markers
        .no_results_phrases
        .iter()
        .any(|phrase| probe.body_text.contains(phrase));
    if no_results_phrase || count == Some(0) {
        return PageState::ResultsEmpty;
    }

    let has_status_marker =
        !markers.status_marker.is_empty() && probe.body_text.contains(&markers.status_marker);
    if probe.result_anchor_count > 0 || count.map_or(false, |n| n > 0) || has_status_marker {
        return PageState::ResultsFound;
    }

    PageState::Unknown
}

/// Probe the live document and classify it.
pub async fn classify(
    channel: &dyn DocumentChannel,
    markers: &StateMarkers,
) -> Result<PageState, ChannelError> {
    let probe = channel.page_probe(markers).await?;
    Ok(classify_probe(&probe, markers))
}
