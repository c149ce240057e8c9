//! Strategy resolution: turn a locator into a concrete element handle.
//!
//! Candidates are evaluated strictly in declared order and the first one that
//! yields a visible, interactable element wins. Resolution is a pure query —
//! actuation belongs to the action executor.

use thiserror::Error;

use crate::channel::{ChannelError, DocumentChannel, ElementHandle};
use crate::locator::Locator;

/// Successful resolution of a locator.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub handle: ElementHandle,
    /// Index of the winning candidate within the locator.
    pub candidate_index: usize,
    /// How many candidates were evaluated, including the winner.
    pub attempted: usize,
}

/// Resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no candidate matched for '{target}' ({attempted} candidates tried)")]
    NotFound { target: String, attempted: usize },
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Evaluate `locator`'s candidates in order against the live document.
///
/// Each candidate is evaluated at most once per call; evaluation stops at the
/// first match. Fails with [`ResolveError::NotFound`] only after every
/// candidate has been tried.
pub async fn resolve(
    channel: &dyn DocumentChannel,
    locator: &Locator,
) -> Result<Resolution, ResolveError> {
    for (index, candidate) in locator.candidates().iter().enumerate() {
        if let Some(handle) = channel.query_visible(candidate).await? {
            return Ok(Resolution {
                handle,
                candidate_index: index,
                attempted: index + 1,
            });
        }
    }
    Err(ResolveError::NotFound {
        target: locator.name().to_string(),
        attempted: locator.len(),
    })
}
