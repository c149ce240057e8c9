//! Adaptive browser automation for an unstable rental-listing portal.
//!
//! The portal exposes no API and its markup shifts between sessions, so every
//! user-facing step — fill a field, click a control, decide what screen is
//! showing, pull a value out of the page — resolves through ranked fallback
//! strategies with bounded retries and heuristic scoring:
//!
//! - [`locator`] holds the named fallback tables, [`resolver`] walks them in
//!   order against the live document.
//! - [`classifier`] decides which screen is showing with a fixed precedence.
//! - [`modal`] detects and removes blocking ad overlays.
//! - [`action`] executes one semantic action with per-attempt deadlines.
//! - [`extract`] maps heterogeneous markup to canonical fields.
//! - [`session`] owns one browser-control [`channel`] and strings the
//!   components into login/search/extract workflows, parameterised by a
//!   [`profile`].

pub mod action;
pub mod artifacts;
pub mod channel;
pub mod classifier;
pub mod config;
pub mod dom;
pub mod extract;
pub mod locator;
pub mod logging;
pub mod modal;
pub mod profile;
pub mod resolver;
pub mod scripts;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use channel::chromium::ChromiumChannel;
pub use config::{Credentials, ScoutConfig};
pub use profile::SiteProfile;
pub use session::{SearchOutcome, Session, SessionError};
