//! Session: the exclusive owner of one browser-control channel, and the
//! workflows built on top of the engine components.
//!
//! A session is constructed with an explicit configuration and site profile;
//! nothing is read from ambient globals. Workflows follow the portal's actual
//! flow — log in, reach the top page, open list search, dismiss the ad modal,
//! submit a search, extract the results — and every blocked action is retried
//! through the modal dismissal engine a bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::action::{Action, ActionErrorKind, ActionResult, perform};
use crate::artifacts::{ArtifactSink, FsArtifactSink, NullArtifactSink};
use crate::channel::{ChannelError, DocumentChannel, wait_until};
use crate::classifier::{PageState, classify, parse_result_count};
use crate::config::ScoutConfig;
use crate::dom::InspectReport;
use crate::extract::{ExtractError, ExtractedRecord, card_fields, extract, select_container};
use crate::locator::Locator;
use crate::logging::ScoutLogger;
use crate::modal::{DismissOutcome, dismiss};
use crate::profile::{SiteProfile, targets};

const STATE_POLL: Duration = Duration::from_millis(250);

/// Errors surfaced by session workflows.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("login credentials are not configured")]
    AuthRequired,
    #[error("page state {state:?} is not supported while {context}")]
    UnsupportedFlow {
        state: PageState,
        context: &'static str,
    },
    #[error("{action} on '{target}' failed: {detail}")]
    Action {
        target: String,
        action: &'static str,
        detail: String,
    },
    #[error("locator '{0}' is not defined in the site profile")]
    MissingLocator(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Result of a full search workflow.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub state: PageState,
    pub record: ExtractedRecord,
    /// Fields no extractor could produce; empty when extraction was complete.
    pub missing: Vec<String>,
}

/// One workflow run against one portal, driving one channel.
pub struct Session {
    channel: Box<dyn DocumentChannel>,
    profile: SiteProfile,
    config: ScoutConfig,
    logger: Arc<ScoutLogger>,
    artifacts: Arc<dyn ArtifactSink>,
}

impl Session {
    /// Build a session with collaborators derived from the configuration: a
    /// console logger and a filesystem artifact sink if a directory is set.
    pub fn new(
        channel: Box<dyn DocumentChannel>,
        profile: SiteProfile,
        config: ScoutConfig,
    ) -> Self {
        let logger = Arc::new(ScoutLogger::new(config.verbose));
        let artifacts: Arc<dyn ArtifactSink> = match &config.artifacts_dir {
            Some(dir) => Arc::new(FsArtifactSink::new(dir.clone())),
            None => Arc::new(NullArtifactSink),
        };
        Self::with_collaborators(channel, profile, config, logger, artifacts)
    }

    pub fn with_collaborators(
        channel: Box<dyn DocumentChannel>,
        profile: SiteProfile,
        config: ScoutConfig,
        logger: Arc<ScoutLogger>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Self {
        Session {
            channel,
            profile,
            config,
            logger,
            artifacts,
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    pub fn logger(&self) -> &ScoutLogger {
        &self.logger
    }

    /// Release the underlying browser.
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.channel.shutdown().await
    }

    /// Navigate the owned channel to an arbitrary URL.
    pub async fn goto(&self, url: &str) -> Result<(), SessionError> {
        self.channel.navigate(url).await.map_err(SessionError::from)
    }

    /// Full workflow: login, search, collect.
    pub async fn run(&self, term: &str) -> Result<SearchOutcome, SessionError> {
        self.login().await?;
        self.search(term).await?;
        self.collect().await
    }

    /// Navigate to the login page and authenticate.
    pub async fn login(&self) -> Result<(), SessionError> {
        self.logger
            .info("starting adaptive login", Some("session"), None);
        self.channel.navigate(&self.profile.login_url).await?;
        self.snapshot("login_page").await;

        let mut state = self.classify().await?;
        if state == PageState::ModalBlocking {
            self.dismiss_overlays().await?;
            state = self.classify().await?;
        }

        match state {
            PageState::LoginEmailPassword => self.submit_credentials().await?,
            PageState::LoginPhoneVerification => {
                return Err(SessionError::UnsupportedFlow {
                    state,
                    context: "logging in",
                });
            }
            PageState::ResultsFound | PageState::ResultsEmpty => {
                self.logger.info(
                    "already authenticated, skipping login",
                    Some("session"),
                    None,
                );
            }
            PageState::ModalBlocking => {
                // The overlay survived dismissal; the blocked-action retry in
                // `act` is the remaining recourse.
                self.logger.error(
                    "overlay persisted on the login page, attempting login anyway",
                    Some("session"),
                    None,
                );
                self.submit_credentials().await?;
            }
            PageState::Unknown => {
                // The landing page sometimes hides the form behind a login
                // link; click it once and take another look.
                let entry = self.act(targets::LOGIN_ENTRY, Action::Click).await?;
                if entry.success {
                    let _ = self
                        .wait_for_state("login form to appear", |state| {
                            state != PageState::Unknown
                        })
                        .await;
                }
                let state = self.classify().await?;
                if state == PageState::LoginEmailPassword {
                    self.submit_credentials().await?;
                } else {
                    return Err(SessionError::UnsupportedFlow {
                        state,
                        context: "logging in",
                    });
                }
            }
        }

        self.snapshot("after_login").await;
        Ok(())
    }

    /// Submit a property-name search from the portal top page.
    pub async fn search(&self, term: &str) -> Result<(), SessionError> {
        self.logger.info(
            format!("searching for property '{term}'"),
            Some("session"),
            None,
        );

        let url = self.channel.current_url().await?;
        if !url.contains(&self.profile.top_path) {
            self.channel.navigate(&self.profile.top_url).await?;
        }

        let result = self.act(targets::LIST_SEARCH, Action::Click).await?;
        self.require(targets::LIST_SEARCH, result)?;

        // The list page greets with an ad modal; clear it before typing.
        self.dismiss_overlays().await?;
        self.snapshot("after_modal_close").await;

        let result = self
            .act(
                targets::PROPERTY_NAME_INPUT,
                Action::Fill {
                    value: term.to_string(),
                },
            )
            .await?;
        self.require(targets::PROPERTY_NAME_INPUT, result)?;
        self.snapshot("after_property_input").await;

        let result = self.act(targets::SEARCH_SUBMIT, Action::Submit).await?;
        self.require(targets::SEARCH_SUBMIT, result)?;

        self.wait_for_state("search results", |state| {
            matches!(state, PageState::ResultsFound | PageState::ResultsEmpty)
        })
        .await?;
        self.snapshot("search_results").await;
        Ok(())
    }

    /// Extract whatever the results page offers.
    pub async fn collect(&self) -> Result<SearchOutcome, SessionError> {
        let mut record = ExtractedRecord::new();
        record.insert("page_url".to_string(), self.channel.current_url().await?);
        record.insert("page_title".to_string(), self.channel.title().await?);

        let state = self.classify().await?;
        match state {
            PageState::ResultsEmpty => {
                record.insert("search_status".to_string(), "no_results".to_string());
                let body = self.channel.body_text().await?;
                if let Some(phrase) = self
                    .profile
                    .markers
                    .no_results_phrases
                    .iter()
                    .find(|phrase| body.contains(phrase.as_str()))
                {
                    record.insert("no_results_message".to_string(), phrase.clone());
                }
                self.logger
                    .info("no search results found", Some("extract"), None);
                self.save_record(&record).await;
                Ok(SearchOutcome {
                    state,
                    record,
                    missing: Vec::new(),
                })
            }
            PageState::ResultsFound => {
                record.insert("search_status".to_string(), "results_found".to_string());

                let report = extract(self.channel.as_ref(), &self.profile.rules).await?;
                for (field, value) in report.record {
                    record.insert(field, value);
                }
                if !report.missing.is_empty() {
                    self.logger.debug(
                        "extraction left fields unfilled",
                        Some("extract"),
                        Some(json!({ "missing": report.missing })),
                    );
                }

                let body = self.channel.body_text().await?;
                if let Some(count) = parse_result_count(&body) {
                    record.insert("result_count".to_string(), count.to_string());
                }

                self.collect_card(&mut record).await?;

                self.save_record(&record).await;
                Ok(SearchOutcome {
                    state,
                    record,
                    missing: report.missing,
                })
            }
            other => Err(SessionError::UnsupportedFlow {
                state: other,
                context: "collecting results",
            }),
        }
    }

    /// Catalogue plausible search controls on the current page.
    pub async fn inspect(&self) -> Result<InspectReport, SessionError> {
        let report = self.channel.inspect().await?;
        self.logger.info(
            format!(
                "inspection found {} search inputs and {} search buttons",
                report.search_inputs.len(),
                report.search_buttons.len()
            ),
            Some("session"),
            None,
        );
        Ok(report)
    }

    /// Discover the best result-card container and fold its fields into the
    /// record under a `card_` prefix.
    async fn collect_card(&self, record: &mut ExtractedRecord) -> Result<(), SessionError> {
        let locator = self.locator(targets::RESULT_DETAIL_LINK)?;
        let anchor = &locator.candidates()[0];

        let steps = self
            .channel
            .anchor_ancestors(anchor, self.profile.card_max_depth)
            .await?;
        let Some(card) = select_container(
            &steps,
            &self.profile.card_expected,
            self.profile.card_min_score,
        ) else {
            self.logger
                .debug("no result card container found", Some("extract"), None);
            return Ok(());
        };

        match self.channel.outer_markup(&card.handle).await {
            Ok(markup) => {
                if let Err(err) = self.artifacts.save_markup("property_card", &markup).await {
                    self.logger.error(
                        format!("failed to persist card markup: {err}"),
                        Some("extract"),
                        None,
                    );
                }
            }
            Err(err) => {
                self.logger.debug(
                    format!("card markup capture failed: {err}"),
                    Some("extract"),
                    None,
                );
            }
        }

        for (field, value) in card_fields(&card.text) {
            record.entry(format!("card_{field}")).or_insert(value);
        }
        Ok(())
    }

    async fn submit_credentials(&self) -> Result<(), SessionError> {
        let credentials = self
            .config
            .credentials
            .clone()
            .ok_or(SessionError::AuthRequired)?;

        let result = self
            .act(
                targets::EMAIL_INPUT,
                Action::Fill {
                    value: credentials.email.clone(),
                },
            )
            .await?;
        self.require(targets::EMAIL_INPUT, result)?;

        let result = self
            .act(
                targets::PASSWORD_INPUT,
                Action::Fill {
                    value: credentials.password.clone(),
                },
            )
            .await?;
        self.require(targets::PASSWORD_INPUT, result)?;

        let result = self.act(targets::LOGIN_SUBMIT, Action::Submit).await?;
        self.require(targets::LOGIN_SUBMIT, result)?;

        self.wait_for_state("login form to clear", |state| {
            state != PageState::LoginEmailPassword
        })
        .await
    }

    /// Perform one semantic action; a blocked target triggers modal
    /// dismissal and a bounded number of retries.
    async fn act(&self, target: &str, action: Action) -> Result<ActionResult, SessionError> {
        let locator = self.locator(target)?;
        let mut result = perform(
            self.channel.as_ref(),
            locator,
            action.clone(),
            self.config.action_timeout(),
        )
        .await;

        let mut retries = 0;
        while !result.success
            && matches!(result.error, Some(ActionErrorKind::Blocked))
            && retries < self.config.blocked_retries
        {
            self.logger.info(
                format!("'{target}' is blocked by an overlay, dismissing and retrying"),
                Some("action"),
                None,
            );
            self.dismiss_overlays().await?;
            retries += 1;
            result = perform(
                self.channel.as_ref(),
                locator,
                action.clone(),
                self.config.action_timeout(),
            )
            .await;
        }

        if result.success {
            self.logger.debug(
                format!("{} on '{target}' succeeded", result.action),
                Some("action"),
                Some(json!({
                    "candidateIndex": result.candidate_index,
                    "elapsedMs": result.elapsed.as_millis() as u64,
                })),
            );
        }
        Ok(result)
    }

    /// Turn a failed [`ActionResult`] into a terminal error carrying the
    /// target and the candidates that were tried.
    fn require(&self, target: &str, result: ActionResult) -> Result<ActionResult, SessionError> {
        if result.success {
            return Ok(result);
        }

        let detail = match (&result.error, self.locator(target)) {
            (Some(ActionErrorKind::NotFound { attempted }), Ok(locator)) => {
                let tried: Vec<String> = locator
                    .candidates()
                    .iter()
                    .take(*attempted)
                    .map(|candidate| candidate.to_string())
                    .collect();
                format!(
                    "no candidate matched ({} tried: {})",
                    attempted,
                    tried.join("; ")
                )
            }
            (Some(ActionErrorKind::Blocked), _) => {
                "target still occluded after overlay dismissal retries".to_string()
            }
            (Some(ActionErrorKind::Timeout), _) => "wait deadline exceeded".to_string(),
            (Some(ActionErrorKind::Channel { message }), _) => message.clone(),
            _ => "unclassified failure".to_string(),
        };

        self.logger.error(
            format!("{} on '{target}' failed: {detail}", result.action),
            Some("action"),
            None,
        );
        Err(SessionError::Action {
            target: target.to_string(),
            action: result.action,
            detail,
        })
    }

    async fn dismiss_overlays(&self) -> Result<DismissOutcome, SessionError> {
        let outcome = dismiss(
            self.channel.as_ref(),
            &self.profile.markers,
            self.config.dismiss_attempts,
            self.config.dismiss_settle(),
        )
        .await?;

        match outcome {
            DismissOutcome::Dismissed { attempts } if attempts > 0 => {
                self.logger.info(
                    format!("overlay dismissed after {attempts} attempts"),
                    Some("modal"),
                    None,
                );
            }
            DismissOutcome::Persisted { attempts } => {
                self.logger.error(
                    format!("overlay persisted after {attempts} attempts, continuing"),
                    Some("modal"),
                    None,
                );
            }
            DismissOutcome::Dismissed { .. } => {}
        }
        Ok(outcome)
    }

    async fn classify(&self) -> Result<PageState, SessionError> {
        let state = classify(self.channel.as_ref(), &self.profile.markers).await?;
        self.logger.debug(
            format!("page classified as {state:?}"),
            Some("classify"),
            None,
        );
        Ok(state)
    }

    async fn wait_for_state(
        &self,
        condition: &str,
        predicate: impl Fn(PageState) -> bool,
    ) -> Result<(), SessionError> {
        wait_until(condition, self.config.nav_timeout(), STATE_POLL, || async {
            Ok(predicate(
                classify(self.channel.as_ref(), &self.profile.markers).await?,
            ))
        })
        .await
        .map_err(SessionError::from)
    }

    /// Capture a screenshot artifact; failures are logged, never fatal.
    async fn snapshot(&self, label: &str) {
        match self.channel.capture_screenshot().await {
            Ok(bytes) => {
                if let Err(err) = self.artifacts.save_screenshot(label, &bytes).await {
                    self.logger.error(
                        format!("failed to persist screenshot '{label}': {err}"),
                        Some("session"),
                        None,
                    );
                }
            }
            Err(ChannelError::Unsupported(_)) => {}
            Err(err) => {
                self.logger.debug(
                    format!("screenshot '{label}' failed: {err}"),
                    Some("session"),
                    None,
                );
            }
        }
    }

    async fn save_record(&self, record: &ExtractedRecord) {
        if let Err(err) = self.artifacts.save_record("property_details", record).await {
            self.logger.error(
                format!("failed to persist extracted record: {err}"),
                Some("session"),
                None,
            );
        }
    }

    fn locator(&self, name: &str) -> Result<&Locator, SessionError> {
        self.profile
            .locator(name)
            .ok_or_else(|| SessionError::MissingLocator(name.to_string()))
    }
}
