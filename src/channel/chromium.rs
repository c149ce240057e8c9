//! Chromiumoxide-backed implementation of the document channel.
//!
//! Owns the browser process lifecycle: launch configuration is derived from
//! [`ScoutConfig`], the CDP event handler runs on a background task, and
//! shutdown closes the browser and aborts the handler. One channel drives
//! exactly one page; the engine's session model never shares it.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page as ChromiumPage, ScreenshotParams};
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::channel::{ChannelError, DocumentChannel, ElementHandle, decode, wait_until};
use crate::classifier::{PageProbe, StateMarkers};
use crate::config::ScoutConfig;
use crate::dom::InspectReport;
use crate::extract::AncestorStep;
use crate::locator::{Candidate, Strategy};
use crate::modal::OverlaySnapshot;
use crate::scripts;

const READY_POLL: Duration = Duration::from_millis(100);
const DEFAULT_BODY_TEXT_LIMIT: usize = 30_000;

struct ChannelState {
    browser: Browser,
    handler: JoinHandle<()>,
    page: ChromiumPage,
}

/// Production [`DocumentChannel`] speaking CDP through chromiumoxide.
pub struct ChromiumChannel {
    state: Mutex<Option<ChannelState>>,
    nav_timeout: Duration,
}

impl ChromiumChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            nav_timeout: Duration::from_millis(15_000),
        }
    }

    /// Launch a browser according to the configuration and open the single
    /// page this channel will drive. Idempotent: a second call is a no-op.
    pub async fn launch(config: &ScoutConfig) -> Result<Self, ChannelError> {
        let mut channel = Self::new();
        channel.nav_timeout = config.nav_timeout();

        let browser_config = build_config(config)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|err| ChannelError::Navigation {
                url: "about:blank".to_string(),
                message: format!("browser launch failed: {err}"),
            })?;

        let handler = tokio::spawn(async move {
            while let Some(result) = handler.next().await {
                if let Err(err) = result {
                    log::debug!("chromiumoxide handler error: {err}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| ChannelError::Navigation {
                url: "about:blank".to_string(),
                message: err.to_string(),
            })?;

        {
            let mut guard = channel.state.lock().await;
            *guard = Some(ChannelState {
                browser,
                handler,
                page,
            });
        }

        Ok(channel)
    }

    async fn page(&self) -> Result<ChromiumPage, ChannelError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(ChannelError::NotInitialized)?;
        Ok(state.page.clone())
    }

    async fn eval_value(&self, script: &str) -> Result<JsonValue, ChannelError> {
        let page = self.page().await?;
        // return_by_value ships objects and arrays back as plain JSON instead
        // of remote object handles.
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(ChannelError::Evaluation)?;
        let result = page.evaluate(params).await.map_err(classify_eval_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn eval_optional_string(&self, script: &str) -> Result<Option<String>, ChannelError> {
        match self.eval_value(script).await? {
            JsonValue::Null => Ok(None),
            JsonValue::String(value) => Ok(Some(value)),
            other => decode("string probe", other),
        }
    }
}

impl Default for ChromiumChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a CDP failure. Exception text produced by our own guard scripts
/// ("occluded", "detached") marks the element as not interactable; anything
/// else stays an evaluation error.
fn classify_eval_error<E: std::fmt::Display>(err: E) -> ChannelError {
    let message = err.to_string();
    if message.contains("occluded") || message.contains("detached") {
        ChannelError::ElementNotInteractable(message)
    } else {
        ChannelError::Evaluation(message)
    }
}

fn build_config(config: &ScoutConfig) -> Result<BrowserConfig, ChannelError> {
    let viewport = chromiumoxide::handler::viewport::Viewport {
        width: config.viewport_width,
        height: config.viewport_height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: config.viewport_width >= config.viewport_height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder();

    if let Some(path) = &config.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder
        .viewport(viewport)
        .arg("--disable-blink-features=AutomationControlled");

    let builder = if config.headless {
        builder
    } else {
        builder.with_head()
    };

    builder.build().map_err(|message| ChannelError::Navigation {
        url: "about:blank".to_string(),
        message,
    })
}

#[async_trait]
impl DocumentChannel for ChromiumChannel {
    async fn navigate(&self, url: &str) -> Result<(), ChannelError> {
        let page = self.page().await?;
        page.goto(url).await.map_err(|err| ChannelError::Navigation {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        let ready_script = scripts::document_ready();
        wait_until("document readiness", self.nav_timeout, READY_POLL, || {
            let script = ready_script.clone();
            async move {
                match self.eval_value(&script).await {
                    Ok(JsonValue::Bool(ready)) => Ok(ready),
                    // Evaluation races the navigation; treat failures as
                    // "not ready yet" until the deadline decides.
                    Ok(_) | Err(ChannelError::Evaluation(_)) => Ok(false),
                    Err(err) => Err(err),
                }
            }
        })
        .await
    }

    async fn current_url(&self) -> Result<String, ChannelError> {
        match self.eval_value("location.href").await? {
            JsonValue::String(url) => Ok(url),
            other => decode("current url", other),
        }
    }

    async fn title(&self) -> Result<String, ChannelError> {
        match self.eval_value("document.title").await? {
            JsonValue::String(title) => Ok(title),
            other => decode("page title", other),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<JsonValue, ChannelError> {
        self.eval_value(script).await
    }

    async fn query_visible(
        &self,
        candidate: &Candidate,
    ) -> Result<Option<ElementHandle>, ChannelError> {
        if matches!(candidate.strategy, Strategy::ConfirmKey) {
            return Ok(Some(ElementHandle::confirm_key()));
        }
        let script = scripts::candidate_query(candidate)
            .ok_or(ChannelError::Unsupported("candidate without a query"))?;
        Ok(self
            .eval_optional_string(&script)
            .await?
            .map(ElementHandle::new))
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), ChannelError> {
        self.eval_value(&scripts::click(handle.as_str())).await?;
        Ok(())
    }

    async fn type_into(&self, handle: &ElementHandle, text: &str) -> Result<(), ChannelError> {
        self.eval_value(&scripts::fill(handle.as_str(), text))
            .await?;
        Ok(())
    }

    async fn read_text(&self, handle: &ElementHandle) -> Result<String, ChannelError> {
        match self.eval_value(&scripts::read_text(handle.as_str())).await? {
            JsonValue::String(text) => Ok(text),
            other => decode("element text", other),
        }
    }

    async fn press_confirm(&self) -> Result<(), ChannelError> {
        self.eval_value(&scripts::confirm_key()).await?;
        Ok(())
    }

    async fn body_text(&self) -> Result<String, ChannelError> {
        match self
            .eval_value(&scripts::body_text(DEFAULT_BODY_TEXT_LIMIT))
            .await?
        {
            JsonValue::String(text) => Ok(text),
            other => decode("body text", other),
        }
    }

    async fn page_probe(&self, markers: &StateMarkers) -> Result<PageProbe, ChannelError> {
        let script = scripts::page_probe(
            &markers.email_input_selector,
            &markers.password_input_selector,
            &markers.company_select_selector,
            &markers.result_anchor_selector,
            markers.overlay_min_width,
            markers.overlay_min_height,
            markers.overlay_z_threshold,
            markers.body_text_limit,
        );
        let value = self.eval_value(&script).await?;
        decode("page state", value)
    }

    async fn overlays(&self, markers: &StateMarkers) -> Result<Vec<OverlaySnapshot>, ChannelError> {
        let script = scripts::overlay_enumeration(
            markers.overlay_min_width,
            markers.overlay_min_height,
            markers.overlay_z_threshold,
        );
        let value = self.eval_value(&script).await?;
        decode("overlay enumeration", value)
    }

    async fn force_hide(&self, handle: &ElementHandle) -> Result<(), ChannelError> {
        self.eval_value(&scripts::force_hide(handle.as_str()))
            .await?;
        Ok(())
    }

    async fn label_value(&self, labels: &[String]) -> Result<Option<String>, ChannelError> {
        self.eval_optional_string(&scripts::label_cell(labels)).await
    }

    async fn class_token_value(&self, token: &str) -> Result<Option<String>, ChannelError> {
        self.eval_optional_string(&scripts::class_token(token)).await
    }

    async fn anchor_ancestors(
        &self,
        anchor: &Candidate,
        max_depth: usize,
    ) -> Result<Vec<AncestorStep>, ChannelError> {
        let Some(handle) = self.query_visible(anchor).await? else {
            return Ok(Vec::new());
        };
        if handle.is_confirm_key() {
            return Ok(Vec::new());
        }
        let value = self
            .eval_value(&scripts::ancestor_walk(handle.as_str(), max_depth))
            .await?;
        decode("ancestor walk", value)
    }

    async fn outer_markup(&self, handle: &ElementHandle) -> Result<String, ChannelError> {
        match self
            .eval_value(&scripts::outer_markup(handle.as_str()))
            .await?
        {
            JsonValue::String(html) => Ok(html),
            other => decode("outer markup", other),
        }
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>, ChannelError> {
        let page = self.page().await?;
        page.screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build(),
        )
        .await
        .map_err(|err| ChannelError::Evaluation(format!("screenshot capture failed: {err}")))
    }

    async fn inspect(&self) -> Result<InspectReport, ChannelError> {
        let value = self.eval_value(&scripts::inspect()).await?;
        decode("structure inspection", value)
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        if let Some(mut state) = state {
            if let Err(err) = state.browser.close().await {
                log::debug!("browser close reported: {err}");
            }
            state.handler.abort();
        }

        Ok(())
    }
}
