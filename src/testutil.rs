//! In-memory fixture channel for engine tests.
//!
//! [`FixtureChannel`] implements [`DocumentChannel`] over a hand-built
//! synthetic document, mirroring the semantics of the live scripts closely
//! enough that the resolver, classifier, modal engine, executor, and
//! extractor can all be exercised without a browser. Evaluation counters
//! back the instrumentation assertions (e.g. "no candidate is evaluated
//! after the first success").

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::channel::{ChannelError, DocumentChannel, ElementHandle};
use crate::classifier::{PageProbe, StateMarkers};
use crate::dom::{ButtonProbe, CssPosition, InputProbe, InspectReport, Rect};
use crate::extract::AncestorStep;
use crate::locator::{Candidate, Region, Strategy};
use crate::modal::{CloseControl, OverlaySnapshot};

const CLOSE_GLYPHS: &[&str] = &["×", "✕", "╳", "x", "X"];

// ---------------------------------------------------------------------------
// Synthetic document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub tag: String,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub own_text: String,
    pub rect: Rect,
    pub position: CssPosition,
    pub z_index: Option<i64>,
    pub visible: bool,
    pub children: Vec<Node>,
}

impl Node {
    fn attr(&self, name: &str) -> Option<String> {
        match name {
            "class" => {
                if self.classes.is_empty() {
                    None
                } else {
                    Some(self.classes.join(" "))
                }
            }
            other => self.attrs.get(other).cloned(),
        }
    }

    /// Flattened text: own text plus every descendant's, space-joined.
    fn text_content(&self) -> String {
        let mut parts = Vec::new();
        if !self.own_text.is_empty() {
            parts.push(self.own_text.clone());
        }
        for child in &self.children {
            let text = child.text_content();
            if !text.is_empty() {
                parts.push(text);
            }
        }
        parts.join(" ")
    }

    fn is_visible(&self) -> bool {
        self.visible && !self.rect.is_empty()
    }
}

/// Builder used by tests to assemble fixture nodes.
#[derive(Debug, Clone)]
pub(crate) struct NodeBuilder {
    node: Node,
}

pub(crate) fn node(tag: &str) -> NodeBuilder {
    NodeBuilder {
        node: Node {
            tag: tag.to_string(),
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            own_text: String::new(),
            rect: Rect::new(0.0, 0.0, 100.0, 20.0),
            position: CssPosition::Static,
            z_index: None,
            visible: true,
            children: Vec::new(),
        },
    }
}

impl NodeBuilder {
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.node.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.node.classes.push(class.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.node.own_text = text.to_string();
        self
    }

    pub fn children(mut self, children: Vec<NodeBuilder>) -> Self {
        self.node.children = children.into_iter().map(|child| child.node).collect();
        self
    }

    pub fn sized(mut self, width: f64, height: f64) -> Self {
        self.node.rect.width = width;
        self.node.rect.height = height;
        self
    }

    pub fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.node.rect = Rect::new(x, y, width, height);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.node.position = CssPosition::Fixed;
        self
    }

    pub fn z_index(mut self, z: i64) -> Self {
        self.node.z_index = Some(z);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.node.visible = false;
        self
    }
}

/// Root of a synthetic document.
#[derive(Debug, Clone)]
pub(crate) struct FixtureDoc {
    pub body: Node,
    pub viewport: (f64, f64),
    pub title: String,
}

impl FixtureDoc {
    pub fn with_body(children: Vec<NodeBuilder>) -> Self {
        FixtureDoc {
            body: NodeBuilder {
                node: Node {
                    tag: "body".to_string(),
                    classes: Vec::new(),
                    attrs: BTreeMap::new(),
                    own_text: String::new(),
                    rect: Rect::new(0.0, 0.0, 1280.0, 720.0),
                    position: CssPosition::Static,
                    z_index: None,
                    visible: true,
                    children: Vec::new(),
                },
            }
            .children(children)
            .node,
            viewport: (1280.0, 720.0),
            title: "fixture".to_string(),
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    fn node_at(&self, path: &[usize]) -> Option<&Node> {
        let mut current = &self.body;
        for index in path {
            current = current.children.get(*index)?;
        }
        Some(current)
    }

    fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let mut current = &mut self.body;
        for index in path {
            current = current.children.get_mut(*index)?;
        }
        Some(current)
    }

    /// Pre-order walk over every node, body included.
    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&[usize], &'a Node)) {
        fn inner<'a>(
            node: &'a Node,
            path: &mut Vec<usize>,
            visit: &mut dyn FnMut(&[usize], &'a Node),
        ) {
            visit(path, node);
            for (index, child) in node.children.iter().enumerate() {
                path.push(index);
                inner(child, path, visit);
                path.pop();
            }
        }
        let mut path = Vec::new();
        inner(&self.body, &mut path, visit);
    }
}

fn handle_for(path: &[usize]) -> ElementHandle {
    let joined = path
        .iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join("/");
    ElementHandle::new(format!("fx:{joined}"))
}

fn path_of(handle: &ElementHandle) -> Option<Vec<usize>> {
    let raw = handle.as_str().strip_prefix("fx:")?;
    if raw.is_empty() {
        return Some(Vec::new());
    }
    raw.split('/').map(|part| part.parse().ok()).collect()
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

// ---------------------------------------------------------------------------
// Minimal CSS selector matching (tag, #id, .class, [attr], [attr=v],
// [attr*=v], descendant combinator, comma-separated lists)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Cond {
    Id(String),
    Class(String),
    AttrExists(String),
    AttrEq(String, String),
    AttrContains(String, String),
}

#[derive(Debug, Clone)]
struct Compound {
    tag: Option<String>,
    conds: Vec<Cond>,
}

fn parse_compound(source: &str) -> Compound {
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut tag = String::new();
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '-') {
        tag.push(chars[i]);
        i += 1;
    }
    let mut conds = Vec::new();
    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                let mut name = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || "-_".contains(chars[i])) {
                    name.push(chars[i]);
                    i += 1;
                }
                conds.push(Cond::Id(name));
            }
            '.' => {
                i += 1;
                let mut name = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || "-_".contains(chars[i])) {
                    name.push(chars[i]);
                    i += 1;
                }
                conds.push(Cond::Class(name));
            }
            '[' => {
                i += 1;
                let mut name = String::new();
                while i < chars.len() && !"*=]".contains(chars[i]) {
                    name.push(chars[i]);
                    i += 1;
                }
                let contains = i < chars.len() && chars[i] == '*';
                if contains {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '=' {
                    i += 1;
                    let quote = if i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
                        let q = chars[i];
                        i += 1;
                        Some(q)
                    } else {
                        None
                    };
                    let mut value = String::new();
                    while i < chars.len() {
                        match quote {
                            Some(q) if chars[i] == q => break,
                            None if chars[i] == ']' => break,
                            _ => {
                                value.push(chars[i]);
                                i += 1;
                            }
                        }
                    }
                    if quote.is_some() && i < chars.len() {
                        i += 1; // closing quote
                    }
                    if contains {
                        conds.push(Cond::AttrContains(name, value));
                    } else {
                        conds.push(Cond::AttrEq(name, value));
                    }
                } else {
                    conds.push(Cond::AttrExists(name));
                }
                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }
                if i < chars.len() {
                    i += 1; // ']'
                }
            }
            _ => i += 1,
        }
    }
    Compound {
        tag: if tag.is_empty() { None } else { Some(tag) },
        conds,
    }
}

fn compound_matches(node: &Node, compound: &Compound) -> bool {
    if let Some(tag) = &compound.tag {
        if !node.tag.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    compound.conds.iter().all(|cond| match cond {
        Cond::Id(id) => node.attr("id").as_deref() == Some(id.as_str()),
        Cond::Class(class) => node.classes.iter().any(|c| c == class),
        Cond::AttrExists(name) => node.attr(name).is_some(),
        Cond::AttrEq(name, value) => node.attr(name).as_deref() == Some(value.as_str()),
        Cond::AttrContains(name, value) => node
            .attr(name)
            .map_or(false, |attr| attr.contains(value.as_str())),
    })
}

/// Match a selector list against the document, returning matched node paths
/// in document order.
fn select_all(doc: &FixtureDoc, selector: &str) -> Vec<Vec<usize>> {
    let mut matched = Vec::new();
    for alternative in selector.split(',') {
        let compounds: Vec<Compound> = alternative
            .split_whitespace()
            .map(parse_compound)
            .collect();
        if compounds.is_empty() {
            continue;
        }
        doc.walk(&mut |path, node| {
            let (last, ancestors_required) = compounds.split_last().expect("non-empty");
            if !compound_matches(node, last) {
                return;
            }
            // Descendant combinator: earlier compounds must match ancestors
            // in order.
            let mut required = ancestors_required.iter().rev();
            let mut next = required.next();
            if next.is_some() {
                for depth in (0..path.len()).rev() {
                    let Some(ancestor) = doc.node_at(&path[..depth]) else {
                        continue;
                    };
                    if let Some(compound) = next {
                        if compound_matches(ancestor, compound) {
                            next = required.next();
                            if next.is_none() {
                                break;
                            }
                        }
                    }
                }
            }
            if next.is_none() {
                matched.push(path.to_vec());
            }
        });
    }
    matched.sort();
    matched.dedup();
    matched
}

// ---------------------------------------------------------------------------
// Fixture channel
// ---------------------------------------------------------------------------

/// Side effect attached to clicking a fixture element.
#[derive(Debug, Clone)]
pub(crate) enum ClickEffect {
    /// Hide the nearest positioned ancestor (overlay close buttons).
    HideAncestorOverlay,
    /// Replace the document with the route registered for this URL.
    Navigate(String),
}

#[derive(Default)]
struct Counters {
    queries: AtomicUsize,
    confirms: AtomicUsize,
    force_hides: AtomicUsize,
    overlay_enums: AtomicUsize,
    mutations: AtomicUsize,
}

pub(crate) struct FixtureChannel {
    doc: Mutex<FixtureDoc>,
    routes: Mutex<Vec<(String, FixtureDoc)>>,
    current_url: Mutex<String>,
    click_effects: Mutex<Vec<(String, ClickEffect)>>,
    hidden_overlays: Mutex<Vec<Vec<usize>>>,
    respawn: AtomicBool,
    counters: Counters,
}

impl FixtureChannel {
    pub fn new(doc: FixtureDoc) -> Self {
        FixtureChannel {
            doc: Mutex::new(doc),
            routes: Mutex::new(Vec::new()),
            current_url: Mutex::new("about:blank".to_string()),
            click_effects: Mutex::new(Vec::new()),
            hidden_overlays: Mutex::new(Vec::new()),
            respawn: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Register a document swapped in when a navigation URL contains `key`.
    pub fn route(&self, key: &str, doc: FixtureDoc) {
        self.routes.lock().unwrap().push((key.to_string(), doc));
    }

    /// Attach a click side effect to elements whose text equals `needle`.
    pub fn on_click_text(&self, needle: &str, effect: ClickEffect) {
        self.click_effects
            .lock()
            .unwrap()
            .push((needle.to_string(), effect));
    }

    /// Make hidden overlays re-appear on the next page probe, simulating an
    /// ad that keeps coming back.
    pub fn respawn_overlays(&self) {
        self.respawn.store(true, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }

    pub fn confirm_count(&self) -> usize {
        self.counters.confirms.load(Ordering::SeqCst)
    }

    pub fn force_hide_count(&self) -> usize {
        self.counters.force_hides.load(Ordering::SeqCst)
    }

    pub fn overlay_enumeration_count(&self) -> usize {
        self.counters.overlay_enums.load(Ordering::SeqCst)
    }

    pub fn mutation_count(&self) -> usize {
        self.counters.mutations.load(Ordering::SeqCst)
    }

    /// Value attribute of the first node matching `selector`.
    pub fn value_of(&self, selector: &str) -> Option<String> {
        let doc = self.doc.lock().unwrap();
        select_all(&doc, selector)
            .first()
            .and_then(|path| doc.node_at(path))
            .and_then(|node| node.attrs.get("value").cloned())
    }

    fn maybe_respawn(&self, doc: &mut FixtureDoc) {
        if !self.respawn.load(Ordering::SeqCst) {
            return;
        }
        let paths: Vec<Vec<usize>> = self.hidden_overlays.lock().unwrap().drain(..).collect();
        for path in paths {
            if let Some(node) = doc.node_at_mut(&path) {
                node.visible = true;
            }
        }
    }

    fn blocking_overlay_paths(doc: &FixtureDoc, markers: &StateMarkers) -> Vec<Vec<usize>> {
        let mut paths = Vec::new();
        doc.walk(&mut |path, node| {
            if !node.is_visible() || !node.position.overlays() {
                return;
            }
            if node.rect.width < markers.overlay_min_width
                || node.rect.height < markers.overlay_min_height
            {
                return;
            }
            let z_ok = match node.z_index {
                Some(z) => z >= markers.overlay_z_threshold,
                None => node.position == CssPosition::Fixed,
            };
            if z_ok {
                paths.push(path.to_vec());
            }
        });
        paths
    }

    fn eval_candidate(doc: &FixtureDoc, candidate: &Candidate) -> Option<Vec<usize>> {
        match &candidate.strategy {
            Strategy::Selector { selector } => select_all(doc, selector)
                .into_iter()
                .find(|path| doc.node_at(path).map_or(false, Node::is_visible)),
            Strategy::TextContains {
                scope,
                needle,
                reject,
            } => select_all(doc, scope).into_iter().find(|path| {
                let Some(node) = doc.node_at(path) else {
                    return false;
                };
                if !node.is_visible() {
                    return false;
                }
                let text = node.text_content();
                text.contains(needle.as_str()) && !reject.iter().any(|term| text.contains(term.as_str()))
            }),
            Strategy::AttrPattern {
                scope,
                attribute,
                pattern,
            } => {
                let compiled = regex::RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()?;
                select_all(doc, scope).into_iter().find(|path| {
                    let Some(node) = doc.node_at(path) else {
                        return false;
                    };
                    node.is_visible()
                        && node
                            .attr(attribute)
                            .map_or(false, |value| compiled.is_match(&value))
                })
            }
            Strategy::Geometry {
                scope,
                region,
                needle,
                reject,
            } => {
                let (vw, vh) = doc.viewport;
                select_all(doc, scope).into_iter().find(|path| {
                    let Some(node) = doc.node_at(path) else {
                        return false;
                    };
                    if !node.is_visible() {
                        return false;
                    }
                    let (cx, cy) = node.rect.center();
                    let in_region = match region {
                        Region::TopLeft => cx < vw * 0.5 && cy < vh * 0.4,
                        Region::TopRight => cx > vw * 0.5 && cy < vh * 0.4,
                        Region::BottomLeft => cx < vw * 0.5 && cy > vh * 0.6,
                        Region::BottomRight => cx > vw * 0.5 && cy > vh * 0.6,
                    };
                    if !in_region {
                        return false;
                    }
                    let text = node.text_content();
                    if let Some(needle) = needle {
                        if !text.contains(needle.as_str()) {
                            return false;
                        }
                    }
                    !reject.iter().any(|term| text.contains(term.as_str()))
                })
            }
            Strategy::ConfirmKey => None,
        }
    }

    fn occluded(doc: &FixtureDoc, target_path: &[usize]) -> bool {
        let Some(target) = doc.node_at(target_path) else {
            return false;
        };
        let (cx, cy) = target.rect.center();
        let mut covered = false;
        doc.walk(&mut |path, node| {
            if covered || path == target_path {
                return;
            }
            // Clicking inside an overlay is fine; only unrelated positioned
            // elements covering the centre point block the click.
            let related =
                target_path.starts_with(path) || path.starts_with(target_path);
            if related {
                return;
            }
            if node.is_visible() && node.position.overlays() && node.rect.contains(cx, cy) {
                covered = true;
            }
        });
        covered
    }

    fn hide_node(&self, doc: &mut FixtureDoc, path: &[usize]) {
        if let Some(node) = doc.node_at_mut(path) {
            node.visible = false;
            self.counters.mutations.fetch_add(1, Ordering::SeqCst);
            self.hidden_overlays.lock().unwrap().push(path.to_vec());
        }
    }
}

#[async_trait]
impl DocumentChannel for FixtureChannel {
    async fn navigate(&self, url: &str) -> Result<(), ChannelError> {
        *self.current_url.lock().unwrap() = url.to_string();
        let routes = self.routes.lock().unwrap();
        if let Some((_, doc)) = routes.iter().find(|(key, _)| url.contains(key.as_str())) {
            *self.doc.lock().unwrap() = doc.clone();
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ChannelError> {
        Ok(self.current_url.lock().unwrap().clone())
    }

    async fn title(&self) -> Result<String, ChannelError> {
        Ok(self.doc.lock().unwrap().title.clone())
    }

    async fn evaluate(&self, _script: &str) -> Result<JsonValue, ChannelError> {
        Err(ChannelError::Unsupported(
            "fixture channel does not execute scripts",
        ))
    }

    async fn query_visible(
        &self,
        candidate: &Candidate,
    ) -> Result<Option<ElementHandle>, ChannelError> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if matches!(candidate.strategy, Strategy::ConfirmKey) {
            return Ok(Some(ElementHandle::confirm_key()));
        }
        let doc = self.doc.lock().unwrap();
        Ok(Self::eval_candidate(&doc, candidate)
            .map(|path| handle_for(&path)))
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), ChannelError> {
        let path = path_of(handle).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: unknown handle".to_string())
        })?;

        let effect = {
            let doc = self.doc.lock().unwrap();
            let node = doc.node_at(&path).ok_or_else(|| {
                ChannelError::ElementNotInteractable("detached: element removed".to_string())
            })?;
            if !node.is_visible() {
                return Err(ChannelError::ElementNotInteractable(
                    "detached: element not visible".to_string(),
                ));
            }
            if Self::occluded(&doc, &path) {
                return Err(ChannelError::ElementNotInteractable(
                    "occluded: element is covered at its center point".to_string(),
                ));
            }
            let text = node.text_content();
            self.click_effects
                .lock()
                .unwrap()
                .iter()
                .find(|(needle, _)| text.contains(needle.as_str()))
                .map(|(_, effect)| effect.clone())
        };

        match effect {
            Some(ClickEffect::HideAncestorOverlay) => {
                let overlay_path = {
                    let doc = self.doc.lock().unwrap();
                    (0..path.len())
                        .rev()
                        .map(|depth| path[..depth].to_vec())
                        .find(|prefix| {
                            doc.node_at(prefix)
                                .map_or(false, |node| node.position.overlays())
                        })
                };
                if let Some(overlay_path) = overlay_path {
                    let mut doc = self.doc.lock().unwrap();
                    self.hide_node(&mut doc, &overlay_path);
                }
            }
            Some(ClickEffect::Navigate(url)) => {
                self.navigate(&url).await?;
            }
            None => {}
        }

        Ok(())
    }

    async fn type_into(&self, handle: &ElementHandle, text: &str) -> Result<(), ChannelError> {
        let path = path_of(handle).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: unknown handle".to_string())
        })?;
        let mut doc = self.doc.lock().unwrap();
        let node = doc.node_at_mut(&path).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: element removed".to_string())
        })?;
        node.attrs.insert("value".to_string(), text.to_string());
        self.counters.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_text(&self, handle: &ElementHandle) -> Result<String, ChannelError> {
        let path = path_of(handle).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: unknown handle".to_string())
        })?;
        let doc = self.doc.lock().unwrap();
        let node = doc.node_at(&path).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: element removed".to_string())
        })?;
        Ok(node.text_content())
    }

    async fn press_confirm(&self) -> Result<(), ChannelError> {
        self.counters.confirms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn body_text(&self) -> Result<String, ChannelError> {
        let doc = self.doc.lock().unwrap();
        Ok(doc.body.text_content())
    }

    async fn page_probe(&self, markers: &StateMarkers) -> Result<PageProbe, ChannelError> {
        let mut doc = self.doc.lock().unwrap();
        self.maybe_respawn(&mut doc);

        let overlay_blocking = !Self::blocking_overlay_paths(&doc, markers).is_empty();
        let probe = PageProbe {
            overlay_blocking,
            has_email_input: !select_all(&doc, &markers.email_input_selector).is_empty(),
            has_password_input: !select_all(&doc, &markers.password_input_selector).is_empty(),
            has_company_select: !select_all(&doc, &markers.company_select_selector).is_empty(),
            result_anchor_count: select_all(&doc, &markers.result_anchor_selector).len() as u64,
            body_text: truncate(&doc.body.text_content(), markers.body_text_limit),
        };
        Ok(probe)
    }

    async fn overlays(&self, markers: &StateMarkers) -> Result<Vec<OverlaySnapshot>, ChannelError> {
        self.counters.overlay_enums.fetch_add(1, Ordering::SeqCst);
        let doc = self.doc.lock().unwrap();
        let mut snapshots = Vec::new();

        for overlay_path in Self::blocking_overlay_paths(&doc, markers) {
            let overlay = doc.node_at(&overlay_path).expect("path valid");
            let mut controls = Vec::new();

            let mut child_paths = Vec::new();
            doc.walk(&mut |path, _| {
                if path.len() > overlay_path.len() && path.starts_with(&overlay_path) {
                    child_paths.push(path.to_vec());
                }
            });

            for path in child_paths {
                let Some(candidate) = doc.node_at(&path) else {
                    continue;
                };
                if !candidate.is_visible() {
                    continue;
                }
                let text = candidate.text_content();
                let small = candidate.rect.width >= 8.0
                    && candidate.rect.width <= 60.0
                    && candidate.rect.height >= 8.0
                    && candidate.rect.height <= 60.0;
                let glyph = CLOSE_GLYPHS.contains(&text.trim());
                let marked = candidate
                    .classes
                    .iter()
                    .any(|class| {
                        let lowered = class.to_lowercase();
                        lowered.contains("close") || lowered.contains("dismiss")
                    })
                    || candidate.attrs.contains_key("aria-label")
                    || candidate
                        .attrs
                        .get("title")
                        .map_or(false, |title| title.to_lowercase().contains("close"));
                if !small && !glyph && !marked {
                    continue;
                }
                controls.push(CloseControl {
                    handle: handle_for(&path),
                    rect: candidate.rect,
                    text: truncate(&text, 40),
                    classes: candidate.classes.clone(),
                    aria_label: candidate.attrs.get("aria-label").cloned(),
                    role: candidate.attrs.get("role").cloned(),
                    title: candidate.attrs.get("title").cloned(),
                });
            }

            snapshots.push(OverlaySnapshot {
                handle: handle_for(&overlay_path),
                rect: overlay.rect,
                text: truncate(&overlay.text_content(), 300),
                close_controls: controls,
            });
        }

        Ok(snapshots)
    }

    async fn force_hide(&self, handle: &ElementHandle) -> Result<(), ChannelError> {
        self.counters.force_hides.fetch_add(1, Ordering::SeqCst);
        let path = path_of(handle).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: unknown handle".to_string())
        })?;
        let mut doc = self.doc.lock().unwrap();
        self.hide_node(&mut doc, &path);
        Ok(())
    }

    async fn label_value(&self, labels: &[String]) -> Result<Option<String>, ChannelError> {
        let doc = self.doc.lock().unwrap();
        let mut found = None;

        doc.walk(&mut |_, node| {
            if found.is_some() || node.tag != "tr" {
                return;
            }
            let cells: Vec<&Node> = node
                .children
                .iter()
                .filter(|child| child.tag == "td" || child.tag == "th")
                .collect();
            if cells.len() < 2 {
                return;
            }
            let label_text = cells[0].text_content();
            if !labels.iter().any(|label| label_text.contains(label.as_str())) {
                return;
            }
            let value = cells[cells.len() - 1].text_content();
            if !value.is_empty() {
                found = Some(value);
            }
        });

        if found.is_none() {
            doc.walk(&mut |_, node| {
                if found.is_some() || node.tag != "dl" {
                    return;
                }
                let dts: Vec<&Node> = node.children.iter().filter(|c| c.tag == "dt").collect();
                let dds: Vec<&Node> = node.children.iter().filter(|c| c.tag == "dd").collect();
                for (dt, dd) in dts.iter().zip(dds.iter()) {
                    let label_text = dt.text_content();
                    if labels.iter().any(|label| label_text.contains(label.as_str())) {
                        let value = dd.text_content();
                        if !value.is_empty() {
                            found = Some(value);
                            return;
                        }
                    }
                }
            });
        }

        Ok(found)
    }

    async fn class_token_value(&self, token: &str) -> Result<Option<String>, ChannelError> {
        let doc = self.doc.lock().unwrap();
        let mut found = None;
        doc.walk(&mut |_, node| {
            if found.is_some() || !node.is_visible() {
                return;
            }
            let has_token = node
                .classes
                .iter()
                .any(|class| class.to_lowercase().contains(&token.to_lowercase()));
            if !has_token {
                return;
            }
            let text = node.text_content();
            if !text.is_empty() {
                found = Some(text);
            }
        });
        Ok(found)
    }

    async fn anchor_ancestors(
        &self,
        anchor: &Candidate,
        max_depth: usize,
    ) -> Result<Vec<AncestorStep>, ChannelError> {
        let doc = self.doc.lock().unwrap();
        let Some(path) = Self::eval_candidate(&doc, anchor) else {
            return Ok(Vec::new());
        };

        let mut steps = Vec::new();
        for depth in (0..path.len()).rev() {
            if steps.len() >= max_depth {
                break;
            }
            let prefix = &path[..depth];
            let Some(node) = doc.node_at(prefix) else {
                continue;
            };
            steps.push(AncestorStep {
                handle: handle_for(prefix),
                tag: node.tag.clone(),
                text: truncate(&node.text_content(), 4000),
                child_count: node.children.len() as u32,
            });
        }
        Ok(steps)
    }

    async fn outer_markup(&self, handle: &ElementHandle) -> Result<String, ChannelError> {
        fn render(node: &Node) -> String {
            let class_attr = if node.classes.is_empty() {
                String::new()
            } else {
                format!(" class=\"{}\"", node.classes.join(" "))
            };
            let attrs: String = node
                .attrs
                .iter()
                .map(|(name, value)| format!(" {name}=\"{value}\""))
                .collect();
            let children: String = node.children.iter().map(render).collect();
            format!(
                "<{tag}{class_attr}{attrs}>{text}{children}</{tag}>",
                tag = node.tag,
                text = node.own_text
            )
        }

        let path = path_of(handle).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: unknown handle".to_string())
        })?;
        let doc = self.doc.lock().unwrap();
        let node = doc.node_at(&path).ok_or_else(|| {
            ChannelError::ElementNotInteractable("detached: element removed".to_string())
        })?;
        Ok(render(node))
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>, ChannelError> {
        Ok(vec![137, 80, 78, 71])
    }

    async fn inspect(&self) -> Result<InspectReport, ChannelError> {
        let doc = self.doc.lock().unwrap();
        let mut report = InspectReport::default();
        doc.walk(&mut |_, node| {
            if node.tag == "input" {
                let input_type = node.attr("type").unwrap_or_default();
                let placeholder = node.attr("placeholder").unwrap_or_default();
                if input_type == "text"
                    || input_type == "search"
                    || placeholder.contains("検索")
                    || placeholder.contains("物件")
                {
                    report.search_inputs.push(InputProbe {
                        tag: node.tag.clone(),
                        input_type,
                        name: node.attr("name").unwrap_or_default(),
                        id: node.attr("id").unwrap_or_default(),
                        placeholder,
                        class_name: node.classes.join(" "),
                    });
                }
            } else if node.tag == "button" || node.tag == "a" {
                let text = node.text_content();
                if text.contains("検索") || text.contains("search") {
                    report.search_buttons.push(ButtonProbe {
                        tag: node.tag.clone(),
                        text: truncate(&text, 80),
                        id: node.attr("id").unwrap_or_default(),
                        class_name: node.classes.join(" "),
                    });
                }
            }
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_subset_matches_like_the_browser() {
        let doc = FixtureDoc::with_body(vec![
            node("form").class("search-form").children(vec![
                node("input").attr("type", "text"),
            ]),
            node("input").attr("type", "email").attr("id", "login_email"),
            node("a").attr("href", "/rent_rooms/42"),
        ]);

        assert_eq!(select_all(&doc, "input[type='email']").len(), 1);
        assert_eq!(select_all(&doc, "input#login_email").len(), 1);
        assert_eq!(select_all(&doc, "input[id*='email']").len(), 1);
        assert_eq!(select_all(&doc, "a[href*='/rent_rooms/']").len(), 1);
        assert_eq!(select_all(&doc, ".search-form input[type='text']").len(), 1);
        assert_eq!(select_all(&doc, "select, input").len(), 2);
        assert!(select_all(&doc, "button").is_empty());
    }

    #[test]
    fn text_content_flattens_descendants() {
        let doc = FixtureDoc::with_body(vec![node("div").text("7.7万円").children(vec![
            node("span").text("募集中"),
        ])]);
        assert_eq!(doc.body.text_content(), "7.7万円 募集中");
    }

    #[tokio::test]
    async fn routes_swap_documents_on_navigation() {
        let channel = FixtureChannel::new(FixtureDoc::with_body(Vec::new()));
        channel.route(
            "/top",
            FixtureDoc::with_body(vec![node("a").text("リスト検索")]),
        );

        channel.navigate("https://example.com/top").await.expect("navigate");
        assert!(channel.body_text().await.expect("text").contains("リスト検索"));
        assert_eq!(
            channel.current_url().await.expect("url"),
            "https://example.com/top"
        );
    }
}
