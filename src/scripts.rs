//! In-page script builders for the chromium channel.
//!
//! Every probe the engine runs against a live document is generated here as a
//! self-contained IIFE and returns a JSON-compatible value that the caller
//! decodes into one of the typed snapshots from [`crate::dom`] and friends.
//! String parameters are escaped through `serde_json` so selector text and
//! user input can never break out of the script.

use serde_json::json;

use crate::locator::{Candidate, Region, Strategy};

/// Shared helpers prepended to each generated script.
///
/// `isVisible` mirrors the resolver's interactability rule: a zero-sized box
/// or a `display:none`/`visibility:hidden` computed style disqualifies the
/// element. `absXPath` produces an absolute, index-qualified XPath that later
/// element actions use as a stable-enough handle within one page generation.
const HELPERS: &str = r#"
function isVisible(el) {
    if (!el || !(el instanceof Element)) return false;
    const rect = el.getBoundingClientRect();
    if (rect.width <= 0 || rect.height <= 0) return false;
    const style = window.getComputedStyle(el);
    return style.display !== 'none' && style.visibility !== 'hidden';
}
function absXPath(el) {
    if (el === document.body) return '/html/body';
    const parts = [];
    while (el && el.nodeType === Node.ELEMENT_NODE && el !== document.documentElement) {
        let index = 1;
        let sibling = el.previousElementSibling;
        while (sibling) {
            if (sibling.tagName === el.tagName) index++;
            sibling = sibling.previousElementSibling;
        }
        parts.unshift(el.tagName.toLowerCase() + '[' + index + ']');
        el = el.parentElement;
    }
    return '/html/' + parts.join('/');
}
function byXPath(xpath) {
    const result = document.evaluate(xpath, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
    return result.singleNodeValue;
}
function textOf(el) {
    return (el.textContent || '').trim();
}
"#;

fn js_str(value: &str) -> String {
    serde_json::to_string(value).expect("string serializes to JSON")
}

fn js_str_array(values: &[String]) -> String {
    serde_json::to_string(values).expect("string array serializes to JSON")
}

fn wrap(body: &str) -> String {
    format!("(() => {{\n{HELPERS}\n{body}\n}})()")
}

/// Script that resolves one candidate to the XPath of the first visible match,
/// or `null`. [`Strategy::ConfirmKey`] has no document query and yields `None`.
pub fn candidate_query(candidate: &Candidate) -> Option<String> {
    let body = match &candidate.strategy {
        Strategy::Selector { selector } => {
            format!(
                "const el = Array.from(document.querySelectorAll({sel})).find(isVisible);\n\
                 return el ? absXPath(el) : null;",
                sel = js_str(selector)
            )
        }
        Strategy::TextContains {
            scope,
            needle,
            reject,
        } => {
            format!(
                "const needle = {needle};\n\
                 const reject = {reject};\n\
                 const el = Array.from(document.querySelectorAll({scope})).find(cand => {{\n\
                     if (!isVisible(cand)) return false;\n\
                     const text = textOf(cand);\n\
                     if (!text.includes(needle)) return false;\n\
                     return !reject.some(term => text.includes(term));\n\
                 }});\n\
                 return el ? absXPath(el) : null;",
                needle = js_str(needle),
                reject = js_str_array(reject),
                scope = js_str(scope)
            )
        }
        Strategy::AttrPattern {
            scope,
            attribute,
            pattern,
        } => {
            format!(
                "const pattern = new RegExp({pattern}, 'i');\n\
                 const attribute = {attribute};\n\
                 const el = Array.from(document.querySelectorAll({scope})).find(cand =>\n\
                     isVisible(cand) && pattern.test(cand.getAttribute(attribute) || ''));\n\
                 return el ? absXPath(el) : null;",
                pattern = js_str(pattern),
                attribute = js_str(attribute),
                scope = js_str(scope)
            )
        }
        Strategy::Geometry {
            scope,
            region,
            needle,
            reject,
        } => {
            let (horizontal, vertical) = match region {
                Region::TopLeft => ("cx < window.innerWidth * 0.5", "cy < window.innerHeight * 0.4"),
                Region::TopRight => ("cx > window.innerWidth * 0.5", "cy < window.innerHeight * 0.4"),
                Region::BottomLeft => ("cx < window.innerWidth * 0.5", "cy > window.innerHeight * 0.6"),
                Region::BottomRight => ("cx > window.innerWidth * 0.5", "cy > window.innerHeight * 0.6"),
            };
            let needle_json = js_str(needle.as_deref().unwrap_or(""));
            format!(
                "const needle = {needle_json};\n\
                 const reject = {reject};\n\
                 const el = Array.from(document.querySelectorAll({scope})).find(cand => {{\n\
                     if (!isVisible(cand)) return false;\n\
                     const rect = cand.getBoundingClientRect();\n\
                     const cx = rect.left + rect.width / 2;\n\
                     const cy = rect.top + rect.height / 2;\n\
                     if (!({horizontal}) || !({vertical})) return false;\n\
                     const text = textOf(cand);\n\
                     if (needle && !text.includes(needle)) return false;\n\
                     return !reject.some(term => text.includes(term));\n\
                 }});\n\
                 return el ? absXPath(el) : null;",
                reject = js_str_array(reject),
                scope = js_str(scope)
            )
        }
        Strategy::ConfirmKey => return None,
    };
    Some(wrap(&body))
}

/// Wrap an action body so it runs against the element addressed by `xpath`.
/// The body sees the element as `el` and must return a JSON-compatible value.
pub fn element_action(xpath: &str, body: &str) -> String {
    let script = format!(
        "const el = byXPath({xpath});\n\
         if (!el) {{ throw new Error('detached: element not found for xpath'); }}\n\
         {body}",
        xpath = js_str(xpath)
    );
    wrap(&script)
}

/// Click with an occlusion guard: if a hit test at the element's center lands
/// on an unrelated element, the click is refused with an `occluded` error so
/// the caller can run modal dismissal instead of clicking an overlay.
pub fn click(xpath: &str) -> String {
    element_action(
        xpath,
        "const rect = el.getBoundingClientRect();\n\
         const cx = rect.left + rect.width / 2;\n\
         const cy = rect.top + rect.height / 2;\n\
         const hit = document.elementFromPoint(cx, cy);\n\
         if (hit && hit !== el && !el.contains(hit) && !hit.contains(el)) {\n\
             throw new Error('occluded: element is covered at its center point');\n\
         }\n\
         el.click();\n\
         return true;",
    )
}

/// Set a field value and fire the `input`/`change` events frameworks listen
/// for, instead of raw keystrokes.
pub fn fill(xpath: &str, text: &str) -> String {
    let body = format!(
        "const value = {text};\n\
         el.focus();\n\
         if ('value' in el) {{ el.value = value; }}\n\
         el.dispatchEvent(new Event('input', {{ bubbles: true }}));\n\
         el.dispatchEvent(new Event('change', {{ bubbles: true }}));\n\
         return true;",
        text = js_str(text)
    );
    element_action(xpath, &body)
}

pub fn read_text(xpath: &str) -> String {
    element_action(xpath, "return textOf(el);")
}

pub fn outer_markup(xpath: &str) -> String {
    element_action(xpath, "return el.outerHTML;")
}

/// Dispatch an Enter keypress to the focused element (falling back to body),
/// the synthetic submit used when no explicit submit control resolves.
pub fn confirm_key() -> String {
    wrap(
        "const target = document.activeElement || document.body;\n\
         const init = { key: 'Enter', code: 'Enter', keyCode: 13, bubbles: true, cancelable: true };\n\
         target.dispatchEvent(new KeyboardEvent('keydown', init));\n\
         target.dispatchEvent(new KeyboardEvent('keypress', init));\n\
         target.dispatchEvent(new KeyboardEvent('keyup', init));\n\
         return true;",
    )
}

/// Force-hide the element as a last-resort overlay removal.
pub fn force_hide(xpath: &str) -> String {
    element_action(
        xpath,
        "el.style.setProperty('display', 'none', 'important');\n\
         el.style.setProperty('pointer-events', 'none', 'important');\n\
         el.style.setProperty('z-index', '-1', 'important');\n\
         return true;",
    )
}

/// Readiness probe used after navigation.
pub fn document_ready() -> String {
    wrap(
        "return document.readyState !== 'loading' && document.body !== null;",
    )
}

pub fn body_text(limit: usize) -> String {
    let body = format!(
        "const text = document.body ? (document.body.innerText || '') : '';\n\
         return text.slice(0, {limit});"
    );
    wrap(&body)
}

/// Single classification probe. Collects every signal the page-state
/// precedence needs in one round trip; the Rust side owns the precedence.
pub fn page_probe(
    email_selector: &str,
    password_selector: &str,
    company_selector: &str,
    anchor_selector: &str,
    min_width: f64,
    min_height: f64,
    z_threshold: i64,
    text_limit: usize,
) -> String {
    let body = format!(
        "let overlayBlocking = false;\n\
         for (const el of document.querySelectorAll('*')) {{\n\
             if (!isVisible(el)) continue;\n\
             const style = window.getComputedStyle(el);\n\
             if (style.position !== 'fixed' && style.position !== 'absolute') continue;\n\
             const rect = el.getBoundingClientRect();\n\
             if (rect.width < {min_width} || rect.height < {min_height}) continue;\n\
             const z = parseInt(style.zIndex, 10);\n\
             if (Number.isNaN(z) ? style.position === 'fixed' : z >= {z_threshold}) {{\n\
                 overlayBlocking = true;\n\
                 break;\n\
             }}\n\
         }}\n\
         const text = document.body ? (document.body.innerText || '') : '';\n\
         return {{\n\
             overlayBlocking,\n\
             hasEmailInput: document.querySelector({email}) !== null,\n\
             hasPasswordInput: document.querySelector({password}) !== null,\n\
             hasCompanySelect: document.querySelector({company}) !== null,\n\
             resultAnchorCount: document.querySelectorAll({anchor}).length,\n\
             bodyText: text.slice(0, {text_limit})\n\
         }};",
        email = js_str(email_selector),
        password = js_str(password_selector),
        company = js_str(company_selector),
        anchor = js_str(anchor_selector),
    );
    wrap(&body)
}

/// Enumerate blocking-overlay candidates together with their plausible close
/// controls. Close controls are descendants that either look like a small
/// corner button or carry close-ish markers; scoring happens in Rust.
pub fn overlay_enumeration(min_width: f64, min_height: f64, z_threshold: i64) -> String {
    let body = format!(
        "const glyphs = ['×', '✕', '╳', 'x', 'X'];\n\
         const overlays = [];\n\
         for (const el of document.querySelectorAll('*')) {{\n\
             if (overlays.length >= 5) break;\n\
             if (!isVisible(el)) continue;\n\
             const style = window.getComputedStyle(el);\n\
             if (style.position !== 'fixed' && style.position !== 'absolute') continue;\n\
             const rect = el.getBoundingClientRect();\n\
             if (rect.width < {min_width} || rect.height < {min_height}) continue;\n\
             const z = parseInt(style.zIndex, 10);\n\
             if (!(Number.isNaN(z) ? style.position === 'fixed' : z >= {z_threshold})) continue;\n\
             const controls = [];\n\
             for (const cand of el.querySelectorAll('*')) {{\n\
                 if (controls.length >= 20) break;\n\
                 if (!isVisible(cand)) continue;\n\
                 const candRect = cand.getBoundingClientRect();\n\
                 const text = textOf(cand);\n\
                 const className = typeof cand.className === 'string' ? cand.className : '';\n\
                 const small = candRect.width >= 8 && candRect.width <= 60 &&\n\
                               candRect.height >= 8 && candRect.height <= 60;\n\
                 const glyph = glyphs.includes(text);\n\
                 const marked = /close|dismiss/i.test(className) ||\n\
                                cand.hasAttribute('aria-label') ||\n\
                                /close/i.test(cand.getAttribute('title') || '');\n\
                 if (!small && !glyph && !marked) continue;\n\
                 controls.push({{\n\
                     xpath: absXPath(cand),\n\
                     rect: {{ x: candRect.left, y: candRect.top, width: candRect.width, height: candRect.height }},\n\
                     text: text.slice(0, 40),\n\
                     classes: className.split(/\\s+/).filter(Boolean),\n\
                     ariaLabel: cand.getAttribute('aria-label'),\n\
                     role: cand.getAttribute('role'),\n\
                     title: cand.getAttribute('title')\n\
                 }});\n\
             }}\n\
             overlays.push({{\n\
                 xpath: absXPath(el),\n\
                 rect: {{ x: rect.left, y: rect.top, width: rect.width, height: rect.height }},\n\
                 text: textOf(el).slice(0, 300),\n\
                 closeControls: controls\n\
             }});\n\
         }}\n\
         return overlays;",
    );
    wrap(&body)
}

/// Walk ancestors of the element at `xpath`, reporting each step for the
/// container-scoring extractor.
pub fn ancestor_walk(xpath: &str, max_depth: usize) -> String {
    let body = format!(
        "const steps = [];\n\
         let current = el.parentElement;\n\
         let depth = 0;\n\
         while (current && depth < {max_depth}) {{\n\
             steps.push({{\n\
                 xpath: absXPath(current),\n\
                 tag: current.tagName.toLowerCase(),\n\
                 text: textOf(current).slice(0, 4000),\n\
                 childCount: current.children.length\n\
             }});\n\
             if (current === document.body) break;\n\
             current = current.parentElement;\n\
             depth++;\n\
         }}\n\
         return steps;"
    );
    element_action(xpath, &body)
}

/// Labeled-cell lookup: find a `td`/`th`/`dt` whose text contains one of the
/// labels and read the adjacent value cell.
pub fn label_cell(labels: &[String]) -> String {
    let body = format!(
        "const labels = {labels};\n\
         const matches = cellText => labels.some(label => cellText.includes(label));\n\
         for (const row of document.querySelectorAll('tr')) {{\n\
             const cells = row.querySelectorAll('td, th');\n\
             if (cells.length < 2) continue;\n\
             if (!matches(textOf(cells[0]))) continue;\n\
             const value = textOf(cells[cells.length - 1]);\n\
             if (value) return value;\n\
         }}\n\
         for (const list of document.querySelectorAll('dl')) {{\n\
             const dts = list.querySelectorAll('dt');\n\
             const dds = list.querySelectorAll('dd');\n\
             for (let i = 0; i < Math.min(dts.length, dds.length); i++) {{\n\
                 if (!matches(textOf(dts[i]))) continue;\n\
                 const value = textOf(dds[i]);\n\
                 if (value) return value;\n\
             }}\n\
         }}\n\
         return null;",
        labels = js_str_array(labels)
    );
    wrap(&body)
}

/// Class-token heuristic: first visible element whose class list contains the
/// token and that carries non-empty text.
pub fn class_token(token: &str) -> String {
    let body = format!(
        "const selector = '[class*=' + JSON.stringify({token}) + ']';\n\
         const el = Array.from(document.querySelectorAll(selector))\n\
             .find(cand => isVisible(cand) && textOf(cand) !== '');\n\
         return el ? textOf(el) : null;",
        token = js_str(token)
    );
    wrap(&body)
}

/// Page-structure inspection: catalogue plausible search inputs and buttons.
pub fn inspect() -> String {
    let markers = json!(["検索", "物件", "search"]);
    let body = format!(
        "const markers = {markers};\n\
         const searchInputs = Array.from(document.querySelectorAll('input'))\n\
             .filter(input => input.type === 'text' || input.type === 'search' ||\n\
                 markers.some(m => (input.placeholder || '').includes(m)) ||\n\
                 /search|query/i.test(input.name || ''))\n\
             .map(input => ({{\n\
                 tag: input.tagName.toLowerCase(),\n\
                 inputType: input.type || '',\n\
                 name: input.name || '',\n\
                 id: input.id || '',\n\
                 placeholder: input.placeholder || '',\n\
                 className: typeof input.className === 'string' ? input.className : ''\n\
             }}));\n\
         const searchButtons = Array.from(document.querySelectorAll('button, input[type=\"submit\"], a'))\n\
             .filter(btn => markers.some(m => (btn.textContent || '').includes(m)) ||\n\
                 /search/i.test(typeof btn.className === 'string' ? btn.className : ''))\n\
             .map(btn => ({{\n\
                 tag: btn.tagName.toLowerCase(),\n\
                 text: (btn.textContent || '').trim().slice(0, 80),\n\
                 id: btn.id || '',\n\
                 className: typeof btn.className === 'string' ? btn.className : ''\n\
             }}));\n\
         return {{ searchInputs, searchButtons }};"
    );
    wrap(&body)
}
