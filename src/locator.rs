//! Locator tables: named, ordered fallback strategies for finding elements.
//!
//! A [`Locator`] binds a semantic target ("email input", "search submit") to
//! an ordered list of [`Candidate`]s. Order is the tie-break: the first
//! candidate that matches a visible, interactable element always wins, no
//! matter how many later candidates would also match. Candidates are plain
//! data — evaluation happens in the resolver against a live document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Matching strategy carried by a single candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Strategy {
    /// CSS selector with `querySelector` semantics.
    Selector { selector: String },
    /// Visible-text containment within a scoping selector.
    TextContains {
        scope: String,
        needle: String,
        /// Terms that disqualify an otherwise matching element.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reject: Vec<String>,
    },
    /// Attribute-value pattern match within a scoping selector.
    AttrPattern {
        scope: String,
        attribute: String,
        pattern: String,
    },
    /// Geometric position predicate within a scoping selector.
    Geometry {
        scope: String,
        region: Region,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        needle: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reject: Vec<String>,
    },
    /// Synthetic confirm keystroke dispatched to the focused element.
    ///
    /// Always matches, so it only makes sense as the last candidate of a
    /// submit-style locator.
    ConfirmKey,
}

/// Viewport quadrant used by [`Strategy::Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// One way of finding a semantic target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub strategy: Strategy,
}

impl Candidate {
    pub fn selector(selector: impl Into<String>) -> Self {
        Candidate {
            strategy: Strategy::Selector {
                selector: selector.into(),
            },
        }
    }

    pub fn text(scope: impl Into<String>, needle: impl Into<String>) -> Self {
        Candidate {
            strategy: Strategy::TextContains {
                scope: scope.into(),
                needle: needle.into(),
                reject: Vec::new(),
            },
        }
    }

    pub fn text_rejecting(
        scope: impl Into<String>,
        needle: impl Into<String>,
        reject: &[&str],
    ) -> Self {
        Candidate {
            strategy: Strategy::TextContains {
                scope: scope.into(),
                needle: needle.into(),
                reject: reject.iter().map(|term| term.to_string()).collect(),
            },
        }
    }

    pub fn attr_pattern(
        scope: impl Into<String>,
        attribute: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Candidate {
            strategy: Strategy::AttrPattern {
                scope: scope.into(),
                attribute: attribute.into(),
                pattern: pattern.into(),
            },
        }
    }

    pub fn geometry(
        scope: impl Into<String>,
        region: Region,
        needle: Option<&str>,
        reject: &[&str],
    ) -> Self {
        Candidate {
            strategy: Strategy::Geometry {
                scope: scope.into(),
                region,
                needle: needle.map(|value| value.to_string()),
                reject: reject.iter().map(|term| term.to_string()).collect(),
            },
        }
    }

    pub fn confirm_key() -> Self {
        Candidate {
            strategy: Strategy::ConfirmKey,
        }
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.strategy {
            Strategy::Selector { selector } => write!(f, "selector {selector}"),
            Strategy::TextContains { scope, needle, .. } => {
                write!(f, "text '{needle}' in {scope}")
            }
            Strategy::AttrPattern {
                scope,
                attribute,
                pattern,
            } => write!(f, "{scope}[{attribute} ~ /{pattern}/]"),
            Strategy::Geometry { scope, region, .. } => {
                write!(f, "{scope} in {region:?} region")
            }
            Strategy::ConfirmKey => write!(f, "confirm keystroke"),
        }
    }
}

/// Named, ordered list of candidates for one semantic target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    name: String,
    candidates: Vec<Candidate>,
}

impl Locator {
    /// Build a locator. The candidate list must not be empty.
    pub fn new(name: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        let name = name.into();
        assert!(
            !candidates.is_empty(),
            "locator '{name}' must carry at least one candidate"
        );
        Locator { name, candidates }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Lookup table from semantic target name to locator.
#[derive(Debug, Clone, Default)]
pub struct LocatorTable {
    entries: HashMap<String, Locator>,
}

impl LocatorTable {
    pub fn new() -> Self {
        LocatorTable::default()
    }

    /// Insert a locator, replacing any previous entry with the same name.
    pub fn insert(&mut self, locator: Locator) {
        self.entries.insert(locator.name().to_string(), locator);
    }

    pub fn get(&self, name: &str) -> Option<&Locator> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
