//! Path classification into backend categories.
//!
//! Rules are `(pattern, category)` pairs tried in order; the first rule whose
//! pattern occurs anywhere in the path wins. Matching is an ASCII
//! case-insensitive substring test (not anchored, not a regex), so
//! `/Tenant/OpenAI/deployments` and `/x/openai` classify the same way.

use std::fmt;

use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// Token audience for every Cognitive Services backend.
pub const COGNITIVE_SERVICES_AUDIENCE: &str = "https://cognitiveservices.azure.com";

/// Downstream AI service family a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendCategory {
    DocumentIntelligence,
    #[serde(rename = "openai")]
    OpenAI,
    Unmatched,
}

impl BackendCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendCategory::DocumentIntelligence => "document_intelligence",
            BackendCategory::OpenAI => "openai",
            BackendCategory::Unmatched => "unmatched",
        }
    }

    /// Bearer audience used to authenticate against this backend.
    /// `None` for `Unmatched`: nothing is ever forwarded there.
    pub fn audience(self) -> Option<&'static str> {
        match self {
            BackendCategory::DocumentIntelligence | BackendCategory::OpenAI => {
                Some(COGNITIVE_SERVICES_AUDIENCE)
            }
            BackendCategory::Unmatched => None,
        }
    }

    pub fn is_matched(self) -> bool {
        self != BackendCategory::Unmatched
    }
}

impl fmt::Display for BackendCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ordered routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pattern: String,
    category: BackendCategory,
}

impl RouteRule {
    /// Build a rule. The pattern is lower-cased; empty patterns and rules
    /// targeting `Unmatched` are rejected.
    pub fn new(pattern: &str, category: BackendCategory) -> Result<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(GatewayError::BadRequest("route pattern must not be empty".into()));
        }
        if !category.is_matched() {
            return Err(GatewayError::BadRequest(format!(
                "route '{pattern}' must target a concrete backend"
            )));
        }
        Ok(Self {
            pattern: pattern.to_ascii_lowercase(),
            category,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn category(&self) -> BackendCategory {
        self.category
    }
}

/// Ordered rule table with first-match semantics.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl Default for RouteTable {
    fn default() -> Self {
        let rules = [
            ("documentintelligence", BackendCategory::DocumentIntelligence),
            ("formrecognizer", BackendCategory::DocumentIntelligence),
            ("documentmodels", BackendCategory::DocumentIntelligence),
            ("openai", BackendCategory::OpenAI),
        ]
        .into_iter()
        .map(|(pattern, category)| RouteRule {
            pattern: pattern.to_string(),
            category,
        })
        .collect();
        Self { rules }
    }
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Result<Self> {
        if rules.is_empty() {
            return Err(GatewayError::BadRequest("route table must not be empty".into()));
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Classify a request path. Anything after `?` is ignored.
    pub fn classify(&self, path: &str) -> BackendCategory {
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        let lowered = path.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|r| lowered.contains(r.pattern.as_str()))
            .map_or(BackendCategory::Unmatched, |r| r.category)
    }
}
