use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method};
use aihub_core::error::ErrorCode;
use aihub_core::route::BackendCategory;

use crate::auth::Credential;
use crate::policy::Admission;

use super::tenant::Tenant;

/// Pipeline position of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Matched,
    Authenticated,
    RateChecked,
    Dispatched,
    Completed,
    Errored(ErrorCode),
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Errored(_))
    }

    fn next(self) -> Option<Stage> {
        match self {
            Stage::Received => Some(Stage::Matched),
            Stage::Matched => Some(Stage::Authenticated),
            Stage::Authenticated => Some(Stage::RateChecked),
            Stage::RateChecked => Some(Stage::Dispatched),
            Stage::Dispatched => Some(Stage::Completed),
            Stage::Completed | Stage::Errored(_) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Matched => "matched",
            Stage::Authenticated => "authenticated",
            Stage::RateChecked => "rate_checked",
            Stage::Dispatched => "dispatched",
            Stage::Completed => "completed",
            Stage::Errored(_) => "errored",
        }
    }
}

/// Final result of a request, as seen by diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Backend answered; carries its status.
    Success(u16),
    Error(ErrorCode),
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Error(code) => code.as_str(),
        }
    }
}

/// Per-request record owned by the pipeline for one request.
pub struct RequestContext {
    pub request_id: String,
    pub tenant_id: String,
    /// Set once the registry resolved `tenant_id`.
    pub tenant: Option<Arc<Tenant>>,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    stage: Stage,
    pub category: Option<BackendCategory>,
    pub credential: Option<Credential>,
    pub admission: Option<Admission>,
    pub tags: Vec<(&'static str, String)>,
    started: Instant,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        tenant_id: String,
        method: Method,
        path: String,
        headers: HeaderMap,
    ) -> Self {
        Self {
            request_id,
            tenant_id,
            tenant: None,
            method,
            path,
            headers,
            stage: Stage::Received,
            category: None,
            credential: None,
            admission: None,
            tags: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `to`, which must be the direct successor of the current stage.
    /// Returns false (and stays put) on an out-of-order transition.
    pub fn advance(&mut self, to: Stage) -> bool {
        if self.stage.next() != Some(to) {
            tracing::error!(from = self.stage.as_str(), to = to.as_str(), "illegal stage transition");
            return false;
        }
        self.stage = to;
        true
    }

    /// Enter `Errored`. No effect once terminal.
    pub fn fail(&mut self, code: ErrorCode) {
        if !self.stage.is_terminal() {
            self.stage = Stage::Errored(code);
        }
    }

    pub fn tag(&mut self, key: &'static str, value: impl Into<String>) {
        self.tags.push((key, value.into()));
    }

    /// Remaining tokens from the rate decision, if one was made.
    pub fn remaining_tokens(&self) -> Option<u64> {
        self.admission.map(|a| a.remaining())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("tenant_id", &self.tenant_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("stage", &self.stage)
            .field("category", &self.category)
            .field("credential", &self.credential)
            .field("admission", &self.admission)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
