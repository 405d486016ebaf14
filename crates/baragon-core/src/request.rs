//! The request model: one change to one service, and the unit of
//! distributed consensus.
//!
//! A [`BaragonRequest`] is validated and normalized at construction:
//! the request id is checked against the coordination-path alphabet and
//! every add/remove upstream is stamped with the request id. Fields are
//! private so no caller can break those invariants afterwards; derived
//! copies are made with the `with_*` transforms.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RequestError, RequestResult};
use crate::types::{BaragonGroupAlias, BaragonService, UpstreamInfo};

/// Request ids end up in coordination paths: no whitespace, `/`, or `|`.
static REQUEST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s/|]+$").expect("request id pattern is valid"));

/// What a request asks the nodes to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestAction {
    /// Apply upstream deltas and re-render the service's config.
    Update,
    /// Re-check and reload the live config without changing it.
    Reload,
    /// Remove the service's config files.
    Delete,
}

/// One change to one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawBaragonRequest")]
pub struct BaragonRequest {
    request_id: String,
    service: BaragonService,
    add_upstreams: Vec<UpstreamInfo>,
    remove_upstreams: Vec<UpstreamInfo>,
    replace_upstreams: Vec<UpstreamInfo>,
    replace_service_id: Option<String>,
    action: Option<RequestAction>,
    no_validate: bool,
    no_reload: bool,
    upstream_update_only: bool,
}

/// Wire shape of a request before validation. Absent lists and flags
/// default; unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBaragonRequest {
    #[serde(alias = "loadBalancerRequestId")]
    request_id: Option<String>,
    #[serde(alias = "loadBalancerService")]
    service: Option<BaragonService>,
    #[serde(default)]
    add_upstreams: Option<Vec<UpstreamInfo>>,
    #[serde(default)]
    remove_upstreams: Option<Vec<UpstreamInfo>>,
    #[serde(default)]
    replace_upstreams: Option<Vec<UpstreamInfo>>,
    #[serde(default)]
    replace_service_id: Option<String>,
    #[serde(default)]
    action: Option<RequestAction>,
    #[serde(default)]
    no_validate: Option<bool>,
    #[serde(default)]
    no_reload: Option<bool>,
    #[serde(default)]
    upstream_update_only: Option<bool>,
}

impl TryFrom<RawBaragonRequest> for BaragonRequest {
    type Error = RequestError;

    fn try_from(raw: RawBaragonRequest) -> RequestResult<Self> {
        let request_id = raw
            .request_id
            .ok_or_else(|| RequestError::InvalidRequest("missing request id".to_string()))?;
        let service = raw
            .service
            .ok_or_else(|| RequestError::InvalidRequest("missing service".to_string()))?;

        RequestBuilder::new(&request_id, service)
            .add_upstreams(raw.add_upstreams.unwrap_or_default())
            .remove_upstreams(raw.remove_upstreams.unwrap_or_default())
            .replace_upstreams(raw.replace_upstreams.unwrap_or_default())
            .replace_service_id(raw.replace_service_id)
            .action(raw.action)
            .no_validate(raw.no_validate.unwrap_or(false))
            .no_reload(raw.no_reload.unwrap_or(false))
            .upstream_update_only(raw.upstream_update_only.unwrap_or(false))
            .build()
    }
}

impl BaragonRequest {
    /// An UPDATE request carrying only add/remove deltas.
    pub fn new(
        request_id: &str,
        service: BaragonService,
        add_upstreams: Vec<UpstreamInfo>,
        remove_upstreams: Vec<UpstreamInfo>,
    ) -> RequestResult<Self> {
        RequestBuilder::new(request_id, service)
            .add_upstreams(add_upstreams)
            .remove_upstreams(remove_upstreams)
            .action(Some(RequestAction::Update))
            .build()
    }

    /// Start a builder for a request against `service`.
    pub fn builder(request_id: &str, service: BaragonService) -> RequestBuilder {
        RequestBuilder::new(request_id, service)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn service(&self) -> &BaragonService {
        &self.service
    }

    pub fn add_upstreams(&self) -> &[UpstreamInfo] {
        &self.add_upstreams
    }

    pub fn remove_upstreams(&self) -> &[UpstreamInfo] {
        &self.remove_upstreams
    }

    pub fn replace_upstreams(&self) -> &[UpstreamInfo] {
        &self.replace_upstreams
    }

    pub fn replace_service_id(&self) -> Option<&str> {
        self.replace_service_id.as_deref()
    }

    /// The action as submitted (may be absent).
    pub fn action(&self) -> Option<RequestAction> {
        self.action
    }

    /// The action to execute: UPDATE when none was given.
    pub fn effective_action(&self) -> RequestAction {
        self.action.unwrap_or(RequestAction::Update)
    }

    pub fn no_validate(&self) -> bool {
        self.no_validate
    }

    pub fn no_reload(&self) -> bool {
        self.no_reload
    }

    pub fn upstream_update_only(&self) -> bool {
        self.upstream_update_only
    }

    /// Whether this request fully determines the service's resulting state,
    /// making any earlier queued request for the service irrelevant.
    pub fn is_full_state(&self) -> bool {
        self.effective_action() == RequestAction::Delete || !self.replace_upstreams.is_empty()
    }

    /// Copy of this request targeting the alias's groups.
    pub fn with_updated_groups(&self, alias: &BaragonGroupAlias) -> Self {
        Self {
            service: self.service.with_updated_groups(alias),
            ..self.clone()
        }
    }

    /// Copy of this request whose service serves `domains`.
    pub fn with_updated_domains(&self, domains: BTreeSet<String>) -> Self {
        Self {
            service: self.service.with_domains(domains),
            ..self.clone()
        }
    }

    /// Upstream set after applying this request to `current`.
    ///
    /// A non-empty replace list wins outright. Otherwise removes are
    /// matched by address, an add for an existing address replaces that
    /// entry in place, and new addresses are appended in request order.
    pub fn resolve_upstreams(&self, current: &[UpstreamInfo]) -> Vec<UpstreamInfo> {
        if !self.replace_upstreams.is_empty() {
            return self.replace_upstreams.clone();
        }

        let mut resolved: Vec<UpstreamInfo> = current
            .iter()
            .filter(|u| !self.remove_upstreams.iter().any(|r| r.upstream == u.upstream))
            .cloned()
            .collect();

        for add in &self.add_upstreams {
            match resolved.iter_mut().find(|u| u.upstream == add.upstream) {
                Some(existing) => *existing = add.clone(),
                None => resolved.push(add.clone()),
            }
        }

        resolved
    }
}

/// Builder for [`BaragonRequest`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request_id: String,
    service: BaragonService,
    add_upstreams: Vec<UpstreamInfo>,
    remove_upstreams: Vec<UpstreamInfo>,
    replace_upstreams: Vec<UpstreamInfo>,
    replace_service_id: Option<String>,
    action: Option<RequestAction>,
    no_validate: bool,
    no_reload: bool,
    upstream_update_only: bool,
}

impl RequestBuilder {
    pub fn new(request_id: &str, service: BaragonService) -> Self {
        Self {
            request_id: request_id.to_string(),
            service,
            add_upstreams: Vec::new(),
            remove_upstreams: Vec::new(),
            replace_upstreams: Vec::new(),
            replace_service_id: None,
            action: None,
            no_validate: false,
            no_reload: false,
            upstream_update_only: false,
        }
    }

    pub fn add_upstreams(mut self, upstreams: Vec<UpstreamInfo>) -> Self {
        self.add_upstreams = upstreams;
        self
    }

    pub fn remove_upstreams(mut self, upstreams: Vec<UpstreamInfo>) -> Self {
        self.remove_upstreams = upstreams;
        self
    }

    pub fn replace_upstreams(mut self, upstreams: Vec<UpstreamInfo>) -> Self {
        self.replace_upstreams = upstreams;
        self
    }

    pub fn replace_service_id(mut self, service_id: Option<String>) -> Self {
        self.replace_service_id = service_id;
        self
    }

    pub fn action(mut self, action: Option<RequestAction>) -> Self {
        self.action = action;
        self
    }

    pub fn no_validate(mut self, value: bool) -> Self {
        self.no_validate = value;
        self
    }

    pub fn no_reload(mut self, value: bool) -> Self {
        self.no_reload = value;
        self
    }

    pub fn upstream_update_only(mut self, value: bool) -> Self {
        self.upstream_update_only = value;
        self
    }

    /// Validate and stamp, producing the immutable request.
    pub fn build(self) -> RequestResult<BaragonRequest> {
        if !REQUEST_ID.is_match(&self.request_id) {
            return Err(RequestError::InvalidRequestId {
                id: self.request_id,
            });
        }
        if self.service.service_id.trim().is_empty() {
            return Err(RequestError::InvalidRequest(
                "service id cannot be empty".to_string(),
            ));
        }

        let id = self.request_id;
        let stamp = |upstreams: Vec<UpstreamInfo>| -> Vec<UpstreamInfo> {
            upstreams.into_iter().map(|u| u.stamped(&id)).collect()
        };
        let add_upstreams = stamp(self.add_upstreams);
        let remove_upstreams = stamp(self.remove_upstreams);

        Ok(BaragonRequest {
            request_id: id,
            service: self.service,
            add_upstreams,
            remove_upstreams,
            replace_upstreams: self.replace_upstreams,
            replace_service_id: self.replace_service_id,
            action: self.action,
            no_validate: self.no_validate,
            no_reload: self.no_reload,
            upstream_update_only: self.upstream_update_only,
        })
    }
}
