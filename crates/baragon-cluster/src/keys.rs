//! Coordination key layout.
//!
//! Every key is built from `/`-separated segments, so no segment may be
//! empty or contain `/`. Request ids are already restricted by the
//! request model; groups and node ids are checked with [`segment`].

use crate::error::{ClusterError, ClusterResult};

/// Validate a single key segment.
pub fn segment(value: &str) -> ClusterResult<&str> {
    if value.is_empty() || value.contains('/') {
        return Err(ClusterError::InvalidKey(value.to_string()));
    }
    Ok(value)
}

pub fn agents_prefix(group: &str) -> String {
    format!("/groups/{group}/agents/")
}

pub fn agent_key(group: &str, node_id: &str) -> String {
    format!("/groups/{group}/agents/{node_id}")
}

pub fn excluded_prefix(group: &str) -> String {
    format!("/groups/{group}/excluded/")
}

pub fn excluded_key(group: &str, node_id: &str) -> String {
    format!("/groups/{group}/excluded/{node_id}")
}

/// Everything distributed to a group.
pub fn group_requests_prefix(group: &str) -> String {
    format!("/requests/{group}/")
}

pub fn request_prefix(group: &str, request_id: &str) -> String {
    format!("/requests/{group}/{request_id}/")
}

pub fn request_key(group: &str, request_id: &str, node_id: &str) -> String {
    format!("/requests/{group}/{request_id}/{node_id}")
}

pub fn outcomes_prefix(request_id: &str) -> String {
    format!("/outcomes/{request_id}/")
}

pub fn outcome_key(request_id: &str, node_id: &str) -> String {
    format!("/outcomes/{request_id}/{node_id}")
}

/// A parsed distribution record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey<'a> {
    pub group: &'a str,
    pub request_id: &'a str,
    pub node_id: &'a str,
}

/// Split `/requests/{group}/{request_id}/{node_id}`.
pub fn parse_request_key(key: &str) -> Option<RequestKey<'_>> {
    let rest = key.strip_prefix("/requests/")?;
    let mut parts = rest.split('/');
    let group = parts.next().filter(|s| !s.is_empty())?;
    let request_id = parts.next().filter(|s| !s.is_empty())?;
    let node_id = parts.next().filter(|s| !s.is_empty())?;
    if parts.next().is_some() {
        return None;
    }
    Some(RequestKey {
        group,
        request_id,
        node_id,
    })
}

/// The final segment of a key.
pub fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
