//! Domain types shared by the coordinator and the agents.
//!
//! These types are serialized to JSON both on the coordination transport
//! and in the redb state tables, and they form the render context handed
//! to config templates. Collections are ordered (`BTreeSet`/`BTreeMap`)
//! so the same value always serializes to the same bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unique identifier for an agent node.
pub type NodeId = String;

/// Template name used when a service does not declare one.
pub const DEFAULT_TEMPLATE_NAME: &str = "default";

// ── Upstream ──────────────────────────────────────────────────────

/// One backend target a load balancer routes traffic to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamInfo {
    /// Backend address (`host:port`).
    pub upstream: String,
    /// Request that introduced this upstream.
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub rack_id: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl UpstreamInfo {
    /// An upstream with only an address set.
    pub fn new(upstream: &str) -> Self {
        Self {
            upstream: upstream.to_string(),
            request_id: None,
            rack_id: None,
            group: None,
        }
    }

    pub fn with_rack_id(mut self, rack_id: &str) -> Self {
        self.rack_id = Some(rack_id.to_string());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    /// Return this upstream owned by `request_id` unless it already
    /// carries an owner.
    pub fn stamped(self, request_id: &str) -> Self {
        if self.request_id.is_some() {
            return self;
        }
        Self {
            request_id: Some(request_id.to_string()),
            ..self
        }
    }
}

// ── Service ───────────────────────────────────────────────────────

/// Logical service: a set of upstreams behind one or more domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaragonService {
    pub service_id: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub service_base_path: String,
    #[serde(default)]
    pub load_balancer_groups: BTreeSet<String>,
    /// Free-form options exposed to templates.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[serde(default)]
    pub edge_cache_domains: BTreeSet<String>,
}

impl Hash for BaragonService {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service_id.hash(state);
        self.owners.hash(state);
        self.service_base_path.hash(state);
        self.load_balancer_groups.hash(state);
        // JSON values are not `Hash`; their canonical encoding is.
        for (key, value) in &self.options {
            key.hash(state);
            value.to_string().hash(state);
        }
        self.template_name.hash(state);
        self.domains.hash(state);
        self.edge_cache_domains.hash(state);
    }
}

impl BaragonService {
    /// A service with the given id owned by the given groups.
    pub fn new(service_id: &str, groups: &[&str]) -> Self {
        Self {
            service_id: service_id.to_string(),
            owners: Vec::new(),
            service_base_path: format!("/{service_id}"),
            load_balancer_groups: groups.iter().map(|g| g.to_string()).collect(),
            options: BTreeMap::new(),
            template_name: None,
            domains: BTreeSet::new(),
            edge_cache_domains: BTreeSet::new(),
        }
    }

    pub fn with_template_name(mut self, name: &str) -> Self {
        self.template_name = Some(name.to_string());
        self
    }

    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn with_edge_cache_domains(mut self, domains: BTreeSet<String>) -> Self {
        self.edge_cache_domains = domains;
        self
    }

    /// Copy of this service with its domains replaced.
    pub fn with_domains(&self, domains: BTreeSet<String>) -> Self {
        Self {
            domains,
            ..self.clone()
        }
    }

    /// Copy of this service re-homed onto the alias's groups, with the
    /// alias's domains merged in.
    pub fn with_updated_groups(&self, alias: &BaragonGroupAlias) -> Self {
        let mut domains = self.domains.clone();
        domains.extend(alias.domains.iter().cloned());
        let mut edge_cache_domains = self.edge_cache_domains.clone();
        edge_cache_domains.extend(alias.edge_cache_domains.iter().cloned());
        Self {
            load_balancer_groups: alias.groups.clone(),
            domains,
            edge_cache_domains,
            ..self.clone()
        }
    }

    /// Primary domain: the first in order, if any.
    pub fn domain(&self) -> Option<&str> {
        self.domains.iter().next().map(String::as_str)
    }

    /// Template set this service renders with.
    pub fn template_name(&self) -> &str {
        self.template_name.as_deref().unwrap_or(DEFAULT_TEMPLATE_NAME)
    }
}

/// Group alias: a named set of groups plus the domains they serve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaragonGroupAlias {
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[serde(default)]
    pub edge_cache_domains: BTreeSet<String>,
}

// ── Agent ─────────────────────────────────────────────────────────

/// Node-local metadata an agent registers with its group. Templates see
/// it as `agentProperties`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub agent_id: NodeId,
    pub group: String,
    #[serde(default)]
    pub base_agent_uri: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub ec2: Ec2Metadata,
    #[serde(default)]
    pub extra_agent_data: BTreeMap<String, String>,
    /// Last heartbeat, unix millis. Not exposed to templates.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_heartbeat_ms: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Cloud placement of an agent, when known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ec2Metadata {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
}

impl AgentMetadata {
    pub fn new(agent_id: &str, group: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            group: group.to_string(),
            base_agent_uri: String::new(),
            domain: None,
            ec2: Ec2Metadata::default(),
            extra_agent_data: BTreeMap::new(),
            last_heartbeat_ms: 0,
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    /// Metadata as templates see it: identical on every render.
    pub fn for_templates(&self) -> Self {
        Self {
            last_heartbeat_ms: 0,
            ..self.clone()
        }
    }
}

// ── Templates & rendering ─────────────────────────────────────────

/// How a template's filename pattern is turned into a file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormatType {
    /// The pattern is the file name.
    None,
    /// One `%s`: the service id.
    Service,
    /// Two `%s`: the domain, then the service id.
    #[default]
    DomainService,
}

/// Render input: a service snapshot together with its resolved upstreams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContext {
    pub service: BaragonService,
    pub upstreams: Vec<UpstreamInfo>,
    /// False when the context describes a service being removed.
    pub present: bool,
}

impl ServiceContext {
    pub fn new(service: BaragonService, upstreams: Vec<UpstreamInfo>) -> Self {
        Self {
            service,
            upstreams,
            present: true,
        }
    }
}

/// One rendered config file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigFile {
    pub path: PathBuf,
    pub content: String,
}

impl ConfigFile {
    pub fn new(path: PathBuf, content: String) -> Self {
        Self { path, content }
    }
}
