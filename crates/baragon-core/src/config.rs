//! baragon.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{AgentMetadata, DEFAULT_TEMPLATE_NAME, FormatType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaragonConfig {
    /// Base directory for template `path` entries.
    pub templates_dir: Option<PathBuf>,
    pub agent: AgentConfig,
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    pub edge_cache: Option<EdgeCacheConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub node_id: String,
    pub group: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub base_agent_uri: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub extra_agent_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// Directory rendered config files are written under.
    pub root_path: PathBuf,
    /// Shell command validating config; `BARAGON_STAGING_DIR` points at
    /// freshly rendered files when set.
    pub check_config_command: Option<String>,
    pub reload_config_command: Option<String>,
    #[serde(default = "default_command_timeout_ms")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub reload_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "default_template_name")]
    pub name: String,
    pub filename: String,
    #[serde(default)]
    pub format_type: FormatType,
    /// Inline template body.
    pub template: Option<String>,
    /// Template body file, relative to `templates_dir`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How long to wait for every node's outcome.
    #[serde(default = "default_outcome_timeout_ms")]
    pub outcome_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
    /// Cancel queued requests when a newer full-state request arrives.
    #[serde(default = "default_true")]
    pub supersede_queued: bool,
    /// Agents silent for longer than this are not targeted.
    #[serde(default = "default_dead_timeout_ms")]
    pub dead_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_edge_cache_api_base")]
    pub api_base: String,
    pub api_email: String,
    pub api_key: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/baragon")
}

fn default_heartbeat_ms() -> u64 {
    5_000
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_template_name() -> String {
    DEFAULT_TEMPLATE_NAME.to_string()
}

fn default_outcome_timeout_ms() -> u64 {
    30_000
}

fn default_dead_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_edge_cache_api_base() -> String {
    "https://api.cloudflare.com/client/v4/".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            outcome_timeout_ms: default_outcome_timeout_ms(),
            rollback_on_failure: true,
            supersede_queued: true,
            dead_timeout_ms: default_dead_timeout_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn outcome_timeout(&self) -> Duration {
        Duration::from_millis(self.outcome_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }
}

impl LoadBalancerConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Metadata this agent registers with its group.
    pub fn metadata(&self) -> AgentMetadata {
        AgentMetadata {
            base_agent_uri: self.base_agent_uri.clone(),
            domain: self.domain.clone(),
            extra_agent_data: self.extra_agent_data.clone(),
            ..AgentMetadata::new(&self.node_id, &self.group)
        }
    }
}

impl BaragonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BaragonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Minimal config for a single agent writing under `root_path`.
    pub fn scaffold(node_id: &str, group: &str, root_path: &Path) -> Self {
        BaragonConfig {
            templates_dir: None,
            agent: AgentConfig {
                node_id: node_id.to_string(),
                group: group.to_string(),
                domain: None,
                base_agent_uri: String::new(),
                data_dir: default_data_dir(),
                heartbeat_interval_ms: default_heartbeat_ms(),
                extra_agent_data: BTreeMap::new(),
            },
            load_balancer: LoadBalancerConfig {
                root_path: root_path.to_path_buf(),
                check_config_command: Some("nginx -t".to_string()),
                reload_config_command: Some("nginx -s reload".to_string()),
                check_timeout_ms: default_command_timeout_ms(),
                reload_timeout_ms: default_command_timeout_ms(),
            },
            templates: vec![TemplateConfig {
                name: default_template_name(),
                filename: "proxy/%s.conf".to_string(),
                format_type: FormatType::Service,
                template: Some("{{#each upstreams}}server {{upstream}};\n{{/each}}".to_string()),
                path: None,
            }],
            coordinator: CoordinatorConfig::default(),
            edge_cache: None,
        }
    }
}
