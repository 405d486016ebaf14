//! baragon-agent — the node side of a Baragon rollout.
//!
//! ```text
//! AgentWorker
//!   ├── registers + heartbeats via GroupMembership
//!   ├── watches /requests/{group}/ for records addressed to this node
//!   └── NodeApplier
//!         ├── ConfigRenderer (TemplateRegistry, handlebars)
//!         ├── ConfigWriter   (stage, swap with restore, remove)
//!         ├── LoadBalancer   (check_configs, reload)
//!         └── StateStore     (applied services, outcome ledger)
//! ```

pub mod applier;
pub mod error;
pub mod files;
pub mod lb;
pub mod renderer;
pub mod templates;
pub mod worker;

pub use applier::NodeApplier;
pub use error::{ApplyError, LbError, RenderError, WorkerError, WriteError};
pub use files::ConfigWriter;
pub use lb::{CommandLoadBalancer, LoadBalancer};
pub use renderer::ConfigRenderer;
pub use templates::{LbConfigTemplate, TemplateRegistry};
pub use worker::AgentWorker;
