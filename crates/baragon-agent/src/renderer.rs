//! Config renderer — turns a service context into config files.
//!
//! Rendering is a pure function of the context, the template registry
//! and this node's metadata: no clock, no filesystem. Two nodes with the
//! same templates render byte-identical files, which the
//! [`ConfigRenderer::digest`] makes checkable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use baragon_core::{AgentMetadata, BaragonService, ConfigFile, FormatType, ServiceContext};

use crate::error::{RenderError, RenderResult};
use crate::templates::{LbConfigTemplate, TemplateRegistry};

/// Renders config files for one node.
#[derive(Clone)]
pub struct ConfigRenderer {
    registry: Arc<TemplateRegistry>,
    root_path: PathBuf,
    agent: AgentMetadata,
}

impl ConfigRenderer {
    pub fn new(registry: Arc<TemplateRegistry>, root_path: &Path, agent: AgentMetadata) -> Self {
        Self {
            registry,
            root_path: root_path.to_path_buf(),
            agent,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Render every template of the service's template set.
    ///
    /// Files come out in template declaration order. A failing template
    /// aborts the whole render.
    pub fn render(&self, context: &ServiceContext) -> RenderResult<Vec<ConfigFile>> {
        let service = &context.service;
        let name = service.template_name();
        let templates = self
            .registry
            .get(name)
            .ok_or_else(|| RenderError::MissingTemplate {
                name: name.to_string(),
            })?;

        let values = self.context_value(context)?;

        let mut files = Vec::with_capacity(templates.len());
        for template in templates {
            let path = self.path_for(template, service)?;
            let content = self.registry.render(template, &values)?;
            debug!(service = %service.service_id, path = %path.display(), bytes = content.len(), "rendered");
            files.push(ConfigFile::new(path, content));
        }
        Ok(files)
    }

    /// Every path any registered template would produce for `service`.
    pub fn config_paths(&self, service: &BaragonService) -> RenderResult<BTreeSet<PathBuf>> {
        self.registry
            .iter()
            .map(|template| self.path_for(template, service))
            .collect()
    }

    /// Paths the service's own template set produces. Empty when the
    /// service names a template this node does not have.
    pub fn paths_for_service(&self, service: &BaragonService) -> RenderResult<BTreeSet<PathBuf>> {
        match self.registry.get(service.template_name()) {
            Some(templates) => templates
                .iter()
                .map(|template| self.path_for(template, service))
                .collect(),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Hex SHA-256 over the rendered paths and contents, in order.
    pub fn digest(files: &[ConfigFile]) -> String {
        let mut hasher = Sha256::new();
        for file in files {
            hasher.update(file.path.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(file.content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    fn context_value(&self, context: &ServiceContext) -> RenderResult<Value> {
        let mut values =
            serde_json::to_value(context).map_err(|e| RenderError::Context(e.to_string()))?;
        let agent = serde_json::to_value(self.agent.for_templates())
            .map_err(|e| RenderError::Context(e.to_string()))?;
        if let Value::Object(map) = &mut values {
            map.insert("agentProperties".to_string(), agent);
        }
        Ok(values)
    }

    fn path_for(&self, template: &LbConfigTemplate, service: &BaragonService) -> RenderResult<PathBuf> {
        let filename = match template.format_type {
            FormatType::None => template.filename.clone(),
            FormatType::Service => format_filename(&template.filename, &[&service.service_id])?,
            FormatType::DomainService => {
                let domain = service
                    .domain()
                    .or(self.agent.domain.as_deref())
                    .unwrap_or("");
                format_filename(&template.filename, &[domain, &service.service_id])?
            }
        };
        Ok(self.root_path.join(filename))
    }
}

/// Substitute `%s` placeholders in order. `%%` is a literal percent.
/// Unused arguments are ignored; a placeholder without an argument is an
/// error.
pub fn format_filename(pattern: &str, args: &[&str]) -> RenderResult<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut args = args.iter();
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => match args.next() {
                Some(arg) => out.push_str(arg),
                None => {
                    return Err(RenderError::Filename {
                        pattern: pattern.to_string(),
                        reason: "more placeholders than arguments".to_string(),
                    });
                }
            },
            other => {
                return Err(RenderError::Filename {
                    pattern: pattern.to_string(),
                    reason: format!("unsupported conversion {:?}", other.map(String::from).unwrap_or_default()),
                });
            }
        }
    }
    Ok(out)
}
