//! Template registry — the config templates an agent renders with.
//!
//! Templates are declared in `baragon.toml` and compiled once at startup.
//! Several templates may share a name; together they form the template
//! set a service selects with its `template_name`. The registry is
//! read-only after loading and shared behind an `Arc`.

use std::collections::BTreeMap;
use std::path::Path;

use handlebars::Handlebars;
use serde_json::Value;
use tracing::{debug, info};

use baragon_core::FormatType;
use baragon_core::config::TemplateConfig;

use crate::error::{RenderError, RenderResult};

/// One compiled template.
#[derive(Debug, Clone)]
pub struct LbConfigTemplate {
    pub name: String,
    pub filename: String,
    pub format_type: FormatType,
    /// Key the compiled body is registered under.
    key: String,
}

/// All templates, grouped by name in declaration order.
pub struct TemplateRegistry {
    engine: Handlebars<'static>,
    templates: BTreeMap<String, Vec<LbConfigTemplate>>,
}

impl TemplateRegistry {
    /// Compile every configured template. Template `path`s are resolved
    /// against `templates_dir`.
    pub fn load(configs: &[TemplateConfig], templates_dir: Option<&Path>) -> RenderResult<Self> {
        let mut engine = Handlebars::new();
        // Output is load balancer config, not HTML.
        engine.register_escape_fn(handlebars::no_escape);

        let mut templates: BTreeMap<String, Vec<LbConfigTemplate>> = BTreeMap::new();

        for (idx, config) in configs.iter().enumerate() {
            let body = template_body(config, templates_dir)?;
            let key = format!("{}#{idx}", config.name);
            engine
                .register_template_string(&key, body)
                .map_err(|e| RenderError::TemplateLoad {
                    name: config.name.clone(),
                    reason: e.to_string(),
                })?;

            debug!(name = %config.name, filename = %config.filename, "template compiled");
            templates
                .entry(config.name.clone())
                .or_default()
                .push(LbConfigTemplate {
                    name: config.name.clone(),
                    filename: config.filename.clone(),
                    format_type: config.format_type,
                    key,
                });
        }

        info!(
            names = templates.len(),
            templates = configs.len(),
            "template registry loaded"
        );
        Ok(Self { engine, templates })
    }

    /// The template set registered under `name`.
    pub fn get(&self, name: &str) -> Option<&[LbConfigTemplate]> {
        self.templates.get(name).map(Vec::as_slice)
    }

    /// Every template, ordered by name then declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &LbConfigTemplate> {
        self.templates.values().flatten()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render one template against a JSON context.
    pub fn render(&self, template: &LbConfigTemplate, context: &Value) -> RenderResult<String> {
        self.engine
            .render(&template.key, context)
            .map_err(|e| RenderError::Template {
                name: template.name.clone(),
                reason: e.to_string(),
            })
    }
}

fn template_body(config: &TemplateConfig, templates_dir: Option<&Path>) -> RenderResult<String> {
    match (&config.template, &config.path) {
        (Some(inline), _) => Ok(inline.clone()),
        (None, Some(path)) => {
            let full = match templates_dir {
                Some(dir) => dir.join(path),
                None => path.clone(),
            };
            std::fs::read_to_string(&full).map_err(|e| RenderError::TemplateLoad {
                name: config.name.clone(),
                reason: format!("{}: {e}", full.display()),
            })
        }
        (None, None) => Err(RenderError::TemplateLoad {
            name: config.name.clone(),
            reason: "neither `template` nor `path` is set".to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) fn inline(name: &str, filename: &str, format_type: FormatType, body: &str) -> TemplateConfig {
    TemplateConfig {
        name: name.to_string(),
        filename: filename.to_string(),
        format_type,
        template: Some(body.to_string()),
        path: None,
    }
}
