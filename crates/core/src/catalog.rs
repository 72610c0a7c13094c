use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Provider preferred when the server does not force a choice.
pub const PREFERRED_PROVIDER: &str = "anthropic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    /// Server order.
    pub models: Vec<Model>,
}

impl Provider {
    pub fn model(&self, id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// A provider/model pair a mode pins itself to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Tool name to enabled flag. Tools not listed are enabled.
    #[serde(default)]
    pub tools: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
}

impl Mode {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prompt: None,
            tools: BTreeMap::new(),
            model: None,
        }
    }

    pub fn tool_enabled(&self, tool: &str) -> bool {
        self.tools.get(tool).copied().unwrap_or(true)
    }

    /// Modes used when the server cannot list its own: `build` with every
    /// tool, `plan` without the file-writing ones.
    pub fn builtin() -> Vec<Mode> {
        let mut plan = Mode::named("plan");
        for tool in ["write", "edit", "patch"] {
            plan.tools.insert(tool.to_string(), false);
        }
        vec![Mode::named("build"), plan]
    }
}

/// Providers offered by a server plus its per-provider default model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCatalog {
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl ProviderCatalog {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// `anthropic` when offered, otherwise the first provider.
    pub fn default_provider(&self) -> Option<&Provider> {
        self.provider(PREFERRED_PROVIDER)
            .or_else(|| self.providers.first())
    }

    /// The server's default for `provider` when it names one of its models,
    /// otherwise the provider's first model.
    pub fn default_model<'a>(&'a self, provider: &'a Provider) -> Option<&'a Model> {
        self.defaults
            .get(&provider.id)
            .and_then(|id| provider.model(id))
            .or_else(|| provider.models.first())
    }

    pub fn default_selection(&self) -> Option<(&Provider, Option<&Model>)> {
        let provider = self.default_provider()?;
        Some((provider, self.default_model(provider)))
    }

    pub fn contains(&self, model: &ModelRef) -> bool {
        self.provider(&model.provider_id)
            .and_then(|p| p.model(&model.model_id))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str, models: &[&str]) -> Provider {
        Provider {
            id: id.to_string(),
            name: id.to_uppercase(),
            models: models
                .iter()
                .map(|m| Model {
                    id: m.to_string(),
                    name: m.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn prefers_anthropic_then_first() {
        let catalog = ProviderCatalog {
            providers: vec![provider("openai", &["gpt"]), provider("anthropic", &["a", "b"])],
            defaults: BTreeMap::new(),
        };
        let (p, m) = catalog.default_selection().expect("selection");
        assert_eq!(p.id, "anthropic");
        assert_eq!(m.map(|m| m.id.as_str()), Some("a"));

        let catalog = ProviderCatalog {
            providers: vec![provider("openai", &["gpt"]), provider("groq", &["l"])],
            defaults: BTreeMap::new(),
        };
        assert_eq!(catalog.default_provider().map(|p| p.id.as_str()), Some("openai"));
    }

    #[test]
    fn server_default_model_wins_when_known() {
        let mut catalog = ProviderCatalog {
            providers: vec![provider("anthropic", &["a", "b"])],
            defaults: BTreeMap::from([("anthropic".to_string(), "b".to_string())]),
        };
        let (_, m) = catalog.default_selection().expect("selection");
        assert_eq!(m.map(|m| m.id.as_str()), Some("b"));

        catalog
            .defaults
            .insert("anthropic".to_string(), "gone".to_string());
        let (_, m) = catalog.default_selection().expect("selection");
        assert_eq!(m.map(|m| m.id.as_str()), Some("a"));
    }

    #[test]
    fn empty_catalog_has_no_selection() {
        assert!(ProviderCatalog::default().default_selection().is_none());
    }

    #[test]
    fn builtin_plan_disables_writers() {
        let modes = Mode::builtin();
        assert_eq!(modes[0].name, "build");
        assert!(modes[0].tool_enabled("write"));
        assert!(!modes[1].tool_enabled("edit"));
        assert!(modes[1].tool_enabled("bash"));
    }
}
