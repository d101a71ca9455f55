use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result as AnyResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::AdapterKind;
use crate::builder::{Builder, Declaration};
use crate::error::{Error, Result};
use crate::registry::OperationResolver;
use crate::sequence::Sequence;
use crate::step::StepOptions;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransactionDefinition {
    #[serde(default)]
    pub rollback: bool,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Operation name; defaults to the step name.
    #[serde(default, rename = "with", skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    /// Names of error kinds registered with the resolver.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

fn default_kind() -> String {
    "step".to_string()
}

impl TransactionDefinition {
    pub fn parse_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::Definition(err.to_string()))
    }

    pub fn parse_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|err| Error::Definition(err.to_string()))
    }

    pub fn parse_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| Error::Definition(err.to_string()))
    }

    /// Reads a definition file; the format follows the file extension and
    /// defaults to JSON.
    pub fn load(path: &Path) -> AnyResult<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read definition file {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let definition = match extension.as_str() {
            "yaml" | "yml" => Self::parse_yaml(&text),
            "toml" => Self::parse_toml(&text),
            _ => Self::parse_json(&text),
        };
        definition.with_context(|| format!("invalid definition file {}", path.display()))
    }

    /// Turns the definition into a builder, resolving `catch` names through
    /// `resolver`.
    pub fn into_builder(&self, resolver: &dyn OperationResolver) -> Result<Builder> {
        let mut builder = Builder::new().rollback(self.rollback);
        for step in &self.steps {
            let mut options = StepOptions::new();
            for name in &step.catch {
                let catch = resolver
                    .catch_named(name)
                    .ok_or_else(|| Error::UnknownErrorKind(name.clone()))?;
                options = options.catching(catch);
            }
            if let Some(input) = &step.input {
                options = options.input(input.iter().cloned());
            }
            if let Some(label) = &step.failure {
                options = options.failure(label.clone());
            }
            let kind: AdapterKind = step.kind.parse().unwrap_or(AdapterKind::Raw);
            let declaration = Declaration::new(kind, step.name.clone())
                .with(step.operation.clone().unwrap_or_else(|| step.name.clone()))
                .options(options)
                .args(step.args.clone());
            builder = builder.declare(declaration);
        }
        Ok(builder)
    }

    pub fn build(&self, resolver: &dyn OperationResolver) -> Result<Sequence> {
        self.into_builder(resolver)?.build(resolver)
    }
}
