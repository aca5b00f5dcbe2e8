use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::dsl::{BooleanNode, parse_filter};
use crate::query::QueryOptions;

/// Prefix of environment variables that override file settings,
/// e.g. `FILTRATION_QUERY__OPERATOR_PREFIX`.
pub const ENV_PREFIX: &str = "FILTRATION";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Named filter sources.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub query: QueryOptions,
}

impl Settings {
    /// Load settings from an optional file, then the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Config: Failed to read settings")?;
        Ok(settings
            .try_deserialize()
            .context("Config: Invalid settings")?)
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }

    /// Parse every named filter, naming the one that fails.
    pub fn compile_filters(&self) -> anyhow::Result<BTreeMap<String, BooleanNode>> {
        self.filters
            .iter()
            .map(|(name, source)| {
                parse_filter(source)
                    .map(|ast| (name.clone(), ast))
                    .with_context(|| format!("Config: Error parsing filter '{}'", name))
            })
            .collect()
    }
}
