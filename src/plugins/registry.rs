//! Plugin registry
//!
//! Maps (category, name) to a descriptor holding the plugin's subtype,
//! hyperparameter space and factory. The registry is built explicitly and
//! passed by reference; it is never global.

use super::{
    Classifier, PluginCategory, PluginInstance, PluginSubtype, Regressor, RiskEstimator, Transformer,
};
use crate::error::{PrognosError, Result};
use crate::export::{decode, ArtifactKind};
use crate::optimizer::{Configuration, HyperparameterSpace};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type BuildFn = dyn Fn(&Configuration) -> Result<PluginInstance> + Send + Sync;
type LoadFn = dyn Fn(&[u8]) -> Result<PluginInstance> + Send + Sync;

/// Constructors for a plugin: from hyperparameters, or from saved bytes
#[derive(Clone)]
pub struct PluginFactory {
    build: Arc<BuildFn>,
    load: Arc<LoadFn>,
}

impl PluginFactory {
    pub fn new<B, L>(build: B, load: L) -> Self
    where
        B: Fn(&Configuration) -> Result<PluginInstance> + Send + Sync + 'static,
        L: Fn(&[u8]) -> Result<PluginInstance> + Send + Sync + 'static,
    {
        Self {
            build: Arc::new(build),
            load: Arc::new(load),
        }
    }

    /// Factory for a serde transformer
    pub fn transformer<T, B>(build: B) -> Self
    where
        T: Transformer + DeserializeOwned + 'static,
        B: Fn(&Configuration) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(
            move |c| Ok(PluginInstance::Transformer(Box::new(build(c)?))),
            |bytes| {
                let plugin: T = decode(ArtifactKind::Plugin, bytes)?;
                Ok(PluginInstance::Transformer(Box::new(plugin)))
            },
        )
    }

    /// Factory for a serde classifier
    pub fn classifier<T, B>(build: B) -> Self
    where
        T: Classifier + DeserializeOwned + 'static,
        B: Fn(&Configuration) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(
            move |c| Ok(PluginInstance::Classifier(Box::new(build(c)?))),
            |bytes| {
                let plugin: T = decode(ArtifactKind::Plugin, bytes)?;
                Ok(PluginInstance::Classifier(Box::new(plugin)))
            },
        )
    }

    /// Factory for a serde regressor
    pub fn regressor<T, B>(build: B) -> Self
    where
        T: Regressor + DeserializeOwned + 'static,
        B: Fn(&Configuration) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(
            move |c| Ok(PluginInstance::Regressor(Box::new(build(c)?))),
            |bytes| {
                let plugin: T = decode(ArtifactKind::Plugin, bytes)?;
                Ok(PluginInstance::Regressor(Box::new(plugin)))
            },
        )
    }

    /// Factory for a serde risk estimator
    pub fn risk_estimator<T, B>(build: B) -> Self
    where
        T: RiskEstimator + DeserializeOwned + 'static,
        B: Fn(&Configuration) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(
            move |c| Ok(PluginInstance::RiskEstimator(Box::new(build(c)?))),
            |bytes| {
                let plugin: T = decode(ArtifactKind::Plugin, bytes)?;
                Ok(PluginInstance::RiskEstimator(Box::new(plugin)))
            },
        )
    }

    pub fn build(&self, config: &Configuration) -> Result<PluginInstance> {
        (self.build)(config)
    }

    pub fn load(&self, bytes: &[u8]) -> Result<PluginInstance> {
        (self.load)(bytes)
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PluginFactory")
    }
}

/// Registered plugin identity, space and factory. Immutable once registered.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub category: PluginCategory,
    pub subtype: PluginSubtype,
    pub space: HyperparameterSpace,
    pub factory: PluginFactory,
}

/// Registry of plugins keyed by (category, name)
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<(PluginCategory, String), PluginDescriptor>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in plugin
    pub fn with_builtin_plugins() -> Result<Self> {
        let mut registry = Self::new();
        super::preprocessing::register_all(&mut registry)?;
        super::classifiers::register_all(&mut registry)?;
        super::regressors::register_all(&mut registry)?;
        super::risk_estimation::register_all(&mut registry)?;
        Ok(registry)
    }

    /// Register a plugin.
    ///
    /// Names are unique across categories and limited to ASCII letters,
    /// digits and `_`, since they appear in template ids, dimension prefixes
    /// and checkpoint file names. The space must pass
    /// [`HyperparameterSpace::check`], and an instance built from its defaults
    /// must report `name` and provide the capability required by `subtype`.
    pub fn register(
        &mut self,
        name: &str,
        category: PluginCategory,
        subtype: PluginSubtype,
        factory: PluginFactory,
        space: HyperparameterSpace,
    ) -> Result<()> {
        if subtype.category() != category {
            return Err(PrognosError::ConfigError(format!(
                "subtype {} does not belong to category {}",
                subtype, category
            )));
        }
        if !is_valid_name(name) {
            return Err(PrognosError::ConfigError(format!(
                "plugin name '{}' must be non-empty ASCII letters, digits or '_'",
                name
            )));
        }
        if let Ok(existing) = self.descriptor(name) {
            return Err(PrognosError::DuplicateName {
                category: existing.category.to_string(),
                name: name.to_string(),
            });
        }
        space.check()?;

        let key = (category, name.to_string());
        let instance = factory.build(&space.defaults())?;
        if !instance.provides(subtype) {
            return Err(PrognosError::CapabilityAbsent {
                plugin: name.to_string(),
                capability: subtype.capability().to_string(),
            });
        }
        if instance.name() != name {
            return Err(PrognosError::ConfigError(format!(
                "plugin registered as '{}' reports name '{}'",
                name,
                instance.name()
            )));
        }

        debug!(plugin = name, %category, %subtype, "registered plugin");
        self.plugins.insert(
            key,
            PluginDescriptor {
                name: name.to_string(),
                category,
                subtype,
                space,
                factory,
            },
        );
        Ok(())
    }

    /// Names filtered by category and subtype, in lexicographic order
    pub fn list_available(
        &self,
        category: Option<PluginCategory>,
        subtype: Option<PluginSubtype>,
    ) -> Vec<String> {
        let mut names: Vec<String> = self
            .plugins
            .values()
            .filter(|d| category.map_or(true, |c| d.category == c))
            .filter(|d| subtype.map_or(true, |s| d.subtype == s))
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Descriptor by name
    pub fn descriptor(&self, name: &str) -> Result<&PluginDescriptor> {
        self.plugins
            .values()
            .find(|d| d.name == name)
            .ok_or_else(|| PrognosError::UnknownPlugin(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptor(name).is_ok()
    }

    pub fn hyperparameter_space(&self, name: &str) -> Result<&HyperparameterSpace> {
        Ok(&self.descriptor(name)?.space)
    }

    /// Construct a plugin, filling unspecified hyperparameters with defaults
    pub fn instantiate(&self, name: &str, hyperparameters: &Configuration) -> Result<PluginInstance> {
        let descriptor = self.descriptor(name)?;
        let config = descriptor.space.complete(hyperparameters)?;
        descriptor.factory.build(&config)
    }

    /// Restore a plugin saved with `to_bytes`
    pub fn load(&self, name: &str, bytes: &[u8]) -> Result<PluginInstance> {
        let instance = self.descriptor(name)?.factory.load(bytes)?;
        if instance.name() != name {
            return Err(PrognosError::SerializationError(format!(
                "saved plugin '{}' does not match '{}'",
                instance.name(),
                name
            )));
        }
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
