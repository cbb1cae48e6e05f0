//! Typed registry of candidate image-editing models.
//!
//! Each model is a record carrying its remote path and default request
//! knobs. Model-specific behavior comes from the record, never from
//! substring checks on the logical name.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One image-editing model the gateway can run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Logical name used throughout the pipeline and in configuration.
    pub name: String,
    /// Path segment on the image-editing gateway.
    pub remote_path: String,
    /// Requested output container, when the model honors one.
    #[serde(default)]
    pub output_format: Option<String>,
    /// Resolution tier for models that expose one.
    #[serde(default)]
    pub resolution: Option<String>,
    /// Fixed seed; `-1` asks the gateway to randomize.
    #[serde(default)]
    pub seed: Option<i64>,
}

impl ModelSpec {
    /// Create a spec with no optional knobs.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::registry::ModelSpec;
    ///
    /// let spec = ModelSpec::new("seedream-v4", "bytedance/seedream-v4/edit");
    /// assert_eq!(spec.name, "seedream-v4");
    /// assert_eq!(spec.remote_path, "bytedance/seedream-v4/edit");
    /// assert!(spec.output_format.is_none());
    /// ```
    pub fn new(name: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_path: remote_path.into(),
            output_format: None,
            resolution: None,
            seed: None,
        }
    }

    /// Request a specific output container from the gateway.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::registry::ModelSpec;
    ///
    /// let spec = ModelSpec::new("nano-banana", "google/nano-banana/edit")
    ///     .with_output_format("jpeg");
    /// assert_eq!(spec.output_format.as_deref(), Some("jpeg"));
    /// ```
    #[must_use]
    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    /// Pick a resolution tier for models that expose one.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::registry::ModelSpec;
    ///
    /// let spec = ModelSpec::new("nano-banana-pro-edit", "google/nano-banana-pro/edit")
    ///     .with_resolution("1k");
    /// assert_eq!(spec.resolution.as_deref(), Some("1k"));
    /// ```
    #[must_use]
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Fix the generation seed; `-1` asks the gateway to randomize.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::registry::ModelSpec;
    ///
    /// let spec = ModelSpec::new("wan-2.5-edit", "alibaba/wan-2.5/image-edit").with_seed(-1);
    /// assert_eq!(spec.seed, Some(-1));
    /// ```
    #[must_use]
    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Lookup table of [`ModelSpec`]s, insertion-ordered.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    specs: FxHashMap<String, ModelSpec>,
    order: Vec<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The models the production gateway exposes today.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::registry::ModelRegistry;
    ///
    /// let registry = ModelRegistry::builtin();
    /// assert!(registry.get("seedream-v4").is_some());
    /// assert_eq!(registry.len(), 6);
    /// ```
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.insert(ModelSpec::new("seedream-v4", "bytedance/seedream-v4/edit"));
        registry.insert(
            ModelSpec::new("qwen-edit-plus", "wavespeed-ai/qwen-image/edit-plus")
                .with_seed(-1)
                .with_output_format("jpeg"),
        );
        registry.insert(ModelSpec::new("wan-2.5-edit", "alibaba/wan-2.5/image-edit").with_seed(-1));
        registry.insert(
            ModelSpec::new("nano-banana", "google/nano-banana/edit").with_output_format("jpeg"),
        );
        registry.insert(
            ModelSpec::new("nano-banana-pro-edit", "google/nano-banana-pro/edit")
                .with_output_format("png")
                .with_resolution("1k"),
        );
        registry.insert(
            ModelSpec::new(
                "nano-banana-pro-edit-ultra",
                "google/nano-banana-pro/edit-ultra",
            )
            .with_output_format("png")
            .with_resolution("4k"),
        );
        registry
    }

    pub fn insert(&mut self, spec: ModelSpec) {
        if !self.specs.contains_key(&spec.name) {
            self.order.push(spec.name.clone());
        }
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.specs.get(name)
    }

    /// Resolve a logical name, falling back to a pass-through spec so an
    /// unknown-but-valid gateway path still works.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::registry::ModelRegistry;
    ///
    /// let registry = ModelRegistry::builtin();
    /// let known = registry.resolve("qwen-edit-plus");
    /// assert_eq!(known.remote_path, "wavespeed-ai/qwen-image/edit-plus");
    ///
    /// let passthrough = registry.resolve("vendor/custom/edit");
    /// assert_eq!(passthrough.remote_path, "vendor/custom/edit");
    /// ```
    pub fn resolve(&self, name: &str) -> ModelSpec {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| ModelSpec::new(name, name))
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_the_gateway_catalog() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.len(), 6);
        assert_eq!(
            registry.get("seedream-v4").unwrap().remote_path,
            "bytedance/seedream-v4/edit"
        );
        let ultra = registry.get("nano-banana-pro-edit-ultra").unwrap();
        assert_eq!(ultra.resolution.as_deref(), Some("4k"));
        assert_eq!(ultra.output_format.as_deref(), Some("png"));
    }

    #[test]
    fn unknown_names_pass_through() {
        let registry = ModelRegistry::builtin();
        let spec = registry.resolve("vendor/custom-model/edit");
        assert_eq!(spec.remote_path, "vendor/custom-model/edit");
        assert!(spec.output_format.is_none());
    }

    #[test]
    fn insertion_order_is_preserved() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.names()[0], "seedream-v4");
        assert_eq!(registry.names()[3], "nano-banana");
    }
}
