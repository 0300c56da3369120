//! Template context assembly.
//!
//! A [`ManifestContext`] is built fresh for every pass from static defaults,
//! user overrides and values discovered from satisfied dependencies, and is
//! never modified once built.

use std::collections::BTreeMap;

use tracing::warn;

use crate::status::Check;
use crate::status::Status;

/// A single template value.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ContextValue {
    #[display("{_0}")]
    Text(String),
    #[display("{_0}")]
    Number(i64),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for ContextValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<u16> for ContextValue {
    fn from(value: u16) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestContext {
    values: BTreeMap<String, ContextValue>,
}

impl ManifestContext {
    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Layers defaults, overrides and discovered values into a [`ManifestContext`].
///
/// Later layers win over earlier ones.
#[derive(Debug, Default)]
pub struct ManifestContextBuilder {
    values: BTreeMap<String, ContextValue>,
}

impl ManifestContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with_all<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<ContextValue>,
    {
        for (name, value) in values {
            self.values.insert(name.into(), value.into());
        }
        self
    }

    pub fn build(self) -> ManifestContext {
        ManifestContext {
            values: self.values,
        }
    }
}

/// Parses the YAML mapping held by an image override config option.
///
/// An empty option means no overrides. Anything that is not a mapping from
/// image name to image reference (or null) blocks the unit.
pub fn parse_image_overrides(
    option: &str,
    raw: &str,
) -> Check<BTreeMap<String, Option<String>>> {
    if raw.trim().is_empty() {
        return Check::Pass(BTreeMap::new());
    }

    match serde_yaml::from_str::<Option<BTreeMap<String, Option<String>>>>(raw) {
        Ok(images) => Check::Pass(images.unwrap_or_default()),
        Err(err) => {
            warn!(option, error = %err, "cannot parse config-defined image list, ignoring it");
            Check::Fail(Status::blocked(format!(
                "Error parsing the '{option}' config option: {err}"
            )))
        }
    }
}

/// Applies `overrides` on top of `defaults`.
///
/// Only names present in `defaults` can be overridden, and empty overrides
/// are skipped.
pub fn merge_images(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, Option<String>>,
) -> BTreeMap<String, String> {
    let mut images = defaults.clone();
    for (name, image) in overrides {
        let Some(image) = image.as_deref().filter(|image| !image.is_empty()) else {
            continue;
        };
        match images.get_mut(name) {
            Some(slot) => *slot = image.to_string(),
            None => warn!(image_name = %name, "image name not in image list, ignoring"),
        }
    }
    images
}
