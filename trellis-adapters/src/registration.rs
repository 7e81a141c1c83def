//! Data-source generation for registration walkers.
//!
//! When externally-managed files are registered, a walker asks the
//! factory registry to describe each item as one or more [`DataSource`]s
//! keyed by mimetype. Concrete format support is plugin code; the
//! registry here only dispatches.

use std::collections::HashMap;

use trellis_model::{Asset, DataSource, Management, Structure};

use crate::AdapterError;

/// What the walker knows about an item before any format-specific I/O.
#[derive(Clone, Debug)]
pub struct DataSourceHint {
    pub mimetype: String,
    pub data_uri: String,
    pub is_directory: bool,
    /// A structure, when the caller already knows it.
    pub structure: Option<Structure>,
}

type FactoryFn = fn(&DataSourceHint) -> Result<Vec<DataSource>, AdapterError>;

/// Registry mapping mimetypes onto data-source factories.
///
/// Populated at startup; read-only afterwards.
pub struct AdapterFactoryRegistry {
    factories: HashMap<String, FactoryFn>,
}

impl AdapterFactoryRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, mimetype: impl Into<String>, factory: FactoryFn) {
        self.factories.insert(mimetype.into(), factory);
    }

    pub fn supports(&self, mimetype: &str) -> bool {
        self.factories.contains_key(mimetype)
    }

    /// Generate data sources describing one item.
    pub fn generate_data_sources(
        &self,
        hint: &DataSourceHint,
    ) -> Result<Vec<DataSource>, AdapterError> {
        match self.factories.get(&hint.mimetype) {
            Some(factory) => factory(hint),
            None => Err(AdapterError::BadRequest(format!(
                "no adapter registered for mimetype {:?}",
                hint.mimetype
            ))),
        }
    }

    /// Guess a mimetype for a file path, for walkers that have only a
    /// name to go on.
    pub fn guess_mimetype(path: &str) -> Option<String> {
        mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string())
    }
}

impl Default for AdapterFactoryRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("text/csv", external_single_asset);
        registry.register("application/octet-stream", external_single_asset);
        registry
    }
}

/// The common case: one external asset bound to the adapter's `data_uri`
/// parameter.
fn external_single_asset(hint: &DataSourceHint) -> Result<Vec<DataSource>, AdapterError> {
    let structure = hint.structure.clone();
    Ok(vec![DataSource {
        id: None,
        mimetype: hint.mimetype.clone(),
        structure,
        parameters: serde_json::Value::Null,
        management: Management::External,
        assets: vec![Asset {
            id: None,
            data_uri: hint.data_uri.clone(),
            is_directory: hint.is_directory,
            parameter: Some("data_uri".to_string()),
            num: None,
        }],
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_external_data_source() {
        let registry = AdapterFactoryRegistry::default();
        let hint = DataSourceHint {
            mimetype: "text/csv".into(),
            data_uri: "file:///data/run1.csv".into(),
            is_directory: false,
            structure: None,
        };
        let sources = registry.generate_data_sources(&hint).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].management, Management::External);
        assert_eq!(sources[0].assets[0].parameter.as_deref(), Some("data_uri"));
    }

    #[test]
    fn unknown_mimetype_rejected() {
        let registry = AdapterFactoryRegistry::default();
        let hint = DataSourceHint {
            mimetype: "application/x-unknown".into(),
            data_uri: "file:///x".into(),
            is_directory: false,
            structure: None,
        };
        assert!(registry.generate_data_sources(&hint).is_err());
    }
}
