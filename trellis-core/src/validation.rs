//! Per-spec validators invoked on write.
//!
//! A validator may return replacement metadata, signalling
//! normalization; clients see `modified: true` in the response. When a
//! node declares multiple specs, validators run in reverse order
//! (least-specific first) so more-constrained specs see normalized
//! input.

use std::collections::HashMap;

use trellis_model::{Spec, Structure, StructureFamily};

#[derive(Debug, Clone)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub type Validator = fn(
    &serde_json::Value,
    StructureFamily,
    Option<&Structure>,
    &Spec,
) -> Result<Option<serde_json::Value>, ValidationError>;

/// Registry of validators by spec name. Populated at startup.
pub struct ValidationRegistry {
    validators: HashMap<String, Validator>,
    reject_undeclared_specs: bool,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
            reject_undeclared_specs: false,
        }
    }

    /// Make specs absent from the registry an error instead of passing
    /// through un-validated.
    pub fn with_reject_undeclared_specs(mut self) -> Self {
        self.reject_undeclared_specs = true;
        self
    }

    pub fn register(&mut self, spec_name: &str, validator: Validator) {
        self.validators.insert(spec_name.to_string(), validator);
    }

    pub fn is_declared(&self, spec_name: &str) -> bool {
        self.validators.contains_key(spec_name)
    }

    /// Run all applicable validators. Returns the (possibly normalized)
    /// metadata and whether any validator modified it.
    pub fn run(
        &self,
        metadata: &serde_json::Value,
        structure_family: StructureFamily,
        structure: Option<&Structure>,
        specs: &[Spec],
    ) -> Result<(serde_json::Value, bool), ValidationError> {
        let mut current = metadata.clone();
        let mut modified = false;
        for spec in specs.iter().rev() {
            match self.validators.get(&spec.name) {
                Some(validator) => {
                    if let Some(replacement) =
                        validator(&current, structure_family, structure, spec)?
                    {
                        current = replacement;
                        modified = true;
                    }
                }
                None if self.reject_undeclared_specs => {
                    return Err(ValidationError(format!(
                        "spec {:?} is not declared in the validation registry",
                        spec.name
                    )))
                }
                None => {}
            }
        }
        Ok((current, modified))
    }
}

impl Default for ValidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
