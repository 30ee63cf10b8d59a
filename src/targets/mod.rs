/// Target entities
///
/// Workflows act on business entities owned by the surrounding system (loan
/// applications, contracts, ...). The engine only knows a `(type, id)` reference
/// and a small capability: read a field, write a field. Adapters are looked up
/// by type tag in a `TargetRegistry`.

pub mod table;

pub use table::TableTarget;

use crate::error::TargetError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};

/// Reference to any business entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    /// Type tag (e.g., "loan_application")
    pub target_type: String,
    /// Identifier within that type
    pub target_id: String,
}

impl TargetRef {
    pub fn new(target_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            target_id: target_id.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.target_type, self.target_id)
    }
}

/// Read/write capability over one entity type
///
/// `read_field` returns `Ok(None)` when the entity exists but the field is null.
/// Writes are applied directly with no versioning: last write wins.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    async fn read_field(&self, target_id: &str, field: &str) -> Result<Option<Value>, TargetError>;

    async fn write_field(&self, target_id: &str, field: &str, value: &Value) -> Result<(), TargetError>;
}

/// Type-tag registry of target adapters
#[derive(Clone, Default)]
pub struct TargetRegistry {
    adapters: HashMap<String, Arc<dyn TargetAdapter>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for a type tag
    pub fn register(&mut self, target_type: impl Into<String>, adapter: Arc<dyn TargetAdapter>) {
        let target_type = target_type.into();
        tracing::debug!("🎯 Registered target adapter: {}", target_type);
        self.adapters.insert(target_type, adapter);
    }

    /// Builder-style registration
    pub fn with(mut self, target_type: impl Into<String>, adapter: Arc<dyn TargetAdapter>) -> Self {
        self.register(target_type, adapter);
        self
    }

    pub fn resolve(&self, target_type: &str) -> Option<Arc<dyn TargetAdapter>> {
        self.adapters.get(target_type).cloned()
    }

    pub fn target_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.adapters.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("target_types", &self.target_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl TargetAdapter for Fixed {
        async fn read_field(&self, _id: &str, _field: &str) -> Result<Option<Value>, TargetError> {
            Ok(Some(Value::from("approved")))
        }

        async fn write_field(&self, _id: &str, field: &str, _value: &Value) -> Result<(), TargetError> {
            Err(TargetError::UnwritableField(field.to_string()))
        }
    }

    #[tokio::test]
    async fn registry_resolves_by_type_tag() {
        let registry = TargetRegistry::new().with("loan_application", Arc::new(Fixed));

        let adapter = registry.resolve("loan_application").unwrap();
        assert_eq!(
            adapter.read_field("42", "status").await.unwrap(),
            Some(Value::from("approved"))
        );
        assert!(registry.resolve("contract").is_none());
        assert_eq!(registry.target_types(), vec!["loan_application".to_string()]);
    }

    #[test]
    fn target_ref_display() {
        assert_eq!(TargetRef::new("loan_application", "17").to_string(), "loan_application#17");
    }
}
