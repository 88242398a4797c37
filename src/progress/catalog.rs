use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{EngineError, Missing};
use crate::model::{CategoryId, StageDefinition, StageId};
use crate::store::BatchStore;

/// The ordered stages of one product category. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
}

impl StageCatalog {
    /// Sorts by position, ties by id. Returns `None` for an empty list.
    pub fn new(mut stages: Vec<StageDefinition>) -> Option<Self> {
        if stages.is_empty() {
            return None;
        }
        stages.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
        Some(Self { stages })
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// First stage in sequence order that is not in `completed`.
    pub fn first_pending(&self, completed: &HashSet<StageId>) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| !completed.contains(&stage.id))
    }

    pub fn get(&self, id: StageId) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| stage.id == id)
    }
}

/// Resolves a category to its stage catalog. Pure lookup.
#[derive(Clone)]
pub struct StageCatalogResolver {
    store: Arc<dyn BatchStore>,
}

impl StageCatalogResolver {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        Self { store }
    }

    pub async fn stages_for(&self, category: CategoryId) -> Result<StageCatalog, EngineError> {
        let stages = self.store.find_catalog(category).await?;
        StageCatalog::new(stages).ok_or(EngineError::NotFound(Missing::Catalog(category)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn stage(label: &str, position: u32, category: CategoryId) -> StageDefinition {
        StageDefinition {
            id: StageId::new(),
            label: label.to_string(),
            position,
            category,
        }
    }

    #[test]
    fn catalog_is_sorted_by_position() {
        let category = CategoryId::new();
        let catalog = StageCatalog::new(vec![
            stage("packing", 3, category),
            stage("assembly", 1, category),
            stage("pressing", 2, category),
        ])
        .unwrap();

        let labels: Vec<&str> = catalog.stages().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["assembly", "pressing", "packing"]);
    }

    #[test]
    fn first_pending_skips_completed_stages() {
        let category = CategoryId::new();
        let catalog = StageCatalog::new(vec![
            stage("assembly", 1, category),
            stage("pressing", 2, category),
        ])
        .unwrap();

        let mut completed = HashSet::new();
        assert_eq!(catalog.first_pending(&completed).unwrap().label, "assembly");
        completed.insert(catalog.stages()[0].id);
        assert_eq!(catalog.first_pending(&completed).unwrap().label, "pressing");
        completed.insert(catalog.stages()[1].id);
        assert!(catalog.first_pending(&completed).is_none());
    }

    #[tokio::test]
    async fn missing_catalog_is_not_found() {
        let resolver = StageCatalogResolver::new(Arc::new(MemoryStore::new()));
        let category = CategoryId::new();
        assert!(matches!(
            resolver.stages_for(category).await,
            Err(EngineError::NotFound(Missing::Catalog(id))) if id == category
        ));
    }
}
