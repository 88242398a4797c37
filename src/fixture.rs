//! TOML fixtures describing actors, stage catalogs and batches.
//!
//! Used by `batchline seed` and by tests to load reference data into a
//! store. Stage positions default to declaration order.

use std::path::Path;

use serde::Deserialize;

use crate::error::BatchlineError;
use crate::model::{
    Actor, ActorId, Batch, BatchId, CategoryId, ConversationId, StageDefinition, StageId,
};
use crate::products::LineItem;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    actors: Vec<ActorEntry>,
    #[serde(default)]
    categories: Vec<CategoryEntry>,
    #[serde(default)]
    batches: Vec<BatchEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ActorEntry {
    id: ActorId,
    name: String,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    conversations: Vec<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryEntry {
    id: CategoryId,
    stages: Vec<StageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct StageEntry {
    id: StageId,
    label: String,
    position: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct BatchEntry {
    id: BatchId,
    number: String,
    quantity: u32,
    category: CategoryId,
    comment: Option<String>,
    #[serde(default)]
    items: Vec<LineItem>,
}

impl Fixture {
    pub fn parse(contents: &str) -> Result<Self, BatchlineError> {
        let fixture: Fixture = toml::from_str(contents)?;
        fixture.validate()?;
        Ok(fixture)
    }

    pub fn load(path: &Path) -> Result<Self, BatchlineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    fn validate(&self) -> Result<(), BatchlineError> {
        for batch in &self.batches {
            if !self.categories.iter().any(|c| c.id == batch.category) {
                return Err(BatchlineError::Fixture(format!(
                    "batch {} refers to unknown category {}",
                    batch.number, batch.category
                )));
            }
        }
        Ok(())
    }

    pub fn actors(&self) -> Vec<(Actor, Vec<ConversationId>)> {
        self.actors
            .iter()
            .map(|entry| {
                let actor = Actor {
                    id: entry.id,
                    display_name: entry.name.clone(),
                    active: entry.active,
                };
                let links = entry
                    .conversations
                    .iter()
                    .map(|c| ConversationId::new(c.as_str()))
                    .collect();
                (actor, links)
            })
            .collect()
    }

    pub fn stages(&self) -> Vec<StageDefinition> {
        self.categories
            .iter()
            .flat_map(|category| {
                category
                    .stages
                    .iter()
                    .enumerate()
                    .map(move |(index, stage)| StageDefinition {
                        id: stage.id,
                        label: stage.label.clone(),
                        position: stage.position.unwrap_or(index as u32 + 1),
                        category: category.id,
                    })
            })
            .collect()
    }

    pub fn batches(&self) -> Vec<(Batch, Vec<LineItem>)> {
        self.batches
            .iter()
            .map(|entry| {
                let batch = Batch {
                    id: entry.id,
                    number: entry.number.clone(),
                    quantity: entry.quantity,
                    category: entry.category,
                    comment: entry.comment.clone(),
                };
                (batch, entry.items.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seed_memory(fixture: &Fixture, store: &MemoryStore) {
        for (actor, links) in fixture.actors() {
            for conversation in links {
                store.link_conversation(conversation, actor.id);
            }
            store.put_actor(actor);
        }
        for stage in fixture.stages() {
            store.put_stage(stage);
        }
        for (batch, items) in fixture.batches() {
            store.put_line_items(batch.id, items);
            store.put_batch(batch);
        }
    }

    const CATEGORY: &str = "0d8c5a4e-5b7e-4f6a-8a11-5a1f3c2b9e10";

    #[test]
    fn positions_follow_declaration_order_unless_given() {
        let fixture = Fixture::parse(&format!(
            r#"
            [[categories]]
            id = "{CATEGORY}"
            stages = [
                {{ id = "a0000000-0000-4000-8000-000000000001", label = "assembly" }},
                {{ id = "a0000000-0000-4000-8000-000000000002", label = "packing", position = 10 }},
                {{ id = "a0000000-0000-4000-8000-000000000003", label = "labelling" }},
            ]
            "#
        ))
        .unwrap();

        let positions: Vec<(String, u32)> = fixture
            .stages()
            .into_iter()
            .map(|s| (s.label, s.position))
            .collect();
        assert_eq!(
            positions,
            vec![
                ("assembly".to_string(), 1),
                ("packing".to_string(), 10),
                ("labelling".to_string(), 3),
            ]
        );
    }

    #[test]
    fn batch_with_unknown_category_is_rejected() {
        let result = Fixture::parse(&format!(
            r#"
            [[batches]]
            id = "0194fafe-3911-7cdf-b1ae-245469b6b1c8"
            number = "173"
            quantity = 5
            category = "{CATEGORY}"
            "#
        ));
        assert!(matches!(result, Err(BatchlineError::Fixture(_))));
    }

    #[test]
    fn actors_carry_their_conversations() {
        let fixture = Fixture::parse(
            r#"
            [[actors]]
            id = "6f1c1b43-8a62-4a57-9d50-3f2f5a3e0a01"
            name = "Anna"
            active = false
            conversations = ["tty-anna", "1391925303"]
            "#,
        )
        .unwrap();

        let (actor, links) = fixture.actors().remove(0);
        assert_eq!(actor.display_name, "Anna");
        assert!(!actor.active);
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn seeded_memory_store_serves_lookups() {
        use crate::store::{ActorDirectory, BatchStore, LineItemSource};

        let fixture = Fixture::parse(&format!(
            r#"
            [[actors]]
            id = "6f1c1b43-8a62-4a57-9d50-3f2f5a3e0a01"
            name = "Anna"
            conversations = ["tty-anna"]

            [[categories]]
            id = "{CATEGORY}"
            stages = [{{ id = "a0000000-0000-4000-8000-000000000001", label = "assembly" }}]

            [[batches]]
            id = "0194fafe-3911-7cdf-b1ae-245469b6b1c8"
            number = "173"
            quantity = 5
            category = "{CATEGORY}"
            items = [{{ article = "FSWHITE-0064-02-L", total = 5 }}]
            "#
        ))
        .unwrap();
        let store = MemoryStore::new();
        seed_memory(&fixture, &store);

        let anna = store
            .actor_for_conversation(&ConversationId::new("tty-anna"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.find_actor(anna).await.unwrap().unwrap().display_name, "Anna");
        let (batch, _) = fixture.batches().remove(0);
        assert_eq!(store.find_catalog(batch.category).await.unwrap().len(), 1);
        assert_eq!(store.line_items(batch.id).await.unwrap()[0].total, 5);
    }
}
