//! Pure reconcilers: `(current collection, message) -> next collection`.
//!
//! None of these mutate their input. Callers swap the returned collection
//! into the store as a whole, so consumers can detect change by identity.

use crate::envelope::EntityMessage;
use crate::models::{ActionItem, ColumnTitle, Entity, Thought};

/// Put/delete reconciliation for identifier-keyed collections
/// (thoughts and action items).
///
/// A put replaces the entity with the same id in place, or appends when
/// the id is unknown. A delete removes the matching id; an unknown id
/// leaves the collection unchanged.
pub fn reconcile<T>(current: &[T], message: &EntityMessage<T>) -> Vec<T>
where
    T: Entity + Clone,
{
    match message {
        EntityMessage::Put(incoming) => {
            let mut next = current.to_vec();
            match next.iter_mut().find(|e| e.id() == incoming.id()) {
                Some(existing) => *existing = incoming.clone(),
                None => next.push(incoming.clone()),
            }
            next
        }
        EntityMessage::Delete(id) => current.iter().filter(|e| e.id() != *id).cloned().collect(),
    }
}

/// Column title reconciliation.
///
/// Columns are located by topic, never by id, and only the title changes.
/// Columns are never created or removed by the event stream, so a rename
/// for an unknown topic and any delete are no-ops.
pub fn reconcile_column_titles(
    current: &[ColumnTitle],
    message: &EntityMessage<ColumnTitle>,
) -> Vec<ColumnTitle> {
    match message {
        EntityMessage::Put(incoming) => current
            .iter()
            .map(|column| {
                if column.topic == incoming.topic {
                    ColumnTitle {
                        title: incoming.title.clone(),
                        ..column.clone()
                    }
                } else {
                    column.clone()
                }
            })
            .collect(),
        EntityMessage::Delete(_) => current.to_vec(),
    }
}

/// Result of ending a retro: both collections, to be published together.
#[derive(Debug, Clone, PartialEq)]
pub struct EndRetro {
    pub thoughts: Vec<Thought>,
    pub action_items: Vec<ActionItem>,
}

/// End-of-retro bulk clear.
///
/// Every thought goes; only incomplete action items carry over.
pub fn end_retro(_thoughts: &[Thought], action_items: &[ActionItem]) -> EndRetro {
    EndRetro {
        thoughts: Vec::new(),
        action_items: action_items
            .iter()
            .filter(|item| !item.completed)
            .cloned()
            .collect(),
    }
}
