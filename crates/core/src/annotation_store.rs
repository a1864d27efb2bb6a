//! Annotation store with linear undo/redo
//!
//! Every mutation is recorded as a [`HistoryEntry`] holding enough data to
//! invert and re-apply itself. `history[..=current_index]` is the applied
//! prefix; anything after it is the redo tail, which is discarded as soon
//! as a new action is recorded.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotation::{
    Annotation, AnnotationError, AnnotationId, AnnotationPatch, AnnotationResult,
};
use crate::store::{Subscription, Writable};

/// A recorded, invertible mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum HistoryAction {
    Add {
        annotation: Annotation,
    },
    Delete {
        annotation: Annotation,
        /// Position the annotation occupied before deletion
        index: usize,
    },
    Modify {
        before: Annotation,
        after: Annotation,
    },
    Clear {
        annotations: Vec<Annotation>,
    },
    Import {
        previous: Vec<Annotation>,
        imported: Vec<Annotation>,
    },
}

impl HistoryAction {
    /// Apply the action forward
    fn apply(&self, annotations: &mut Vec<Annotation>) {
        match self {
            HistoryAction::Add { annotation } => annotations.push(annotation.clone()),
            HistoryAction::Delete { annotation, .. } => {
                annotations.retain(|a| a.id != annotation.id)
            }
            HistoryAction::Modify { after, .. } => replace_by_id(annotations, after),
            HistoryAction::Clear { .. } => annotations.clear(),
            HistoryAction::Import { imported, .. } => *annotations = imported.clone(),
        }
    }

    /// Undo the action
    fn revert(&self, annotations: &mut Vec<Annotation>) {
        match self {
            HistoryAction::Add { annotation } => annotations.retain(|a| a.id != annotation.id),
            HistoryAction::Delete { annotation, index } => {
                let index = (*index).min(annotations.len());
                annotations.insert(index, annotation.clone());
            }
            HistoryAction::Modify { before, .. } => replace_by_id(annotations, before),
            HistoryAction::Clear { annotations: saved } => *annotations = saved.clone(),
            HistoryAction::Import { previous, .. } => *annotations = previous.clone(),
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            HistoryAction::Add { .. } => "add",
            HistoryAction::Delete { .. } => "delete",
            HistoryAction::Modify { .. } => "modify",
            HistoryAction::Clear { .. } => "clear",
            HistoryAction::Import { .. } => "import",
        }
    }
}

fn replace_by_id(annotations: &mut [Annotation], replacement: &Annotation) {
    if let Some(slot) = annotations.iter_mut().find(|a| a.id == replacement.id) {
        *slot = replacement.clone();
    }
}

/// One history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,

    #[serde(flatten)]
    pub action: HistoryAction,
}

impl HistoryEntry {
    fn now(action: HistoryAction) -> Self {
        Self {
            timestamp: unix_millis(),
            action,
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Complete store state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationState {
    pub annotations: Vec<Annotation>,
    pub history: Vec<HistoryEntry>,

    /// Index of the last applied history entry, `None` when nothing is applied
    pub current_index: Option<usize>,
}

impl AnnotationState {
    fn record(&mut self, action: HistoryAction) {
        let applied = self.current_index.map_or(0, |index| index + 1);
        self.history.truncate(applied);
        action.apply(&mut self.annotations);
        debug!(action = action.name(), "recorded annotation action");
        self.history.push(HistoryEntry::now(action));
        self.current_index = Some(self.history.len() - 1);
    }

    fn position(&self, id: AnnotationId) -> AnnotationResult<usize> {
        self.annotations
            .iter()
            .position(|a| a.id == id)
            .ok_or(AnnotationError::NotFound(id))
    }

    fn can_undo(&self) -> bool {
        self.current_index.is_some()
    }

    fn can_redo(&self) -> bool {
        let next = self.current_index.map_or(0, |index| index + 1);
        next < self.history.len()
    }
}

/// Owner of all annotations and their edit history
///
/// Clones share the same state.
///
/// # Example
///
/// ```
/// use exhibit_core::{Annotation, AnnotationStore, AnnotationStyle, Point};
///
/// let store = AnnotationStore::new();
/// let circle = Annotation::shape(
///     vec![Point::new(10.0, 10.0), Point::new(40.0, 40.0)],
///     AnnotationStyle::red_markup(),
/// );
/// let id = circle.id;
///
/// store.add_annotation(circle).unwrap();
/// store.delete_annotation(id).unwrap();
/// store.undo();
///
/// assert!(store.get(id).is_some());
/// assert_eq!(store.history().len(), 2);
/// assert_eq!(store.current_index(), Some(0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    state: Writable<AnnotationState>,
}

impl AnnotationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validated annotation
    pub fn add_annotation(&self, annotation: Annotation) -> AnnotationResult<()> {
        annotation.validate()?;
        self.state.try_update(|state| {
            if state.annotations.iter().any(|a| a.id == annotation.id) {
                return Err(AnnotationError::DuplicateId(annotation.id));
            }
            state.record(HistoryAction::Add { annotation });
            Ok(())
        })
    }

    /// Delete an annotation by id, returning it
    pub fn delete_annotation(&self, id: AnnotationId) -> AnnotationResult<Annotation> {
        self.state.try_update(|state| {
            let index = state.position(id)?;
            let annotation = state.annotations[index].clone();
            state.record(HistoryAction::Delete {
                annotation: annotation.clone(),
                index,
            });
            Ok(annotation)
        })
    }

    /// Apply a patch to an annotation, returning the new version
    ///
    /// The patched annotation must still pass validation.
    pub fn modify_annotation(
        &self,
        id: AnnotationId,
        patch: &AnnotationPatch,
    ) -> AnnotationResult<Annotation> {
        self.state.try_update(|state| {
            let index = state.position(id)?;
            let before = state.annotations[index].clone();
            let after = before.patched(patch);
            after.validate()?;
            state.record(HistoryAction::Modify {
                before,
                after: after.clone(),
            });
            Ok(after)
        })
    }

    /// Remove every annotation, returning how many were removed
    ///
    /// Clearing an empty store records nothing.
    pub fn clear_annotations(&self) -> usize {
        let mut cleared = 0;
        // Ok(()) carries "recorded"; Err(()) skips notification
        let _ = self.state.try_update(|state| {
            if state.annotations.is_empty() {
                return Err(());
            }
            cleared = state.annotations.len();
            state.record(HistoryAction::Clear {
                annotations: state.annotations.clone(),
            });
            Ok(())
        });
        cleared
    }

    /// Replace the whole annotation list as one undoable step
    ///
    /// Every annotation is validated and ids must be unique; on error the
    /// store is unchanged.
    pub fn replace_all(&self, annotations: Vec<Annotation>) -> AnnotationResult<()> {
        let mut seen = std::collections::HashSet::with_capacity(annotations.len());
        for annotation in &annotations {
            annotation.validate()?;
            if !seen.insert(annotation.id) {
                return Err(AnnotationError::DuplicateId(annotation.id));
            }
        }
        self.state.update(|state| {
            state.record(HistoryAction::Import {
                previous: state.annotations.clone(),
                imported: annotations,
            });
        });
        Ok(())
    }

    /// Step back one action; returns false when there is nothing to undo
    pub fn undo(&self) -> bool {
        self.state
            .try_update(|state| {
                let index = state.current_index.ok_or(())?;
                state.history[index].action.revert(&mut state.annotations);
                state.current_index = index.checked_sub(1);
                Ok::<_, ()>(())
            })
            .is_ok()
    }

    /// Re-apply the next undone action; returns false at the end of history
    pub fn redo(&self) -> bool {
        self.state
            .try_update(|state| {
                if !state.can_redo() {
                    return Err(());
                }
                let next = state.current_index.map_or(0, |index| index + 1);
                state.history[next].action.apply(&mut state.annotations);
                state.current_index = Some(next);
                Ok(())
            })
            .is_ok()
    }

    /// Check whether [`undo`](Self::undo) would do anything
    pub fn can_undo(&self) -> bool {
        self.state.with(AnnotationState::can_undo)
    }

    /// Check whether [`redo`](Self::redo) would do anything
    pub fn can_redo(&self) -> bool {
        self.state.with(AnnotationState::can_redo)
    }

    /// Restore the empty initial state, discarding history
    pub fn reset(&self) {
        self.state.set(AnnotationState::default());
    }

    /// Get an annotation by id
    pub fn get(&self, id: AnnotationId) -> Option<Annotation> {
        self.state
            .with(|state| state.annotations.iter().find(|a| a.id == id).cloned())
    }

    /// Current annotations in insertion order
    pub fn annotations(&self) -> Vec<Annotation> {
        self.state.with(|state| state.annotations.clone())
    }

    /// Number of annotations
    pub fn len(&self) -> usize {
        self.state.with(|state| state.annotations.len())
    }

    /// Check if the store holds no annotations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.with(|state| state.history.clone())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state.with(|state| state.current_index)
    }

    /// Clone of the full state
    pub fn snapshot(&self) -> AnnotationState {
        self.state.get()
    }

    /// Observe every state change
    pub fn subscribe(
        &self,
        callback: impl Fn(&AnnotationState) + Send + Sync + 'static,
    ) -> Subscription {
        self.state.subscribe(callback)
    }

    /// The underlying container, for registration with a batch manager
    pub fn container(&self) -> Writable<AnnotationState> {
        self.state.clone()
    }
}
