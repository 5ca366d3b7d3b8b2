//! Todo list provider.

use crate::model::todo::{TodoId, TodoItem, TodoValidationError};
use crate::persistent::{PersistentState, StorageOptions};
use crate::registry::{RegistryError, StorageRegistry};
use crate::validator::collection_shape;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const TODO_ITEMS_KEY: &str = "@todo_items";
const TODO_SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoError {
    Validation(TodoValidationError),
    NotFound(TodoId),
}

impl Display for TodoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "todo not found: {id}"),
        }
    }
}

impl Error for TodoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound(_) => None,
        }
    }
}

impl From<TodoValidationError> for TodoError {
    fn from(value: TodoValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Todo list persisted under [`TODO_ITEMS_KEY`] with a 500ms save debounce.
pub struct TodoProvider {
    state: PersistentState<Vec<TodoItem>>,
}

impl TodoProvider {
    /// Claims the todo key and loads stored items.
    pub async fn open(
        registry: &StorageRegistry,
        options: StorageOptions,
    ) -> Result<Self, RegistryError> {
        let state = registry.claim_with_shape(
            TODO_ITEMS_KEY,
            Vec::new(),
            options.with_debounce(TODO_SAVE_DEBOUNCE),
            collection_shape::<TodoItem>(),
        )?;
        state.load().await;
        Ok(Self { state })
    }

    pub fn state(&self) -> &PersistentState<Vec<TodoItem>> {
        &self.state
    }

    pub fn items(&self) -> Vec<TodoItem> {
        self.state.data()
    }

    /// Appends a new open item and returns its ID.
    pub async fn add(&self, title: impl Into<String>) -> Result<TodoId, TodoError> {
        let item = TodoItem::new(title.into().trim());
        item.validate()?;
        let id = item.id;
        self.state
            .update(move |items| {
                let mut next = items.clone();
                next.push(item);
                next
            })
            .await;
        Ok(id)
    }

    /// Flips the completion flag of one item.
    pub async fn toggle(&self, id: TodoId) -> Result<(), TodoError> {
        self.require(id)?;
        self.state
            .update(|items| {
                items
                    .iter()
                    .cloned()
                    .map(|mut item| {
                        if item.id == id {
                            item.completed = !item.completed;
                        }
                        item
                    })
                    .collect()
            })
            .await;
        Ok(())
    }

    pub async fn remove(&self, id: TodoId) -> Result<(), TodoError> {
        self.require(id)?;
        self.state
            .update(|items| items.iter().filter(|item| item.id != id).cloned().collect())
            .await;
        Ok(())
    }

    /// Persists a pending debounced save immediately.
    pub async fn flush(&self) {
        self.state.flush().await;
    }

    fn require(&self, id: TodoId) -> Result<(), TodoError> {
        if self.state.data().iter().any(|item| item.id == id) {
            Ok(())
        } else {
            Err(TodoError::NotFound(id))
        }
    }
}
