use serde::{Deserialize, Serialize};

/// Collection lifecycle. Forward path is `Created -> IndexBuilt -> Loaded`;
/// `release` steps back to `IndexBuilt`; `Dropped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Created,
    IndexBuilt,
    Loaded,
    Dropped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Created => "Created",
            LifecycleState::IndexBuilt => "IndexBuilt",
            LifecycleState::Loaded => "Loaded",
            LifecycleState::Dropped => "Dropped",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("`{op}` is not allowed while the collection is {state}")]
    InvalidState {
        op: &'static str,
        state: LifecycleState,
    },
    #[error("collection is not loaded")]
    NotLoaded,
    #[error("collection has been dropped")]
    CollectionDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(LifecycleState::IndexBuilt.to_string(), "IndexBuilt");
        assert_eq!(LifecycleState::Dropped.to_string(), "Dropped");
    }
}
