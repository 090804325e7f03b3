//! Parser checkpoint

use serde::{Deserialize, Serialize};

/// The only parser state that has to survive a restart.
///
/// `position` is the byte offset in the source consumed so far. The layout
/// (`{"position": .., "metadataExtracted": ..}`) is what callers persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Source bytes consumed
    pub position: u64,
    /// Whether the metadata record has been emitted
    pub metadata_extracted: bool,
}

impl Checkpoint {
    /// Checkpoint pinned on every metadata record
    pub const METADATA: Checkpoint = Checkpoint { position: 0, metadata_extracted: true };

    /// Create a checkpoint
    pub fn new(position: u64, metadata_extracted: bool) -> Self {
        Self { position, metadata_extracted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_layout() {
        let cp = Checkpoint::new(42, true);
        let json = serde_json::to_string(&cp).unwrap();
        assert_eq!(json, r#"{"position":42,"metadataExtracted":true}"#);
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
    }
}
