// error.rs - recoverable collision model errors

use thiserror::Error;

/// Failures reported while loading tiles or resolving inline models.
/// Anything found broken in the middle of a trace goes through
/// `com_error` instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CmError {
    #[error("too many map tiles (max {max})")]
    TooManyTiles { max: usize },

    #[error("{tile}: {lump} lump has {count} entries (max {max})")]
    LumpOverflow {
        tile: String,
        lump: &'static str,
        count: usize,
        max: usize,
    },

    #[error("{tile}: {what} index {index} out of range (count {count})")]
    IndexOutOfRange {
        tile: String,
        what: &'static str,
        index: i64,
        count: usize,
    },

    #[error("{tile}: plane {plane} does not have a unit normal")]
    NonUnitNormal { tile: String, plane: usize },

    #[error("{tile}: tracing node overflow (capacity {capacity})")]
    TracingNodeOverflow { tile: String, capacity: usize },

    #[error("{tile}: unexpected leaf below level node {node}")]
    UnexpectedLeaf { tile: String, node: usize },

    #[error("{tile}: node {node} is its own ancestor")]
    NodeCycle { tile: String, node: usize },

    #[error("{tile}: node {node} has no plane")]
    MissingPlane { tile: String, node: usize },

    #[error("bad inline model name '{0}'")]
    BadInlineModelName(String),

    #[error("bad inline model number {0}")]
    BadInlineModelNumber(i64),

    #[error("no map loaded")]
    NoMap,
}

pub type CmResult<T> = Result<T, CmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = CmError::IndexOutOfRange {
            tile: "+ufo_a".into(),
            what: "leafbrush",
            index: 70,
            count: 12,
        };
        assert_eq!(e.to_string(), "+ufo_a: leafbrush index 70 out of range (count 12)");
        assert_eq!(
            CmError::BadInlineModelName("door".into()).to_string(),
            "bad inline model name 'door'"
        );
        assert_eq!(
            CmError::TooManyTiles { max: 64 }.to_string(),
            "too many map tiles (max 64)"
        );
    }
}
