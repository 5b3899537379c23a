use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("point lies outside the voxel grid")]
    PointOutsideGrid,

    #[error("handle {index} lies outside the voxel grid")]
    HandleOutsideGrid { index: usize },

    #[error("QP solve failed to converge: {0}")]
    QpFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    /// An invariant the rest of the crate relies on was violated by data
    /// that should have made that impossible (e.g. a hull-depth BFS that
    /// didn't reach every active box). Not a recoverable, caller-facing
    /// condition like the others above.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
