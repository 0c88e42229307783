use mem::MemError;
use nn::OpError;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{name} has rank {rank}, only 2-D convolution (rank 4) is supported")]
    UnsupportedRank { name: &'static str, rank: usize },
    #[error("batch splitting with group > 1 is not supported")]
    UnsupportedGroupedSplit,
    #[error(
        "the size of buffer needed to process single batch exceeds limit. Input shape: {input:?}, weight shape: {weight:?}"
    )]
    BufferTooLarge { input: Vec<usize>, weight: Vec<usize> },
    #[error("expected {expected} inputs, got {found}")]
    InputCount { expected: &'static str, found: usize },
    #[error("{0} must be a f32 tensor")]
    UnsupportedDataType(&'static str),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Mem(#[from] MemError),
}
