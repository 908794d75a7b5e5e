use thiserror::Error;

/// Structural load failures. These abort the load; everything softer
/// (dangling index, missing image, decode failure) is logged, recorded in
/// `Document::warnings` and left unresolved so the frame loop keeps running.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid GLB magic 0x{0:08X}, expected 0x46546C67")]
    BadMagic(u32),

    #[error("unsupported GLB container version {0}, expected 2")]
    UnsupportedVersion(u32),

    #[error("GLB container truncated: {0}")]
    Truncated(&'static str),

    #[error("GLB container has no JSON chunk")]
    MissingJsonChunk,

    #[error("failed to parse document JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("node {0} is part of a child cycle (a node lists an ancestor as child)")]
    NodeCycle(usize),

    #[error("composition references no assets")]
    EmptyComposition,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
