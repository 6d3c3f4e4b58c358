use thiserror::Error;

/// Errors raised while classifying an inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// A Message event arrived without the leading protocol tag byte
    #[error("message event carries no routing tag")]
    MissingTag,
    /// The tag byte does not name any known protocol family
    #[error("unknown protocol tag {tag}")]
    UnknownKind { tag: u8 },
}
