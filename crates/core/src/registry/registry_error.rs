use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity already enrolled: {0}")]
    DuplicateKey(String),
    #[error("identity not found: {0}")]
    KeyNotFound(String),
    #[error("template rejected by comparator")]
    InvalidTemplate,
    #[error("cannot merge identity into itself: {0}")]
    SelfMerge(String),
    #[error("match cancelled")]
    Cancelled,
}
