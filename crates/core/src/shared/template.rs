use std::sync::Arc;

/// Opaque biometric feature vector produced by an external recognition engine.
///
/// Immutable once built. Clones share the underlying buffer, so handing copies
/// to readers never exposes a mutable alias into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    data: Arc<[u8]>,
}

impl Template {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    /// Encodes an embedding as little-endian `f32` values.
    pub fn from_embedding(values: &[f32]) -> Self {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Interprets the bytes as little-endian `f32` values.
    ///
    /// Returns `None` when the length is not a multiple of four.
    pub fn to_embedding(&self) -> Option<Vec<f32>> {
        if self.data.len() % 4 != 0 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

impl From<Vec<u8>> for Template {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Template {
    fn from(data: &[u8]) -> Self {
        Self { data: data.into() }
    }
}
