/// Extension of persisted identity records, used by both save and load.
pub const RECORD_EXTENSION: &str = "fir";

/// Extension of a record that is still being written.
pub const PARTIAL_EXTENSION: &str = "part";

/// Default minimum confidence for `identify` to report a known face.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.4;

/// ArcFace embedding width.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;
