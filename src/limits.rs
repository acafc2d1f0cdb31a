//! Hard limits enforced at the engine boundary.

pub const MAX_PCS: usize = 10_000;
pub const MAX_ROW: u8 = 20;
pub const MIN_ROW: u8 = 1;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 16 * 1024;
pub const MAX_SPEC_FIELD_LEN: usize = 256;
pub const MAX_REPLICATION_BATCH: usize = 5_000;
pub const MAX_IN_CLAUSE_IDS: usize = 1_000;
