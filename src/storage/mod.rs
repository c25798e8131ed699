//! Storage engine: records kept as files, state kept in directory names.
//!
//! No database and no in-memory index: `new/` holds unclaimed records, `cur/`
//! holds processed ones, and flags travel in the filename. See
//! [`memdir`] for the rename discipline.

pub mod filename;
pub mod flags;
pub mod memdir;

pub use filename::{
    MAX_FILENAME_LEN, ParsedFilename, UniqueToken, encode_filename, flag_budget, parse_filename,
};
pub use flags::{Flag, FlagSet};
pub use memdir::{CUR_DIR, MemoryState, MemoryStorage, NEW_DIR, TMP_DIR};
