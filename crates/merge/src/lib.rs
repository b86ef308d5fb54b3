//! Depth-aware path enumeration and targeted patch construction — the
//! core algorithm that lets granular remote updates converge onto
//! local state without clobbering unrelated fields.

mod patch;
mod paths;

pub use patch::{build_state_update, set_nested_value, StatePatch};
pub use paths::{extract_paths, ExtractPaths};
