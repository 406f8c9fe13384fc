pub mod common;
pub mod completions;
pub mod inventory;
pub mod patient;
pub mod queue;
pub mod sync;
