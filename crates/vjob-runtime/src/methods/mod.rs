//! Built-in methods
//!
//! - `MemoryMethod` (`mem:`) - in-process tree, for tests and demos
//! - `LocalMethod` (`file:`) - local disk through `std::fs`
//!
//! Other backends implement `vjob_core::Method` and register with a
//! `MethodTable` (or any `MethodResolver`).

mod local;
mod memory;

use std::sync::Arc;

use vjob_core::MethodTable;

pub use local::LocalMethod;
pub use memory::MemoryMethod;

/// Table with `mem:` (fresh, empty) and `file:` (unrooted) registered.
pub fn default_table() -> MethodTable {
    MethodTable::new()
        .with("mem", Arc::new(MemoryMethod::new()))
        .with("file", Arc::new(LocalMethod::new()))
}
