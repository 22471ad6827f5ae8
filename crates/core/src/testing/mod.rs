//! Test doubles for the external collaborators.
//!
//! These live in the library (not behind `cfg(test)`) so integration tests
//! and the server crate's tests can use them.

mod memory_store;
mod mock_compiler;
mod mock_genai;

pub use memory_store::MemoryObjectStore;
pub use mock_compiler::MockDeckCompiler;
pub use mock_genai::{MockImageGenerator, MockTextGenerator};
