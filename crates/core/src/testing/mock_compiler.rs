//! Mock deck compiler for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::compiler::{CompileError, DeckCompiler, DeckDocument, JsonDeckCompiler};

/// `DeckCompiler` that delegates to the JSON compiler while counting calls,
/// with an optional injected failure.
pub struct MockDeckCompiler {
    inner: JsonDeckCompiler,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl Default for MockDeckCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeckCompiler {
    pub fn new() -> Self {
        Self {
            inner: JsonDeckCompiler::new(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeckCompiler for MockDeckCompiler {
    fn render(&self, document: &DeckDocument) -> Result<Vec<u8>, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CompileError::Inconsistent("injected failure".to_string()));
        }
        self.inner.render(document)
    }
}
