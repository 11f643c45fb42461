//! Per-walk shared state: sequence numbers, materializer, cancellation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::parser::header::MAX_HEADER_BYTES;
use crate::section::Materializer;

/// State shared by every part built during one or more walks.
///
/// Each session owns its own sequence counter, so unrelated walks (e.g. in
/// a server) neither contend on nor leak identifiers to each other. Pass the
/// same counter to several sessions with [`Session::with_counter`] when
/// sequence numbers must be unique across them.
#[derive(Debug)]
pub struct Session {
    seq: Arc<AtomicU64>,
    materializer: Materializer,
    max_header_bytes: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            materializer: Materializer::default(),
            max_header_bytes: MAX_HEADER_BYTES,
        }
    }

    /// Draw sequence numbers from `counter` instead of a private one.
    pub fn with_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.seq = counter;
        self
    }

    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }

    /// Next sequence number (the first one is 1).
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }
}

/// A counter shared by the whole process, for callers that want sequence
/// numbers unique for the life of the process.
pub fn process_counter() -> Arc<AtomicU64> {
    static COUNTER: OnceLock<Arc<AtomicU64>> = OnceLock::new();
    Arc::clone(COUNTER.get_or_init(|| Arc::new(AtomicU64::new(0))))
}

/// Cooperative cancellation flag, checked by the walker before each sub-part.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_have_independent_counters() {
        let a = Session::new();
        let b = Session::new();
        assert_eq!(a.next_seq(), 1);
        assert_eq!(a.next_seq(), 2);
        assert_eq!(b.next_seq(), 1);
    }

    #[test]
    fn test_shared_counter_is_unique_across_threads() {
        let counter = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = Session::new().with_counter(Arc::clone(&counter));
                std::thread::spawn(move || (0..100).map(|_| session.next_seq()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }

    #[test]
    fn test_process_counter_spans_sessions() {
        assert!(Arc::ptr_eq(&process_counter(), &process_counter()));
        let a = Session::new().with_counter(process_counter());
        let b = Session::new().with_counter(process_counter());
        let mut seqs = vec![a.next_seq(), b.next_seq(), a.next_seq(), b.next_seq()];
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        seqs.dedup();
        assert_eq!(seqs.len(), 4);
    }

    #[test]
    fn test_cancel_token_is_shared_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
