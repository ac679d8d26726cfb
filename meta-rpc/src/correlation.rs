use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generates correlation ids unique per process for the process's
/// lifetime: `rpc-<process>-<unix_nanos>-<monotonic_seq>`.
pub struct CorrelationIdGenerator {
    process_id: String,
    seq: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new(process_id: impl Into<String>) -> Self {
        CorrelationIdGenerator {
            process_id: process_id.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("rpc-{}-{}-{}", self.process_id, nanos, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_unique_ids() {
        let gen = CorrelationIdGenerator::new("meta");
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert!(a.starts_with("rpc-meta-"));
    }

    #[test]
    fn monotonic_sequence_within_a_process() {
        let gen = CorrelationIdGenerator::new("meta");
        let ids: Vec<String> = (0..100).map(|_| gen.next()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
