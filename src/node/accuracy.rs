//! Agreement between the sender's decision and the one this node would have made.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::metrics;

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AccuracyStats {
    pub agreements: u64,
    pub disagreements: u64,
    pub rejected: u64,
    /// agreements / (agreements + disagreements); 1.0 before any comparison
    pub ratio: f64,
}

/// Purely observational: nothing here feeds back into admission.
#[derive(Debug, Default)]
pub struct AccuracyTracker {
    agreements: AtomicU64,
    disagreements: AtomicU64,
    rejected: AtomicU64,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the sender's decision with ours and return whether they agreed
    pub fn record(&self, remote_pass: bool, local_would_pass: bool) -> bool {
        let agreement = remote_pass == local_would_pass;
        if agreement {
            self.agreements.fetch_add(1, Ordering::Relaxed);
        } else {
            self.disagreements.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_accuracy(agreement);
        agreement
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_rejected();
    }

    pub fn stats(&self) -> AccuracyStats {
        let agreements = self.agreements.load(Ordering::Relaxed);
        let disagreements = self.disagreements.load(Ordering::Relaxed);
        let total = agreements + disagreements;
        AccuracyStats {
            agreements,
            disagreements,
            rejected: self.rejected.load(Ordering::Relaxed),
            ratio: if total == 0 {
                1.0
            } else {
                agreements as f64 / total as f64
            },
        }
    }
}
