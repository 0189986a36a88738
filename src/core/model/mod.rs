use std::time::Duration;

/// Dispatcher lifecycle. Transitions only move forward, one step at a time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Phase {
    Idle,
    Spawning,
    Running,
    Joining,
    Finalized,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Spawning => "spawning",
            Phase::Running => "running",
            Phase::Joining => "joining",
            Phase::Finalized => "finalized",
        }
    }

    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Spawning),
            Phase::Spawning => Some(Phase::Running),
            Phase::Running => Some(Phase::Joining),
            Phase::Joining => Some(Phase::Finalized),
            Phase::Finalized => None,
        }
    }
}

/// Post-barrier run totals.
#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub num_keys: u64,
    pub kmer_len: usize,
    pub canonical: bool,
    pub reads: u64,
    pub lookups: u64,
    pub mapped: u64,
    pub unmapped: u64,
    pub decode_events: u64,
    pub forward_reads: u64,
    pub reverse_reads: u64,
    pub elapsed: Duration,
}

impl Summary {
    pub fn mapped_percent(&self) -> f64 {
        let total = self.mapped + self.unmapped;
        if total == 0 {
            return 0.0;
        }
        self.mapped as f64 / total as f64 * 100.0
    }

    pub fn reads_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.reads as f64 / secs
        } else {
            0.0
        }
    }
}
