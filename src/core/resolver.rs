use crate::core::codec::{KmerCodec, Step};
use crate::core::index::{KeyIndex, KmerId};
use crate::core::store::CountStore;

/// Strand picked for a read in vote mode when both strands hit the index
/// equally often. The historical comparison (`fwd > rev`) sends ties to the
/// reverse strand; that stays the default, but the choice is explicit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TieBreak {
    #[default]
    Reverse,
    Forward,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StrandMode {
    /// Count `min(fwd, rev)` at every window.
    Canonical,
    /// Count one whole strand per read, whichever hits the index more.
    Vote(TieBreak),
}

impl StrandMode {
    pub fn for_index<I: KeyIndex>(index: &I, tie: TieBreak) -> Self {
        if index.canonical() {
            StrandMode::Canonical
        } else {
            StrandMode::Vote(tie)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strand {
    Forward,
    Reverse,
}

pub fn choose_strand(fwd_hits: usize, rev_hits: usize, tie: TieBreak) -> Strand {
    use std::cmp::Ordering;
    match fwd_hits.cmp(&rev_hits) {
        Ordering::Greater => Strand::Forward,
        Ordering::Less => Strand::Reverse,
        Ordering::Equal => match tie {
            TieBreak::Forward => Strand::Forward,
            TieBreak::Reverse => Strand::Reverse,
        },
    }
}

/// Thread-local statistics, merged once a worker's cursor is drained.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadTally {
    pub reads: u64,
    pub lookups: u64,
    pub unmapped: u64,
    pub decode_events: u64,
    pub forward_reads: u64,
    pub reverse_reads: u64,
}

impl ReadTally {
    pub fn merge(&mut self, other: &ReadTally) {
        self.reads += other.reads;
        self.lookups += other.lookups;
        self.unmapped += other.unmapped;
        self.decode_events += other.decode_events;
        self.forward_reads += other.forward_reads;
        self.reverse_reads += other.reverse_reads;
    }
}

/// Per-window lookup results for both strands of the current read. Reused
/// across reads; capacity only grows.
#[derive(Default)]
struct StrandScratch {
    fwd: Vec<Option<KmerId>>,
    rev: Vec<Option<KmerId>>,
}

impl StrandScratch {
    fn reset(&mut self, windows: usize) {
        self.fwd.clear();
        self.rev.clear();
        self.fwd.reserve(windows);
        self.rev.reserve(windows);
    }
}

pub struct ReadCounter<'a, I: KeyIndex> {
    store: &'a CountStore<I>,
    codec: KmerCodec,
    mode: StrandMode,
    scratch: StrandScratch,
    pub tally: ReadTally,
}

impl<'a, I: KeyIndex> ReadCounter<'a, I> {
    pub fn new(store: &'a CountStore<I>, mode: StrandMode) -> Self {
        Self {
            store,
            codec: KmerCodec::new(store.index().kmer_len()),
            mode,
            scratch: StrandScratch::default(),
            tally: ReadTally::default(),
        }
    }

    pub fn k(&self) -> usize {
        self.codec.k()
    }

    /// Count every valid window of `seq`. Length bookkeeping and the
    /// short-read check are the caller's job.
    pub fn count_read(&mut self, seq: &[u8]) {
        self.codec.reset();
        match self.mode {
            StrandMode::Canonical => self.count_canonical(seq),
            StrandMode::Vote(tie) => self.count_voted(seq, tie),
        }
    }

    fn count_canonical(&mut self, seq: &[u8]) {
        let store = self.store;
        let index = store.index();
        for &b in seq {
            match self.codec.push(b) {
                Step::Window { fwd, rev } => {
                    self.tally.lookups += 1;
                    match index.lookup(fwd.min(rev)) {
                        Some(id) => store.increment(id),
                        None => self.tally.unmapped += 1,
                    }
                }
                Step::Comment => self.decode_event(b),
                _ => {}
            }
        }
    }

    fn count_voted(&mut self, seq: &[u8], tie: TieBreak) {
        let store = self.store;
        let index = store.index();
        self.scratch.reset(seq.len().saturating_sub(self.codec.k()) + 1);
        let mut fwd_hits = 0usize;
        let mut rev_hits = 0usize;
        for &b in seq {
            match self.codec.push(b) {
                Step::Window { fwd, rev } => {
                    self.tally.lookups += 2;
                    let fid = index.lookup(fwd);
                    let rid = index.lookup(rev);
                    fwd_hits += fid.is_some() as usize;
                    rev_hits += rid.is_some() as usize;
                    self.scratch.fwd.push(fid);
                    self.scratch.rev.push(rid);
                }
                Step::Comment => self.decode_event(b),
                _ => {}
            }
        }

        let chosen = match choose_strand(fwd_hits, rev_hits, tie) {
            Strand::Forward => {
                self.tally.forward_reads += 1;
                &self.scratch.fwd
            }
            Strand::Reverse => {
                self.tally.reverse_reads += 1;
                &self.scratch.rev
            }
        };
        for id in chosen {
            match id {
                Some(id) => store.increment(*id),
                None => self.tally.unmapped += 1,
            }
        }
    }

    fn decode_event(&mut self, byte: u8) {
        self.tally.decode_events += 1;
        tracing::trace!(byte = %(byte as char), "comment code inside read; window reset");
    }
}
