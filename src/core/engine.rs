use crate::core::fastq;
use crate::core::index::{KeyIndex, PerfectHashIndex};
use crate::core::io::CHUNK_SIZE;
use crate::core::model::{Phase, Summary};
use crate::core::reads::{ProducerStats, ReadCursor, ReadStreamSource};
use crate::core::resolver::{ReadCounter, ReadTally, StrandMode, TieBreak};
use crate::core::store::CountStore;
use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const PROGRESS_EVERY: u64 = 500_000;

pub struct RunConfig {
    pub index: PathBuf,
    pub reads: Vec<PathBuf>,
    pub counts: PathBuf,
    pub threads: usize,
    pub tie_break: TieBreak,
    pub chunk_size: usize,
}

impl RunConfig {
    pub fn new(index: PathBuf, reads: Vec<PathBuf>, counts: PathBuf, threads: usize) -> Self {
        Self {
            index,
            reads,
            counts,
            threads,
            tie_break: TieBreak::default(),
            chunk_size: CHUNK_SIZE,
        }
    }
}

#[derive(Debug)]
pub struct RunOutput {
    pub summary: Summary,
    pub producer: ProducerStats,
}

/// Result of the concurrent phase: a store no worker can touch anymore.
pub struct Counted<I: KeyIndex> {
    pub store: CountStore<I>,
    pub tally: ReadTally,
    pub producer: ProducerStats,
    pub elapsed: Duration,
}

impl<I: KeyIndex> Counted<I> {
    pub fn summary(&self) -> Summary {
        let index = self.store.index();
        Summary {
            num_keys: index.num_keys() as u64,
            kmer_len: index.kmer_len(),
            canonical: index.canonical(),
            reads: self.tally.reads,
            lookups: self.tally.lookups,
            mapped: self.store.total_mapped(),
            unmapped: self.tally.unmapped,
            decode_events: self.tally.decode_events,
            forward_reads: self.tally.forward_reads,
            reverse_reads: self.tally.reverse_reads,
            elapsed: self.elapsed,
        }
    }
}

/// Shared read counter for the progress line. Relaxed and approximate;
/// nothing reads it for correctness.
struct Progress {
    reads: AtomicU64,
    start: Instant,
}

impl Progress {
    fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    #[inline]
    fn tick(&self) {
        let n = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_EVERY == 0 {
            let secs = self.start.elapsed().as_secs();
            let rate = if secs > 0 { n / secs } else { 0 };
            eprint!("processed {} reads ({} reads/s)\r", n, rate);
        }
    }
}

struct Lifecycle {
    phase: Phase,
    stats: bool,
    t: Instant,
}

impl Lifecycle {
    fn new(stats: bool) -> Self {
        Self {
            phase: Phase::Idle,
            stats,
            t: Instant::now(),
        }
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), Some(to));
        log_stage(self.stats, &format!("engine.{}", self.phase.as_str()), self.t);
        tracing::debug!(from = self.phase.as_str(), to = to.as_str(), "dispatcher phase");
        self.phase = to;
        self.t = Instant::now();
    }
}

pub fn run(cfg: &RunConfig) -> Result<RunOutput> {
    let stats = stats_enabled();
    let t_index = Instant::now();
    tracing::info!(path = %cfg.index.display(), "reading index");
    let index = PerfectHashIndex::from_file(&cfg.index)
        .with_context(|| format!("failed to load index {}", cfg.index.display()))?;
    tracing::info!(
        keys = index.num_keys(),
        k = index.kmer_len(),
        canonical = index.canonical(),
        "index loaded"
    );
    log_stage(stats, "engine.index_load", t_index);
    for path in &cfg.reads {
        tracing::info!(path = %path.display(), "read file");
    }

    let counted = count_reads(
        Arc::new(index),
        &cfg.reads,
        cfg.threads,
        cfg.tie_break,
        cfg.chunk_size,
    )?;
    let summary = counted.summary();
    log_summary(&summary);

    let t_dump = Instant::now();
    counted
        .store
        .dump(&cfg.counts)
        .with_context(|| "failed to persist counts")?;
    log_stage(stats, "engine.dump", t_dump);
    tracing::info!(path = %cfg.counts.display(), "counts written");

    Ok(RunOutput {
        summary,
        producer: counted.producer,
    })
}

/// Spawn `threads` workers over `reads`, wait for all of them, and hand
/// back the populated store.
pub fn count_reads<I: KeyIndex + 'static>(
    index: Arc<I>,
    reads: &[PathBuf],
    threads: usize,
    tie_break: TieBreak,
    chunk_size: usize,
) -> Result<Counted<I>> {
    let stats = stats_enabled();
    let t_total = Instant::now();
    let mut life = Lifecycle::new(stats);
    let threads = threads.max(1);
    let mode = StrandMode::for_index(index.as_ref(), tie_break);
    let store = Arc::new(CountStore::new(index));
    let progress = Arc::new(Progress::new());

    life.advance(Phase::Spawning);
    let source = ReadStreamSource::open(reads.to_vec(), chunk_size, threads);
    let mut workers = Vec::with_capacity(threads);
    for _ in 0..threads {
        let cursor = source.new_cursor();
        let store = Arc::clone(&store);
        let progress = Arc::clone(&progress);
        workers.push(thread::spawn(move || {
            worker_loop(cursor, &store, mode, &progress)
        }));
    }

    life.advance(Phase::Running);
    let mut tally = ReadTally::default();
    let mut first_err: Option<anyhow::Error> = None;
    for (i, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(Ok(local)) => tally.merge(&local),
            Ok(Err(e)) if first_err.is_none() => {
                first_err = Some(e.context(format!("worker {} failed", i)));
            }
            Err(_) if first_err.is_none() => {
                first_err = Some(anyhow!("worker {} panicked", i));
            }
            _ => {}
        }
    }
    life.advance(Phase::Joining);
    if tally.reads >= PROGRESS_EVERY {
        eprintln!();
    }
    let producer = source.finish();
    if let Some(e) = first_err {
        return Err(e);
    }
    let producer = producer?;

    let store = Arc::try_unwrap(store)
        .map_err(|_| anyhow!("count store still shared after worker join"))?;
    life.advance(Phase::Finalized);

    if stats {
        eprintln!(
            "KIRA_STATS producer.files={} producer.chunks={} producer.bytes={} producer.decompress={} producer.chunk_align={}",
            producer.files,
            producer.chunks,
            producer.bytes,
            fmt_dur(producer.decompress),
            fmt_dur(producer.align)
        );
        eprintln!(
            "KIRA_STATS worker.reads={} worker.lookups={} worker.unmapped={}",
            tally.reads, tally.lookups, tally.unmapped
        );
    }
    log_stage(stats, "engine.count_total", t_total);

    Ok(Counted {
        store,
        tally,
        producer,
        elapsed: t_total.elapsed(),
    })
}

fn worker_loop<I: KeyIndex>(
    mut cursor: ReadCursor,
    store: &CountStore<I>,
    mode: StrandMode,
    progress: &Progress,
) -> Result<ReadTally> {
    let mut counter = ReadCounter::new(store, mode);
    let k = counter.k();
    while let Some(seq) = cursor.next_read()? {
        let len = fastq::base_len(seq);
        store.append_length(len);
        counter.tally.reads += 1;
        progress.tick();
        if len < k {
            continue;
        }
        counter.count_read(seq);
    }
    if counter.tally.decode_events > 0 {
        tracing::warn!(
            events = counter.tally.decode_events,
            "comment codes found inside read sequences"
        );
    }
    Ok(counter.tally)
}

fn log_summary(s: &Summary) {
    tracing::info!(
        reads = s.reads,
        reads_per_sec = s.reads_per_sec() as u64,
        "counting finished"
    );
    tracing::info!("There were {} kmers; {} could not be mapped", s.mapped, s.unmapped);
    tracing::info!("Mapped {:.2}% of the kmers", s.mapped_percent());
    if !s.canonical {
        tracing::info!(
            forward = s.forward_reads,
            reverse = s.reverse_reads,
            "strand votes"
        );
    }
}

pub(crate) fn stats_enabled() -> bool {
    matches!(std::env::var("KIRA_STATS").as_deref(), Ok("1"))
}

pub(crate) fn log_stage(stats: bool, name: &str, t: Instant) {
    if stats {
        eprintln!("KIRA_STATS stage={} time={}", name, fmt_dur(t.elapsed()));
    }
}

pub(crate) fn fmt_dur(d: Duration) -> String {
    if d.as_secs_f64() < 1.0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}
