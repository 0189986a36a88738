//! Multi-file read stream split into independent per-worker cursors.
//!
//! One producer thread walks the input files in order and pushes
//! record-aligned chunks into a bounded channel. Every cursor is a receiver
//! on that channel, so each chunk (and every read in it) reaches exactly one
//! cursor.

use crate::core::fastq;
use crate::core::io::{Chunk, InputSource};
use anyhow::{Context, Result, anyhow};
use crossbeam_channel as channel;
use std::ops::Range;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct ProducerStats {
    pub files: u64,
    pub chunks: u64,
    pub bytes: u64,
    pub decompress: Duration,
    pub align: Duration,
}

pub struct ReadStreamSource {
    rx: channel::Receiver<Chunk>,
    err_rx: channel::Receiver<anyhow::Error>,
    producer: JoinHandle<ProducerStats>,
}

impl ReadStreamSource {
    pub fn open(paths: Vec<PathBuf>, chunk_size: usize, threads: usize) -> Self {
        let threads = threads.max(1);
        let (chunk_tx, chunk_rx) = channel::bounded::<Chunk>(threads * 2);
        let (err_tx, err_rx) = channel::bounded::<anyhow::Error>(1);

        let producer = thread::spawn(move || {
            let mut stats = ProducerStats::default();
            let mut index = 0usize;
            for path in &paths {
                let mut input = match InputSource::open(path, chunk_size, threads) {
                    Ok(input) => input,
                    Err(e) => {
                        let _ = err_tx.send(e);
                        return stats;
                    }
                };
                stats.files += 1;
                loop {
                    match input.next_chunk(index) {
                        Ok(Some(chunk)) => {
                            stats.chunks += 1;
                            stats.bytes += chunk.timing.bytes as u64;
                            stats.decompress += chunk.timing.decompress;
                            stats.align += chunk.timing.align;
                            if chunk_tx.send(chunk).is_err() {
                                return stats;
                            }
                            index += 1;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = err_tx
                                .send(e.context(format!("while reading {}", path.display())));
                            return stats;
                        }
                    }
                }
            }
            stats
        });

        Self {
            rx: chunk_rx,
            err_rx,
            producer,
        }
    }

    /// Safe to call from any thread, any number of times.
    pub fn new_cursor(&self) -> ReadCursor {
        ReadCursor {
            rx: self.rx.clone(),
            chunk: None,
            records: Vec::new(),
            next: 0,
        }
    }

    /// Stop the producer and surface any input error it hit.
    pub fn finish(self) -> Result<ProducerStats> {
        let Self {
            rx,
            err_rx,
            producer,
        } = self;
        // Unblocks a producer stuck on a full channel once cursors are gone.
        drop(rx);
        let stats = producer
            .join()
            .map_err(|_| anyhow!("read producer thread panicked"))?;
        if let Ok(err) = err_rx.try_recv() {
            return Err(err);
        }
        Ok(stats)
    }
}

pub struct ReadCursor {
    rx: channel::Receiver<Chunk>,
    chunk: Option<Chunk>,
    records: Vec<Range<usize>>,
    next: usize,
}

impl ReadCursor {
    /// Next read's raw sequence bytes, or `None` once the stream is drained.
    pub fn next_read(&mut self) -> Result<Option<&[u8]>> {
        while self.next >= self.records.len() {
            let Ok(chunk) = self.rx.recv() else {
                self.chunk = None;
                return Ok(None);
            };
            self.records.clear();
            self.next = 0;
            fastq::parse_chunk(chunk.bytes(), chunk.format, &mut self.records).map_err(|e| {
                anyhow!(
                    "{:?} parse error in chunk {}: {}",
                    chunk.format,
                    chunk.index,
                    e
                )
            })?;
            self.chunk = Some(chunk);
        }
        let range = self.records[self.next].clone();
        self.next += 1;
        let chunk = self.chunk.as_ref().context("cursor lost its chunk")?;
        Ok(Some(&chunk.bytes()[range]))
    }
}
