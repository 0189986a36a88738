//! Shared per-id occurrence counters plus a read-length histogram.
//!
//! Count file layout (little-endian): magic `KCNT`, version u32, k u16,
//! canonical u8, reserved u8, reserved u32, num_keys u64, then `(key u64,
//! count u64)` per id in id order, then the number of histogram entries u64
//! and `(length u64, reads u64)` pairs in ascending length order.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::core::index::{KeyIndex, KmerId};

pub const KCNT_MAGIC: u32 = 0x4B_43_4E_54; // "KCNT"
pub const KCNT_VERSION: u32 = 1;

/// Reads up to this length are tallied lock-free in a dense table; longer
/// ones (whole FASTA contigs) go to a sparse map.
const DENSE_MAX_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write counts to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid count file: {0}")]
    Format(String),
}

pub struct CountStore<I: KeyIndex> {
    index: Arc<I>,
    counts: Vec<AtomicU64>,
    lengths: Vec<AtomicU64>,
    long_lengths: RwLock<BTreeMap<usize, AtomicU64>>,
}

impl<I: KeyIndex> CountStore<I> {
    pub fn new(index: Arc<I>) -> Self {
        let counts = (0..index.num_keys()).map(|_| AtomicU64::new(0)).collect();
        let lengths = (0..=DENSE_MAX_LEN).map(|_| AtomicU64::new(0)).collect();
        Self {
            index,
            counts,
            lengths,
            long_lengths: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    pub fn num_keys(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn increment(&self, id: KmerId) {
        self.counts[id].fetch_add(1, Ordering::Relaxed);
    }

    pub fn append_length(&self, len: usize) {
        if let Some(slot) = self.lengths.get(len) {
            slot.fetch_add(1, Ordering::Relaxed);
            return;
        }
        {
            let long = self.long_lengths.read().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = long.get(&len) {
                slot.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut long = self.long_lengths.write().unwrap_or_else(|e| e.into_inner());
        long.entry(len)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Meaningful only once every writer has joined.
    pub fn total_at(&self, id: KmerId) -> u64 {
        self.counts[id].load(Ordering::Relaxed)
    }

    pub fn total_mapped(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn counts(&self) -> Vec<u64> {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Non-zero `(length, reads)` pairs in ascending length order.
    pub fn length_histogram(&self) -> Vec<(u64, u64)> {
        let mut hist: Vec<(u64, u64)> = self
            .lengths
            .iter()
            .enumerate()
            .filter_map(|(len, c)| {
                let n = c.load(Ordering::Relaxed);
                (n > 0).then_some((len as u64, n))
            })
            .collect();
        let long = self.long_lengths.read().unwrap_or_else(|e| e.into_inner());
        hist.extend(
            long.iter()
                .map(|(&len, c)| (len as u64, c.load(Ordering::Relaxed))),
        );
        hist
    }

    /// Persist counters and histogram. Consumes the store; written to a
    /// temporary sibling and renamed into place.
    pub fn dump(self, path: &Path) -> Result<(), StoreError> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = Path::new(&tmp_name);
        let write_err = |source| StoreError::Write {
            path: path.display().to_string(),
            source,
        };

        let result = File::create(tmp_path).and_then(|file| {
            let mut w = BufWriter::new(file);
            self.write_to(&mut w)?;
            w.flush()
        });
        match result.and_then(|_| fs::rename(tmp_path, path)) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(tmp_path);
                Err(write_err(e))
            }
        }
    }

    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LE>(KCNT_MAGIC)?;
        w.write_u32::<LE>(KCNT_VERSION)?;
        w.write_u16::<LE>(self.index.kmer_len() as u16)?;
        w.write_u8(self.index.canonical() as u8)?;
        w.write_u8(0)?;
        w.write_u32::<LE>(0)?;
        w.write_u64::<LE>(self.counts.len() as u64)?;
        for (id, c) in self.counts.iter().enumerate() {
            w.write_u64::<LE>(self.index.key_at(id))?;
            w.write_u64::<LE>(c.load(Ordering::Relaxed))?;
        }
        let hist = self.length_histogram();
        w.write_u64::<LE>(hist.len() as u64)?;
        for (len, n) in hist {
            w.write_u64::<LE>(len)?;
            w.write_u64::<LE>(n)?;
        }
        Ok(())
    }
}

/// A count file read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountTable {
    pub k: usize,
    pub canonical: bool,
    pub keys: Vec<u64>,
    pub counts: Vec<u64>,
    pub length_hist: Vec<(u64, u64)>,
}

impl CountTable {
    pub fn read_file(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        Self::read_from(&mut BufReader::new(file))
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, StoreError> {
        let magic = r.read_u32::<LE>()?;
        if magic != KCNT_MAGIC {
            return Err(StoreError::Format(format!("bad magic {magic:#010x}")));
        }
        let version = r.read_u32::<LE>()?;
        if version != KCNT_VERSION {
            return Err(StoreError::Format(format!("unsupported version {version}")));
        }
        let k = r.read_u16::<LE>()? as usize;
        let canonical = r.read_u8()? != 0;
        let _reserved0 = r.read_u8()?;
        let _reserved1 = r.read_u32::<LE>()?;
        let n = r.read_u64::<LE>()?;
        let cap = n.min(1 << 24) as usize;
        let mut keys = Vec::with_capacity(cap);
        let mut counts = Vec::with_capacity(cap);
        for _ in 0..n {
            keys.push(r.read_u64::<LE>()?);
            counts.push(r.read_u64::<LE>()?);
        }
        let h = r.read_u64::<LE>()?;
        let mut length_hist = Vec::with_capacity(h.min(1 << 20) as usize);
        for _ in 0..h {
            let len = r.read_u64::<LE>()?;
            let reads = r.read_u64::<LE>()?;
            length_hist.push((len, reads));
        }
        Ok(Self {
            k,
            canonical,
            keys,
            counts,
            length_hist,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::encode_kmer;
    use crate::core::index::PerfectHashIndex;
    use std::thread;

    fn one_key_index() -> Arc<PerfectHashIndex> {
        Arc::new(PerfectHashIndex::from_keys(3, true, vec![encode_kmer(b"AAA").unwrap()]).unwrap())
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        const THREADS: usize = 8;
        const PER_THREAD: u64 = 100_000;
        let store = Arc::new(CountStore::new(one_key_index()));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        store.increment(0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.total_at(0), THREADS as u64 * PER_THREAD);
    }

    #[test]
    fn long_reads_go_to_the_sparse_tail() {
        let store = Arc::new(CountStore::new(one_key_index()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..1000 {
                        store.append_length(if i % 2 == 0 { 150 } else { 5000 + t });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        store.append_length(0);
        store.append_length(DENSE_MAX_LEN);
        // A chromosome-sized FASTA record.
        store.append_length(250_000_000);
        let hist = store.length_histogram();
        assert_eq!(
            hist,
            vec![
                (0, 1),
                (150, 2000),
                (DENSE_MAX_LEN as u64, 1),
                (5000, 500),
                (5001, 500),
                (5002, 500),
                (5003, 500),
                (250_000_000, 1)
            ]
        );
        assert_eq!(store.lengths.len(), DENSE_MAX_LEN + 1);
        assert_eq!(store.long_lengths.read().unwrap().len(), 5);
    }

    #[test]
    fn dump_writes_keys_counts_and_lengths() {
        let idx = Arc::new(
            PerfectHashIndex::from_keys(
                2,
                false,
                vec![encode_kmer(b"AC").unwrap(), encode_kmer(b"GT").unwrap()],
            )
            .unwrap(),
        );
        let store = CountStore::new(idx);
        store.increment(1);
        store.increment(1);
        store.append_length(4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.counts");
        store.dump(&path).unwrap();
        assert!(!dir.path().join("reads.counts.tmp").exists());

        let table = CountTable::read_file(&path).unwrap();
        assert_eq!(table.k, 2);
        assert!(!table.canonical);
        assert_eq!(table.keys, vec![0b0001, 0b1011]);
        assert_eq!(table.counts, vec![0, 2]);
        assert_eq!(table.length_hist, vec![(4, 1)]);
    }

    #[test]
    fn dump_into_missing_directory_is_a_write_error() {
        let store = CountStore::new(one_key_index());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/out.counts");
        assert!(matches!(store.dump(&path), Err(StoreError::Write { .. })));
    }
}
