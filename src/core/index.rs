//! Read-only k-mer -> dense id index.
//!
//! On-disk `.sfi` layout (little-endian):
//! magic `KSFI`, version u32, k u16, canonical u8, reserved u8, reserved u32,
//! key count u64, then the keys (u64) in id order.

use boomphf::Mphf;
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::codec::{MAX_K, kmer_mask};

pub const SFI_MAGIC: u32 = 0x4B_53_46_49; // "KSFI"
pub const SFI_VERSION: u32 = 1;
pub const SFI_EXT: &str = "sfi";

const MPHF_GAMMA: f64 = 1.7;

pub type KmerId = usize;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid index file: {0}")]
    Format(String),
    #[error("k-mer length {0} outside 1..=32")]
    KmerLength(usize),
    #[error("key {key:#x} does not fit in {k} bases")]
    KeyWidth { key: u64, k: usize },
    #[error("duplicate key {0:#x}")]
    DuplicateKey(u64),
}

/// Lookup contract the counting engine relies on. Implementations must be
/// immutable for the duration of a run; `lookup` is called concurrently.
pub trait KeyIndex: Send + Sync {
    fn num_keys(&self) -> usize;
    fn kmer_len(&self) -> usize;
    fn canonical(&self) -> bool;
    /// Dense id in `0..num_keys()`, or `None` when `key` is not indexed.
    fn lookup(&self, key: u64) -> Option<KmerId>;
    fn key_at(&self, id: KmerId) -> u64;
}

pub struct PerfectHashIndex {
    k: usize,
    canonical: bool,
    keys: Vec<u64>,
    mphf: Option<Mphf<u64>>,
    slot_to_id: Vec<u32>,
}

impl PerfectHashIndex {
    /// Build from keys in id order.
    pub fn from_keys(k: usize, canonical: bool, keys: Vec<u64>) -> Result<Self, IndexError> {
        if k == 0 || k > MAX_K {
            return Err(IndexError::KmerLength(k));
        }
        if keys.len() > u32::MAX as usize {
            return Err(IndexError::Format(format!("too many keys: {}", keys.len())));
        }
        let mask = kmer_mask(k);
        let mut seen = HashSet::with_capacity(keys.len());
        for &key in &keys {
            if key & !mask != 0 {
                return Err(IndexError::KeyWidth { key, k });
            }
            if !seen.insert(key) {
                return Err(IndexError::DuplicateKey(key));
            }
        }
        drop(seen);

        if keys.is_empty() {
            return Ok(Self {
                k,
                canonical,
                keys,
                mphf: None,
                slot_to_id: Vec::new(),
            });
        }

        let mphf = Mphf::new(MPHF_GAMMA, &keys);
        let mut slot_to_id = vec![0u32; keys.len()];
        for (id, key) in keys.iter().enumerate() {
            let slot = mphf.hash(key) as usize;
            slot_to_id[slot] = id as u32;
        }
        Ok(Self {
            k,
            canonical,
            keys,
            mphf: Some(mphf),
            slot_to_id,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path)?;
        Self::read_from(&mut BufReader::new(file))
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, IndexError> {
        let magic = r.read_u32::<LE>()?;
        if magic != SFI_MAGIC {
            return Err(IndexError::Format(format!("bad magic {magic:#010x}")));
        }
        let version = r.read_u32::<LE>()?;
        if version != SFI_VERSION {
            return Err(IndexError::Format(format!("unsupported version {version}")));
        }
        let k = r.read_u16::<LE>()? as usize;
        let canonical = match r.read_u8()? {
            0 => false,
            1 => true,
            v => return Err(IndexError::Format(format!("bad canonical flag {v}"))),
        };
        let _reserved0 = r.read_u8()?;
        let _reserved1 = r.read_u32::<LE>()?;
        let n = r.read_u64::<LE>()?;
        let mut keys = Vec::with_capacity(n.min(1 << 24) as usize);
        for _ in 0..n {
            keys.push(r.read_u64::<LE>()?);
        }
        Self::from_keys(k, canonical, keys)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LE>(SFI_MAGIC)?;
        w.write_u32::<LE>(SFI_VERSION)?;
        w.write_u16::<LE>(self.k as u16)?;
        w.write_u8(self.canonical as u8)?;
        w.write_u8(0)?;
        w.write_u32::<LE>(0)?;
        w.write_u64::<LE>(self.keys.len() as u64)?;
        for &key in &self.keys {
            w.write_u64::<LE>(key)?;
        }
        Ok(())
    }

    pub fn write_file(&self, path: &Path) -> std::io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()
    }
}

impl KeyIndex for PerfectHashIndex {
    fn num_keys(&self) -> usize {
        self.keys.len()
    }

    fn kmer_len(&self) -> usize {
        self.k
    }

    fn canonical(&self) -> bool {
        self.canonical
    }

    #[inline]
    fn lookup(&self, key: u64) -> Option<KmerId> {
        let slot = self.mphf.as_ref()?.try_hash(&key)? as usize;
        let id = *self.slot_to_id.get(slot)? as usize;
        // Non-members land on arbitrary slots.
        (self.keys[id] == key).then_some(id)
    }

    fn key_at(&self, id: KmerId) -> u64 {
        self.keys[id]
    }
}

/// Resolve an index argument: the path itself, or `<path>.sfi`.
pub fn resolve_index_path(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let mut with_ext = path.as_os_str().to_owned();
    with_ext.push(".");
    with_ext.push(SFI_EXT);
    let with_ext = PathBuf::from(with_ext);
    with_ext.is_file().then_some(with_ext)
}
