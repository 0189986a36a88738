use crate::core::fastq::{FastqBoundary, RecordFormat, detect_format};
use anyhow::{Context, Result, anyhow, bail};
use flate2::read::MultiGzDecoder;
use gzp::deflate::{Bgzf, Mgzip};
use gzp::par::decompress::ParDecompressBuilder;
use memchr::memchr_iter;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A plain read file mapped read-only for the lifetime of its chunks.
pub struct MappedFile(Mmap);

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        // SAFETY: read-only file mapping.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map {}", path.display()))?;
        Ok(Self(mmap))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GzipVariant {
    Standard,
    Mgzip,
    Bgzf,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    Plain,
    Gzip(GzipVariant),
}

#[derive(Clone)]
pub enum ChunkData {
    MmapRange {
        file: Arc<MappedFile>,
        start: usize,
        end: usize,
    },
    Owned(Vec<u8>),
}

#[derive(Clone)]
pub struct Chunk {
    pub index: usize,
    pub format: RecordFormat,
    pub data: ChunkData,
    pub timing: ChunkTiming,
}

impl Chunk {
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            ChunkData::MmapRange { file, start, end } => &file.bytes()[*start..*end],
            ChunkData::Owned(data) => data.as_slice(),
        }
    }
}

pub const CHUNK_SIZE: usize = 16 * 1024 * 1024;
const GZIP_READ_BUF: usize = 8 * 1024 * 1024;
const GZIP_HEADER_PEEK: usize = 20;

#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkTiming {
    pub bytes: usize,
    pub decompress: Duration,
    pub align: Duration,
}

/// First record-aligned cut at or after `target`, scanning from the
/// record-aligned `start`.
fn aligned_end(bytes: &[u8], start: usize, target: usize, format: RecordFormat) -> usize {
    let len = bytes.len();
    if target >= len {
        return len;
    }
    match format {
        RecordFormat::Fastq => {
            let mut boundary = FastqBoundary::default();
            let mut line_start = start;
            for nl in memchr_iter(b'\n', &bytes[start..]) {
                let line_end = start + nl;
                let at_record = boundary.end_line(&bytes[line_start..line_end]);
                line_start = line_end + 1;
                if at_record && line_start >= target {
                    return line_start;
                }
            }
            len
        }
        RecordFormat::Fasta => {
            let from = target.max(start + 1);
            for nl in memchr_iter(b'\n', &bytes[from - 1..]) {
                let cut = from + nl;
                if cut < len && bytes[cut] == b'>' {
                    return cut;
                }
            }
            len
        }
    }
}

pub struct MmapChunker {
    data: Arc<MappedFile>,
    format: RecordFormat,
    pos: usize,
    chunk_size: usize,
}

impl MmapChunker {
    pub fn new(data: Arc<MappedFile>, format: RecordFormat, chunk_size: usize) -> Self {
        Self {
            data,
            format,
            pos: 0,
            chunk_size,
        }
    }

    pub fn next_chunk(&mut self, index: usize) -> Option<Chunk> {
        let len = self.data.bytes().len();
        if self.pos >= len {
            return None;
        }
        let t_align = Instant::now();
        let start = self.pos;
        let target = start.saturating_add(self.chunk_size);
        let end = aligned_end(self.data.bytes(), start, target, self.format);
        self.pos = end;
        Some(Chunk {
            index,
            format: self.format,
            data: ChunkData::MmapRange {
                file: Arc::clone(&self.data),
                start,
                end,
            },
            timing: ChunkTiming {
                bytes: end - start,
                decompress: Duration::ZERO,
                align: t_align.elapsed(),
            },
        })
    }
}

pub struct GzipChunker {
    decoder: Box<dyn Read + Send>,
    format: Option<RecordFormat>,
    buffer: Vec<u8>,
    read_buf: Vec<u8>,
    chunk_size: usize,
    eof: bool,
    scan_pos: usize,
    line_start: usize,
    fastq: FastqBoundary,
    last_cut: usize,
    total_out: usize,
    acc_decompress: Duration,
    acc_align: Duration,
}

impl GzipChunker {
    pub fn open(
        path: &Path,
        variant: GzipVariant,
        chunk_size: usize,
        threads: usize,
    ) -> Result<Self> {
        let decoder = open_gzip_reader(path, variant, threads)?;
        Ok(Self {
            decoder,
            format: None,
            buffer: Vec::with_capacity(chunk_size + (chunk_size / 4)),
            read_buf: vec![0u8; GZIP_READ_BUF.min(chunk_size.max(4096))],
            chunk_size,
            eof: false,
            scan_pos: 0,
            line_start: 0,
            fastq: FastqBoundary::default(),
            last_cut: 0,
            total_out: 0,
            acc_decompress: Duration::ZERO,
            acc_align: Duration::ZERO,
        })
    }

    fn emit(&mut self, index: usize, bytes: Vec<u8>, format: RecordFormat) -> Chunk {
        let chunk = Chunk {
            index,
            format,
            timing: ChunkTiming {
                bytes: bytes.len(),
                decompress: self.acc_decompress,
                align: self.acc_align,
            },
            data: ChunkData::Owned(bytes),
        };
        self.acc_decompress = Duration::ZERO;
        self.acc_align = Duration::ZERO;
        chunk
    }

    pub fn next_chunk(&mut self, index: usize) -> Result<Option<Chunk>> {
        loop {
            if let Some(format) = self.format {
                if self.buffer.len() >= self.chunk_size && self.last_cut > 0 {
                    let tail = self.buffer.split_off(self.last_cut);
                    let chunk_bytes = std::mem::replace(&mut self.buffer, tail);
                    self.scan_pos = 0;
                    self.line_start = 0;
                    self.fastq = FastqBoundary::default();
                    self.last_cut = 0;
                    self.rescan(format);
                    return Ok(Some(self.emit(index, chunk_bytes, format)));
                }
                if self.eof {
                    if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                        return Ok(None);
                    }
                    // The remainder is the final record run; the parser
                    // rejects it if it is incomplete.
                    let rest = std::mem::take(&mut self.buffer);
                    return Ok(Some(self.emit(index, rest, format)));
                }
            } else if self.eof {
                if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(None);
                }
                bail!(
                    "unrecognized record format at gzip offset {}",
                    self.total_out.saturating_sub(self.buffer.len())
                );
            }

            let t_read = Instant::now();
            let n = self.decoder.read(&mut self.read_buf).with_context(|| {
                format!(
                    "gzip decompression error at chunk {} (offset {})",
                    index, self.total_out
                )
            })?;
            self.acc_decompress += t_read.elapsed();
            if n == 0 {
                self.eof = true;
                continue;
            }
            self.buffer.extend_from_slice(&self.read_buf[..n]);
            self.total_out += n;

            if self.format.is_none() {
                self.format = detect_format(&self.buffer);
            }
            if let Some(format) = self.format {
                self.rescan(format);
            }
        }
    }

    fn rescan(&mut self, format: RecordFormat) {
        let t_align = Instant::now();
        while self.scan_pos < self.buffer.len() {
            let b = self.buffer[self.scan_pos];
            match format {
                RecordFormat::Fastq => {
                    if b == b'\n' {
                        let line = &self.buffer[self.line_start..self.scan_pos];
                        if self.fastq.end_line(line) {
                            self.last_cut = self.scan_pos + 1;
                        }
                        self.line_start = self.scan_pos + 1;
                    }
                }
                RecordFormat::Fasta => {
                    if b == b'>' && self.scan_pos > 0 && self.buffer[self.scan_pos - 1] == b'\n' {
                        self.last_cut = self.scan_pos;
                    }
                }
            }
            self.scan_pos += 1;
        }
        self.acc_align += t_align.elapsed();
    }
}

pub enum InputSource {
    Mmap { chunker: MmapChunker },
    Gzip { chunker: GzipChunker },
    Empty,
}

impl InputSource {
    pub fn open(path: &Path, chunk_size: usize, threads: usize) -> Result<Self> {
        match sniff_input(path)? {
            InputKind::Plain => {
                let file = Arc::new(MappedFile::open(path)?);
                if file.bytes().iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(InputSource::Empty);
                }
                let format = detect_format(file.bytes())
                    .ok_or_else(|| anyhow!("{}: not a FASTA/FASTQ file", path.display()))?;
                let chunker = MmapChunker::new(file, format, chunk_size);
                Ok(InputSource::Mmap { chunker })
            }
            InputKind::Gzip(variant) => {
                let chunker = GzipChunker::open(path, variant, chunk_size, threads)?;
                Ok(InputSource::Gzip { chunker })
            }
        }
    }

    pub fn next_chunk(&mut self, index: usize) -> Result<Option<Chunk>> {
        match self {
            InputSource::Mmap { chunker } => Ok(chunker.next_chunk(index)),
            InputSource::Gzip { chunker } => chunker.next_chunk(index),
            InputSource::Empty => Ok(None),
        }
    }
}

/// Classify a read file from its first header bytes: gzip magic (and, with
/// FEXTRA set, the BGZF `BC` or MGZIP `IG` subfield) or a `.gz` name means
/// gzip; anything else is read as plain text.
pub fn sniff_input(path: &Path) -> Result<InputKind> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut header = Vec::with_capacity(GZIP_HEADER_PEEK);
    file.take(GZIP_HEADER_PEEK as u64)
        .read_to_end(&mut header)
        .with_context(|| format!("failed to read header of {}", path.display()))?;

    if header.starts_with(&[0x1f, 0x8b]) {
        return Ok(InputKind::Gzip(gzip_variant(&header)));
    }
    let gz_name = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    Ok(if gz_name {
        InputKind::Gzip(GzipVariant::Standard)
    } else {
        InputKind::Plain
    })
}

fn gzip_variant(header: &[u8]) -> GzipVariant {
    const FEXTRA: u8 = 0x04;
    match header {
        [_, _, _, flags, _, _, _, _, _, _, _, _, s1, s2, ..] if flags & FEXTRA != 0 => {
            match (*s1, *s2) {
                (b'B', b'C') => GzipVariant::Bgzf,
                (b'I', b'G') => GzipVariant::Mgzip,
                _ => GzipVariant::Standard,
            }
        }
        _ => GzipVariant::Standard,
    }
}

pub fn open_gzip_reader(
    path: &Path,
    variant: GzipVariant,
    threads: usize,
) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let reader: Box<dyn Read + Send> = match (variant, threads > 1) {
        (GzipVariant::Bgzf, true) => Box::new(
            ParDecompressBuilder::<Bgzf>::new()
                .num_threads(threads)
                .map_err(|e| anyhow!("bgzf decompressor setup failed: {e}"))?
                .from_reader(reader),
        ),
        (GzipVariant::Mgzip, true) => Box::new(
            ParDecompressBuilder::<Mgzip>::new()
                .num_threads(threads)
                .map_err(|e| anyhow!("mgzip decompressor setup failed: {e}"))?
                .from_reader(reader),
        ),
        _ => Box::new(MultiGzDecoder::new(reader)),
    };
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fastq::parse_chunk;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn fastq(n: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..n {
            writeln!(out, "@r{i}\nACGTACGT\n+\nIIIIIIII").unwrap();
        }
        out
    }

    fn drain(mut input: InputSource) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        while let Some(c) = input.next_chunk(chunks.len()).unwrap() {
            chunks.push(c);
        }
        chunks
    }

    fn record_count(chunks: &[Chunk]) -> usize {
        let mut ranges = Vec::new();
        for c in chunks {
            parse_chunk(c.bytes(), c.format, &mut ranges).unwrap();
        }
        ranges.len()
    }

    #[test]
    fn mmap_chunks_are_record_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.fq");
        std::fs::write(&path, fastq(100)).unwrap();
        let chunks = drain(InputSource::open(&path, 50, 1).unwrap());
        assert!(chunks.len() > 10);
        assert!(chunks.iter().all(|c| c.bytes().starts_with(b"@r")));
        assert_eq!(record_count(&chunks), 100);
    }

    #[test]
    fn fasta_chunks_cut_before_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.fa");
        let mut data = Vec::new();
        for i in 0..40 {
            writeln!(data, ">t{i}\nACGTTGCA\nGGCC").unwrap();
        }
        std::fs::write(&path, &data).unwrap();
        let chunks = drain(InputSource::open(&path, 16, 1).unwrap());
        assert!(chunks.iter().all(|c| c.bytes().starts_with(b">t")));
        assert_eq!(record_count(&chunks), 40);
    }

    #[test]
    fn gzip_input_is_decoded_and_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.fq.gz");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&fastq(500)).unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();
        let chunks = drain(InputSource::open(&path, 1000, 1).unwrap());
        assert!(chunks.len() > 1);
        assert_eq!(record_count(&chunks), 500);
    }

    fn spaced_fastq(n: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..n {
            writeln!(out, "@r{i}\nAAAA\n+\nIIII\n").unwrap();
        }
        // A record with an empty sequence mid-file.
        out.extend_from_slice(b"@empty\n\n+\n\n\r\n");
        for i in n..2 * n {
            writeln!(out, "@r{i}\r\nAAAA\r\n+\r\nIIII\r\n").unwrap();
        }
        out
    }

    #[test]
    fn blank_lines_between_records_do_not_shift_mmap_cuts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spaced.fq");
        std::fs::write(&path, spaced_fastq(25)).unwrap();
        for chunk_size in [1, 7, 30, 64, 1 << 20] {
            let chunks = drain(InputSource::open(&path, chunk_size, 1).unwrap());
            assert_eq!(record_count(&chunks), 51, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn blank_lines_between_records_do_not_shift_gzip_cuts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spaced.fq.gz");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&spaced_fastq(300)).unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();
        for chunk_size in [30, 64, 5000, 1 << 20] {
            let chunks = drain(InputSource::open(&path, chunk_size, 1).unwrap());
            assert_eq!(record_count(&chunks), 601, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn sniffs_gzip_by_magic_and_variant() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("r.fq");
        std::fs::write(&plain, fastq(1)).unwrap();
        assert_eq!(sniff_input(&plain).unwrap(), InputKind::Plain);

        let unnamed = dir.path().join("reads");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&fastq(1)).unwrap();
        std::fs::write(&unnamed, enc.finish().unwrap()).unwrap();
        assert_eq!(
            sniff_input(&unnamed).unwrap(),
            InputKind::Gzip(GzipVariant::Standard)
        );

        let bgzf = dir.path().join("r.bgz");
        let header = [
            0x1f, 0x8b, 8, 4, 0, 0, 0, 0, 0, 0xff, 6, 0, b'B', b'C', 2, 0, 0x1b, 0,
        ];
        std::fs::write(&bgzf, header).unwrap();
        assert_eq!(sniff_input(&bgzf).unwrap(), InputKind::Gzip(GzipVariant::Bgzf));
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.fq");
        std::fs::write(&path, b"").unwrap();
        assert!(drain(InputSource::open(&path, 1000, 1).unwrap()).is_empty());
    }
}
