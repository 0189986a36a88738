use memchr::{memchr, memchr_iter};
use std::ops::Range;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordFormat {
    Fastq,
    Fasta,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub byte_offset: usize,
    pub msg: &'static str,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.msg, self.byte_offset)
    }
}

/// First non-blank byte decides: `@` FASTQ, `>` FASTA.
pub fn detect_format(bytes: &[u8]) -> Option<RecordFormat> {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'@') => Some(RecordFormat::Fastq),
        Some(b'>') => Some(RecordFormat::Fasta),
        _ => None,
    }
}

/// Number of bases in a sequence range; line breaks do not count.
pub fn base_len(seq: &[u8]) -> usize {
    seq.len() - memchr_iter(b'\n', seq).count() - memchr_iter(b'\r', seq).count()
}

/// Append the sequence range of every record in `data` to `out`.
pub fn parse_chunk(
    data: &[u8],
    format: RecordFormat,
    out: &mut Vec<Range<usize>>,
) -> Result<(), ParseError> {
    match format {
        RecordFormat::Fastq => parse_fastq(data, out),
        RecordFormat::Fasta => parse_fasta(data, out),
    }
}

/// FASTQ record boundaries, tracked one line at a time with the same rules
/// `parse_chunk` reads by: blank lines between records are skipped, and the
/// three lines after a header belong to it whatever they hold.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastqBoundary {
    remaining: u8,
}

impl FastqBoundary {
    /// Feed one line without its `\n`. True when a record may start next.
    #[inline]
    pub fn end_line(&mut self, line: &[u8]) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
        } else if !(line.is_empty() || line == b"\r") {
            self.remaining = 3;
        }
        self.remaining == 0
    }
}

struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    /// Next line as `(start, end)` with the terminator and any `\r` removed.
    fn next_line(&mut self) -> Option<(usize, usize)> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let end = match memchr(b'\n', &self.data[start..]) {
            Some(i) => {
                self.pos = start + i + 1;
                start + i
            }
            None => {
                self.pos = self.data.len();
                self.data.len()
            }
        };
        let end = if end > start && self.data[end - 1] == b'\r' {
            end - 1
        } else {
            end
        };
        Some((start, end))
    }
}

fn parse_fastq(data: &[u8], out: &mut Vec<Range<usize>>) -> Result<(), ParseError> {
    let mut lines = Lines { data, pos: 0 };
    loop {
        let header = loop {
            match lines.next_line() {
                Some((s, e)) if s == e => continue,
                other => break other,
            }
        };
        let Some((h_start, _)) = header else {
            return Ok(());
        };
        if data[h_start] != b'@' {
            return Err(ParseError {
                byte_offset: h_start,
                msg: "expected '@' at FASTQ record start",
            });
        }
        let (s_start, s_end) = lines.next_line().ok_or(ParseError {
            byte_offset: data.len(),
            msg: "truncated FASTQ record (missing sequence)",
        })?;
        let (p_start, _) = lines.next_line().ok_or(ParseError {
            byte_offset: data.len(),
            msg: "truncated FASTQ record (missing '+' line)",
        })?;
        if data.get(p_start) != Some(&b'+') {
            return Err(ParseError {
                byte_offset: p_start,
                msg: "expected '+' separator line",
            });
        }
        let (q_start, q_end) = lines.next_line().ok_or(ParseError {
            byte_offset: data.len(),
            msg: "truncated FASTQ record (missing quality)",
        })?;
        if q_end - q_start != s_end - s_start {
            return Err(ParseError {
                byte_offset: q_start,
                msg: "quality length differs from sequence length",
            });
        }
        out.push(s_start..s_end);
    }
}

fn parse_fasta(data: &[u8], out: &mut Vec<Range<usize>>) -> Result<(), ParseError> {
    let mut lines = Lines { data, pos: 0 };
    let mut current: Option<(usize, usize)> = None;
    let mut in_record = false;
    while let Some((start, end)) = lines.next_line() {
        if start < data.len() && data[start] == b'>' {
            if in_record {
                push_fasta(current.take(), out);
            }
            in_record = true;
            continue;
        }
        if start == end {
            continue;
        }
        if !in_record {
            return Err(ParseError {
                byte_offset: start,
                msg: "expected '>' at FASTA record start",
            });
        }
        current = Some(match current {
            Some((s, _)) => (s, end),
            None => (start, end),
        });
    }
    if in_record {
        push_fasta(current, out);
    }
    Ok(())
}

fn push_fasta(seq: Option<(usize, usize)>, out: &mut Vec<Range<usize>>) {
    match seq {
        Some((s, e)) => out.push(s..e),
        None => out.push(0..0),
    }
}
