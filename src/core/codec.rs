pub const MAX_K: usize = 32;

pub const CODE_RESET: u8 = 0xFF;
pub const CODE_IGNORE: u8 = 0xFE;
pub const CODE_COMMENT: u8 = 0xFD;

/// ASCII -> base code. A=0, C=1, G=2, T=3 (either case); line breaks are
/// ignored; record markers are comments; everything else resets the window.
pub static DNA_CODES: [u8; 256] = {
    let mut t = [CODE_RESET; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t[b'\n' as usize] = CODE_IGNORE;
    t[b'\r' as usize] = CODE_IGNORE;
    t[b'>' as usize] = CODE_COMMENT;
    t[b'@' as usize] = CODE_COMMENT;
    t
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Base consumed, fewer than k bases since the last reset.
    Pending,
    /// Base consumed and the window holds k bases.
    Window { fwd: u64, rev: u64 },
    Ignored,
    Reset,
    /// Same recovery as `Reset`, reported separately.
    Comment,
}

/// Rolling 2-bit encoder producing the forward k-mer and its reverse
/// complement in lock-step. The most recent base sits in the low bits of
/// `fwd` and, complemented, in the high bits of `rev`.
#[derive(Clone, Debug)]
pub struct KmerCodec {
    k: usize,
    lshift: u32,
    mask: u64,
    fwd: u64,
    rev: u64,
    filled: usize,
}

impl KmerCodec {
    pub fn new(k: usize) -> Self {
        assert!((1..=MAX_K).contains(&k), "k-mer length must be in 1..=32");
        Self {
            k,
            lshift: 2 * (k as u32 - 1),
            mask: kmer_mask(k),
            fwd: 0,
            rev: 0,
            filled: 0,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn reset(&mut self) {
        self.fwd = 0;
        self.rev = 0;
        self.filled = 0;
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Step {
        let c = DNA_CODES[byte as usize];
        match c {
            CODE_IGNORE => Step::Ignored,
            CODE_COMMENT => {
                self.reset();
                Step::Comment
            }
            CODE_RESET => {
                self.reset();
                Step::Reset
            }
            _ => {
                let c = c as u64;
                self.fwd = ((self.fwd << 2) & self.mask) | c;
                self.rev = (self.rev >> 2) | ((0x3 - c) << self.lshift);
                if self.filled < self.k {
                    self.filled += 1;
                }
                if self.filled == self.k {
                    Step::Window {
                        fwd: self.fwd,
                        rev: self.rev,
                    }
                } else {
                    Step::Pending
                }
            }
        }
    }
}

#[inline]
pub fn kmer_mask(k: usize) -> u64 {
    if k >= MAX_K {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

/// Pack a k-mer given as ASCII. `None` if any byte is not A/C/G/T or the
/// length is outside 1..=32.
pub fn encode_kmer(seq: &[u8]) -> Option<u64> {
    if seq.is_empty() || seq.len() > MAX_K {
        return None;
    }
    let mut v = 0u64;
    for &b in seq {
        let c = DNA_CODES[b as usize];
        if c > 3 {
            return None;
        }
        v = (v << 2) | c as u64;
    }
    Some(v)
}

pub fn revcomp(key: u64, k: usize) -> u64 {
    let mut rc = 0u64;
    let mut key = key;
    for _ in 0..k {
        rc = (rc << 2) | (0x3 - (key & 0x3));
        key >>= 2;
    }
    rc
}

#[inline]
pub fn canonical(key: u64, k: usize) -> u64 {
    key.min(revcomp(key, k))
}
