use kira_kcount::core::codec::{canonical, encode_kmer};
use kira_kcount::core::engine::{self, RunConfig, count_reads};
use kira_kcount::core::index::{KeyIndex, PerfectHashIndex};
use kira_kcount::core::resolver::TieBreak;
use kira_kcount::core::store::CountTable;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn index(k: usize, canonical: bool, kmers: &[&str]) -> Arc<PerfectHashIndex> {
    let keys = kmers
        .iter()
        .map(|s| encode_kmer(s.as_bytes()).unwrap())
        .collect();
    Arc::new(PerfectHashIndex::from_keys(k, canonical, keys).unwrap())
}

fn write_fastq(path: &Path, reads: &[&str]) {
    let mut f = std::fs::File::create(path).unwrap();
    for (i, seq) in reads.iter().enumerate() {
        writeln!(f, "@read{}\n{}\n+\n{}", i, seq, "I".repeat(seq.len())).unwrap();
    }
}

/// Deterministic pseudo-random reads.
fn synthetic_reads(n: usize, len: usize, seed: u64) -> Vec<String> {
    let mut x = seed;
    (0..n)
        .map(|_| {
            (0..len)
                .map(|_| {
                    x ^= x << 13;
                    x ^= x >> 7;
                    x ^= x << 17;
                    match x % 41 {
                        0 => 'N',
                        v => ['A', 'C', 'G', 'T'][(v % 4) as usize],
                    }
                })
                .collect()
        })
        .collect()
}

fn all_canonical_kmers(k: usize) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..1u64 << (2 * k)).map(|x| canonical(x, k)).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

#[test]
fn overlapping_windows_count_twice() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("r.fq");
    write_fastq(&reads, &["AAAA"]);
    let counted = count_reads(
        index(3, true, &["AAA"]),
        &[reads],
        2,
        TieBreak::default(),
        1024,
    )
    .unwrap();
    assert_eq!(counted.store.total_at(0), 2);
    assert_eq!(counted.tally.unmapped, 0);
    assert_eq!(counted.store.length_histogram(), vec![(4, 1)]);
}

#[test]
fn read_without_valid_window_records_length_only() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("r.fq");
    write_fastq(&reads, &["NNNN"]);
    let counted = count_reads(
        index(3, true, &["AAA"]),
        &[reads],
        1,
        TieBreak::default(),
        1024,
    )
    .unwrap();
    assert_eq!(counted.tally.lookups, 0);
    assert_eq!(counted.tally.unmapped, 0);
    assert_eq!(counted.store.total_at(0), 0);
    assert_eq!(counted.store.length_histogram(), vec![(4, 1)]);
}

#[test]
fn short_reads_are_recorded_but_never_looked_up() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("r.fq");
    write_fastq(&reads, &["AC", "", "ACGT", "A"]);
    let counted = count_reads(
        index(5, true, &["AAAAA"]),
        &[reads],
        3,
        TieBreak::default(),
        1024,
    )
    .unwrap();
    assert_eq!(counted.tally.reads, 4);
    assert_eq!(counted.tally.lookups, 0);
    assert_eq!(
        counted.store.length_histogram(),
        vec![(0, 1), (1, 1), (2, 1), (4, 1)]
    );
}

#[test]
fn canonical_counts_match_for_reverse_complemented_input() {
    let dir = tempfile::tempdir().unwrap();
    let reads = synthetic_reads(200, 90, 7);
    let rc: Vec<String> = reads
        .iter()
        .map(|s| {
            s.chars()
                .rev()
                .map(|c| match c {
                    'A' => 'T',
                    'C' => 'G',
                    'G' => 'C',
                    'T' => 'A',
                    other => other,
                })
                .collect()
        })
        .collect();
    let fwd_path = dir.path().join("fwd.fq");
    let rc_path = dir.path().join("rc.fq");
    write_fastq(&fwd_path, &reads.iter().map(String::as_str).collect::<Vec<_>>());
    write_fastq(&rc_path, &rc.iter().map(String::as_str).collect::<Vec<_>>());

    let k = 5;
    let keys: Vec<u64> = all_canonical_kmers(k).into_iter().step_by(3).collect();
    let idx = Arc::new(PerfectHashIndex::from_keys(k, true, keys).unwrap());
    let a = count_reads(Arc::clone(&idx), &[fwd_path], 4, TieBreak::default(), 512).unwrap();
    let b = count_reads(idx, &[rc_path], 4, TieBreak::default(), 512).unwrap();
    assert_eq!(a.store.counts(), b.store.counts());
    assert_eq!(a.tally.unmapped, b.tally.unmapped);
    assert!(a.store.total_mapped() > 0);
}

#[test]
fn splitting_input_files_does_not_change_counts() {
    let dir = tempfile::tempdir().unwrap();
    let reads = synthetic_reads(1500, 120, 99);
    let reads: Vec<&str> = reads.iter().map(String::as_str).collect();
    let whole = dir.path().join("whole.fq");
    let part1 = dir.path().join("part1.fq");
    let part2 = dir.path().join("part2.fq");
    write_fastq(&whole, &reads);
    write_fastq(&part1, &reads[..611]);
    write_fastq(&part2, &reads[611..]);

    let k = 7;
    let keys: Vec<u64> = all_canonical_kmers(k).into_iter().step_by(5).collect();
    let idx = Arc::new(PerfectHashIndex::from_keys(k, true, keys).unwrap());
    let a = count_reads(Arc::clone(&idx), &[whole], 1, TieBreak::default(), 4096).unwrap();
    let b = count_reads(idx, &[part1, part2], 6, TieBreak::default(), 1000).unwrap();
    assert_eq!(a.store.counts(), b.store.counts());
    assert_eq!(a.tally.unmapped, b.tally.unmapped);
    assert_eq!(a.store.length_histogram(), b.store.length_histogram());
}

#[test]
fn splitting_input_files_does_not_change_vote_counts() {
    let dir = tempfile::tempdir().unwrap();
    let reads = synthetic_reads(800, 60, 5);
    let reads: Vec<&str> = reads.iter().map(String::as_str).collect();
    let whole = dir.path().join("whole.fq");
    let part1 = dir.path().join("part1.fq");
    let part2 = dir.path().join("part2.fq");
    write_fastq(&whole, &reads);
    write_fastq(&part1, &reads[..400]);
    write_fastq(&part2, &reads[400..]);

    let k = 6;
    let keys: Vec<u64> = (0..1u64 << (2 * k)).step_by(7).collect();
    let idx = Arc::new(PerfectHashIndex::from_keys(k, false, keys).unwrap());
    let a = count_reads(Arc::clone(&idx), &[whole], 3, TieBreak::Reverse, 2048).unwrap();
    let b = count_reads(idx, &[part2, part1], 5, TieBreak::Reverse, 700).unwrap();
    assert_eq!(a.store.counts(), b.store.counts());
    assert_eq!(a.tally.unmapped, b.tally.unmapped);
}

#[test]
fn many_workers_on_one_key_lose_no_updates() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("dups.fq");
    let read = "A".repeat(13);
    let copies = 20_000;
    let all: Vec<&str> = (0..copies).map(|_| read.as_str()).collect();
    write_fastq(&reads, &all);

    let threads = 8;
    let counted = count_reads(
        index(3, true, &["AAA"]),
        &[reads],
        threads,
        TieBreak::default(),
        4096,
    )
    .unwrap();
    // 11 windows per read.
    assert_eq!(counted.store.total_at(0), 11 * copies as u64);
    assert_eq!(counted.tally.reads, copies as u64);
}

#[test]
fn vote_mode_never_mixes_strands_within_a_read() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("r.fq");
    write_fastq(&reads, &["AACG", "CGTT"]);
    // Forward of AACG: AAC, ACG. Reverse: GTT, CGT.
    let idx = index(3, false, &["AAC", "ACG", "CGT"]);
    let counted = count_reads(Arc::clone(&idx), &[reads], 2, TieBreak::Reverse, 1024).unwrap();
    let counts = counted.store.counts();
    // AACG: forward 2 hits, reverse 1 (CGT). CGTT: forward 1 hit (CGT),
    // reverse 2 (AAC, ACG). CGT is only ever on the losing strand.
    assert_eq!(counts, vec![2, 2, 0]);
    assert_eq!(counted.tally.forward_reads, 1);
    assert_eq!(counted.tally.reverse_reads, 1);
}

#[test]
fn fasta_input_spans_line_breaks() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("t.fa");
    std::fs::write(&reads, b">t1\nAA\nAA\n>t2\nAANAA\n").unwrap();
    let counted = count_reads(
        index(3, true, &["AAA"]),
        &[reads],
        2,
        TieBreak::default(),
        1024,
    )
    .unwrap();
    assert_eq!(counted.store.total_at(0), 2);
    assert_eq!(counted.store.length_histogram(), vec![(4, 1), (5, 1)]);
}

#[test]
fn gzip_and_plain_inputs_agree() {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let dir = tempfile::tempdir().unwrap();
    let reads = synthetic_reads(300, 75, 3);
    let reads: Vec<&str> = reads.iter().map(String::as_str).collect();
    let plain = dir.path().join("r.fq");
    write_fastq(&plain, &reads);
    let gz = dir.path().join("r.fq.gz");
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&std::fs::read(&plain).unwrap()).unwrap();
    std::fs::write(&gz, enc.finish().unwrap()).unwrap();

    let keys: Vec<u64> = all_canonical_kmers(4);
    let idx = Arc::new(PerfectHashIndex::from_keys(4, true, keys).unwrap());
    let a = count_reads(Arc::clone(&idx), &[plain], 2, TieBreak::default(), 2048).unwrap();
    let b = count_reads(idx, &[gz], 2, TieBreak::default(), 2048).unwrap();
    assert_eq!(a.store.counts(), b.store.counts());
}

#[test]
fn malformed_input_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("bad.fq");
    std::fs::write(&reads, b"@r1\nACGT\n+\nIII\n").unwrap();
    let res = count_reads(
        index(3, true, &["AAA"]),
        &[reads],
        2,
        TieBreak::default(),
        1024,
    );
    assert!(res.is_err());
}

#[test]
fn run_writes_count_file_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let idx_path = dir.path().join("tx.sfi");
    index(3, true, &["AAA", "ACG"])
        .write_file(&idx_path)
        .unwrap();
    let reads = dir.path().join("r.fq");
    write_fastq(&reads, &["AAAA", "CGTN", "NNNN", "AC"]);
    let counts_path = dir.path().join("r.counts");

    let config = RunConfig::new(idx_path, vec![reads], counts_path.clone(), 2);
    let out = engine::run(&config).unwrap();
    assert_eq!(out.summary.mapped, 3);
    assert_eq!(out.summary.unmapped, 0);
    assert_eq!(out.summary.reads, 4);
    assert_eq!(out.summary.mapped_percent(), 100.0);

    let table = CountTable::read_file(&counts_path).unwrap();
    assert_eq!(table.k, 3);
    assert!(table.canonical);
    assert_eq!(table.counts, vec![2, 1]);
    assert_eq!(table.keys, vec![0, encode_kmer(b"ACG").unwrap()]);
    assert_eq!(table.length_hist, vec![(2, 1), (4, 3)]);
}

#[test]
fn missing_index_fails_before_counting() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("r.fq");
    write_fastq(&reads, &["AAAA"]);
    let counts_path = dir.path().join("r.counts");
    let config = RunConfig::new(
        dir.path().join("nope.sfi"),
        vec![reads],
        counts_path.clone(),
        1,
    );
    let err = engine::run(&config).unwrap_err();
    assert!(format!("{err:#}").contains("failed to load index"));
    assert!(!counts_path.exists());
}

#[test]
fn empty_read_file_gives_zero_counts() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("empty.fq");
    std::fs::write(&reads, b"").unwrap();
    let idx = index(3, true, &["AAA", "CCC"]);
    let counted = count_reads(Arc::clone(&idx), &[reads], 2, TieBreak::default(), 1024).unwrap();
    assert_eq!(counted.store.counts(), vec![0; idx.num_keys()]);
    assert_eq!(counted.tally.reads, 0);
}

#[test]
fn blank_separated_fastq_counts_the_same_at_any_chunk_size() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("spaced.fq");
    let mut f = std::fs::File::create(&reads).unwrap();
    for i in 0..50 {
        write!(f, "@r{i}\nAAAA\n+\nIIII\n\n").unwrap();
    }
    drop(f);

    let idx = index(3, true, &["AAA"]);
    for chunk_size in [30, 1 << 20] {
        let counted = count_reads(
            Arc::clone(&idx),
            &[reads.clone()],
            3,
            TieBreak::default(),
            chunk_size,
        )
        .unwrap();
        assert_eq!(counted.store.total_at(0), 100, "chunk size {chunk_size}");
        assert_eq!(counted.tally.reads, 50);
    }
}
