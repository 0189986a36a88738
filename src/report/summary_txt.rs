use crate::core::engine::{RunConfig, RunOutput};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub fn write(path: &Path, config: &RunConfig, output: &RunOutput) -> Result<()> {
    let mut w = BufWriter::new(File::create(path).with_context(|| "create summary failed")?);
    write_to(&mut w, config, output)?;
    w.flush()?;
    Ok(())
}

pub fn write_to<W: Write>(w: &mut W, config: &RunConfig, output: &RunOutput) -> Result<()> {
    let s = &output.summary;
    writeln!(w, "index\t{}", config.index.display())?;
    for path in &config.reads {
        writeln!(w, "reads\t{}", path.display())?;
    }
    writeln!(w, "counts\t{}", config.counts.display())?;
    writeln!(w, "threads\t{}", config.threads)?;
    writeln!(w, "kmer_length\t{}", s.kmer_len)?;
    writeln!(w, "canonical\t{}", s.canonical)?;
    writeln!(w, "index_keys\t{}", s.num_keys)?;
    writeln!(w, "reads_processed\t{}", s.reads)?;
    writeln!(w, "kmers_mapped\t{}", s.mapped)?;
    writeln!(w, "kmers_unmapped\t{}", s.unmapped)?;
    writeln!(w, "mapped_percent\t{:.4}", s.mapped_percent())?;
    writeln!(w, "decode_events\t{}", s.decode_events)?;
    if !s.canonical {
        writeln!(w, "forward_reads\t{}", s.forward_reads)?;
        writeln!(w, "reverse_reads\t{}", s.reverse_reads)?;
    }
    writeln!(w, "input_bytes\t{}", output.producer.bytes)?;
    writeln!(w, "elapsed_sec\t{:.3}", s.elapsed.as_secs_f64())?;
    Ok(())
}
