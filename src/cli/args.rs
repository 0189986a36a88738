use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kira-kcount",
    version,
    about = "Count indexed k-mers in sequencing reads"
)]
pub struct Cli {
    /// Log at debug level
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Count the k-mers of the reads that also occur in the index
    Count(CountArgs),
}

#[derive(Parser)]
pub struct CountArgs {
    /// K-mer index (`.sfi`); a base name without the extension also works
    #[arg(short, long)]
    pub index: PathBuf,

    /// FASTA/FASTQ read files, plain or gzip
    #[arg(short, long, num_args = 1.., required = true)]
    pub reads: Vec<PathBuf>,

    /// Output count file
    #[arg(short, long)]
    pub counts: PathBuf,

    #[arg(short = 'p', long, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Strand counted when a read's forward and reverse k-mers hit the
    /// index equally often (non-canonical indexes only)
    #[arg(long, value_enum, default_value_t = TieStrandArg::Reverse)]
    pub tie_strand: TieStrandArg,

    /// Also write a tab-separated run summary here
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TieStrandArg {
    #[value(name = "reverse")]
    Reverse,
    #[value(name = "forward")]
    Forward,
}
