fn main() -> anyhow::Result<()> {
    kira_kcount::cli::run::entry()
}
