use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Persistence backend for principals, the admission mode and pending entries.
pub enum CliStoreBackend {
    Sqlite,
    /// Process-local state, lost on restart.
    Memory,
}
