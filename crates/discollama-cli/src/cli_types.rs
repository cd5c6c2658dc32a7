use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliStateStoreBackend {
    Dapr,
    Memory,
}
