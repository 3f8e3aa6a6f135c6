#[derive(Debug, thiserror::Error)]
pub enum DataManError {
    #[error("bind failed for station {station} on port {port}: {source}")]
    Bind {
        station: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("gap state for station {station}: {source}")]
    GapState {
        station: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("duplicate port {port} for stations {first} and {second}")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },
}

pub type Result<T> = std::result::Result<T, DataManError>;
