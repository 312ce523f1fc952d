use thiserror::Error;

/// Invalid configuration. Only ever produced at construction time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("point interval must be positive")]
    ZeroPointInterval,

    #[error("cycle duration {cycle_ms}ms is not a positive multiple of point interval {interval_ms}ms")]
    CycleNotMultiple { cycle_ms: u64, interval_ms: u64 },

    #[error("no retention windows configured")]
    NoWindows,

    #[error("window name must not be empty")]
    EmptyWindowName,

    #[error("window {0:?} is declared more than once")]
    DuplicateWindow(String),

    #[error("window {name:?} duration {duration_ms}ms is not a positive multiple of cycle {cycle_ms}ms")]
    WindowNotMultiple {
        name: String,
        duration_ms: u64,
        cycle_ms: u64,
    },

    #[error("{0} must be positive")]
    ZeroCount(&'static str),

    #[error("{name} is out of range: {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("idhr window {0:?} is not a configured window")]
    UnknownIdhrWindow(String),

    #[error("failed to parse config document: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },
}

/// A point that was refused by the store. The symbol's state is left untouched
/// apart from the rejection counter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("point at {ts_ms} is older than last accepted point at {last_ts_ms}")]
    OutOfOrder { ts_ms: u64, last_ts_ms: u64 },

    #[error("point at {ts_ms} falls in a cycle already sealed until {sealed_until_ms}")]
    SealedCycle { ts_ms: u64, sealed_until_ms: u64 },

    #[error("point at {ts_ms} has a non-finite mid price")]
    NonFinitePrice { ts_ms: u64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionDocError {
    #[error("session document is not an object")]
    NotAnObject,

    #[error("unsupported session document version {0}")]
    UnsupportedVersion(u64),

    #[error("session document field {0:?} is missing or malformed")]
    Field(&'static str),

    #[error("opening reference price must be finite and positive, got {0}")]
    InvalidReference(f64),

    #[error("failed to decode session document: {0}")]
    Decode(String),
}

/// Failure to hand an event to the write-behind collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    #[error("write-behind queue is full")]
    Full,

    #[error("write-behind queue is closed")]
    Closed,
}
