pub mod env;
pub mod structured_logging;

pub use structured_logging::{
    init_structured_logging,
    LoggingConfig,
    OperationTimer,
    StructuredLogEntry,
};
