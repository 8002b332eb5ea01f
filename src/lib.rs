pub mod executor;
pub mod extract;
pub mod label;
pub mod model;
pub mod telemetry;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use extract::{
    CompressedBuffer, DiagnosticBuffer, ExtractError, ExtractionSession, ExtractorConfig,
    RawSource, RecordStream, SessionState, UnpackerCli, UnpackerTool,
};
pub use label::*;
pub use model::*;
pub use traits::*;
