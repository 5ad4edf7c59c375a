//! Tuner session management.

mod filter_sink;
mod session_table;
mod sessions;
mod tuner_service;

pub use filter_sink::FilterEventSink;
pub use session_table::SessionTable;
pub use sessions::{FilterPipeline, FrontendSession, LnbSession};
pub use tuner_service::{
    convert_frontend_info, QueueBridge, SessionCounts, TunerService, DEFAULT_DRIVER_TIMEOUT,
    FILTER_BUFFER_SIZE, VIDEO_TPID,
};
