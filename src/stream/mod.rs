//! 流式层：标记扫描、协议事件、事件出口、编码与会话编排

pub mod encoder;
pub mod events;
pub mod orchestrator;
pub mod scanner;
pub mod sink;

pub use encoder::{EventEncoder, Framing};
pub use events::ProtocolEvent;
pub use orchestrator::{SessionOutcome, SessionState, StreamOrchestrator};
pub use scanner::{
    MarkerScanner, ScanItem, ScanOutput, ScanState, ToolCallRecord, DEFAULT_MAX_MARKER_BYTES,
};
pub use sink::EventSink;
