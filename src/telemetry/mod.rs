pub mod frame;
pub mod store;
pub mod stream;

pub use frame::{BracketRepairSplitter, FrameSplitter, TelemetryDecoder, TelemetryMessage};
pub use store::{ReadingSnapshot, ReadingStore};
pub use stream::{
    apply_messages, RefreshCallback, StopHandle, StreamConfig, StreamState, TelemetryStream,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_TELEMETRY_PORT,
};
