//! nscabuf-core: value types shared by the buffering agent.
//! Check-result messages, gateway events, the NSCA v3 frame codec,
//! buffering configuration and the clock abstraction. No async, no
//! business logic.

pub mod clock;
pub mod config;
pub mod frame;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::{BufferConfig, ConfigError};
pub use frame::{DecodeError, FRAME_LEN, PROTOCOL_VERSION, decode_frame, encode_frame};
pub use types::{GatewayEvent, InvalidStateCode, Message, ServiceState};
