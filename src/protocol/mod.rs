//! Management channel protocol spoken by the transfer executable.
//!
//! The executable connects back to a loopback port given with `-M` and
//! streams text frames describing session progress. Commands travel the
//! other way on the same socket.

pub mod codec;
pub mod event;
pub mod state;

pub use codec::{write_command, Frame, FrameParser, FIELD_SEPARATOR, HEADER, MAX_LINE_LENGTH};
pub use event::{EnhancedEvent, EventType, FieldValue, BOOLEAN_FIELDS, INTEGER_FIELDS};
pub use state::ChannelState;
