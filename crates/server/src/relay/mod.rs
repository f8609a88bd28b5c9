//! Session realtime relay
//!
//! Participants of a session connect over WebSocket; every frame is fanned
//! out to the other participants, recorded in the transcript and, when the
//! moderation policy matches, answered by the AI.

pub mod frame;
pub mod moderation;
pub mod registry;
pub mod socket;

pub use frame::{InboundFrame, ServerFrame, ServerFrameKind};
pub use moderation::ModerationPolicy;
pub use registry::{BroadcastReport, ConnectionId, ConnectionRegistry};
pub use socket::{ws_chat, ws_voice};
