//! The voxlane connector — the per-call voice loop.
//!
//! One replica hosts many concurrent calls; each call gets a voice
//! session (STT, TTS, media transport, barge-in), a serialized turn
//! queue and a carrier media bridge, all keyed by call id and torn
//! down together when the media stream stops.

pub mod api;
pub mod bridge;
pub mod llm;
pub mod session;
pub mod state;
pub mod tools;
pub mod turn_flow;
