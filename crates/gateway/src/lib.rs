//! The voxlane gateway — the control-plane face of the runtime.
//!
//! Two jobs matter here: accepting inbound calls from the carrier
//! webhook (signature check, call row, `handoff_requested` event, TwiML
//! answer) and releasing join tokens through the one-shot dispatch
//! claim endpoint, guarded by tenant-scoped service credentials.

pub mod api;
pub mod state;
pub mod twiml;
