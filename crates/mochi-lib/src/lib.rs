//! mochi-lib — the character engine.
//!
//! Gateways to the hosted chat model and TTS provider, the audio playback
//! controller, the avatar rig that animates the mouth mesh, and the chat
//! orchestrator that sequences a full turn:
//!
//! ```text
//! user input → chat gateway → reveal bind → history append
//!     → speech synthesis → playback → time events → typing reveal
//!                                   → speaking flag → mouth animation
//! ```

pub mod avatar;
pub mod gateway;
pub mod orchestrator;
pub mod playback;
pub mod server;
