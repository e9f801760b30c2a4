//! Afterimage: real-time effect-chain compositor with temporal feedback.
//!
//! Plays a live source through an ordered chain of shader effects. Effects
//! can read a history surface holding the previous frame's composite, which
//! gives trails and echoes.

pub mod capture;
pub mod config;
pub mod effect;
pub mod frame;
pub mod mode;
pub mod output;
pub mod preset;
pub mod session;
pub mod shader;
pub mod utils;
