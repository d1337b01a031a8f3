// MIDI output - Block messages, device access and dispatch

pub mod device;
pub mod dispatcher;
pub mod message;
