// Messaging - Lock-free channels between the audio callback, the tick thread and the host

pub mod channels;
pub mod command;
pub mod event;
pub mod notification;
