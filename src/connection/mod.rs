// Device connection status

pub mod status;
