// Audio - Lane decoding, mixing and the hardware clock

pub mod clip;
pub mod device;
pub mod engine;
pub mod format_conversion;
pub mod mixer;
