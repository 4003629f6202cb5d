pub mod branch;
pub mod codec;
pub mod derivative;
pub mod enhancement;
pub mod pixelation;
