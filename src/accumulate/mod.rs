//! Temporal accumulation, denoising and progressive tile scheduling.

mod buffer;
mod denoise;
mod tiles;

pub use buffer::AccumulationBuffer;
pub use denoise::{DenoiseSettings, Denoiser};
pub use tiles::{Tile, TileScheduler};
