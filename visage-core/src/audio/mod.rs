//! Audio value types and sample-rate conversion.
//!
//! The speech source hands the pipeline 16-bit mono PCM at an arbitrary
//! rate; everything past the ingest boundary runs at the rendering
//! engine's single fixed input rate. This module owns that boundary:
//! [`chunk::AudioChunk`] is the unit of transfer, [`resample::RateConverter`]
//! does the (band-limited) rate conversion, and [`wav`] loads clips from
//! disk for the canned-audio path.

pub mod chunk;
pub mod resample;
pub mod wav;
