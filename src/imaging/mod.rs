//! Image processing on top of the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` with allocation limits |
//! | **Rotate** | `imageops::rotate*` or bilinear resampling |
//! | **Scale** | `imageops::resize`, nearest or bicubic in N steps |
//! | **Encode** | `JpegEncoder` |
//! | **Mosaic** | `imageops::overlay` onto a template |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing scale operations
//! - **Backend**: [`ByteSource`] trait + [`FileSource`] + shared errors
//! - **Remote**: [`HttpSource`] for URLs, [`RoutingSource`] to pick per location
//! - **Codec**: Pixel work (decode, rotate, scale, encode)
//! - **Operations**: High-level functions combining calculations + codec

pub mod backend;
pub mod calculations;
pub mod codec;
pub mod operations;
mod params;
pub mod remote;

pub use backend::{ByteSource, Dimensions, FileSource, PictureError, SourceStream};
pub use codec::{is_supported_image, supported_input_extensions};
pub use operations::{MosaicConfig, compose_mosaic};
pub use params::{Quality, ScaleMode, ScaleSettings, TargetMode};
pub use remote::{HttpSource, RoutingSource};
