//! Asset-inlining stages of the prepare phase: embedded raster images,
//! matched style rules, and referenced font binaries.

pub mod fonts;
pub mod images;
pub mod style;
