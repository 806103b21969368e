//! Core data types for kernel-node-rs
//!
//! # Main Types
//!
//! - [`PixelType`] - Element type stored in a device buffer
//! - [`Extents`] - Ordered extent tuple (width, height, depth) used for buffer
//!   shapes, kernel domains and global work sizes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of axes a buffer or launch domain may have
pub const MAX_AXES: usize = 3;

/// Element type of a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PixelType {
    /// 8-bit unsigned integer, values clamp to 0..=255
    UnsignedByte,
    /// 16-bit unsigned integer, values clamp to 0..=65535
    UnsignedShort,
    /// 32-bit float
    #[default]
    Float32,
}

impl PixelType {
    /// Convert an arbitrary value into one representable by this type.
    ///
    /// Integer types round to nearest and saturate; NaN becomes 0.
    pub fn coerce(&self, value: f64) -> f32 {
        match self {
            PixelType::UnsignedByte => saturate(value, 255.0),
            PixelType::UnsignedShort => saturate(value, 65535.0),
            PixelType::Float32 => value as f32,
        }
    }

    /// Short name used in scripts and config files
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelType::UnsignedByte => "uint8",
            PixelType::UnsignedShort => "uint16",
            PixelType::Float32 => "float32",
        }
    }
}

fn saturate(value: f64, max: f64) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.round().clamp(0.0, max) as f32
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uint8" | "u8" | "byte" => Ok(PixelType::UnsignedByte),
            "uint16" | "u16" | "short" => Ok(PixelType::UnsignedShort),
            "float32" | "f32" | "float" => Ok(PixelType::Float32),
            other => Err(format!("Unknown pixel type '{}'", other)),
        }
    }
}

/// Ordered extent tuple with 1 to [`MAX_AXES`] strictly positive axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Extents(Vec<usize>);

impl Extents {
    /// Build extents, rejecting empty tuples, more than three axes, zero-sized
    /// axes and shapes whose element count does not fit in `usize`.
    pub fn new(axes: impl Into<Vec<usize>>) -> Result<Self, String> {
        let axes = axes.into();
        if axes.is_empty() {
            return Err("extents must have at least one axis".to_string());
        }
        if axes.len() > MAX_AXES {
            return Err(format!(
                "extents may have at most {} axes, got {}",
                MAX_AXES,
                axes.len()
            ));
        }
        if let Some(pos) = axes.iter().position(|&a| a == 0) {
            return Err(format!("extent axis {} is zero", pos));
        }
        if axes.iter().try_fold(1usize, |n, &a| n.checked_mul(a)).is_none() {
            return Err(format!(
                "extents {:?} overflow the addressable element count",
                axes
            ));
        }
        Ok(Self(axes))
    }

    /// Build extents from signed integers, as produced by scripts
    pub fn from_signed(axes: &[i64]) -> Result<Self, String> {
        let mut converted = Vec::with_capacity(axes.len());
        for (i, &a) in axes.iter().enumerate() {
            if a <= 0 {
                return Err(format!("extent axis {} must be positive, got {}", i, a));
            }
            let axis = usize::try_from(a)
                .map_err(|_| format!("extent axis {} is too large: {}", i, a))?;
            converted.push(axis);
        }
        Self::new(converted)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Extent along `axis`, or 1 if the tuple is shorter
    #[inline]
    pub fn axis(&self, axis: usize) -> usize {
        self.0.get(axis).copied().unwrap_or(1)
    }

    pub fn width(&self) -> usize {
        self.axis(0)
    }

    pub fn height(&self) -> usize {
        self.axis(1)
    }

    pub fn depth(&self) -> usize {
        self.axis(2)
    }

    /// Total number of elements covered. Never overflows: `new` rejects such shapes.
    pub fn element_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Linear index of a coordinate, or `None` when out of bounds
    #[inline]
    pub fn linear_index(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        if x < self.width() && y < self.height() && z < self.depth() {
            Some((z * self.height() + y) * self.width() + x)
        } else {
            None
        }
    }
}

impl fmt::Display for Extents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|a| a.to_string()).collect();
        f.write_str(&parts.join("x"))
    }
}

impl FromStr for Extents {
    type Err = String;

    /// Parse `WxH[xD]` notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let axes = s
            .split(['x', 'X'])
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .map_err(|e| format!("invalid extent '{}': {}", part, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(axes)
    }
}
