//! Graphics context state
//!
//! A GC is a fixed set of 23 components addressed by mask bit. Changes are
//! incremental: only the components named by a value-list mask move, and a
//! value-list with any invalid component changes nothing.

use crate::protocol::{ValueList, X11Error, X11Result};

pub const GC_FUNCTION: u32 = 0;
pub const GC_PLANE_MASK: u32 = 1;
pub const GC_FOREGROUND: u32 = 2;
pub const GC_BACKGROUND: u32 = 3;
pub const GC_LINE_WIDTH: u32 = 4;
pub const GC_LINE_STYLE: u32 = 5;
pub const GC_CAP_STYLE: u32 = 6;
pub const GC_JOIN_STYLE: u32 = 7;
pub const GC_FILL_STYLE: u32 = 8;
pub const GC_FILL_RULE: u32 = 9;
pub const GC_TILE: u32 = 10;
pub const GC_STIPPLE: u32 = 11;
pub const GC_TILE_STIPPLE_X_ORIGIN: u32 = 12;
pub const GC_TILE_STIPPLE_Y_ORIGIN: u32 = 13;
pub const GC_FONT: u32 = 14;
pub const GC_SUBWINDOW_MODE: u32 = 15;
pub const GC_GRAPHICS_EXPOSURES: u32 = 16;
pub const GC_CLIP_X_ORIGIN: u32 = 17;
pub const GC_CLIP_Y_ORIGIN: u32 = 18;
pub const GC_CLIP_MASK: u32 = 19;
pub const GC_DASH_OFFSET: u32 = 20;
pub const GC_DASHES: u32 = 21;
pub const GC_ARC_MODE: u32 = 22;

const COMPONENTS: usize = 23;

/// Protocol defaults. Tile and font 0 stand for the server's choice.
const DEFAULTS: [u32; COMPONENTS] = [
    3,          // function: Copy
    0xFFFF_FFFF, // plane-mask
    0,          // foreground
    1,          // background
    0,          // line-width
    0,          // line-style: Solid
    1,          // cap-style: Butt
    0,          // join-style: Miter
    0,          // fill-style: Solid
    0,          // fill-rule: EvenOdd
    0,          // tile
    0,          // stipple
    0,          // tile-stipple-x-origin
    0,          // tile-stipple-y-origin
    0,          // font
    0,          // subwindow-mode: ClipByChildren
    1,          // graphics-exposures
    0,          // clip-x-origin
    0,          // clip-y-origin
    0,          // clip-mask: None
    0,          // dash-offset
    4,          // dashes
    1,          // arc-mode: PieSlice
];

/// Largest value of each enumerated component
fn max_value(bit: u32) -> Option<u32> {
    match bit {
        GC_FUNCTION => Some(15),
        GC_LINE_STYLE => Some(2),
        GC_CAP_STYLE => Some(3),
        GC_JOIN_STYLE => Some(2),
        GC_FILL_STYLE => Some(3),
        GC_FILL_RULE => Some(1),
        GC_SUBWINDOW_MODE => Some(1),
        GC_GRAPHICS_EXPOSURES => Some(1),
        GC_ARC_MODE => Some(1),
        GC_LINE_WIDTH => Some(0xFFFF),
        _ => None,
    }
}

/// A graphics context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcRecord {
    /// Depth of the drawable the GC was created for
    pub depth: u8,
    values: [u32; COMPONENTS],
}

impl GcRecord {
    pub fn new(depth: u8) -> Self {
        GcRecord {
            depth,
            values: DEFAULTS,
        }
    }

    pub fn get(&self, bit: u32) -> u32 {
        self.values[bit as usize]
    }

    /// Validate the whole list, then apply it.
    pub fn apply(&mut self, list: &ValueList) -> X11Result<()> {
        for (bit, value) in list.iter() {
            if bit as usize >= COMPONENTS {
                return Err(X11Error::bad_value(list.mask));
            }
            if let Some(max) = max_value(bit) {
                if value > max {
                    return Err(X11Error::bad_value(value));
                }
            }
            if bit == GC_DASHES && (value == 0 || value > 0xFF) {
                return Err(X11Error::bad_value(value));
            }
        }
        for (bit, value) in list.iter() {
            self.values[bit as usize] = value;
        }
        Ok(())
    }

    /// CopyGC: components named by `mask` move from `src`. Both GCs must
    /// have been created for the same depth.
    pub fn copy_from(&mut self, src: &GcRecord, mask: u32) -> X11Result<()> {
        if self.depth != src.depth {
            return Err(X11Error::bad_match());
        }
        for bit in 0..COMPONENTS {
            if mask & (1 << bit) != 0 {
                self.values[bit] = src.values[bit];
            }
        }
        Ok(())
    }
}
