//! Colormap cells
//!
//! Static visuals (TrueColor and friends) have no cells to allocate: a pixel
//! is computed from the color through the visual's channel masks. Dynamic
//! visuals keep one cell per entry, shared read-only between clients that
//! asked for the same color, or writable and private to one client.

use crate::backend::VisualInfo;
use crate::protocol::*;

/// One colormap entry
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cell {
    Free,
    ReadOnly { color: Rgb, holders: Vec<ClientId> },
    Writable { color: Rgb, owner: ClientId },
}

/// Channel layout of a static visual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Channels {
    red: u32,
    green: u32,
    blue: u32,
}

impl Channels {
    fn encode(&self, color: Rgb) -> u32 {
        place(color.red, self.red) | place(color.green, self.green) | place(color.blue, self.blue)
    }

    fn decode(&self, pixel: u32) -> Rgb {
        Rgb::new(
            extract(pixel, self.red),
            extract(pixel, self.green),
            extract(pixel, self.blue),
        )
    }
}

/// Scale a 16-bit channel into the bits of `mask`
fn place(value: u16, mask: u32) -> u32 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let width = (mask >> shift).count_ones();
    ((value as u32) >> (16 - width)) << shift
}

/// Expand the bits of `mask` back to a 16-bit channel, replicating the high
/// bits into the low ones
fn extract(pixel: u32, mask: u32) -> u16 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let width = (mask >> shift).count_ones();
    let raw = (pixel & mask) >> shift;
    let mut value = 0u32;
    let mut filled = 0;
    while filled < 16 {
        value = (value << width) | raw;
        filled += width;
    }
    (value >> (filled - 16)) as u16
}

/// Round a requested color to what an 8-bit DAC can show
fn quantize(color: Rgb) -> Rgb {
    let q = |c: u16| {
        let hi = c >> 8;
        (hi << 8) | hi
    };
    Rgb::new(q(color.red), q(color.green), q(color.blue))
}

/// Colormap record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColormapRecord {
    pub visual: VisualID,
    channels: Option<Channels>,
    cells: Vec<Cell>,
}

impl ColormapRecord {
    /// Create a colormap for `visual`. With `alloc_all` every cell of a
    /// dynamic visual becomes writable by `owner`; static visuals refuse it.
    pub fn new(visual: &VisualInfo, alloc_all: bool, owner: ClientId) -> X11Result<Self> {
        if !visual.is_dynamic() {
            if alloc_all {
                return Err(X11Error::bad_match());
            }
            return Ok(ColormapRecord {
                visual: visual.visual_id,
                channels: Some(Channels {
                    red: visual.red_mask,
                    green: visual.green_mask,
                    blue: visual.blue_mask,
                }),
                cells: Vec::new(),
            });
        }
        let fill = if alloc_all {
            Cell::Writable {
                color: Rgb::default(),
                owner,
            }
        } else {
            Cell::Free
        };
        Ok(ColormapRecord {
            visual: visual.visual_id,
            channels: None,
            cells: vec![fill; visual.colormap_entries as usize],
        })
    }

    pub fn is_dynamic(&self) -> bool {
        self.channels.is_none()
    }

    /// AllocColor: returns the pixel and the color actually used
    pub fn alloc_color(&mut self, client: ClientId, color: Rgb) -> X11Result<(u32, Rgb)> {
        let color = quantize(color);
        if let Some(channels) = self.channels {
            let pixel = channels.encode(color);
            return Ok((pixel, channels.decode(pixel)));
        }

        let shared = self.cells.iter().position(
            |cell| matches!(cell, Cell::ReadOnly { color: c, .. } if *c == color),
        );
        if let Some(pixel) = shared {
            if let Cell::ReadOnly { holders, .. } = &mut self.cells[pixel] {
                holders.push(client);
            }
            return Ok((pixel as u32, color));
        }

        let free = self
            .cells
            .iter()
            .position(|cell| *cell == Cell::Free)
            .ok_or_else(X11Error::bad_alloc)?;
        self.cells[free] = Cell::ReadOnly {
            color,
            holders: vec![client],
        };
        Ok((free as u32, color))
    }

    /// AllocColorCells: `colors` writable base pixels and `planes` plane
    /// masks such that every combination of a base with any subset of the
    /// masks is a cell owned by `client`.
    pub fn alloc_color_cells(
        &mut self,
        client: ClientId,
        colors: u16,
        planes: u16,
    ) -> X11Result<(Vec<u32>, Vec<u32>)> {
        if colors == 0 {
            return Err(X11Error::bad_value(0));
        }
        if !self.is_dynamic() {
            return Err(X11Error::bad_alloc());
        }
        let bits = (self.cells.len() as u32).max(1).trailing_zeros();
        if planes as u32 >= bits {
            return Err(X11Error::bad_alloc());
        }

        // Planes come from the high end of the pixel
        let masks: Vec<u32> = (0..planes as u32).map(|p| 1 << (bits - 1 - p)).collect();
        let combined: u32 = masks.iter().fold(0, |acc, m| acc | m);
        let spans: Vec<u32> = (0..self.cells.len() as u32)
            .filter(|p| p & combined == 0)
            .collect();

        let mut bases = Vec::new();
        for base in spans {
            if bases.len() == colors as usize {
                break;
            }
            if expand(base, combined).all(|p| self.cells[p as usize] == Cell::Free) {
                bases.push(base);
            }
        }
        if bases.len() < colors as usize {
            return Err(X11Error::bad_alloc());
        }

        for base in &bases {
            for pixel in expand(*base, combined) {
                self.cells[pixel as usize] = Cell::Writable {
                    color: Rgb::default(),
                    owner: client,
                };
            }
        }
        Ok((bases, masks))
    }

    /// FreeColors. Every pixel is processed; the first failure is reported.
    pub fn free_colors(&mut self, client: ClientId, plane_mask: u32, pixels: &[u32]) -> X11Result<()> {
        if !self.is_dynamic() {
            return Ok(());
        }
        let mut first_error = None;
        for &base in pixels {
            for pixel in expand(base, plane_mask) {
                if let Err(err) = self.free_cell(client, pixel) {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn free_cell(&mut self, client: ClientId, pixel: u32) -> X11Result<()> {
        let cell = self
            .cells
            .get_mut(pixel as usize)
            .ok_or_else(|| X11Error::bad_value(pixel))?;
        match cell {
            Cell::ReadOnly { holders, .. } => {
                let index = holders
                    .iter()
                    .position(|c| *c == client)
                    .ok_or_else(X11Error::bad_access)?;
                holders.remove(index);
                if holders.is_empty() {
                    *cell = Cell::Free;
                }
                Ok(())
            }
            Cell::Writable { owner, .. } if *owner == client => {
                *cell = Cell::Free;
                Ok(())
            }
            _ => Err(X11Error::bad_access()),
        }
    }

    /// StoreColors: only cells writable by `client` may change
    pub fn store_colors(&mut self, client: ClientId, items: &[ColorItem]) -> X11Result<()> {
        for item in items {
            if !self.is_dynamic() {
                return Err(X11Error::bad_access());
            }
            let cell = self
                .cells
                .get_mut(item.pixel as usize)
                .ok_or_else(|| X11Error::bad_value(item.pixel))?;
            match cell {
                Cell::Writable { color, owner } if *owner == client => {
                    let new = quantize(item.color);
                    if item.flags & 1 != 0 {
                        color.red = new.red;
                    }
                    if item.flags & 2 != 0 {
                        color.green = new.green;
                    }
                    if item.flags & 4 != 0 {
                        color.blue = new.blue;
                    }
                }
                _ => return Err(X11Error::bad_access()),
            }
        }
        Ok(())
    }

    /// QueryColors. Unallocated cells read as black.
    pub fn query_colors(&self, pixels: &[u32]) -> X11Result<Vec<Rgb>> {
        pixels
            .iter()
            .map(|&pixel| match self.channels {
                Some(channels) => Ok(channels.decode(pixel)),
                None => match self.cells.get(pixel as usize) {
                    Some(Cell::ReadOnly { color, .. }) | Some(Cell::Writable { color, .. }) => {
                        Ok(*color)
                    }
                    Some(Cell::Free) => Ok(Rgb::default()),
                    None => Err(X11Error::bad_value(pixel)),
                },
            })
            .collect()
    }

    /// Drop every cell reference held by a departing client
    pub fn release_client(&mut self, client: ClientId) {
        for cell in self.cells.iter_mut() {
            match cell {
                Cell::ReadOnly { holders, .. } => {
                    holders.retain(|c| *c != client);
                    if holders.is_empty() {
                        *cell = Cell::Free;
                    }
                }
                Cell::Writable { owner, .. } if *owner == client => *cell = Cell::Free,
                _ => {}
            }
        }
    }
}

/// Every pixel reachable from `base` by setting a subset of `mask`'s bits
fn expand(base: u32, mask: u32) -> impl Iterator<Item = u32> {
    let bits: Vec<u32> = (0..32).filter(|b| mask & (1 << b) != 0).collect();
    (0..1u32 << bits.len()).map(move |combo| {
        bits.iter()
            .enumerate()
            .filter(|(i, _)| combo & (1 << i) != 0)
            .fold(base, |pixel, (_, bit)| pixel | (1 << bit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn true_color() -> VisualInfo {
        VisualInfo {
            visual_id: VisualID::new(0x21),
            depth: 24,
            class: 4,
            bits_per_rgb: 8,
            colormap_entries: 256,
            red_mask: 0xFF0000,
            green_mask: 0x00FF00,
            blue_mask: 0x0000FF,
        }
    }

    fn pseudo_color(entries: u16) -> VisualInfo {
        VisualInfo {
            visual_id: VisualID::new(0x22),
            depth: 8,
            class: 3,
            bits_per_rgb: 8,
            colormap_entries: entries,
            red_mask: 0,
            green_mask: 0,
            blue_mask: 0,
        }
    }

    #[test]
    fn test_true_color_pixel() {
        let mut cmap = ColormapRecord::new(&true_color(), false, 0).unwrap();
        let (pixel, color) = cmap.alloc_color(1, Rgb::new(0xFFFF, 0x8000, 0x0000)).unwrap();
        assert_eq!(pixel, 0xFF8000);
        assert_eq!(color, Rgb::new(0xFFFF, 0x8080, 0));
        assert_eq!(cmap.query_colors(&[0x0000FF]).unwrap(), vec![Rgb::new(0, 0, 0xFFFF)]);
    }

    #[test]
    fn test_static_alloc_all_is_match() {
        let err = ColormapRecord::new(&true_color(), true, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::Match);
    }

    #[test]
    fn test_shared_read_only_cells() {
        let mut cmap = ColormapRecord::new(&pseudo_color(4), false, 0).unwrap();
        let (a, _) = cmap.alloc_color(1, Rgb::new(0xFFFF, 0, 0)).unwrap();
        let (b, _) = cmap.alloc_color(2, Rgb::new(0xFF00, 0, 0)).unwrap();
        assert_eq!(a, b);
        cmap.free_colors(1, 0, &[a]).unwrap();
        // Still held by client 2
        assert_eq!(cmap.query_colors(&[a]).unwrap()[0].red, 0xFFFF);
        assert_eq!(cmap.free_colors(1, 0, &[a]).unwrap_err().code, ErrorCode::Access);
    }

    #[test]
    fn test_exhaustion_is_alloc() {
        let mut cmap = ColormapRecord::new(&pseudo_color(2), false, 0).unwrap();
        cmap.alloc_color(1, Rgb::new(1 << 8, 0, 0)).unwrap();
        cmap.alloc_color(1, Rgb::new(2 << 8, 0, 0)).unwrap();
        let err = cmap.alloc_color(1, Rgb::new(3 << 8, 0, 0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::Alloc);
    }

    #[test]
    fn test_color_cells_with_planes() {
        let mut cmap = ColormapRecord::new(&pseudo_color(256), false, 0).unwrap();
        let (pixels, masks) = cmap.alloc_color_cells(1, 2, 1).unwrap();
        assert_eq!(masks, vec![0x80]);
        assert_eq!(pixels, vec![0, 1]);

        cmap.store_colors(
            1,
            &[ColorItem {
                pixel: 0x81,
                color: Rgb::new(0x1234, 0x5678, 0x9ABC),
                flags: 1 | 4,
            }],
        )
        .unwrap();
        assert_eq!(
            cmap.query_colors(&[0x81]).unwrap()[0],
            Rgb::new(0x1212, 0, 0x9A9A)
        );

        let foreign = ColorItem {
            pixel: 0,
            color: Rgb::default(),
            flags: 7,
        };
        assert_eq!(cmap.store_colors(2, &[foreign]).unwrap_err().code, ErrorCode::Access);
    }

    #[test]
    fn test_release_client_frees_cells() {
        let mut cmap = ColormapRecord::new(&pseudo_color(2), true, 1).unwrap();
        assert_eq!(cmap.alloc_color(2, Rgb::default()).unwrap_err().code, ErrorCode::Alloc);
        cmap.release_client(1);
        assert!(cmap.alloc_color(2, Rgb::default()).is_ok());
    }
}
