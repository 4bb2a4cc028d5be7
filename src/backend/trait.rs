//! Backend trait definition
//!
//! The backend is the host side of the server: it describes the screen,
//! answers selection conversions no client owns, lists the input devices and
//! resolves font names to metrics. The protocol core never renders, so no
//! drawing operations cross this boundary.

use crate::protocol::xinput::DeviceInfo;
use crate::protocol::VisualID;
use std::error::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Screen information
#[derive(Debug, Clone)]
pub struct ScreenInfo {
    pub width: u16,
    pub height: u16,
    pub width_mm: u16,
    pub height_mm: u16,
    pub root_visual: VisualID,
    pub root_depth: u8,
    pub white_pixel: u32,
    pub black_pixel: u32,
}

/// Visual information
#[derive(Debug, Clone)]
pub struct VisualInfo {
    pub visual_id: VisualID,
    pub depth: u8,
    /// StaticGray 0 .. DirectColor 5
    pub class: u8,
    pub bits_per_rgb: u8,
    pub colormap_entries: u16,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

impl VisualInfo {
    /// PseudoColor, GrayScale and DirectColor visuals have writable cells
    pub fn is_dynamic(&self) -> bool {
        self.class % 2 == 1
    }
}

/// Data produced by the host for a selection conversion. The type is named
/// rather than given as an atom; the server interns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionData {
    pub type_name: String,
    pub format: u8,
    pub data: Vec<u8>,
}

/// Metrics of a host font
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontMetrics {
    /// Canonical name the pattern resolved to
    pub name: String,
    pub ascent: i16,
    pub descent: i16,
    /// Advance of every glyph; 0 for proportional fonts
    pub char_width: i16,
    pub min_char: u16,
    pub max_char: u16,
    pub default_char: u16,
}

/// The host collaborator
pub trait Backend: Send {
    /// Initialize the backend
    fn init(&mut self) -> BackendResult<()>;

    /// Get screen information
    fn get_screen_info(&self) -> BackendResult<ScreenInfo>;

    /// Get available visuals
    fn get_visuals(&self) -> BackendResult<Vec<VisualInfo>>;

    /// Convert a selection that no client owns, such as the host clipboard.
    /// `None` means the conversion is refused.
    fn convert_selection(&mut self, selection: &str, target: &str) -> Option<SelectionData>;

    /// Input devices exposed through the input extension
    fn device_capabilities(&self) -> Vec<DeviceInfo>;

    /// Resolve a font name or XLFD pattern
    fn lookup_font(&self, pattern: &str) -> Option<FontMetrics>;

    /// Ring the bell at `percent` of base volume (-100..=100)
    fn bell(&mut self, percent: i8) {
        let _ = percent;
    }
}

/// Case-insensitive XLFD pattern match with `*` and `?` wildcards
pub fn font_pattern_matches(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let n: Vec<char> = name.to_ascii_lowercase().chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_pattern_matches() {
        let name = "-misc-fixed-medium-r-normal--13-120-75-75-c-80-iso8859-1";
        assert!(font_pattern_matches("*", name));
        assert!(font_pattern_matches("-MISC-fixed-*", name));
        assert!(font_pattern_matches("-*-fixed-medium-r-*--13-*", name));
        assert!(font_pattern_matches("-misc-fixed-medium-?-normal--13-120-75-75-c-80-iso8859-1", name));
        assert!(!font_pattern_matches("-*-helvetica-*", name));
        assert!(!font_pattern_matches("fixed", name));
    }
}
