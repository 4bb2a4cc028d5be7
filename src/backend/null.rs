//! Null Backend - headless host
//!
//! Describes a fixed screen, a core pointer and keyboard, and a small font
//! list. Selection conversions are served from an in-memory clipboard the
//! embedder (or a test) fills with `set_host_selection`.

use super::*;
use crate::protocol::xinput::{AxisInfo, DeviceClass, DeviceInfo, DeviceUse};
use crate::protocol::{Atom, VisualID};
use std::collections::HashMap;

pub struct NullBackend {
    width: u16,
    height: u16,
    clipboard: HashMap<String, Vec<u8>>,
    bells: u32,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBackend {
    pub fn new() -> Self {
        Self::with_screen_size(1920, 1080)
    }

    pub fn with_screen_size(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            clipboard: HashMap::new(),
            bells: 0,
        }
    }

    /// Store host-owned text for a selection name such as `CLIPBOARD`
    pub fn set_host_selection(&mut self, selection: &str, text: &[u8]) {
        self.clipboard.insert(selection.to_string(), text.to_vec());
    }

    pub fn bells(&self) -> u32 {
        self.bells
    }

    fn fonts() -> Vec<FontMetrics> {
        vec![
            FontMetrics {
                name: "-misc-fixed-medium-r-semicondensed--13-120-75-75-c-60-iso8859-1".to_string(),
                ascent: 11,
                descent: 2,
                char_width: 6,
                min_char: 0x20,
                max_char: 0xFF,
                default_char: 0x20,
            },
            FontMetrics {
                name: "-misc-fixed-bold-r-normal--13-120-75-75-c-80-iso8859-1".to_string(),
                ascent: 10,
                descent: 3,
                char_width: 8,
                min_char: 0x20,
                max_char: 0xFF,
                default_char: 0x20,
            },
            FontMetrics {
                name: "-*-helvetica-medium-r-normal--12-120-75-75-p-67-iso8859-1".to_string(),
                ascent: 9,
                descent: 3,
                char_width: 0,
                min_char: 0x20,
                max_char: 0xFF,
                default_char: 0x20,
            },
        ]
    }
}

impl Backend for NullBackend {
    fn init(&mut self) -> BackendResult<()> {
        log::info!("Null backend initialized");
        Ok(())
    }

    fn get_screen_info(&self) -> BackendResult<ScreenInfo> {
        Ok(ScreenInfo {
            width: self.width,
            height: self.height,
            // 96 dpi
            width_mm: (self.width as u32 * 254 / 960) as u16,
            height_mm: (self.height as u32 * 254 / 960) as u16,
            root_visual: VisualID::new(0x21),
            root_depth: 24,
            white_pixel: 0xFFFFFF,
            black_pixel: 0x000000,
        })
    }

    fn get_visuals(&self) -> BackendResult<Vec<VisualInfo>> {
        Ok(vec![
            VisualInfo {
                visual_id: VisualID::new(0x21),
                depth: 24,
                class: 4, // TrueColor
                bits_per_rgb: 8,
                colormap_entries: 256,
                red_mask: 0xFF0000,
                green_mask: 0x00FF00,
                blue_mask: 0x0000FF,
            },
            VisualInfo {
                visual_id: VisualID::new(0x22),
                depth: 8,
                class: 3, // PseudoColor
                bits_per_rgb: 8,
                colormap_entries: 256,
                red_mask: 0,
                green_mask: 0,
                blue_mask: 0,
            },
        ])
    }

    fn convert_selection(&mut self, selection: &str, target: &str) -> Option<SelectionData> {
        let text = self.clipboard.get(selection)?;
        match target {
            "STRING" | "UTF8_STRING" | "TEXT" => Some(SelectionData {
                type_name: if target == "TEXT" { "STRING" } else { target }.to_string(),
                format: 8,
                data: text.clone(),
            }),
            _ => None,
        }
    }

    fn device_capabilities(&self) -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                id: 2,
                name: "Virtual core pointer".to_string(),
                device_use: DeviceUse::Pointer,
                type_atom: Atom::NONE,
                classes: vec![
                    DeviceClass::Button { num_buttons: 5 },
                    DeviceClass::Valuator {
                        mode: 0,
                        motion_size: 0,
                        axes: vec![
                            AxisInfo {
                                resolution: 1,
                                min_value: 0,
                                max_value: 1919,
                            },
                            AxisInfo {
                                resolution: 1,
                                min_value: 0,
                                max_value: 1079,
                            },
                        ],
                    },
                ],
            },
            DeviceInfo {
                id: 3,
                name: "Virtual core keyboard".to_string(),
                device_use: DeviceUse::Keyboard,
                type_atom: Atom::NONE,
                classes: vec![DeviceClass::Key {
                    min_keycode: 8,
                    max_keycode: 255,
                }],
            },
        ]
    }

    fn lookup_font(&self, pattern: &str) -> Option<FontMetrics> {
        // The two aliases every client expects to open
        let pattern = match pattern {
            "fixed" | "cursor" => "-misc-fixed-medium-r-semicondensed--13-*",
            other => other,
        };
        Self::fonts()
            .into_iter()
            .find(|font| font_pattern_matches(pattern, &font.name))
    }

    fn bell(&mut self, percent: i8) {
        self.bells += 1;
        log::debug!("Bell at {}%", percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_selection_conversion() {
        let mut backend = NullBackend::new();
        assert!(backend.convert_selection("CLIPBOARD", "STRING").is_none());
        backend.set_host_selection("CLIPBOARD", b"hello");
        let data = backend.convert_selection("CLIPBOARD", "UTF8_STRING").unwrap();
        assert_eq!(data.type_name, "UTF8_STRING");
        assert_eq!(data.data, b"hello");
        assert!(backend.convert_selection("CLIPBOARD", "image/png").is_none());
    }

    #[test]
    fn test_font_aliases() {
        let backend = NullBackend::new();
        assert_eq!(backend.lookup_font("fixed").unwrap().char_width, 6);
        assert!(backend.lookup_font("-*-helvetica-*").is_some());
        assert!(backend.lookup_font("-*-nonexistent-*").is_none());
    }

    #[test]
    fn test_core_devices() {
        let devices = NullBackend::new().device_capabilities();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].num_buttons(), 5);
        assert_eq!(devices[0].axes().len(), 2);
        assert!(devices[1].has_class(0));
    }
}
