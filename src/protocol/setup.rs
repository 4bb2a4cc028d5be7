//! X11 connection setup protocol
//!
//! The handshake happens once per connection before any request is framed:
//! the client names its byte order and protocol version, the server answers
//! with either a failure reason or the full screen description.

use super::encoder::WireWriter;
use super::requests::read_u16_at;
use super::*;
use crate::error::ServerError;
use std::io::Read;

/// Connection setup request from client
#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub byte_order: ByteOrder,
    pub protocol_major_version: u16,
    pub protocol_minor_version: u16,
    pub authorization_protocol_name: String,
    pub authorization_protocol_data: Vec<u8>,
}

impl SetupRequest {
    /// Parse setup request from stream
    pub fn parse<R: Read>(stream: &mut R) -> Result<Self, ServerError> {
        let mut header = [0u8; 12];
        stream.read_exact(&mut header)?;

        let byte_order =
            ByteOrder::from_setup_byte(header[0]).ok_or(ServerError::BadByteOrder(header[0]))?;

        let protocol_major_version = read_u16_at(&header[2..4], byte_order);
        let protocol_minor_version = read_u16_at(&header[4..6], byte_order);
        let name_len = read_u16_at(&header[6..8], byte_order) as usize;
        let data_len = read_u16_at(&header[8..10], byte_order) as usize;

        let mut name = vec![0u8; padded_len(name_len)];
        stream.read_exact(&mut name)?;
        name.truncate(name_len);

        let mut authorization_protocol_data = vec![0u8; padded_len(data_len)];
        stream.read_exact(&mut authorization_protocol_data)?;
        authorization_protocol_data.truncate(data_len);

        Ok(SetupRequest {
            byte_order,
            protocol_major_version,
            protocol_minor_version,
            authorization_protocol_name: String::from_utf8_lossy(&name).to_string(),
            authorization_protocol_data,
        })
    }
}

/// Setup response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    Failed = 0,
    Success = 1,
    Authenticate = 2,
}

/// Pixmap format
#[derive(Debug, Clone)]
pub struct Format {
    pub depth: u8,
    pub bits_per_pixel: u8,
    pub scanline_pad: u8,
}

/// Visual type information
#[derive(Debug, Clone)]
pub struct VisualType {
    pub visual_id: VisualID,
    pub class: u8,
    pub bits_per_rgb_value: u8,
    pub colormap_entries: u16,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

/// Depth information
#[derive(Debug, Clone)]
pub struct Depth {
    pub depth: u8,
    pub visuals: Vec<VisualType>,
}

/// Screen information
#[derive(Debug, Clone)]
pub struct Screen {
    pub root: Window,
    pub default_colormap: Colormap,
    pub white_pixel: u32,
    pub black_pixel: u32,
    pub current_input_masks: u32,
    pub width_in_pixels: u16,
    pub height_in_pixels: u16,
    pub width_in_millimeters: u16,
    pub height_in_millimeters: u16,
    pub min_installed_maps: u16,
    pub max_installed_maps: u16,
    pub root_visual: VisualID,
    pub backing_stores: u8,
    pub save_unders: bool,
    pub root_depth: u8,
    pub allowed_depths: Vec<Depth>,
}

impl Screen {
    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.root.xid());
        w.u32(self.default_colormap.xid());
        w.u32(self.white_pixel);
        w.u32(self.black_pixel);
        w.u32(self.current_input_masks);
        w.u16(self.width_in_pixels);
        w.u16(self.height_in_pixels);
        w.u16(self.width_in_millimeters);
        w.u16(self.height_in_millimeters);
        w.u16(self.min_installed_maps);
        w.u16(self.max_installed_maps);
        w.u32(self.root_visual.get());
        w.u8(self.backing_stores);
        w.bool(self.save_unders);
        w.u8(self.root_depth);
        w.u8(self.allowed_depths.len() as u8);

        for depth in &self.allowed_depths {
            w.u8(depth.depth);
            w.u8(0);
            w.u16(depth.visuals.len() as u16);
            w.zeros(4);
            for visual in &depth.visuals {
                w.u32(visual.visual_id.get());
                w.u8(visual.class);
                w.u8(visual.bits_per_rgb_value);
                w.u16(visual.colormap_entries);
                w.u32(visual.red_mask);
                w.u32(visual.green_mask);
                w.u32(visual.blue_mask);
                w.zeros(4);
            }
        }
    }
}

/// Setup reply (success case)
#[derive(Debug, Clone)]
pub struct SetupSuccess {
    pub protocol_major_version: u16,
    pub protocol_minor_version: u16,
    pub release_number: u32,
    pub resource_id_base: u32,
    pub resource_id_mask: u32,
    pub motion_buffer_size: u32,
    pub maximum_request_length: u16,
    pub image_byte_order: ByteOrder,
    pub bitmap_format_bit_order: ByteOrder,
    pub bitmap_format_scanline_unit: u8,
    pub bitmap_format_scanline_pad: u8,
    pub min_keycode: u8,
    pub max_keycode: u8,
    pub vendor: String,
    pub pixmap_formats: Vec<Format>,
    pub roots: Vec<Screen>,
}

impl SetupSuccess {
    pub fn encode(&self, byte_order: ByteOrder) -> Vec<u8> {
        let mut w = WireWriter::new(byte_order);
        w.u8(SetupStatus::Success as u8);
        w.u8(0);
        w.u16(self.protocol_major_version);
        w.u16(self.protocol_minor_version);
        w.u16(0); // length, patched below

        w.u32(self.release_number);
        w.u32(self.resource_id_base);
        w.u32(self.resource_id_mask);
        w.u32(self.motion_buffer_size);
        w.u16(self.vendor.len() as u16);
        w.u16(self.maximum_request_length);
        w.u8(self.roots.len() as u8);
        w.u8(self.pixmap_formats.len() as u8);
        w.u8(self.image_byte_order as u8);
        w.u8(self.bitmap_format_bit_order as u8);
        w.u8(self.bitmap_format_scanline_unit);
        w.u8(self.bitmap_format_scanline_pad);
        w.u8(self.min_keycode);
        w.u8(self.max_keycode);
        w.zeros(4);

        w.bytes(self.vendor.as_bytes());
        w.pad4();

        for format in &self.pixmap_formats {
            w.u8(format.depth);
            w.u8(format.bits_per_pixel);
            w.u8(format.scanline_pad);
            w.zeros(5);
        }

        for screen in &self.roots {
            screen.encode(&mut w);
        }

        // Length in 4-byte units beyond the first 8 bytes
        let length = ((w.len() - 8) / 4) as u16;
        w.set_u16_at(6, length);
        w.into_bytes()
    }
}

/// Setup failed response
#[derive(Debug, Clone)]
pub struct SetupFailed {
    pub protocol_major_version: u16,
    pub protocol_minor_version: u16,
    pub reason: String,
}

impl SetupFailed {
    pub fn encode(&self, byte_order: ByteOrder) -> Vec<u8> {
        let reason = &self.reason.as_bytes()[..self.reason.len().min(255)];
        let mut w = WireWriter::new(byte_order);
        w.u8(SetupStatus::Failed as u8);
        w.u8(reason.len() as u8);
        w.u16(self.protocol_major_version);
        w.u16(self.protocol_minor_version);
        w.u16((padded_len(reason.len()) / 4) as u16);
        w.bytes(reason);
        w.pad4();
        w.into_bytes()
    }
}

/// Setup response
#[derive(Debug, Clone)]
pub enum SetupResponse {
    Success(SetupSuccess),
    Failed(SetupFailed),
}

impl SetupResponse {
    pub fn encode(&self, byte_order: ByteOrder) -> Vec<u8> {
        match self {
            SetupResponse::Success(success) => success.encode(byte_order),
            SetupResponse::Failed(failed) => failed.encode(byte_order),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_setup_request() {
        let mut raw = vec![b'l', 0, 11, 0, 0, 0, 4, 0, 2, 0, 0, 0];
        raw.extend_from_slice(b"NAME");
        raw.extend_from_slice(&[9, 9, 0, 0]);
        let req = SetupRequest::parse(&mut Cursor::new(raw)).unwrap();
        assert_eq!(req.byte_order, ByteOrder::LSBFirst);
        assert_eq!(req.protocol_major_version, 11);
        assert_eq!(req.authorization_protocol_name, "NAME");
        assert_eq!(req.authorization_protocol_data, vec![9, 9]);
    }

    #[test]
    fn test_bad_byte_order() {
        let raw = vec![b'x'; 12];
        assert!(matches!(
            SetupRequest::parse(&mut Cursor::new(raw)),
            Err(ServerError::BadByteOrder(b'x'))
        ));
    }

    #[test]
    fn test_failed_reply_length() {
        let failed = SetupFailed {
            protocol_major_version: 11,
            protocol_minor_version: 0,
            reason: "nope!".to_string(),
        };
        let bytes = failed.encode(ByteOrder::LSBFirst);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 5);
        assert_eq!(&bytes[6..8], &[2, 0]);
        assert_eq!(bytes.len(), 16);
    }
}
