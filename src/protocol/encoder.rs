//! X11 reply encoder
//!
//! Replies are a closed sum type. `ProtocolEncoder` turns one into wire bytes
//! in the connection's byte order; the sequence number is supplied by the
//! connection that sends it.

use super::xinput::XiReply;
use super::*;
use byteorder::{BigEndian, ByteOrder as Endian, LittleEndian};

/// Byte-order aware output buffer shared by replies, events and errors.
pub struct WireWriter {
    buf: Vec<u8>,
    byte_order: ByteOrder,
}

impl WireWriter {
    pub fn new(byte_order: ByteOrder) -> Self {
        WireWriter {
            buf: Vec::with_capacity(32),
            byte_order,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn u16(&mut self, value: u16) {
        let mut b = [0u8; 2];
        match self.byte_order {
            ByteOrder::MSBFirst => BigEndian::write_u16(&mut b, value),
            ByteOrder::LSBFirst => LittleEndian::write_u16(&mut b, value),
        }
        self.buf.extend_from_slice(&b);
    }

    pub fn i16(&mut self, value: i16) {
        self.u16(value as u16);
    }

    pub fn u32(&mut self, value: u32) {
        let mut b = [0u8; 4];
        match self.byte_order {
            ByteOrder::MSBFirst => BigEndian::write_u32(&mut b, value),
            ByteOrder::LSBFirst => LittleEndian::write_u32(&mut b, value),
        }
        self.buf.extend_from_slice(&b);
    }

    pub fn i32(&mut self, value: i32) {
        self.u32(value as u32);
    }

    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Zero-fill up to the next 4-byte boundary.
    pub fn pad4(&mut self) {
        self.zeros(pad(self.buf.len()));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn set_u16_at(&mut self, pos: usize, value: u16) {
        match self.byte_order {
            ByteOrder::MSBFirst => BigEndian::write_u16(&mut self.buf[pos..pos + 2], value),
            ByteOrder::LSBFirst => LittleEndian::write_u16(&mut self.buf[pos..pos + 2], value),
        }
    }

    pub fn set_u32_at(&mut self, pos: usize, value: u32) {
        match self.byte_order {
            ByteOrder::MSBFirst => BigEndian::write_u32(&mut self.buf[pos..pos + 4], value),
            ByteOrder::LSBFirst => LittleEndian::write_u32(&mut self.buf[pos..pos + 4], value),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Start a reply record: type 1, data byte, sequence, length placeholder.
    pub fn begin_reply(byte_order: ByteOrder, data: u8, sequence: u16) -> Self {
        let mut w = WireWriter::new(byte_order);
        w.u8(1);
        w.u8(data);
        w.u16(sequence);
        w.u32(0);
        w
    }

    /// Pad to at least 32 bytes and a 4-byte boundary, then write the
    /// length of everything beyond the first 32 bytes.
    pub fn finish_reply(mut self) -> Vec<u8> {
        if self.buf.len() < 32 {
            self.zeros(32 - self.buf.len());
        }
        self.pad4();
        let extra = ((self.buf.len() - 32) / 4) as u32;
        self.set_u32_at(4, extra);
        self.buf
    }
}

/// GetWindowAttributes reply fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAttributesReply {
    pub backing_store: u8,
    pub visual: VisualID,
    pub class: u16,
    pub bit_gravity: u8,
    pub win_gravity: u8,
    pub backing_planes: u32,
    pub backing_pixel: u32,
    pub save_under: bool,
    pub map_is_installed: bool,
    pub map_state: MapState,
    pub override_redirect: bool,
    pub colormap: Colormap,
    pub all_event_masks: u32,
    pub your_event_mask: u32,
    pub do_not_propagate_mask: u16,
}

/// Per-character metrics as reported by QueryFont
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharInfo {
    pub left_side_bearing: i16,
    pub right_side_bearing: i16,
    pub character_width: i16,
    pub ascent: i16,
    pub descent: i16,
    pub attributes: u16,
}

/// QueryFont reply fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFontReply {
    pub min_bounds: CharInfo,
    pub max_bounds: CharInfo,
    pub min_char_or_byte2: u16,
    pub max_char_or_byte2: u16,
    pub default_char: u16,
    pub draw_direction: u8,
    pub min_byte1: u8,
    pub max_byte1: u8,
    pub all_chars_exist: bool,
    pub font_ascent: i16,
    pub font_descent: i16,
}

/// An RGB triple with 16 bits per channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl Rgb {
    pub fn new(red: u16, green: u16, blue: u16) -> Self {
        Rgb { red, green, blue }
    }
}

/// Replies the server sends, one variant per reply-bearing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    GetWindowAttributes(WindowAttributesReply),
    GetGeometry {
        depth: u8,
        root: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        border_width: u16,
    },
    QueryTree {
        root: Window,
        parent: Window,
        children: Vec<Window>,
    },
    InternAtom {
        atom: Atom,
    },
    GetAtomName {
        name: Vec<u8>,
    },
    GetProperty {
        format: u8,
        type_: Atom,
        bytes_after: u32,
        value: Vec<u8>,
    },
    ListProperties {
        atoms: Vec<Atom>,
    },
    GetSelectionOwner {
        owner: Window,
    },
    /// GrabPointer and GrabKeyboard
    Grab {
        status: GrabStatus,
    },
    QueryPointer {
        same_screen: bool,
        root: Window,
        child: Window,
        root_x: i16,
        root_y: i16,
        win_x: i16,
        win_y: i16,
        mask: u16,
    },
    TranslateCoordinates {
        same_screen: bool,
        child: Window,
        dst_x: i16,
        dst_y: i16,
    },
    GetInputFocus {
        revert_to: u8,
        /// Raw focus value: None 0, PointerRoot 1, or a window
        focus: u32,
    },
    QueryFont(QueryFontReply),
    AllocColor {
        color: Rgb,
        pixel: u32,
    },
    AllocColorCells {
        pixels: Vec<u32>,
        masks: Vec<u32>,
    },
    QueryColors {
        colors: Vec<Rgb>,
    },
    QueryExtension {
        present: bool,
        major_opcode: u8,
        first_event: u8,
        first_error: u8,
    },
    ListExtensions {
        names: Vec<String>,
    },
    BigReqEnable {
        maximum_request_length: u32,
    },
    XInput(XiReply),
}

/// Reply encoder
pub struct ProtocolEncoder {
    byte_order: ByteOrder,
}

impl ProtocolEncoder {
    pub fn new(byte_order: ByteOrder) -> Self {
        ProtocolEncoder { byte_order }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Encode a reply stamped with `sequence`
    pub fn encode_reply(&self, sequence: u16, reply: &Reply) -> Vec<u8> {
        let order = self.byte_order;
        match reply {
            Reply::GetWindowAttributes(a) => {
                let mut w = WireWriter::begin_reply(order, a.backing_store, sequence);
                w.u32(a.visual.get());
                w.u16(a.class);
                w.u8(a.bit_gravity);
                w.u8(a.win_gravity);
                w.u32(a.backing_planes);
                w.u32(a.backing_pixel);
                w.bool(a.save_under);
                w.bool(a.map_is_installed);
                w.u8(a.map_state as u8);
                w.bool(a.override_redirect);
                w.u32(a.colormap.xid());
                w.u32(a.all_event_masks);
                w.u32(a.your_event_mask);
                w.u16(a.do_not_propagate_mask);
                w.zeros(2);
                w.finish_reply()
            }
            Reply::GetGeometry {
                depth,
                root,
                x,
                y,
                width,
                height,
                border_width,
            } => {
                let mut w = WireWriter::begin_reply(order, *depth, sequence);
                w.u32(root.xid());
                w.i16(*x);
                w.i16(*y);
                w.u16(*width);
                w.u16(*height);
                w.u16(*border_width);
                w.finish_reply()
            }
            Reply::QueryTree {
                root,
                parent,
                children,
            } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u32(root.xid());
                w.u32(parent.xid());
                w.u16(children.len() as u16);
                w.zeros(14);
                for child in children {
                    w.u32(child.xid());
                }
                w.finish_reply()
            }
            Reply::InternAtom { atom } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u32(atom.get());
                w.finish_reply()
            }
            Reply::GetAtomName { name } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u16(name.len() as u16);
                w.zeros(22);
                w.bytes(name);
                w.finish_reply()
            }
            Reply::GetProperty {
                format,
                type_,
                bytes_after,
                value,
            } => {
                let mut w = WireWriter::begin_reply(order, *format, sequence);
                w.u32(type_.get());
                w.u32(*bytes_after);
                let units = match format {
                    8 => value.len(),
                    16 => value.len() / 2,
                    32 => value.len() / 4,
                    _ => 0,
                };
                w.u32(units as u32);
                w.zeros(12);
                w.bytes(value);
                w.finish_reply()
            }
            Reply::ListProperties { atoms } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u16(atoms.len() as u16);
                w.zeros(22);
                for atom in atoms {
                    w.u32(atom.get());
                }
                w.finish_reply()
            }
            Reply::GetSelectionOwner { owner } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u32(owner.xid());
                w.finish_reply()
            }
            Reply::Grab { status } => {
                WireWriter::begin_reply(order, *status as u8, sequence).finish_reply()
            }
            Reply::QueryPointer {
                same_screen,
                root,
                child,
                root_x,
                root_y,
                win_x,
                win_y,
                mask,
            } => {
                let mut w = WireWriter::begin_reply(order, *same_screen as u8, sequence);
                w.u32(root.xid());
                w.u32(child.xid());
                w.i16(*root_x);
                w.i16(*root_y);
                w.i16(*win_x);
                w.i16(*win_y);
                w.u16(*mask);
                w.finish_reply()
            }
            Reply::TranslateCoordinates {
                same_screen,
                child,
                dst_x,
                dst_y,
            } => {
                let mut w = WireWriter::begin_reply(order, *same_screen as u8, sequence);
                w.u32(child.xid());
                w.i16(*dst_x);
                w.i16(*dst_y);
                w.finish_reply()
            }
            Reply::GetInputFocus { revert_to, focus } => {
                let mut w = WireWriter::begin_reply(order, *revert_to, sequence);
                w.u32(*focus);
                w.finish_reply()
            }
            Reply::QueryFont(font) => self.encode_query_font(sequence, font),
            Reply::AllocColor { color, pixel } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u16(color.red);
                w.u16(color.green);
                w.u16(color.blue);
                w.zeros(2);
                w.u32(*pixel);
                w.finish_reply()
            }
            Reply::AllocColorCells { pixels, masks } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u16(pixels.len() as u16);
                w.u16(masks.len() as u16);
                w.zeros(20);
                for pixel in pixels {
                    w.u32(*pixel);
                }
                for mask in masks {
                    w.u32(*mask);
                }
                w.finish_reply()
            }
            Reply::QueryColors { colors } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u16(colors.len() as u16);
                w.zeros(22);
                for color in colors {
                    w.u16(color.red);
                    w.u16(color.green);
                    w.u16(color.blue);
                    w.zeros(2);
                }
                w.finish_reply()
            }
            Reply::QueryExtension {
                present,
                major_opcode,
                first_event,
                first_error,
            } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.bool(*present);
                w.u8(*major_opcode);
                w.u8(*first_event);
                w.u8(*first_error);
                w.finish_reply()
            }
            Reply::ListExtensions { names } => {
                let mut w = WireWriter::begin_reply(order, names.len() as u8, sequence);
                w.zeros(24);
                for name in names {
                    w.u8(name.len() as u8);
                    w.bytes(name.as_bytes());
                }
                w.finish_reply()
            }
            Reply::BigReqEnable {
                maximum_request_length,
            } => {
                let mut w = WireWriter::begin_reply(order, 0, sequence);
                w.u32(*maximum_request_length);
                w.finish_reply()
            }
            Reply::XInput(reply) => reply.encode(sequence, order),
        }
    }

    fn encode_query_font(&self, sequence: u16, font: &QueryFontReply) -> Vec<u8> {
        let mut w = WireWriter::begin_reply(self.byte_order, 0, sequence);
        write_char_info(&mut w, &font.min_bounds);
        w.zeros(4);
        write_char_info(&mut w, &font.max_bounds);
        w.zeros(4);
        w.u16(font.min_char_or_byte2);
        w.u16(font.max_char_or_byte2);
        w.u16(font.default_char);
        // No font properties are reported.
        w.u16(0);
        w.u8(font.draw_direction);
        w.u8(font.min_byte1);
        w.u8(font.max_byte1);
        w.bool(font.all_chars_exist);
        w.i16(font.font_ascent);
        w.i16(font.font_descent);
        // Per-character infos are omitted; clients fall back to max_bounds.
        w.u32(0);
        w.finish_reply()
    }
}

fn write_char_info(w: &mut WireWriter, info: &CharInfo) {
    w.i16(info.left_side_bearing);
    w.i16(info.right_side_bearing);
    w.i16(info.character_width);
    w.i16(info.ascent);
    w.i16(info.descent);
    w.u16(info.attributes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_minimum_size() {
        let enc = ProtocolEncoder::new(ByteOrder::LSBFirst);
        let bytes = enc.encode_reply(5, &Reply::InternAtom { atom: Atom(70) });
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[2..4], &[5, 0]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[70, 0, 0, 0]);
    }

    #[test]
    fn test_get_property_tail_is_padded() {
        let enc = ProtocolEncoder::new(ByteOrder::MSBFirst);
        let bytes = enc.encode_reply(
            1,
            &Reply::GetProperty {
                format: 8,
                type_: Atom::STRING,
                bytes_after: 2,
                value: b"hello".to_vec(),
            },
        );
        assert_eq!(bytes.len(), 40);
        // Length counts the padded tail in 4-byte units.
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 2]);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 5]);
        assert_eq!(&bytes[32..37], b"hello");
    }

    #[test]
    fn test_grab_status_in_data_byte() {
        let enc = ProtocolEncoder::new(ByteOrder::LSBFirst);
        let bytes = enc.encode_reply(
            9,
            &Reply::Grab {
                status: GrabStatus::AlreadyGrabbed,
            },
        );
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn test_list_extensions_strings() {
        let enc = ProtocolEncoder::new(ByteOrder::LSBFirst);
        let bytes = enc.encode_reply(
            2,
            &Reply::ListExtensions {
                names: vec!["BIG-REQUESTS".to_string()],
            },
        );
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[32], 12);
        assert_eq!(&bytes[33..45], b"BIG-REQUESTS");
        assert_eq!(bytes.len() % 4, 0);
    }
}
