//! X11 protocol requests
//!
//! Request opcodes, header framing and the byte-order aware reader used by
//! the parser. All reads are bounds-checked: running off the end of a
//! request yields a `Length` error instead of a panic.

use super::errors::*;
use super::types::*;
use byteorder::{BigEndian, ByteOrder as Endian, LittleEndian};

/// X11 request opcodes handled by this server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestOpcode {
    CreateWindow = 1,
    ChangeWindowAttributes = 2,
    GetWindowAttributes = 3,
    DestroyWindow = 4,
    DestroySubwindows = 5,
    ChangeSaveSet = 6,
    ReparentWindow = 7,
    MapWindow = 8,
    MapSubwindows = 9,
    UnmapWindow = 10,
    UnmapSubwindows = 11,
    ConfigureWindow = 12,
    GetGeometry = 14,
    QueryTree = 15,
    InternAtom = 16,
    GetAtomName = 17,
    ChangeProperty = 18,
    DeleteProperty = 19,
    GetProperty = 20,
    ListProperties = 21,
    SetSelectionOwner = 22,
    GetSelectionOwner = 23,
    ConvertSelection = 24,
    SendEvent = 25,
    GrabPointer = 26,
    UngrabPointer = 27,
    GrabButton = 28,
    UngrabButton = 29,
    ChangeActivePointerGrab = 30,
    GrabKeyboard = 31,
    UngrabKeyboard = 32,
    GrabKey = 33,
    UngrabKey = 34,
    AllowEvents = 35,
    GrabServer = 36,
    UngrabServer = 37,
    QueryPointer = 38,
    TranslateCoordinates = 40,
    SetInputFocus = 42,
    GetInputFocus = 43,
    OpenFont = 45,
    CloseFont = 46,
    QueryFont = 47,
    CreatePixmap = 53,
    FreePixmap = 54,
    CreateGC = 55,
    ChangeGC = 56,
    CopyGC = 57,
    FreeGC = 60,
    ClearArea = 61,
    CopyArea = 62,
    CopyPlane = 63,
    PolyPoint = 64,
    PolyLine = 65,
    PolySegment = 66,
    PolyRectangle = 67,
    PolyArc = 68,
    FillPoly = 69,
    PolyFillRectangle = 70,
    PolyFillArc = 71,
    PutImage = 72,
    PolyText8 = 74,
    PolyText16 = 75,
    ImageText8 = 76,
    ImageText16 = 77,
    CreateColormap = 78,
    FreeColormap = 79,
    AllocColor = 84,
    AllocColorCells = 86,
    FreeColors = 88,
    StoreColors = 89,
    QueryColors = 91,
    CreateCursor = 93,
    CreateGlyphCursor = 94,
    FreeCursor = 95,
    QueryExtension = 98,
    ListExtensions = 99,
    Bell = 104,
    KillClient = 113,
    NoOperation = 127,
}

impl RequestOpcode {
    pub fn from_u8(opcode: u8) -> Option<Self> {
        match opcode {
            1 => Some(RequestOpcode::CreateWindow),
            2 => Some(RequestOpcode::ChangeWindowAttributes),
            3 => Some(RequestOpcode::GetWindowAttributes),
            4 => Some(RequestOpcode::DestroyWindow),
            5 => Some(RequestOpcode::DestroySubwindows),
            6 => Some(RequestOpcode::ChangeSaveSet),
            7 => Some(RequestOpcode::ReparentWindow),
            8 => Some(RequestOpcode::MapWindow),
            9 => Some(RequestOpcode::MapSubwindows),
            10 => Some(RequestOpcode::UnmapWindow),
            11 => Some(RequestOpcode::UnmapSubwindows),
            12 => Some(RequestOpcode::ConfigureWindow),
            14 => Some(RequestOpcode::GetGeometry),
            15 => Some(RequestOpcode::QueryTree),
            16 => Some(RequestOpcode::InternAtom),
            17 => Some(RequestOpcode::GetAtomName),
            18 => Some(RequestOpcode::ChangeProperty),
            19 => Some(RequestOpcode::DeleteProperty),
            20 => Some(RequestOpcode::GetProperty),
            21 => Some(RequestOpcode::ListProperties),
            22 => Some(RequestOpcode::SetSelectionOwner),
            23 => Some(RequestOpcode::GetSelectionOwner),
            24 => Some(RequestOpcode::ConvertSelection),
            25 => Some(RequestOpcode::SendEvent),
            26 => Some(RequestOpcode::GrabPointer),
            27 => Some(RequestOpcode::UngrabPointer),
            28 => Some(RequestOpcode::GrabButton),
            29 => Some(RequestOpcode::UngrabButton),
            30 => Some(RequestOpcode::ChangeActivePointerGrab),
            31 => Some(RequestOpcode::GrabKeyboard),
            32 => Some(RequestOpcode::UngrabKeyboard),
            33 => Some(RequestOpcode::GrabKey),
            34 => Some(RequestOpcode::UngrabKey),
            35 => Some(RequestOpcode::AllowEvents),
            36 => Some(RequestOpcode::GrabServer),
            37 => Some(RequestOpcode::UngrabServer),
            38 => Some(RequestOpcode::QueryPointer),
            40 => Some(RequestOpcode::TranslateCoordinates),
            42 => Some(RequestOpcode::SetInputFocus),
            43 => Some(RequestOpcode::GetInputFocus),
            45 => Some(RequestOpcode::OpenFont),
            46 => Some(RequestOpcode::CloseFont),
            47 => Some(RequestOpcode::QueryFont),
            53 => Some(RequestOpcode::CreatePixmap),
            54 => Some(RequestOpcode::FreePixmap),
            55 => Some(RequestOpcode::CreateGC),
            56 => Some(RequestOpcode::ChangeGC),
            57 => Some(RequestOpcode::CopyGC),
            60 => Some(RequestOpcode::FreeGC),
            61 => Some(RequestOpcode::ClearArea),
            62 => Some(RequestOpcode::CopyArea),
            63 => Some(RequestOpcode::CopyPlane),
            64 => Some(RequestOpcode::PolyPoint),
            65 => Some(RequestOpcode::PolyLine),
            66 => Some(RequestOpcode::PolySegment),
            67 => Some(RequestOpcode::PolyRectangle),
            68 => Some(RequestOpcode::PolyArc),
            69 => Some(RequestOpcode::FillPoly),
            70 => Some(RequestOpcode::PolyFillRectangle),
            71 => Some(RequestOpcode::PolyFillArc),
            72 => Some(RequestOpcode::PutImage),
            74 => Some(RequestOpcode::PolyText8),
            75 => Some(RequestOpcode::PolyText16),
            76 => Some(RequestOpcode::ImageText8),
            77 => Some(RequestOpcode::ImageText16),
            78 => Some(RequestOpcode::CreateColormap),
            79 => Some(RequestOpcode::FreeColormap),
            84 => Some(RequestOpcode::AllocColor),
            86 => Some(RequestOpcode::AllocColorCells),
            88 => Some(RequestOpcode::FreeColors),
            89 => Some(RequestOpcode::StoreColors),
            91 => Some(RequestOpcode::QueryColors),
            93 => Some(RequestOpcode::CreateCursor),
            94 => Some(RequestOpcode::CreateGlyphCursor),
            95 => Some(RequestOpcode::FreeCursor),
            98 => Some(RequestOpcode::QueryExtension),
            99 => Some(RequestOpcode::ListExtensions),
            104 => Some(RequestOpcode::Bell),
            113 => Some(RequestOpcode::KillClient),
            127 => Some(RequestOpcode::NoOperation),
            _ => None,
        }
    }

    /// Drawing requests are validated but never rasterized.
    pub fn is_drawing(&self) -> bool {
        matches!(*self as u8, 61..=77)
    }
}

/// Request header (common to all requests)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: u8,
    /// Request-specific detail byte (minor opcode for extensions)
    pub detail: u8,
    /// Total request length in 4-byte units, including the header
    pub length: u32,
    /// Bytes taken by the header: 4, or 8 with an extended length
    pub header_len: usize,
}

impl RequestHeader {
    /// Parse request header from buffer.
    ///
    /// A zero length field is only meaningful once BIG-REQUESTS has been
    /// enabled on the connection; the real length then follows as a 32-bit
    /// value.
    pub fn parse(buffer: &[u8], byte_order: ByteOrder, big_requests: bool) -> X11Result<Self> {
        if buffer.len() < 4 {
            return Err(X11Error::bad_length());
        }
        let short = read_u16_at(&buffer[2..4], byte_order);
        if short != 0 {
            return Ok(RequestHeader {
                opcode: buffer[0],
                detail: buffer[1],
                length: short as u32,
                header_len: 4,
            });
        }
        if !big_requests || buffer.len() < 8 {
            return Err(X11Error::bad_length());
        }
        let length = read_u32_at(&buffer[4..8], byte_order);
        // The extended length still counts the original 4-byte header.
        if length < 2 {
            return Err(X11Error::bad_length());
        }
        Ok(RequestHeader {
            opcode: buffer[0],
            detail: buffer[1],
            length,
            header_len: 8,
        })
    }

    /// Get total request size in bytes
    pub fn size(&self) -> usize {
        (self.length as usize) * 4
    }
}

pub(crate) fn read_u16_at(bytes: &[u8], byte_order: ByteOrder) -> u16 {
    match byte_order {
        ByteOrder::MSBFirst => BigEndian::read_u16(bytes),
        ByteOrder::LSBFirst => LittleEndian::read_u16(bytes),
    }
}

pub(crate) fn read_u32_at(bytes: &[u8], byte_order: ByteOrder) -> u32 {
    match byte_order {
        ByteOrder::MSBFirst => BigEndian::read_u32(bytes),
        ByteOrder::LSBFirst => LittleEndian::read_u32(bytes),
    }
}

/// Helper to read values from request buffer
pub struct RequestReader<'a> {
    buffer: &'a [u8],
    offset: usize,
    byte_order: ByteOrder,
}

impl<'a> RequestReader<'a> {
    pub fn new(buffer: &'a [u8], byte_order: ByteOrder) -> Self {
        RequestReader {
            buffer,
            offset: 0,
            byte_order,
        }
    }

    fn take(&mut self, n: usize) -> X11Result<&'a [u8]> {
        let end = self.offset.checked_add(n).ok_or_else(X11Error::bad_length)?;
        if end > self.buffer.len() {
            return Err(X11Error::bad_length());
        }
        let slice = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> X11Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> X11Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> X11Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> X11Result<u16> {
        let order = self.byte_order;
        Ok(read_u16_at(self.take(2)?, order))
    }

    pub fn read_i16(&mut self) -> X11Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> X11Result<u32> {
        let order = self.byte_order;
        Ok(read_u32_at(self.take(4)?, order))
    }

    pub fn read_i32(&mut self) -> X11Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_window(&mut self) -> X11Result<Window> {
        Ok(Window::new(self.read_u32()?))
    }

    pub fn read_pixmap(&mut self) -> X11Result<Pixmap> {
        Ok(Pixmap::new(self.read_u32()?))
    }

    pub fn read_drawable(&mut self) -> X11Result<Drawable> {
        Ok(Drawable::new(self.read_u32()?))
    }

    pub fn read_gcontext(&mut self) -> X11Result<GContext> {
        Ok(GContext::new(self.read_u32()?))
    }

    pub fn read_colormap(&mut self) -> X11Result<Colormap> {
        Ok(Colormap::new(self.read_u32()?))
    }

    pub fn read_cursor(&mut self) -> X11Result<Cursor> {
        Ok(Cursor::new(self.read_u32()?))
    }

    pub fn read_font(&mut self) -> X11Result<Font> {
        Ok(Font::new(self.read_u32()?))
    }

    pub fn read_atom(&mut self) -> X11Result<Atom> {
        Ok(Atom::new(self.read_u32()?))
    }

    pub fn read_timestamp(&mut self) -> X11Result<Timestamp> {
        Ok(Timestamp::new(self.read_u32()?))
    }

    /// Read an id the client is allocating. Reserved top bits are an
    /// `IDChoice` error rather than being silently masked.
    pub fn read_new_id(&mut self) -> X11Result<ResourceId> {
        let xid = self.read_u32()?;
        if ResourceId::is_reserved_xid(xid) {
            return Err(X11Error::bad_id_choice(xid));
        }
        Ok(ResourceId::from_xid(xid))
    }

    pub fn read_bytes(&mut self, len: usize) -> X11Result<&'a [u8]> {
        self.take(len)
    }

    /// Read `len` bytes and skip the padding that follows them.
    pub fn read_padded(&mut self, len: usize) -> X11Result<&'a [u8]> {
        let bytes = self.take(len)?;
        self.skip(super::pad(len))?;
        Ok(bytes)
    }

    pub fn read_u32_list(&mut self, count: usize) -> X11Result<Vec<u32>> {
        (0..count).map(|_| self.read_u32()).collect()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buffer[self.offset..]
    }

    pub fn remaining_len(&self) -> usize {
        self.buffer.len() - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_plain_length() {
        let frame = [8u8, 0, 2, 0, 1, 0, 0, 0];
        let header = RequestHeader::parse(&frame, ByteOrder::LSBFirst, false).unwrap();
        assert_eq!(header.opcode, 8);
        assert_eq!(header.length, 2);
        assert_eq!(header.header_len, 4);
        assert_eq!(header.size(), 8);
    }

    #[test]
    fn test_header_zero_length_without_big_requests() {
        let frame = [8u8, 0, 0, 0, 3, 0, 0, 0];
        let err = RequestHeader::parse(&frame, ByteOrder::LSBFirst, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::Length);
    }

    #[test]
    fn test_header_extended_length() {
        let frame = [18u8, 0, 0, 0, 0, 0, 0x01, 0x00];
        let header = RequestHeader::parse(&frame, ByteOrder::MSBFirst, true).unwrap();
        assert_eq!(header.length, 0x100);
        assert_eq!(header.header_len, 8);
    }

    #[test]
    fn test_reader_truncation_is_length_error() {
        let data = [1u8, 2, 3];
        let mut reader = RequestReader::new(&data, ByteOrder::LSBFirst);
        assert_eq!(reader.read_u16().unwrap(), 0x0201);
        assert_eq!(reader.read_u32().unwrap_err().code, ErrorCode::Length);
    }

    #[test]
    fn test_new_id_reserved_bits() {
        let data = 0xE000_0001u32.to_le_bytes();
        let mut reader = RequestReader::new(&data, ByteOrder::LSBFirst);
        assert_eq!(reader.read_new_id().unwrap_err().code, ErrorCode::IDChoice);
    }

    #[test]
    fn test_opcode_table() {
        assert_eq!(RequestOpcode::from_u8(20), Some(RequestOpcode::GetProperty));
        assert_eq!(RequestOpcode::from_u8(13), None);
        assert!(RequestOpcode::CopyArea.is_drawing());
        assert!(!RequestOpcode::GetProperty.is_drawing());
    }
}
