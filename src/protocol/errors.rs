//! X11 protocol error codes and error handling
//!
//! Handlers build errors without knowing the sequence number or opcode of
//! the request they serve; the dispatcher stamps both before the record is
//! encoded.

use super::encoder::WireWriter;
use super::types::*;
use std::fmt;

/// X11 error codes as defined in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Request,
    Value,
    Window,
    Pixmap,
    Atom,
    Cursor,
    Font,
    Match,
    Drawable,
    Access,
    Alloc,
    Colormap,
    GContext,
    IDChoice,
    Name,
    Length,
    Implementation,
    /// Error allocated to an extension, already offset by its first error.
    Extension(u8),
}

impl ErrorCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorCode::Request),
            2 => Some(ErrorCode::Value),
            3 => Some(ErrorCode::Window),
            4 => Some(ErrorCode::Pixmap),
            5 => Some(ErrorCode::Atom),
            6 => Some(ErrorCode::Cursor),
            7 => Some(ErrorCode::Font),
            8 => Some(ErrorCode::Match),
            9 => Some(ErrorCode::Drawable),
            10 => Some(ErrorCode::Access),
            11 => Some(ErrorCode::Alloc),
            12 => Some(ErrorCode::Colormap),
            13 => Some(ErrorCode::GContext),
            14 => Some(ErrorCode::IDChoice),
            15 => Some(ErrorCode::Name),
            16 => Some(ErrorCode::Length),
            17 => Some(ErrorCode::Implementation),
            128..=255 => Some(ErrorCode::Extension(code)),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ErrorCode::Request => 1,
            ErrorCode::Value => 2,
            ErrorCode::Window => 3,
            ErrorCode::Pixmap => 4,
            ErrorCode::Atom => 5,
            ErrorCode::Cursor => 6,
            ErrorCode::Font => 7,
            ErrorCode::Match => 8,
            ErrorCode::Drawable => 9,
            ErrorCode::Access => 10,
            ErrorCode::Alloc => 11,
            ErrorCode::Colormap => 12,
            ErrorCode::GContext => 13,
            ErrorCode::IDChoice => 14,
            ErrorCode::Name => 15,
            ErrorCode::Length => 16,
            ErrorCode::Implementation => 17,
            ErrorCode::Extension(code) => *code,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Request => "Request: bad request code",
            ErrorCode::Value => "Value: integer parameter out of range",
            ErrorCode::Window => "Window: invalid Window parameter",
            ErrorCode::Pixmap => "Pixmap: invalid Pixmap parameter",
            ErrorCode::Atom => "Atom: invalid Atom parameter",
            ErrorCode::Cursor => "Cursor: invalid Cursor parameter",
            ErrorCode::Font => "Font: invalid Font parameter",
            ErrorCode::Match => "Match: parameter mismatch",
            ErrorCode::Drawable => "Drawable: invalid Drawable parameter",
            ErrorCode::Access => "Access: attempt to access private resource",
            ErrorCode::Alloc => "Alloc: insufficient resources",
            ErrorCode::Colormap => "Colormap: invalid Colormap parameter",
            ErrorCode::GContext => "GContext: invalid GC parameter",
            ErrorCode::IDChoice => "IDChoice: invalid resource ID for this connection",
            ErrorCode::Name => "Name: font or color name doesn't exist",
            ErrorCode::Length => "Length: request length incorrect",
            ErrorCode::Implementation => "Implementation: server implementation error",
            ErrorCode::Extension(_) => "Extension: extension-specific error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// X11 error packet
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "X11 Error: {code} (sequence: {sequence}, value: 0x{bad_value:08x}, major: {major_opcode}, minor: {minor_opcode})"
)]
pub struct X11Error {
    pub code: ErrorCode,
    pub sequence: u16,
    pub bad_value: u32,
    pub minor_opcode: u16,
    pub major_opcode: u8,
}

impl X11Error {
    pub fn new(code: ErrorCode, bad_value: u32) -> Self {
        X11Error {
            code,
            sequence: 0,
            bad_value,
            minor_opcode: 0,
            major_opcode: 0,
        }
    }

    /// Attach the request's sequence number and opcodes.
    pub fn stamp(mut self, sequence: u16, major_opcode: u8, minor_opcode: u16) -> Self {
        self.sequence = sequence;
        self.major_opcode = major_opcode;
        self.minor_opcode = minor_opcode;
        self
    }

    /// Encode error to wire format (32 bytes)
    pub fn encode(&self, byte_order: ByteOrder) -> Vec<u8> {
        let mut w = WireWriter::new(byte_order);
        w.u8(0);
        w.u8(self.code.as_u8());
        w.u16(self.sequence);
        w.u32(self.bad_value);
        w.u16(self.minor_opcode);
        w.u8(self.major_opcode);
        w.zeros(21);
        w.into_bytes()
    }
}

/// Result type for X11 operations
pub type X11Result<T> = Result<T, X11Error>;

/// Helper functions to create common errors
impl X11Error {
    pub fn bad_request() -> Self {
        X11Error::new(ErrorCode::Request, 0)
    }

    pub fn bad_value(value: u32) -> Self {
        X11Error::new(ErrorCode::Value, value)
    }

    pub fn bad_window(window: Window) -> Self {
        X11Error::new(ErrorCode::Window, window.xid())
    }

    pub fn bad_pixmap(pixmap: Pixmap) -> Self {
        X11Error::new(ErrorCode::Pixmap, pixmap.xid())
    }

    pub fn bad_atom(atom: Atom) -> Self {
        X11Error::new(ErrorCode::Atom, atom.get())
    }

    pub fn bad_cursor(cursor: Cursor) -> Self {
        X11Error::new(ErrorCode::Cursor, cursor.xid())
    }

    pub fn bad_font(font: Font) -> Self {
        X11Error::new(ErrorCode::Font, font.xid())
    }

    pub fn bad_drawable(drawable: Drawable) -> Self {
        X11Error::new(ErrorCode::Drawable, drawable.xid())
    }

    pub fn bad_gc(gc: GContext) -> Self {
        X11Error::new(ErrorCode::GContext, gc.xid())
    }

    pub fn bad_colormap(colormap: Colormap) -> Self {
        X11Error::new(ErrorCode::Colormap, colormap.xid())
    }

    pub fn bad_match() -> Self {
        X11Error::new(ErrorCode::Match, 0)
    }

    pub fn bad_access() -> Self {
        X11Error::new(ErrorCode::Access, 0)
    }

    pub fn bad_alloc() -> Self {
        X11Error::new(ErrorCode::Alloc, 0)
    }

    pub fn bad_id_choice(id: u32) -> Self {
        X11Error::new(ErrorCode::IDChoice, id)
    }

    pub fn bad_name() -> Self {
        X11Error::new(ErrorCode::Name, 0)
    }

    pub fn bad_length() -> Self {
        X11Error::new(ErrorCode::Length, 0)
    }

    pub fn implementation_error() -> Self {
        X11Error::new(ErrorCode::Implementation, 0)
    }

    pub fn extension(code: u8, bad_value: u32) -> Self {
        X11Error::new(ErrorCode::Extension(code), bad_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_layout_lsb() {
        let err = X11Error::bad_window(Window::new(0x0020_0005)).stamp(7, 8, 0);
        let bytes = err.encode(ByteOrder::LSBFirst);
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 3);
        assert_eq!(&bytes[2..4], &[7, 0]);
        assert_eq!(&bytes[4..8], &[0x05, 0x00, 0x20, 0x00]);
        assert_eq!(bytes[10], 8);
    }

    #[test]
    fn test_error_layout_msb() {
        let err = X11Error::bad_length().stamp(0x0102, 16, 0);
        let bytes = err.encode(ByteOrder::MSBFirst);
        assert_eq!(bytes[1], 16);
        assert_eq!(&bytes[2..4], &[0x01, 0x02]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_extension_code_round_trip() {
        assert_eq!(ErrorCode::from_u8(129), Some(ErrorCode::Extension(129)));
        assert_eq!(ErrorCode::Extension(131).as_u8(), 131);
        assert_eq!(ErrorCode::from_u8(40), None);
    }
}
