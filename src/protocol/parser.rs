//! X11 request parser
//!
//! Decodes one framed request into a [`Request`]. The frame's header has
//! already been validated by the connection; the parser only sees the body.

use super::encoder::Rgb;
use super::xinput::XiRequest;
use super::*;

/// Major opcode assigned to BIG-REQUESTS
pub const BIG_REQUESTS_MAJOR_OPCODE: u8 = 133;

/// Major opcode assigned to XInputExtension
pub const XINPUT_MAJOR_OPCODE: u8 = 131;

/// Parsed X11 request
#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateWindow(CreateWindowRequest),
    ChangeWindowAttributes {
        window: Window,
        values: WindowValues,
    },
    GetWindowAttributes {
        window: Window,
    },
    DestroyWindow {
        window: Window,
    },
    DestroySubwindows {
        window: Window,
    },
    ChangeSaveSet {
        insert: bool,
        window: Window,
    },
    ReparentWindow {
        window: Window,
        parent: Window,
        x: i16,
        y: i16,
    },
    MapWindow {
        window: Window,
    },
    MapSubwindows {
        window: Window,
    },
    UnmapWindow {
        window: Window,
    },
    UnmapSubwindows {
        window: Window,
    },
    ConfigureWindow {
        window: Window,
        values: ConfigureValues,
    },
    GetGeometry {
        drawable: Drawable,
    },
    QueryTree {
        window: Window,
    },
    TranslateCoordinates {
        src_window: Window,
        dst_window: Window,
        src_x: i16,
        src_y: i16,
    },
    InternAtom {
        only_if_exists: bool,
        name: Vec<u8>,
    },
    GetAtomName {
        atom: Atom,
    },
    ChangeProperty(ChangePropertyRequest),
    DeleteProperty {
        window: Window,
        property: Atom,
    },
    GetProperty(GetPropertyRequest),
    ListProperties {
        window: Window,
    },
    SetSelectionOwner {
        owner: Window,
        selection: Atom,
        time: Timestamp,
    },
    GetSelectionOwner {
        selection: Atom,
    },
    ConvertSelection(ConvertSelectionRequest),
    SendEvent(SendEventRequest),
    GrabPointer(GrabPointerRequest),
    UngrabPointer {
        time: Timestamp,
    },
    GrabButton(GrabButtonRequest),
    UngrabButton {
        button: u8,
        grab_window: Window,
        modifiers: u16,
    },
    ChangeActivePointerGrab {
        cursor: Cursor,
        time: Timestamp,
        event_mask: u16,
    },
    GrabKeyboard(GrabKeyboardRequest),
    UngrabKeyboard {
        time: Timestamp,
    },
    GrabKey(GrabKeyRequest),
    UngrabKey {
        key: u8,
        grab_window: Window,
        modifiers: u16,
    },
    AllowEvents {
        mode: AllowMode,
        time: Timestamp,
    },
    GrabServer,
    UngrabServer,
    QueryPointer {
        window: Window,
    },
    SetInputFocus {
        revert_to: u8,
        focus: u32,
        time: Timestamp,
    },
    GetInputFocus,
    OpenFont {
        fid: ResourceId,
        name: Vec<u8>,
    },
    CloseFont {
        font: Font,
    },
    QueryFont {
        /// Font or GC id
        fontable: u32,
    },
    CreatePixmap {
        depth: u8,
        pid: ResourceId,
        drawable: Drawable,
        width: u16,
        height: u16,
    },
    FreePixmap {
        pixmap: Pixmap,
    },
    CreateGC {
        cid: ResourceId,
        drawable: Drawable,
        values: ValueList,
    },
    ChangeGC {
        gc: GContext,
        values: ValueList,
    },
    CopyGC {
        src: GContext,
        dst: GContext,
        mask: u32,
    },
    FreeGC {
        gc: GContext,
    },
    ClearArea {
        exposures: bool,
        window: Window,
    },
    /// CopyArea and CopyPlane
    CopyArea {
        opcode: u8,
        src: Drawable,
        dst: Drawable,
        gc: GContext,
    },
    /// Any drawing request that targets one drawable through one GC
    Draw {
        opcode: u8,
        drawable: Drawable,
        gc: GContext,
    },
    CreateColormap {
        alloc_all: bool,
        mid: ResourceId,
        window: Window,
        visual: VisualID,
    },
    FreeColormap {
        cmap: Colormap,
    },
    AllocColor {
        cmap: Colormap,
        color: Rgb,
    },
    AllocColorCells {
        contiguous: bool,
        cmap: Colormap,
        colors: u16,
        planes: u16,
    },
    FreeColors {
        cmap: Colormap,
        plane_mask: u32,
        pixels: Vec<u32>,
    },
    StoreColors {
        cmap: Colormap,
        items: Vec<ColorItem>,
    },
    QueryColors {
        cmap: Colormap,
        pixels: Vec<u32>,
    },
    CreateCursor {
        cid: ResourceId,
        source: Pixmap,
        mask: Pixmap,
        foreground: Rgb,
        background: Rgb,
        x: u16,
        y: u16,
    },
    CreateGlyphCursor {
        cid: ResourceId,
        source_font: Font,
        mask_font: Font,
        source_char: u16,
        mask_char: u16,
        foreground: Rgb,
        background: Rgb,
    },
    FreeCursor {
        cursor: Cursor,
    },
    QueryExtension {
        name: Vec<u8>,
    },
    ListExtensions,
    Bell {
        percent: i8,
    },
    KillClient {
        resource: u32,
    },
    NoOperation,
    BigReqEnable,
    XInput(XiRequest),
}

/// Bitmask-selected value list (window attributes, GC components)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueList {
    pub mask: u32,
    pub values: Vec<u32>,
}

impl ValueList {
    /// Read a value list whose mask has already been read. Bits outside
    /// `allowed` are a `Value` error naming the mask.
    pub fn read(reader: &mut RequestReader<'_>, mask: u32, allowed: u32) -> X11Result<Self> {
        if mask & !allowed != 0 {
            return Err(X11Error::bad_value(mask));
        }
        let values = reader.read_u32_list(mask.count_ones() as usize)?;
        Ok(ValueList { mask, values })
    }

    /// Value for `bit`, if present
    pub fn get(&self, bit: u32) -> Option<u32> {
        if self.mask & (1 << bit) == 0 {
            return None;
        }
        let index = (self.mask & ((1 << bit) - 1)).count_ones() as usize;
        self.values.get(index).copied()
    }

    /// Present (bit, value) pairs in ascending bit order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..32u32)
            .filter(move |bit| self.mask & (1 << bit) != 0)
            .zip(self.values.iter().copied())
    }
}

/// Window attribute value-list, validated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowValues {
    pub background_pixmap: Option<u32>,
    pub background_pixel: Option<u32>,
    pub border_pixmap: Option<u32>,
    pub border_pixel: Option<u32>,
    pub bit_gravity: Option<u8>,
    pub win_gravity: Option<u8>,
    pub backing_store: Option<u8>,
    pub backing_planes: Option<u32>,
    pub backing_pixel: Option<u32>,
    pub override_redirect: Option<bool>,
    pub save_under: Option<bool>,
    pub event_mask: Option<u32>,
    pub do_not_propagate_mask: Option<u32>,
    pub colormap: Option<Colormap>,
    pub cursor: Option<Cursor>,
}

impl WindowValues {
    const ALLOWED: u32 = (1 << 15) - 1;

    fn read(reader: &mut RequestReader<'_>) -> X11Result<Self> {
        let mask = reader.read_u32()?;
        let list = ValueList::read(reader, mask, Self::ALLOWED)?;
        let ranged = |bit: u32, max: u32| -> X11Result<Option<u8>> {
            match list.get(bit) {
                Some(v) if v > max => Err(X11Error::bad_value(v)),
                Some(v) => Ok(Some(v as u8)),
                None => Ok(None),
            }
        };
        let flag = |bit: u32| -> X11Result<Option<bool>> { Ok(ranged(bit, 1)?.map(|v| v != 0)) };

        let event_mask = match list.get(11) {
            Some(v) if v & !event_mask::ALL != 0 => return Err(X11Error::bad_value(v)),
            other => other,
        };
        let do_not_propagate_mask = match list.get(12) {
            Some(v) if v & !event_mask::PROPAGATABLE != 0 => return Err(X11Error::bad_value(v)),
            other => other,
        };

        Ok(WindowValues {
            background_pixmap: list.get(0),
            background_pixel: list.get(1),
            border_pixmap: list.get(2),
            border_pixel: list.get(3),
            bit_gravity: ranged(4, 10)?,
            win_gravity: ranged(5, 10)?,
            backing_store: ranged(6, 2)?,
            backing_planes: list.get(7),
            backing_pixel: list.get(8),
            override_redirect: flag(9)?,
            save_under: flag(10)?,
            event_mask,
            do_not_propagate_mask,
            colormap: list.get(13).map(Colormap::new),
            cursor: list.get(14).map(Cursor::new),
        })
    }
}

/// ConfigureWindow value-list, validated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureValues {
    pub mask: u16,
    pub x: Option<i16>,
    pub y: Option<i16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub border_width: Option<u16>,
    pub sibling: Option<Window>,
    pub stack_mode: Option<StackMode>,
}

impl ConfigureValues {
    pub const X: u16 = 1 << 0;
    pub const Y: u16 = 1 << 1;
    pub const WIDTH: u16 = 1 << 2;
    pub const HEIGHT: u16 = 1 << 3;
    pub const BORDER_WIDTH: u16 = 1 << 4;
    pub const SIBLING: u16 = 1 << 5;
    pub const STACK_MODE: u16 = 1 << 6;

    fn read(reader: &mut RequestReader<'_>) -> X11Result<Self> {
        let mask = reader.read_u16()?;
        reader.skip(2)?;
        let list = ValueList::read(reader, mask as u32, 0x7F)?;
        let dimension = |bit: u32| -> X11Result<Option<u16>> {
            match list.get(bit) {
                Some(0) => Err(X11Error::bad_value(0)),
                Some(v) => Ok(Some(v as u16)),
                None => Ok(None),
            }
        };
        let stack_mode = match list.get(6) {
            Some(v) => Some(StackMode::from_u8(v as u8).ok_or_else(|| X11Error::bad_value(v))?),
            None => None,
        };
        Ok(ConfigureValues {
            mask,
            x: list.get(0).map(|v| v as i16),
            y: list.get(1).map(|v| v as i16),
            width: dimension(2)?,
            height: dimension(3)?,
            border_width: list.get(4).map(|v| v as u16),
            sibling: list.get(5).map(Window::new),
            stack_mode,
        })
    }
}

/// Create window request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWindowRequest {
    pub depth: u8,
    pub wid: ResourceId,
    pub parent: Window,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub class: WindowClass,
    pub visual: VisualID,
    pub values: WindowValues,
}

/// ChangeProperty mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyMode {
    Replace = 0,
    Prepend = 1,
    Append = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePropertyRequest {
    pub mode: PropertyMode,
    pub window: Window,
    pub property: Atom,
    pub type_: Atom,
    pub format: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPropertyRequest {
    pub delete: bool,
    pub window: Window,
    pub property: Atom,
    pub type_: Atom,
    pub long_offset: u32,
    pub long_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertSelectionRequest {
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    pub property: Atom,
    pub time: Timestamp,
}

/// SendEvent destination: a window, or one of the two special values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDestination {
    PointerWindow,
    InputFocus,
    Window(Window),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEventRequest {
    pub propagate: bool,
    pub destination: SendDestination,
    pub event_mask: u32,
    pub event: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabPointerRequest {
    pub owner_events: bool,
    pub grab_window: Window,
    pub event_mask: u16,
    pub pointer_mode: GrabMode,
    pub keyboard_mode: GrabMode,
    pub confine_to: Window,
    pub cursor: Cursor,
    pub time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabButtonRequest {
    pub owner_events: bool,
    pub grab_window: Window,
    pub event_mask: u16,
    pub pointer_mode: GrabMode,
    pub keyboard_mode: GrabMode,
    pub confine_to: Window,
    pub cursor: Cursor,
    /// 0 is AnyButton
    pub button: u8,
    pub modifiers: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabKeyboardRequest {
    pub owner_events: bool,
    pub grab_window: Window,
    pub time: Timestamp,
    pub pointer_mode: GrabMode,
    pub keyboard_mode: GrabMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabKeyRequest {
    pub owner_events: bool,
    pub grab_window: Window,
    pub modifiers: u16,
    /// 0 is AnyKey
    pub key: u8,
    pub pointer_mode: GrabMode,
    pub keyboard_mode: GrabMode,
}

/// AllowEvents mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowMode {
    AsyncPointer = 0,
    SyncPointer = 1,
    ReplayPointer = 2,
    AsyncKeyboard = 3,
    SyncKeyboard = 4,
    ReplayKeyboard = 5,
    AsyncBoth = 6,
    SyncBoth = 7,
}

impl AllowMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AllowMode::AsyncPointer),
            1 => Some(AllowMode::SyncPointer),
            2 => Some(AllowMode::ReplayPointer),
            3 => Some(AllowMode::AsyncKeyboard),
            4 => Some(AllowMode::SyncKeyboard),
            5 => Some(AllowMode::ReplayKeyboard),
            6 => Some(AllowMode::AsyncBoth),
            7 => Some(AllowMode::SyncBoth),
            _ => None,
        }
    }
}

/// StoreColors entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorItem {
    pub pixel: u32,
    pub color: Rgb,
    /// DoRed 1, DoGreen 2, DoBlue 4
    pub flags: u8,
}

/// Request parser
pub struct ProtocolParser {
    byte_order: ByteOrder,
}

impl ProtocolParser {
    pub fn new(byte_order: ByteOrder) -> Self {
        ProtocolParser { byte_order }
    }

    /// Decode the body of a framed request.
    ///
    /// Opcodes this server does not implement, and unknown extension minor
    /// opcodes, are an `Implementation` error.
    pub fn parse(&self, header: &RequestHeader, body: &[u8]) -> X11Result<Request> {
        let mut r = RequestReader::new(body, self.byte_order);
        let detail = header.detail;

        if header.opcode == BIG_REQUESTS_MAJOR_OPCODE {
            return match detail {
                0 => Ok(Request::BigReqEnable),
                _ => Err(X11Error::implementation_error()),
            };
        }
        if header.opcode == XINPUT_MAJOR_OPCODE {
            return XiRequest::parse(detail, &mut r).map(Request::XInput);
        }

        let opcode = RequestOpcode::from_u8(header.opcode)
            .ok_or_else(X11Error::implementation_error)?;

        let request = match opcode {
            RequestOpcode::CreateWindow => self.parse_create_window(detail, &mut r)?,
            RequestOpcode::ChangeWindowAttributes => Request::ChangeWindowAttributes {
                window: r.read_window()?,
                values: WindowValues::read(&mut r)?,
            },
            RequestOpcode::GetWindowAttributes => Request::GetWindowAttributes {
                window: r.read_window()?,
            },
            RequestOpcode::DestroyWindow => Request::DestroyWindow {
                window: r.read_window()?,
            },
            RequestOpcode::DestroySubwindows => Request::DestroySubwindows {
                window: r.read_window()?,
            },
            RequestOpcode::ChangeSaveSet => Request::ChangeSaveSet {
                insert: match detail {
                    0 => true,
                    1 => false,
                    other => return Err(X11Error::bad_value(other as u32)),
                },
                window: r.read_window()?,
            },
            RequestOpcode::ReparentWindow => Request::ReparentWindow {
                window: r.read_window()?,
                parent: r.read_window()?,
                x: r.read_i16()?,
                y: r.read_i16()?,
            },
            RequestOpcode::MapWindow => Request::MapWindow {
                window: r.read_window()?,
            },
            RequestOpcode::MapSubwindows => Request::MapSubwindows {
                window: r.read_window()?,
            },
            RequestOpcode::UnmapWindow => Request::UnmapWindow {
                window: r.read_window()?,
            },
            RequestOpcode::UnmapSubwindows => Request::UnmapSubwindows {
                window: r.read_window()?,
            },
            RequestOpcode::ConfigureWindow => Request::ConfigureWindow {
                window: r.read_window()?,
                values: ConfigureValues::read(&mut r)?,
            },
            RequestOpcode::GetGeometry => Request::GetGeometry {
                drawable: r.read_drawable()?,
            },
            RequestOpcode::QueryTree => Request::QueryTree {
                window: r.read_window()?,
            },
            RequestOpcode::TranslateCoordinates => Request::TranslateCoordinates {
                src_window: r.read_window()?,
                dst_window: r.read_window()?,
                src_x: r.read_i16()?,
                src_y: r.read_i16()?,
            },
            RequestOpcode::InternAtom => {
                let len = r.read_u16()? as usize;
                r.skip(2)?;
                let name = r.read_bytes(len)?.to_vec();
                Request::InternAtom {
                    only_if_exists: detail != 0,
                    name,
                }
            }
            RequestOpcode::GetAtomName => Request::GetAtomName {
                atom: r.read_atom()?,
            },
            RequestOpcode::ChangeProperty => self.parse_change_property(detail, &mut r)?,
            RequestOpcode::DeleteProperty => Request::DeleteProperty {
                window: r.read_window()?,
                property: r.read_atom()?,
            },
            RequestOpcode::GetProperty => Request::GetProperty(GetPropertyRequest {
                delete: detail != 0,
                window: r.read_window()?,
                property: r.read_atom()?,
                type_: r.read_atom()?,
                long_offset: r.read_u32()?,
                long_length: r.read_u32()?,
            }),
            RequestOpcode::ListProperties => Request::ListProperties {
                window: r.read_window()?,
            },
            RequestOpcode::SetSelectionOwner => Request::SetSelectionOwner {
                owner: r.read_window()?,
                selection: r.read_atom()?,
                time: r.read_timestamp()?,
            },
            RequestOpcode::GetSelectionOwner => Request::GetSelectionOwner {
                selection: r.read_atom()?,
            },
            RequestOpcode::ConvertSelection => Request::ConvertSelection(ConvertSelectionRequest {
                requestor: r.read_window()?,
                selection: r.read_atom()?,
                target: r.read_atom()?,
                property: r.read_atom()?,
                time: r.read_timestamp()?,
            }),
            RequestOpcode::SendEvent => {
                let destination = match r.read_u32()? {
                    0 => SendDestination::PointerWindow,
                    1 => SendDestination::InputFocus,
                    xid => SendDestination::Window(Window::new(xid)),
                };
                let event_mask = r.read_u32()?;
                let mut event = [0u8; 32];
                event.copy_from_slice(r.read_bytes(32)?);
                Request::SendEvent(SendEventRequest {
                    propagate: detail != 0,
                    destination,
                    event_mask,
                    event,
                })
            }
            RequestOpcode::GrabPointer => {
                let grab_window = r.read_window()?;
                let event_mask = read_pointer_mask(&mut r)?;
                Request::GrabPointer(GrabPointerRequest {
                    owner_events: detail != 0,
                    grab_window,
                    event_mask,
                    pointer_mode: read_grab_mode(&mut r)?,
                    keyboard_mode: read_grab_mode(&mut r)?,
                    confine_to: r.read_window()?,
                    cursor: r.read_cursor()?,
                    time: r.read_timestamp()?,
                })
            }
            RequestOpcode::UngrabPointer => Request::UngrabPointer {
                time: r.read_timestamp()?,
            },
            RequestOpcode::GrabButton => {
                let grab_window = r.read_window()?;
                let event_mask = read_pointer_mask(&mut r)?;
                let pointer_mode = read_grab_mode(&mut r)?;
                let keyboard_mode = read_grab_mode(&mut r)?;
                let confine_to = r.read_window()?;
                let cursor = r.read_cursor()?;
                let button = r.read_u8()?;
                r.skip(1)?;
                let modifiers = read_modifiers(&mut r)?;
                Request::GrabButton(GrabButtonRequest {
                    owner_events: detail != 0,
                    grab_window,
                    event_mask,
                    pointer_mode,
                    keyboard_mode,
                    confine_to,
                    cursor,
                    button,
                    modifiers,
                })
            }
            RequestOpcode::UngrabButton => Request::UngrabButton {
                button: detail,
                grab_window: r.read_window()?,
                modifiers: read_modifiers(&mut r)?,
            },
            RequestOpcode::ChangeActivePointerGrab => {
                let cursor = r.read_cursor()?;
                let time = r.read_timestamp()?;
                Request::ChangeActivePointerGrab {
                    cursor,
                    time,
                    event_mask: read_pointer_mask(&mut r)?,
                }
            }
            RequestOpcode::GrabKeyboard => Request::GrabKeyboard(GrabKeyboardRequest {
                owner_events: detail != 0,
                grab_window: r.read_window()?,
                time: r.read_timestamp()?,
                pointer_mode: read_grab_mode(&mut r)?,
                keyboard_mode: read_grab_mode(&mut r)?,
            }),
            RequestOpcode::UngrabKeyboard => Request::UngrabKeyboard {
                time: r.read_timestamp()?,
            },
            RequestOpcode::GrabKey => {
                let grab_window = r.read_window()?;
                let modifiers = read_modifiers(&mut r)?;
                let key = r.read_u8()?;
                Request::GrabKey(GrabKeyRequest {
                    owner_events: detail != 0,
                    grab_window,
                    modifiers,
                    key,
                    pointer_mode: read_grab_mode(&mut r)?,
                    keyboard_mode: read_grab_mode(&mut r)?,
                })
            }
            RequestOpcode::UngrabKey => Request::UngrabKey {
                key: detail,
                grab_window: r.read_window()?,
                modifiers: read_modifiers(&mut r)?,
            },
            RequestOpcode::AllowEvents => Request::AllowEvents {
                mode: AllowMode::from_u8(detail)
                    .ok_or_else(|| X11Error::bad_value(detail as u32))?,
                time: r.read_timestamp()?,
            },
            RequestOpcode::GrabServer => Request::GrabServer,
            RequestOpcode::UngrabServer => Request::UngrabServer,
            RequestOpcode::QueryPointer => Request::QueryPointer {
                window: r.read_window()?,
            },
            RequestOpcode::SetInputFocus => {
                if detail > 2 {
                    return Err(X11Error::bad_value(detail as u32));
                }
                Request::SetInputFocus {
                    revert_to: detail,
                    focus: r.read_u32()?,
                    time: r.read_timestamp()?,
                }
            }
            RequestOpcode::GetInputFocus => Request::GetInputFocus,
            RequestOpcode::OpenFont => {
                let fid = r.read_new_id()?;
                let len = r.read_u16()? as usize;
                r.skip(2)?;
                let name = r.read_bytes(len)?.to_vec();
                Request::OpenFont { fid, name }
            }
            RequestOpcode::CloseFont => Request::CloseFont {
                font: r.read_font()?,
            },
            RequestOpcode::QueryFont => Request::QueryFont {
                fontable: r.read_u32()?,
            },
            RequestOpcode::CreatePixmap => {
                let pid = r.read_new_id()?;
                let drawable = r.read_drawable()?;
                let width = r.read_u16()?;
                let height = r.read_u16()?;
                if width == 0 || height == 0 {
                    return Err(X11Error::bad_value(0));
                }
                Request::CreatePixmap {
                    depth: detail,
                    pid,
                    drawable,
                    width,
                    height,
                }
            }
            RequestOpcode::FreePixmap => Request::FreePixmap {
                pixmap: r.read_pixmap()?,
            },
            RequestOpcode::CreateGC => {
                let cid = r.read_new_id()?;
                let drawable = r.read_drawable()?;
                let mask = r.read_u32()?;
                Request::CreateGC {
                    cid,
                    drawable,
                    values: ValueList::read(&mut r, mask, GC_VALUE_BITS)?,
                }
            }
            RequestOpcode::ChangeGC => {
                let gc = r.read_gcontext()?;
                let mask = r.read_u32()?;
                Request::ChangeGC {
                    gc,
                    values: ValueList::read(&mut r, mask, GC_VALUE_BITS)?,
                }
            }
            RequestOpcode::CopyGC => {
                let src = r.read_gcontext()?;
                let dst = r.read_gcontext()?;
                let mask = r.read_u32()?;
                if mask & !GC_VALUE_BITS != 0 {
                    return Err(X11Error::bad_value(mask));
                }
                Request::CopyGC { src, dst, mask }
            }
            RequestOpcode::FreeGC => Request::FreeGC {
                gc: r.read_gcontext()?,
            },
            RequestOpcode::ClearArea => Request::ClearArea {
                exposures: detail != 0,
                window: r.read_window()?,
            },
            RequestOpcode::CopyArea | RequestOpcode::CopyPlane => Request::CopyArea {
                opcode: header.opcode,
                src: r.read_drawable()?,
                dst: r.read_drawable()?,
                gc: r.read_gcontext()?,
            },
            op if op.is_drawing() => Request::Draw {
                opcode: header.opcode,
                drawable: r.read_drawable()?,
                gc: r.read_gcontext()?,
            },
            RequestOpcode::CreateColormap => {
                if detail > 1 {
                    return Err(X11Error::bad_value(detail as u32));
                }
                Request::CreateColormap {
                    alloc_all: detail == 1,
                    mid: r.read_new_id()?,
                    window: r.read_window()?,
                    visual: VisualID::new(r.read_u32()?),
                }
            }
            RequestOpcode::FreeColormap => Request::FreeColormap {
                cmap: r.read_colormap()?,
            },
            RequestOpcode::AllocColor => {
                let cmap = r.read_colormap()?;
                let color = read_rgb(&mut r)?;
                Request::AllocColor { cmap, color }
            }
            RequestOpcode::AllocColorCells => Request::AllocColorCells {
                contiguous: detail != 0,
                cmap: r.read_colormap()?,
                colors: r.read_u16()?,
                planes: r.read_u16()?,
            },
            RequestOpcode::FreeColors => {
                let cmap = r.read_colormap()?;
                let plane_mask = r.read_u32()?;
                let count = r.remaining_len() / 4;
                Request::FreeColors {
                    cmap,
                    plane_mask,
                    pixels: r.read_u32_list(count)?,
                }
            }
            RequestOpcode::StoreColors => {
                let cmap = r.read_colormap()?;
                let mut items = Vec::new();
                while r.remaining_len() >= 12 {
                    let pixel = r.read_u32()?;
                    let color = Rgb::new(r.read_u16()?, r.read_u16()?, r.read_u16()?);
                    let flags = r.read_u8()?;
                    r.skip(1)?;
                    items.push(ColorItem { pixel, color, flags });
                }
                Request::StoreColors { cmap, items }
            }
            RequestOpcode::QueryColors => {
                let cmap = r.read_colormap()?;
                let count = r.remaining_len() / 4;
                Request::QueryColors {
                    cmap,
                    pixels: r.read_u32_list(count)?,
                }
            }
            RequestOpcode::CreateCursor => {
                let cid = r.read_new_id()?;
                let source = r.read_pixmap()?;
                let mask = r.read_pixmap()?;
                let foreground = Rgb::new(r.read_u16()?, r.read_u16()?, r.read_u16()?);
                let background = Rgb::new(r.read_u16()?, r.read_u16()?, r.read_u16()?);
                Request::CreateCursor {
                    cid,
                    source,
                    mask,
                    foreground,
                    background,
                    x: r.read_u16()?,
                    y: r.read_u16()?,
                }
            }
            RequestOpcode::CreateGlyphCursor => {
                let cid = r.read_new_id()?;
                let source_font = r.read_font()?;
                let mask_font = r.read_font()?;
                let source_char = r.read_u16()?;
                let mask_char = r.read_u16()?;
                let foreground = Rgb::new(r.read_u16()?, r.read_u16()?, r.read_u16()?);
                let background = Rgb::new(r.read_u16()?, r.read_u16()?, r.read_u16()?);
                Request::CreateGlyphCursor {
                    cid,
                    source_font,
                    mask_font,
                    source_char,
                    mask_char,
                    foreground,
                    background,
                }
            }
            RequestOpcode::FreeCursor => Request::FreeCursor {
                cursor: r.read_cursor()?,
            },
            RequestOpcode::QueryExtension => {
                let len = r.read_u16()? as usize;
                r.skip(2)?;
                Request::QueryExtension {
                    name: r.read_bytes(len)?.to_vec(),
                }
            }
            RequestOpcode::ListExtensions => Request::ListExtensions,
            RequestOpcode::Bell => Request::Bell {
                percent: detail as i8,
            },
            RequestOpcode::KillClient => Request::KillClient {
                resource: r.read_u32()?,
            },
            RequestOpcode::NoOperation => Request::NoOperation,
            _ => return Err(X11Error::implementation_error()),
        };

        Ok(request)
    }

    fn parse_create_window(&self, depth: u8, r: &mut RequestReader<'_>) -> X11Result<Request> {
        let wid = r.read_new_id()?;
        let parent = r.read_window()?;
        let x = r.read_i16()?;
        let y = r.read_i16()?;
        let width = r.read_u16()?;
        let height = r.read_u16()?;
        let border_width = r.read_u16()?;
        let class_raw = r.read_u16()?;
        let class = WindowClass::from_u16(class_raw)
            .ok_or_else(|| X11Error::bad_value(class_raw as u32))?;
        let visual = VisualID::new(r.read_u32()?);
        let values = WindowValues::read(r)?;

        if width == 0 || height == 0 {
            return Err(X11Error::bad_value(0));
        }

        Ok(Request::CreateWindow(CreateWindowRequest {
            depth,
            wid,
            parent,
            x,
            y,
            width,
            height,
            border_width,
            class,
            visual,
            values,
        }))
    }

    fn parse_change_property(&self, mode: u8, r: &mut RequestReader<'_>) -> X11Result<Request> {
        let mode = match mode {
            0 => PropertyMode::Replace,
            1 => PropertyMode::Prepend,
            2 => PropertyMode::Append,
            other => return Err(X11Error::bad_value(other as u32)),
        };
        let window = r.read_window()?;
        let property = r.read_atom()?;
        let type_ = r.read_atom()?;
        let format = r.read_u8()?;
        r.skip(3)?;
        let units = r.read_u32()? as usize;

        let unit_size = match format {
            8 => 1,
            16 => 2,
            32 => 4,
            other => return Err(X11Error::bad_value(other as u32)),
        };
        let len = units.checked_mul(unit_size).ok_or_else(X11Error::bad_length)?;
        let data = r.read_bytes(len)?.to_vec();

        Ok(Request::ChangeProperty(ChangePropertyRequest {
            mode,
            window,
            property,
            type_,
            format,
            data,
        }))
    }
}

/// All 23 GC component bits
pub const GC_VALUE_BITS: u32 = (1 << 23) - 1;

fn read_grab_mode(r: &mut RequestReader<'_>) -> X11Result<GrabMode> {
    let raw = r.read_u8()?;
    GrabMode::from_u8(raw).ok_or_else(|| X11Error::bad_value(raw as u32))
}

fn read_pointer_mask(r: &mut RequestReader<'_>) -> X11Result<u16> {
    let mask = r.read_u16()?;
    if mask as u32 & !event_mask::POINTER_GRAB != 0 {
        return Err(X11Error::bad_value(mask as u32));
    }
    Ok(mask)
}

/// Modifier sets are either AnyModifier or a subset of the eight modifiers.
fn read_modifiers(r: &mut RequestReader<'_>) -> X11Result<u16> {
    let modifiers = r.read_u16()?;
    if modifiers != modifier_mask::ANY_MODIFIER && modifiers & !modifier_mask::KEY_MASK != 0 {
        return Err(X11Error::bad_value(modifiers as u32));
    }
    Ok(modifiers)
}

fn read_rgb(r: &mut RequestReader<'_>) -> X11Result<Rgb> {
    let color = Rgb::new(r.read_u16()?, r.read_u16()?, r.read_u16()?);
    r.skip(2)?;
    Ok(color)
}
