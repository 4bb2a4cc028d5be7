//! Core X11 protocol types
//!
//! Resource ids are composite: the upper bits of a wire XID name the client
//! that allocated it and the lower bits are local to that client. Tables key
//! on the decomposed [`ResourceId`] so that "everything owned by client N" is
//! a direct query.

use std::fmt;

/// Connection identifier. Client 0 is the server itself (root window,
/// default colormap).
pub type ClientId = u32;

/// Owner of server-created resources.
pub const SERVER_CLIENT: ClientId = 0;

/// Number of low XID bits local to a client.
pub const CLIENT_ID_SHIFT: u32 = 21;

/// Mask handed to clients in the setup reply.
pub const RESOURCE_ID_MASK: u32 = (1 << CLIENT_ID_SHIFT) - 1;

/// Highest client number that fits in a 29-bit XID.
pub const MAX_CLIENTS: ClientId = (1 << (29 - CLIENT_ID_SHIFT)) - 1;

/// Composite resource id: owning client plus client-local number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub client: ClientId,
    pub local: u32,
}

impl ResourceId {
    pub const NONE: ResourceId = ResourceId {
        client: 0,
        local: 0,
    };

    pub fn new(client: ClientId, local: u32) -> Self {
        ResourceId {
            client,
            local: local & RESOURCE_ID_MASK,
        }
    }

    pub fn from_xid(xid: u32) -> Self {
        ResourceId {
            client: (xid >> CLIENT_ID_SHIFT) & MAX_CLIENTS,
            local: xid & RESOURCE_ID_MASK,
        }
    }

    pub fn xid(&self) -> u32 {
        (self.client << CLIENT_ID_SHIFT) | self.local
    }

    pub fn is_none(&self) -> bool {
        *self == ResourceId::NONE
    }

    /// True when the wire value has any of the three reserved top bits set.
    pub fn is_reserved_xid(xid: u32) -> bool {
        xid & 0xE000_0000 != 0
    }

    /// First XID of a client's range, as advertised in the setup reply.
    pub fn base_for(client: ClientId) -> u32 {
        client << CLIENT_ID_SHIFT
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.xid())
    }
}

macro_rules! resource_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub ResourceId);

        impl $name {
            pub const NONE: $name = $name(ResourceId::NONE);

            pub fn new(xid: u32) -> Self {
                $name(ResourceId::from_xid(xid))
            }

            pub fn id(&self) -> ResourceId {
                self.0
            }

            pub fn xid(&self) -> u32 {
                self.0.xid()
            }

            pub fn owner(&self) -> ClientId {
                self.0.client
            }

            pub fn is_none(&self) -> bool {
                self.0.is_none()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

resource_newtype!(
    /// Window ID
    Window
);
resource_newtype!(
    /// Pixmap ID
    Pixmap
);
resource_newtype!(
    /// Window or pixmap, resolved against the registry when used
    Drawable
);
resource_newtype!(
    /// Graphics Context ID
    GContext
);
resource_newtype!(
    /// Colormap ID
    Colormap
);
resource_newtype!(
    /// Cursor ID
    Cursor
);
resource_newtype!(
    /// Font ID
    Font
);

impl From<Window> for Drawable {
    fn from(window: Window) -> Self {
        Drawable(window.0)
    }
}

impl From<Pixmap> for Drawable {
    fn from(pixmap: Pixmap) -> Self {
        Drawable(pixmap.0)
    }
}

/// Atom - interned string identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(pub u32);

impl Atom {
    pub const NONE: Atom = Atom(0);
    pub const PRIMARY: Atom = Atom(1);
    pub const SECONDARY: Atom = Atom(2);
    pub const ARC: Atom = Atom(3);
    pub const ATOM: Atom = Atom(4);
    pub const BITMAP: Atom = Atom(5);
    pub const CARDINAL: Atom = Atom(6);
    pub const COLORMAP: Atom = Atom(7);
    pub const CURSOR: Atom = Atom(8);
    pub const CUT_BUFFER0: Atom = Atom(9);
    pub const CUT_BUFFER1: Atom = Atom(10);
    pub const CUT_BUFFER2: Atom = Atom(11);
    pub const CUT_BUFFER3: Atom = Atom(12);
    pub const CUT_BUFFER4: Atom = Atom(13);
    pub const CUT_BUFFER5: Atom = Atom(14);
    pub const CUT_BUFFER6: Atom = Atom(15);
    pub const CUT_BUFFER7: Atom = Atom(16);
    pub const DRAWABLE: Atom = Atom(17);
    pub const FONT: Atom = Atom(18);
    pub const INTEGER: Atom = Atom(19);
    pub const PIXMAP: Atom = Atom(20);
    pub const POINT: Atom = Atom(21);
    pub const RECTANGLE: Atom = Atom(22);
    pub const RESOURCE_MANAGER: Atom = Atom(23);
    pub const RGB_COLOR_MAP: Atom = Atom(24);
    pub const RGB_BEST_MAP: Atom = Atom(25);
    pub const RGB_BLUE_MAP: Atom = Atom(26);
    pub const RGB_DEFAULT_MAP: Atom = Atom(27);
    pub const RGB_GRAY_MAP: Atom = Atom(28);
    pub const RGB_GREEN_MAP: Atom = Atom(29);
    pub const RGB_RED_MAP: Atom = Atom(30);
    pub const STRING: Atom = Atom(31);
    pub const VISUALID: Atom = Atom(32);
    pub const WINDOW: Atom = Atom(33);
    pub const WM_COMMAND: Atom = Atom(34);
    pub const WM_HINTS: Atom = Atom(35);
    pub const WM_CLIENT_MACHINE: Atom = Atom(36);
    pub const WM_ICON_NAME: Atom = Atom(37);
    pub const WM_ICON_SIZE: Atom = Atom(38);
    pub const WM_NAME: Atom = Atom(39);
    pub const WM_NORMAL_HINTS: Atom = Atom(40);
    pub const WM_SIZE_HINTS: Atom = Atom(41);
    pub const WM_ZOOM_HINTS: Atom = Atom(42);
    pub const MIN_SPACE: Atom = Atom(43);
    pub const NORM_SPACE: Atom = Atom(44);
    pub const MAX_SPACE: Atom = Atom(45);
    pub const END_SPACE: Atom = Atom(46);
    pub const SUPERSCRIPT_X: Atom = Atom(47);
    pub const SUPERSCRIPT_Y: Atom = Atom(48);
    pub const SUBSCRIPT_X: Atom = Atom(49);
    pub const SUBSCRIPT_Y: Atom = Atom(50);
    pub const UNDERLINE_POSITION: Atom = Atom(51);
    pub const UNDERLINE_THICKNESS: Atom = Atom(52);
    pub const STRIKEOUT_ASCENT: Atom = Atom(53);
    pub const STRIKEOUT_DESCENT: Atom = Atom(54);
    pub const ITALIC_ANGLE: Atom = Atom(55);
    pub const X_HEIGHT: Atom = Atom(56);
    pub const QUAD_WIDTH: Atom = Atom(57);
    pub const WEIGHT: Atom = Atom(58);
    pub const POINT_SIZE: Atom = Atom(59);
    pub const RESOLUTION: Atom = Atom(60);
    pub const COPYRIGHT: Atom = Atom(61);
    pub const NOTICE: Atom = Atom(62);
    pub const FONT_NAME: Atom = Atom(63);
    pub const FAMILY_NAME: Atom = Atom(64);
    pub const FULL_NAME: Atom = Atom(65);
    pub const CAP_HEIGHT: Atom = Atom(66);
    pub const WM_CLASS: Atom = Atom(67);
    pub const WM_TRANSIENT_FOR: Atom = Atom(68);

    /// Wildcard type for GetProperty
    pub const ANY_PROPERTY_TYPE: Atom = Atom(0);

    /// First user-defined atom ID
    pub const FIRST_USER_ATOM: u32 = 69;

    pub fn new(id: u32) -> Self {
        Atom(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Visual ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualID(pub u32);

impl VisualID {
    pub const COPY_FROM_PARENT: VisualID = VisualID(0);

    pub fn new(id: u32) -> Self {
        VisualID(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Timestamp (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u32);

impl Timestamp {
    pub const CURRENT_TIME: Timestamp = Timestamp(0);

    pub fn new(ms: u32) -> Self {
        Timestamp(ms)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_current(&self) -> bool {
        self.0 == 0
    }

    /// Resolve `CurrentTime` against the server clock.
    pub fn or_now(self, now: Timestamp) -> Timestamp {
        if self.is_current() {
            now
        } else {
            self
        }
    }
}

/// Window class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClass {
    CopyFromParent = 0,
    InputOutput = 1,
    InputOnly = 2,
}

impl WindowClass {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(WindowClass::CopyFromParent),
            1 => Some(WindowClass::InputOutput),
            2 => Some(WindowClass::InputOnly),
            _ => None,
        }
    }
}

/// Map state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    Unmapped = 0,
    Unviewable = 1,
    Viewable = 2,
}

/// Stack mode for ConfigureWindow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMode {
    Above = 0,
    Below = 1,
    TopIf = 2,
    BottomIf = 3,
    Opposite = 4,
}

impl StackMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StackMode::Above),
            1 => Some(StackMode::Below),
            2 => Some(StackMode::TopIf),
            3 => Some(StackMode::BottomIf),
            4 => Some(StackMode::Opposite),
            _ => None,
        }
    }
}

/// Grab mode for pointer and keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabMode {
    Synchronous = 0,
    Asynchronous = 1,
}

impl GrabMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(GrabMode::Synchronous),
            1 => Some(GrabMode::Asynchronous),
            _ => None,
        }
    }
}

/// Reply status of grab requests. A failed grab is a defined outcome, not
/// a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStatus {
    Success = 0,
    AlreadyGrabbed = 1,
    InvalidTime = 2,
    NotViewable = 3,
    Frozen = 4,
}

/// Event masks
pub mod event_mask {
    pub const NO_EVENT: u32 = 0;
    pub const KEY_PRESS: u32 = 1 << 0;
    pub const KEY_RELEASE: u32 = 1 << 1;
    pub const BUTTON_PRESS: u32 = 1 << 2;
    pub const BUTTON_RELEASE: u32 = 1 << 3;
    pub const ENTER_WINDOW: u32 = 1 << 4;
    pub const LEAVE_WINDOW: u32 = 1 << 5;
    pub const POINTER_MOTION: u32 = 1 << 6;
    pub const POINTER_MOTION_HINT: u32 = 1 << 7;
    pub const BUTTON1_MOTION: u32 = 1 << 8;
    pub const BUTTON2_MOTION: u32 = 1 << 9;
    pub const BUTTON3_MOTION: u32 = 1 << 10;
    pub const BUTTON4_MOTION: u32 = 1 << 11;
    pub const BUTTON5_MOTION: u32 = 1 << 12;
    pub const BUTTON_MOTION: u32 = 1 << 13;
    pub const KEYMAP_STATE: u32 = 1 << 14;
    pub const EXPOSURE: u32 = 1 << 15;
    pub const VISIBILITY_CHANGE: u32 = 1 << 16;
    pub const STRUCTURE_NOTIFY: u32 = 1 << 17;
    pub const RESIZE_REDIRECT: u32 = 1 << 18;
    pub const SUBSTRUCTURE_NOTIFY: u32 = 1 << 19;
    pub const SUBSTRUCTURE_REDIRECT: u32 = 1 << 20;
    pub const FOCUS_CHANGE: u32 = 1 << 21;
    pub const PROPERTY_CHANGE: u32 = 1 << 22;
    pub const COLORMAP_CHANGE: u32 = 1 << 23;
    pub const OWNER_GRAB_BUTTON: u32 = 1 << 24;

    /// Every bit a client may select.
    pub const ALL: u32 = (1 << 25) - 1;

    /// Bits that may appear in a do-not-propagate mask.
    pub const PROPAGATABLE: u32 = KEY_PRESS
        | KEY_RELEASE
        | BUTTON_PRESS
        | BUTTON_RELEASE
        | POINTER_MOTION
        | BUTTON1_MOTION
        | BUTTON2_MOTION
        | BUTTON3_MOTION
        | BUTTON4_MOTION
        | BUTTON5_MOTION
        | BUTTON_MOTION;

    /// Bits allowed in a pointer grab event mask.
    pub const POINTER_GRAB: u32 = BUTTON_PRESS
        | BUTTON_RELEASE
        | ENTER_WINDOW
        | LEAVE_WINDOW
        | POINTER_MOTION
        | POINTER_MOTION_HINT
        | BUTTON1_MOTION
        | BUTTON2_MOTION
        | BUTTON3_MOTION
        | BUTTON4_MOTION
        | BUTTON5_MOTION
        | BUTTON_MOTION
        | KEYMAP_STATE;

    /// Motion bit for a held button (1-based).
    pub fn button_motion(button: u8) -> u32 {
        match button {
            1..=5 => BUTTON1_MOTION << (button - 1),
            _ => 0,
        }
    }
}

/// Keyboard/pointer modifier masks
pub mod modifier_mask {
    pub const SHIFT: u16 = 1 << 0;
    pub const LOCK: u16 = 1 << 1;
    pub const CONTROL: u16 = 1 << 2;
    pub const MOD1: u16 = 1 << 3;
    pub const MOD2: u16 = 1 << 4;
    pub const MOD3: u16 = 1 << 5;
    pub const MOD4: u16 = 1 << 6;
    pub const MOD5: u16 = 1 << 7;
    pub const BUTTON1: u16 = 1 << 8;
    pub const BUTTON2: u16 = 1 << 9;
    pub const BUTTON3: u16 = 1 << 10;
    pub const BUTTON4: u16 = 1 << 11;
    pub const BUTTON5: u16 = 1 << 12;
    pub const ANY_MODIFIER: u16 = 1 << 15;

    /// Keyboard modifiers only, without button state.
    pub const KEY_MASK: u16 = 0x00FF;

    /// State bit for a held button (1-based).
    pub fn button(button: u8) -> u16 {
        match button {
            1..=5 => BUTTON1 << (button - 1),
            _ => 0,
        }
    }
}

/// Byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LSBFirst = 0,
    MSBFirst = 1,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LSBFirst
        } else {
            ByteOrder::MSBFirst
        }
    }

    /// Decode the byte-order byte that opens a connection setup.
    pub fn from_setup_byte(byte: u8) -> Option<Self> {
        match byte {
            b'B' => Some(ByteOrder::MSBFirst),
            b'l' => Some(ByteOrder::LSBFirst),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_split() {
        let id = ResourceId::from_xid(0x0060_0001);
        assert_eq!(id.client, 3);
        assert_eq!(id.local, 1);
        assert_eq!(id.xid(), 0x0060_0001);
    }

    #[test]
    fn test_same_local_id_different_clients() {
        let a = Window(ResourceId::new(1, 0x10));
        let b = Window(ResourceId::new(2, 0x10));
        assert_ne!(a, b);
        assert_eq!(a.id().local, b.id().local);
        assert_eq!(ResourceId::base_for(2) | 0x10, b.xid());
    }

    #[test]
    fn test_reserved_bits() {
        assert!(ResourceId::is_reserved_xid(0x2000_0000));
        assert!(!ResourceId::is_reserved_xid(0x1FFF_FFFF));
    }

    #[test]
    fn test_button_masks() {
        assert_eq!(event_mask::button_motion(1), event_mask::BUTTON1_MOTION);
        assert_eq!(event_mask::button_motion(5), event_mask::BUTTON5_MOTION);
        assert_eq!(modifier_mask::button(3), modifier_mask::BUTTON3);
        assert_eq!(modifier_mask::button(9), 0);
    }
}
