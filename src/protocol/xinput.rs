//! XInputExtension wire shapes
//!
//! Both the 1.x request set (device handles, event classes) and the XI2
//! subset (per-device event masks, GenericEvent device events) share one
//! major opcode. Minor opcodes outside the handled set are rejected by the
//! parser with `Implementation`.

use super::encoder::WireWriter;
use super::events::{write_input_event, EventType, InputEventData};
use super::parser::XINPUT_MAJOR_OPCODE;
use super::*;

/// First event code allocated to the extension
pub const XINPUT_FIRST_EVENT: u8 = 66;

/// First error code allocated to the extension
pub const XINPUT_FIRST_ERROR: u8 = 129;

/// Version reported by GetExtensionVersion
pub const XI_MAJOR_VERSION: u16 = 1;
pub const XI_MINOR_VERSION: u16 = 5;

/// Highest XI2 version implemented
pub const XI2_MAJOR_VERSION: u16 = 2;
pub const XI2_MINOR_VERSION: u16 = 0;

/// Extension errors, relative to [`XINPUT_FIRST_ERROR`]
pub mod xi_error {
    pub const BAD_DEVICE: u8 = 0;
    pub const BAD_EVENT: u8 = 1;
    pub const BAD_MODE: u8 = 2;
    pub const DEVICE_BUSY: u8 = 3;
    pub const BAD_CLASS: u8 = 4;
}

/// Build an extension error from its offset
pub fn xi_error(offset: u8, bad_value: u32) -> X11Error {
    X11Error::extension(XINPUT_FIRST_ERROR + offset, bad_value)
}

/// XI 1.x event types, relative to [`XINPUT_FIRST_EVENT`]
pub mod xi_event {
    pub const DEVICE_VALUATOR: u8 = 0;
    pub const DEVICE_KEY_PRESS: u8 = 1;
    pub const DEVICE_KEY_RELEASE: u8 = 2;
    pub const DEVICE_BUTTON_PRESS: u8 = 3;
    pub const DEVICE_BUTTON_RELEASE: u8 = 4;
    pub const DEVICE_MOTION_NOTIFY: u8 = 5;
}

/// XI2 event types and mask helpers
pub mod xi2 {
    pub const KEY_PRESS: u16 = 2;
    pub const KEY_RELEASE: u16 = 3;
    pub const BUTTON_PRESS: u16 = 4;
    pub const BUTTON_RELEASE: u16 = 5;
    pub const MOTION: u16 = 6;

    /// Pseudo device ids
    pub const ALL_DEVICES: u16 = 0;
    pub const ALL_MASTER_DEVICES: u16 = 1;

    /// Passive grab types
    pub const GRAB_TYPE_BUTTON: u8 = 0;
    pub const GRAB_TYPE_KEYCODE: u8 = 1;

    /// Passive grab modifier wildcard
    pub const ANY_MODIFIER: u32 = 1 << 31;
    /// Passive grab detail wildcard
    pub const ANY_DETAIL: u32 = 0;

    pub fn mask_bit(evtype: u16) -> u32 {
        if evtype < 32 {
            1 << evtype
        } else {
            0
        }
    }

    /// Bits a client may select
    pub const SELECTABLE: u32 =
        (1 << KEY_PRESS) | (1 << KEY_RELEASE) | (1 << BUTTON_PRESS) | (1 << BUTTON_RELEASE) | (1 << MOTION);
}

/// XI 1.x event class: device in the high byte, absolute event type low.
pub fn event_class(device: u8, offset: u8) -> u32 {
    ((device as u32) << 8) | (XINPUT_FIRST_EVENT + offset) as u32
}

/// Split an event class into (device, offset). Types outside the
/// extension's range yield `None`.
pub fn split_event_class(class: u32) -> Option<(u8, u8)> {
    let device = ((class >> 8) & 0xFF) as u8;
    let ty = (class & 0xFF) as u8;
    let offset = ty.checked_sub(XINPUT_FIRST_EVENT)?;
    if offset > xi_event::DEVICE_MOTION_NOTIFY {
        return None;
    }
    Some((device, offset))
}

/// Device role as reported by ListInputDevices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceUse {
    Pointer = 0,
    Keyboard = 1,
    ExtensionDevice = 2,
}

impl DeviceUse {
    /// XI2 `use` field
    pub fn xi2(&self) -> u16 {
        match self {
            DeviceUse::Pointer => 1,
            DeviceUse::Keyboard => 2,
            DeviceUse::ExtensionDevice => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisInfo {
    pub resolution: u32,
    pub min_value: i32,
    pub max_value: i32,
}

/// Input class of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceClass {
    Key {
        min_keycode: u8,
        max_keycode: u8,
    },
    Button {
        num_buttons: u16,
    },
    Valuator {
        /// 0 relative, 1 absolute
        mode: u8,
        motion_size: u32,
        axes: Vec<AxisInfo>,
    },
}

impl DeviceClass {
    /// Class id on the wire
    pub fn id(&self) -> u8 {
        match self {
            DeviceClass::Key { .. } => 0,
            DeviceClass::Button { .. } => 1,
            DeviceClass::Valuator { .. } => 2,
        }
    }

    /// First event type a client selects for this class after OpenDevice
    pub fn event_type_base(&self) -> u8 {
        XINPUT_FIRST_EVENT
            + match self {
                DeviceClass::Key { .. } => xi_event::DEVICE_KEY_PRESS,
                DeviceClass::Button { .. } => xi_event::DEVICE_BUTTON_PRESS,
                DeviceClass::Valuator { .. } => xi_event::DEVICE_MOTION_NOTIFY,
            }
    }

    /// Event offsets this class can generate
    pub fn event_offsets(&self) -> &'static [u8] {
        match self {
            DeviceClass::Key { .. } => &[xi_event::DEVICE_KEY_PRESS, xi_event::DEVICE_KEY_RELEASE],
            DeviceClass::Button { .. } => {
                &[xi_event::DEVICE_BUTTON_PRESS, xi_event::DEVICE_BUTTON_RELEASE]
            }
            DeviceClass::Valuator { .. } => &[xi_event::DEVICE_MOTION_NOTIFY],
        }
    }
}

/// Description of one input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: u8,
    pub name: String,
    pub device_use: DeviceUse,
    /// Type atom (0 when the host does not name one)
    pub type_atom: Atom,
    pub classes: Vec<DeviceClass>,
}

impl DeviceInfo {
    pub fn num_buttons(&self) -> u16 {
        self.classes
            .iter()
            .find_map(|c| match c {
                DeviceClass::Button { num_buttons } => Some(*num_buttons),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn axes(&self) -> &[AxisInfo] {
        self.classes
            .iter()
            .find_map(|c| match c {
                DeviceClass::Valuator { axes, .. } => Some(axes.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn has_class(&self, class_id: u8) -> bool {
        self.classes.iter().any(|c| c.id() == class_id)
    }
}

/// Feedback control change carried by ChangeFeedbackControl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackChange {
    Keyboard {
        click: i8,
        percent: i8,
        pitch: i16,
        duration: i16,
        led_mask: u32,
        led_values: u32,
    },
    Pointer {
        numerator: i16,
        denominator: i16,
        threshold: i16,
    },
}

/// Feedback state as reported by GetFeedbackControl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackState {
    Keyboard {
        id: u8,
        click: u8,
        percent: u8,
        pitch: u16,
        duration: u16,
        led_mask: u32,
        led_values: u32,
    },
    Pointer {
        id: u8,
        numerator: u16,
        denominator: u16,
        threshold: u16,
    },
}

/// Per-class state reported by QueryDeviceState
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputState {
    Key { num_keys: u8, keys: [u8; 32] },
    Button { num_buttons: u8, buttons: [u8; 32] },
    Valuator { mode: u8, values: Vec<i32> },
}

/// XI2 event mask for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xi2Mask {
    pub device: u16,
    pub mask: u32,
}

/// ChangeDeviceControl DEVICE_RESOLUTION
pub const DEVICE_RESOLUTION: u16 = 1;

/// AllowDeviceEvents and XIAllowEvents mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAllowMode {
    Async,
    Sync,
    Replay,
}

impl DeviceAllowMode {
    /// Modes acting on the paired/other devices are treated as acting on
    /// the named device, as each device here is its own pair.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 | 3 | 4 => Some(DeviceAllowMode::Async),
            1 | 5 => Some(DeviceAllowMode::Sync),
            2 => Some(DeviceAllowMode::Replay),
            _ => None,
        }
    }
}

/// Parsed XInputExtension request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XiRequest {
    GetExtensionVersion {
        name: Vec<u8>,
    },
    ListInputDevices,
    OpenDevice {
        device: u8,
    },
    CloseDevice {
        device: u8,
    },
    SetDeviceMode {
        device: u8,
        mode: u8,
    },
    SelectExtensionEvent {
        window: Window,
        classes: Vec<u32>,
    },
    GetSelectedExtensionEvents {
        window: Window,
    },
    GrabDevice {
        grab_window: Window,
        time: Timestamp,
        classes: Vec<u32>,
        this_device_mode: GrabMode,
        other_device_mode: GrabMode,
        owner_events: bool,
        device: u8,
    },
    UngrabDevice {
        time: Timestamp,
        device: u8,
    },
    GrabDeviceKey {
        grab_window: Window,
        classes: Vec<u32>,
        modifiers: u16,
        modifier_device: u8,
        device: u8,
        key: u8,
        this_device_mode: GrabMode,
        other_device_mode: GrabMode,
        owner_events: bool,
    },
    UngrabDeviceKey {
        grab_window: Window,
        modifiers: u16,
        modifier_device: u8,
        key: u8,
        device: u8,
    },
    GrabDeviceButton {
        grab_window: Window,
        device: u8,
        modifier_device: u8,
        classes: Vec<u32>,
        modifiers: u16,
        this_device_mode: GrabMode,
        other_device_mode: GrabMode,
        button: u8,
        owner_events: bool,
    },
    UngrabDeviceButton {
        grab_window: Window,
        modifiers: u16,
        modifier_device: u8,
        button: u8,
        device: u8,
    },
    AllowDeviceEvents {
        time: Timestamp,
        mode: DeviceAllowMode,
        device: u8,
    },
    GetDeviceFocus {
        device: u8,
    },
    SetDeviceFocus {
        focus: u32,
        time: Timestamp,
        revert_to: u8,
        device: u8,
    },
    GetFeedbackControl {
        device: u8,
    },
    ChangeFeedbackControl {
        device: u8,
        feedback_id: u8,
        mask: u32,
        change: FeedbackChange,
    },
    GetDeviceButtonMapping {
        device: u8,
    },
    SetDeviceButtonMapping {
        device: u8,
        map: Vec<u8>,
    },
    QueryDeviceState {
        device: u8,
    },
    SetDeviceValuators {
        device: u8,
        first_valuator: u8,
        values: Vec<i32>,
    },
    GetDeviceControl {
        device: u8,
        control: u16,
    },
    ChangeDeviceControl {
        device: u8,
        first_valuator: u8,
        resolutions: Vec<u32>,
    },
    XiSelectEvents {
        window: Window,
        masks: Vec<Xi2Mask>,
    },
    XiQueryVersion {
        major: u16,
        minor: u16,
    },
    XiQueryDevice {
        device: u16,
    },
    XiGrabDevice {
        grab_window: Window,
        time: Timestamp,
        cursor: Cursor,
        device: u16,
        mode: GrabMode,
        paired_device_mode: GrabMode,
        owner_events: bool,
        mask: u32,
    },
    XiUngrabDevice {
        time: Timestamp,
        device: u16,
    },
    XiAllowEvents {
        time: Timestamp,
        device: u16,
        mode: DeviceAllowMode,
    },
    XiPassiveGrabDevice {
        time: Timestamp,
        grab_window: Window,
        cursor: Cursor,
        detail: u32,
        device: u16,
        grab_type: u8,
        grab_mode: GrabMode,
        paired_device_mode: GrabMode,
        owner_events: bool,
        mask: u32,
        modifiers: Vec<u32>,
    },
    XiPassiveUngrabDevice {
        grab_window: Window,
        detail: u32,
        device: u16,
        grab_type: u8,
        modifiers: Vec<u32>,
    },
    XiGetSelectedEvents {
        window: Window,
    },
}

impl XiRequest {
    pub fn parse(minor: u8, r: &mut RequestReader<'_>) -> X11Result<Self> {
        let request = match minor {
            1 => {
                let len = r.read_u16()? as usize;
                r.skip(2)?;
                XiRequest::GetExtensionVersion {
                    name: r.read_bytes(len)?.to_vec(),
                }
            }
            2 => XiRequest::ListInputDevices,
            3 => XiRequest::OpenDevice {
                device: r.read_u8()?,
            },
            4 => XiRequest::CloseDevice {
                device: r.read_u8()?,
            },
            5 => XiRequest::SetDeviceMode {
                device: r.read_u8()?,
                mode: r.read_u8()?,
            },
            6 => {
                let window = r.read_window()?;
                let count = r.read_u16()? as usize;
                r.skip(2)?;
                XiRequest::SelectExtensionEvent {
                    window,
                    classes: r.read_u32_list(count)?,
                }
            }
            7 => XiRequest::GetSelectedExtensionEvents {
                window: r.read_window()?,
            },
            13 => {
                let grab_window = r.read_window()?;
                let time = r.read_timestamp()?;
                let count = r.read_u16()? as usize;
                let this_device_mode = read_mode(r)?;
                let other_device_mode = read_mode(r)?;
                let owner_events = r.read_bool()?;
                let device = r.read_u8()?;
                r.skip(2)?;
                XiRequest::GrabDevice {
                    grab_window,
                    time,
                    classes: r.read_u32_list(count)?,
                    this_device_mode,
                    other_device_mode,
                    owner_events,
                    device,
                }
            }
            14 => XiRequest::UngrabDevice {
                time: r.read_timestamp()?,
                device: r.read_u8()?,
            },
            15 => {
                let grab_window = r.read_window()?;
                let count = r.read_u16()? as usize;
                let modifiers = r.read_u16()?;
                let modifier_device = r.read_u8()?;
                let device = r.read_u8()?;
                let key = r.read_u8()?;
                let this_device_mode = read_mode(r)?;
                let other_device_mode = read_mode(r)?;
                let owner_events = r.read_bool()?;
                r.skip(2)?;
                XiRequest::GrabDeviceKey {
                    grab_window,
                    classes: r.read_u32_list(count)?,
                    modifiers,
                    modifier_device,
                    device,
                    key,
                    this_device_mode,
                    other_device_mode,
                    owner_events,
                }
            }
            16 => XiRequest::UngrabDeviceKey {
                grab_window: r.read_window()?,
                modifiers: r.read_u16()?,
                modifier_device: r.read_u8()?,
                key: r.read_u8()?,
                device: r.read_u8()?,
            },
            17 => {
                let grab_window = r.read_window()?;
                let device = r.read_u8()?;
                let modifier_device = r.read_u8()?;
                let count = r.read_u16()? as usize;
                let modifiers = r.read_u16()?;
                let this_device_mode = read_mode(r)?;
                let other_device_mode = read_mode(r)?;
                let button = r.read_u8()?;
                let owner_events = r.read_bool()?;
                r.skip(2)?;
                XiRequest::GrabDeviceButton {
                    grab_window,
                    device,
                    modifier_device,
                    classes: r.read_u32_list(count)?,
                    modifiers,
                    this_device_mode,
                    other_device_mode,
                    button,
                    owner_events,
                }
            }
            18 => XiRequest::UngrabDeviceButton {
                grab_window: r.read_window()?,
                modifiers: r.read_u16()?,
                modifier_device: r.read_u8()?,
                button: r.read_u8()?,
                device: r.read_u8()?,
            },
            19 => {
                let time = r.read_timestamp()?;
                let raw = r.read_u8()?;
                XiRequest::AllowDeviceEvents {
                    time,
                    mode: DeviceAllowMode::from_u8(raw)
                        .ok_or_else(|| X11Error::bad_value(raw as u32))?,
                    device: r.read_u8()?,
                }
            }
            20 => XiRequest::GetDeviceFocus {
                device: r.read_u8()?,
            },
            21 => XiRequest::SetDeviceFocus {
                focus: r.read_u32()?,
                time: r.read_timestamp()?,
                revert_to: r.read_u8()?,
                device: r.read_u8()?,
            },
            22 => XiRequest::GetFeedbackControl {
                device: r.read_u8()?,
            },
            23 => {
                let mask = r.read_u32()?;
                let device = r.read_u8()?;
                let feedback_id = r.read_u8()?;
                r.skip(2)?;
                let class = r.read_u8()?;
                r.skip(1)?; // id repeated in the control
                r.skip(2)?; // length
                let change = match class {
                    0 => {
                        r.skip(2)?; // key, auto_repeat_mode
                        let click = r.read_u8()? as i8;
                        let percent = r.read_u8()? as i8;
                        FeedbackChange::Keyboard {
                            click,
                            percent,
                            pitch: r.read_i16()?,
                            duration: r.read_i16()?,
                            led_mask: r.read_u32()?,
                            led_values: r.read_u32()?,
                        }
                    }
                    1 => {
                        r.skip(2)?;
                        FeedbackChange::Pointer {
                            numerator: r.read_i16()?,
                            denominator: r.read_i16()?,
                            threshold: r.read_i16()?,
                        }
                    }
                    other => return Err(X11Error::bad_value(other as u32)),
                };
                XiRequest::ChangeFeedbackControl {
                    device,
                    feedback_id,
                    mask,
                    change,
                }
            }
            28 => XiRequest::GetDeviceButtonMapping {
                device: r.read_u8()?,
            },
            29 => {
                let device = r.read_u8()?;
                let len = r.read_u8()? as usize;
                r.skip(2)?;
                XiRequest::SetDeviceButtonMapping {
                    device,
                    map: r.read_bytes(len)?.to_vec(),
                }
            }
            30 => XiRequest::QueryDeviceState {
                device: r.read_u8()?,
            },
            33 => {
                let device = r.read_u8()?;
                let first_valuator = r.read_u8()?;
                let count = r.read_u8()? as usize;
                r.skip(1)?;
                let values = r.read_u32_list(count)?.into_iter().map(|v| v as i32).collect();
                XiRequest::SetDeviceValuators {
                    device,
                    first_valuator,
                    values,
                }
            }
            34 => {
                let control = r.read_u16()?;
                XiRequest::GetDeviceControl {
                    device: r.read_u8()?,
                    control,
                }
            }
            35 => {
                let control = r.read_u16()?;
                let device = r.read_u8()?;
                r.skip(1)?;
                if control != DEVICE_RESOLUTION {
                    return Err(X11Error::bad_value(control as u32));
                }
                r.skip(4)?; // control id and length, repeated
                let first_valuator = r.read_u8()?;
                let count = r.read_u8()? as usize;
                r.skip(2)?;
                XiRequest::ChangeDeviceControl {
                    device,
                    first_valuator,
                    resolutions: r.read_u32_list(count)?,
                }
            }
            46 => {
                let window = r.read_window()?;
                let count = r.read_u16()? as usize;
                r.skip(2)?;
                let mut masks = Vec::with_capacity(count);
                for _ in 0..count {
                    let device = r.read_u16()?;
                    let words = r.read_u16()? as usize;
                    let mask = read_xi2_mask(r, words)?;
                    if mask & !xi2::SELECTABLE != 0 {
                        return Err(X11Error::bad_value(mask));
                    }
                    masks.push(Xi2Mask { device, mask });
                }
                XiRequest::XiSelectEvents { window, masks }
            }
            47 => XiRequest::XiQueryVersion {
                major: r.read_u16()?,
                minor: r.read_u16()?,
            },
            48 => XiRequest::XiQueryDevice {
                device: r.read_u16()?,
            },
            51 => {
                let grab_window = r.read_window()?;
                let time = r.read_timestamp()?;
                let cursor = r.read_cursor()?;
                let device = r.read_u16()?;
                let mode = read_mode(r)?;
                let paired_device_mode = read_mode(r)?;
                let owner_events = r.read_bool()?;
                r.skip(1)?;
                let words = r.read_u16()? as usize;
                XiRequest::XiGrabDevice {
                    grab_window,
                    time,
                    cursor,
                    device,
                    mode,
                    paired_device_mode,
                    owner_events,
                    mask: read_xi2_mask(r, words)?,
                }
            }
            52 => XiRequest::XiUngrabDevice {
                time: r.read_timestamp()?,
                device: r.read_u16()?,
            },
            53 => {
                let time = r.read_timestamp()?;
                let device = r.read_u16()?;
                let raw = r.read_u8()?;
                XiRequest::XiAllowEvents {
                    time,
                    device,
                    mode: DeviceAllowMode::from_u8(raw)
                        .ok_or_else(|| X11Error::bad_value(raw as u32))?,
                }
            }
            54 => {
                let time = r.read_timestamp()?;
                let grab_window = r.read_window()?;
                let cursor = r.read_cursor()?;
                let detail = r.read_u32()?;
                let device = r.read_u16()?;
                let num_modifiers = r.read_u16()? as usize;
                let words = r.read_u16()? as usize;
                let grab_type = read_grab_type(r)?;
                let grab_mode = read_mode(r)?;
                let paired_device_mode = read_mode(r)?;
                let owner_events = r.read_bool()?;
                r.skip(2)?;
                let mask = read_xi2_mask(r, words)?;
                XiRequest::XiPassiveGrabDevice {
                    time,
                    grab_window,
                    cursor,
                    detail,
                    device,
                    grab_type,
                    grab_mode,
                    paired_device_mode,
                    owner_events,
                    mask,
                    modifiers: r.read_u32_list(num_modifiers)?,
                }
            }
            55 => {
                let grab_window = r.read_window()?;
                let detail = r.read_u32()?;
                let device = r.read_u16()?;
                let num_modifiers = r.read_u16()? as usize;
                let grab_type = read_grab_type(r)?;
                r.skip(3)?;
                XiRequest::XiPassiveUngrabDevice {
                    grab_window,
                    detail,
                    device,
                    grab_type,
                    modifiers: r.read_u32_list(num_modifiers)?,
                }
            }
            60 => XiRequest::XiGetSelectedEvents {
                window: r.read_window()?,
            },
            _ => return Err(X11Error::implementation_error()),
        };
        Ok(request)
    }
}

fn read_mode(r: &mut RequestReader<'_>) -> X11Result<GrabMode> {
    let raw = r.read_u8()?;
    GrabMode::from_u8(raw).ok_or_else(|| X11Error::bad_value(raw as u32))
}

fn read_grab_type(r: &mut RequestReader<'_>) -> X11Result<u8> {
    match r.read_u8()? {
        t @ (xi2::GRAB_TYPE_BUTTON | xi2::GRAB_TYPE_KEYCODE) => Ok(t),
        other => Err(X11Error::bad_value(other as u32)),
    }
}

/// XI2 masks are byte arrays; only the first 32 bits carry event types
/// this server generates.
fn read_xi2_mask(r: &mut RequestReader<'_>, words: usize) -> X11Result<u32> {
    let bytes = r.read_bytes(words.checked_mul(4).ok_or_else(X11Error::bad_length)?)?;
    Ok(bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |mask, (i, b)| mask | (*b as u32) << (i * 8)))
}

fn write_xi2_mask(w: &mut WireWriter, mask: u32) {
    w.bytes(&mask.to_le_bytes());
}

/// XInputExtension replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XiReply {
    GetExtensionVersion {
        present: bool,
        major: u16,
        minor: u16,
    },
    ListInputDevices {
        devices: Vec<DeviceInfo>,
    },
    OpenDevice {
        classes: Vec<DeviceClass>,
    },
    /// SetDeviceMode, SetDeviceButtonMapping, SetDeviceValuators,
    /// ChangeDeviceControl, GrabDevice and XIGrabDevice answer a bare status
    Status {
        minor: u8,
        status: u8,
    },
    GetSelectedExtensionEvents {
        this_client: Vec<u32>,
        all_clients: Vec<u32>,
    },
    GetDeviceFocus {
        focus: u32,
        time: Timestamp,
        revert_to: u8,
    },
    GetFeedbackControl {
        feedbacks: Vec<FeedbackState>,
    },
    GetDeviceButtonMapping {
        map: Vec<u8>,
    },
    QueryDeviceState {
        classes: Vec<InputState>,
    },
    GetDeviceControl {
        resolutions: Vec<u32>,
        min_resolutions: Vec<u32>,
        max_resolutions: Vec<u32>,
    },
    XiQueryVersion {
        major: u16,
        minor: u16,
    },
    XiQueryDevice {
        devices: Vec<Xi2DeviceSnapshot>,
    },
    XiPassiveGrabDevice {
        /// (modifiers, status) of every modifier combination that failed
        failed: Vec<(u32, GrabStatus)>,
    },
    XiGetSelectedEvents {
        masks: Vec<Xi2Mask>,
    },
}

/// XIQueryDevice entry: template plus live button and valuator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xi2DeviceSnapshot {
    pub info: DeviceInfo,
    pub attachment: u16,
    pub buttons_down: u32,
    pub valuators: Vec<i32>,
}

impl XiReply {
    fn minor(&self) -> u8 {
        match self {
            XiReply::GetExtensionVersion { .. } => 1,
            XiReply::ListInputDevices { .. } => 2,
            XiReply::OpenDevice { .. } => 3,
            XiReply::Status { minor, .. } => *minor,
            XiReply::GetSelectedExtensionEvents { .. } => 7,
            XiReply::GetDeviceFocus { .. } => 20,
            XiReply::GetFeedbackControl { .. } => 22,
            XiReply::GetDeviceButtonMapping { .. } => 28,
            XiReply::QueryDeviceState { .. } => 30,
            XiReply::GetDeviceControl { .. } => 34,
            XiReply::XiQueryVersion { .. } => 47,
            XiReply::XiQueryDevice { .. } => 48,
            XiReply::XiPassiveGrabDevice { .. } => 54,
            XiReply::XiGetSelectedEvents { .. } => 60,
        }
    }

    /// Encode with the reply-type byte set to the request's minor opcode
    /// (XI 1.x) or zero (XI2).
    pub fn encode(&self, sequence: u16, byte_order: ByteOrder) -> Vec<u8> {
        let minor = self.minor();
        let reply_type = if minor >= 46 { 0 } else { minor };
        let mut w = WireWriter::begin_reply(byte_order, reply_type, sequence);
        match self {
            XiReply::GetExtensionVersion {
                present,
                major,
                minor,
            } => {
                w.u16(*major);
                w.u16(*minor);
                w.bool(*present);
            }
            XiReply::ListInputDevices { devices } => {
                w.u8(devices.len() as u8);
                w.zeros(23);
                for dev in devices {
                    w.u32(dev.type_atom.get());
                    w.u8(dev.id);
                    w.u8(dev.classes.len() as u8);
                    w.u8(dev.device_use as u8);
                    w.u8(0);
                }
                for dev in devices {
                    for class in &dev.classes {
                        write_class_info(&mut w, class);
                    }
                }
                for dev in devices {
                    let name = dev.name.as_bytes();
                    w.u8(name.len().min(255) as u8);
                    w.bytes(&name[..name.len().min(255)]);
                }
            }
            XiReply::OpenDevice { classes } => {
                w.u8(classes.len() as u8);
                w.zeros(23);
                for class in classes {
                    w.u8(class.id());
                    w.u8(class.event_type_base());
                }
            }
            XiReply::Status { status, .. } => {
                w.u8(*status);
            }
            XiReply::GetSelectedExtensionEvents {
                this_client,
                all_clients,
            } => {
                w.u16(this_client.len() as u16);
                w.u16(all_clients.len() as u16);
                w.zeros(20);
                this_client.iter().chain(all_clients).for_each(|c| w.u32(*c));
            }
            XiReply::GetDeviceFocus {
                focus,
                time,
                revert_to,
            } => {
                w.u32(*focus);
                w.u32(time.get());
                w.u8(*revert_to);
            }
            XiReply::GetFeedbackControl { feedbacks } => {
                w.u16(feedbacks.len() as u16);
                w.zeros(22);
                for fb in feedbacks {
                    write_feedback_state(&mut w, fb);
                }
            }
            XiReply::GetDeviceButtonMapping { map } => {
                w.u8(map.len() as u8);
                w.zeros(23);
                w.bytes(map);
            }
            XiReply::QueryDeviceState { classes } => {
                w.u8(classes.len() as u8);
                w.zeros(23);
                for state in classes {
                    match state {
                        InputState::Key { num_keys, keys } => {
                            w.u8(0);
                            w.u8(36);
                            w.u8(*num_keys);
                            w.u8(0);
                            w.bytes(keys);
                        }
                        InputState::Button {
                            num_buttons,
                            buttons,
                        } => {
                            w.u8(1);
                            w.u8(36);
                            w.u8(*num_buttons);
                            w.u8(0);
                            w.bytes(buttons);
                        }
                        InputState::Valuator { mode, values } => {
                            w.u8(2);
                            w.u8((4 + 4 * values.len()) as u8);
                            w.u8(values.len() as u8);
                            w.u8(*mode);
                            values.iter().for_each(|v| w.i32(*v));
                        }
                    }
                }
            }
            XiReply::GetDeviceControl {
                resolutions,
                min_resolutions,
                max_resolutions,
            } => {
                w.u8(0);
                w.zeros(23);
                let n = resolutions.len();
                w.u16(DEVICE_RESOLUTION);
                w.u16((8 + 12 * n) as u16);
                w.u32(n as u32);
                resolutions
                    .iter()
                    .chain(min_resolutions)
                    .chain(max_resolutions)
                    .for_each(|v| w.u32(*v));
            }
            XiReply::XiQueryVersion { major, minor } => {
                w.u16(*major);
                w.u16(*minor);
            }
            XiReply::XiQueryDevice { devices } => {
                w.u16(devices.len() as u16);
                w.zeros(22);
                for dev in devices {
                    write_xi2_device(&mut w, dev);
                }
            }
            XiReply::XiPassiveGrabDevice { failed } => {
                w.u16(failed.len() as u16);
                w.zeros(22);
                for (modifiers, status) in failed {
                    w.u32(*modifiers);
                    w.u8(*status as u8);
                    w.zeros(3);
                }
            }
            XiReply::XiGetSelectedEvents { masks } => {
                w.u16(masks.len() as u16);
                w.zeros(22);
                for m in masks {
                    w.u16(m.device);
                    w.u16(1);
                    write_xi2_mask(&mut w, m.mask);
                }
            }
        }
        w.finish_reply()
    }
}

fn write_class_info(w: &mut WireWriter, class: &DeviceClass) {
    match class {
        DeviceClass::Key {
            min_keycode,
            max_keycode,
        } => {
            w.u8(0);
            w.u8(8);
            w.u8(*min_keycode);
            w.u8(*max_keycode);
            w.u16((*max_keycode as u16).saturating_sub(*min_keycode as u16) + 1);
            w.zeros(2);
        }
        DeviceClass::Button { num_buttons } => {
            w.u8(1);
            w.u8(4);
            w.u16(*num_buttons);
        }
        DeviceClass::Valuator {
            mode,
            motion_size,
            axes,
        } => {
            w.u8(2);
            w.u8((8 + 12 * axes.len()) as u8);
            w.u8(axes.len() as u8);
            w.u8(*mode);
            w.u32(*motion_size);
            for axis in axes {
                w.u32(axis.resolution);
                w.i32(axis.min_value);
                w.i32(axis.max_value);
            }
        }
    }
}

fn write_feedback_state(w: &mut WireWriter, fb: &FeedbackState) {
    match fb {
        FeedbackState::Keyboard {
            id,
            click,
            percent,
            pitch,
            duration,
            led_mask,
            led_values,
        } => {
            w.u8(0);
            w.u8(*id);
            w.u16(52);
            w.u16(*pitch);
            w.u16(*duration);
            w.u32(*led_mask);
            w.u32(*led_values);
            w.bool(true);
            w.u8(*click);
            w.u8(*percent);
            w.u8(0);
            w.zeros(32);
        }
        FeedbackState::Pointer {
            id,
            numerator,
            denominator,
            threshold,
        } => {
            w.u8(1);
            w.u8(*id);
            w.u16(12);
            w.zeros(2);
            w.u16(*numerator);
            w.u16(*denominator);
            w.u16(*threshold);
        }
    }
}

fn write_xi2_device(w: &mut WireWriter, dev: &Xi2DeviceSnapshot) {
    let info = &dev.info;
    let name = info.name.as_bytes();
    w.u16(info.id as u16);
    w.u16(info.device_use.xi2());
    w.u16(dev.attachment);
    w.u16(info.classes.len() as u16);
    w.u16(name.len() as u16);
    w.bool(true);
    w.u8(0);
    w.bytes(name);
    w.pad4();

    let mut valuator_index = 0u16;
    for class in &info.classes {
        match class {
            DeviceClass::Key {
                min_keycode,
                max_keycode,
            } => {
                let keys: Vec<u32> = (*min_keycode as u32..=*max_keycode as u32).collect();
                w.u16(0);
                w.u16(2 + keys.len() as u16);
                w.u16(info.id as u16);
                w.u16(keys.len() as u16);
                keys.iter().for_each(|k| w.u32(*k));
            }
            DeviceClass::Button { num_buttons } => {
                let state_words = (*num_buttons as usize).div_ceil(32);
                w.u16(1);
                w.u16((2 + state_words + *num_buttons as usize) as u16);
                w.u16(info.id as u16);
                w.u16(*num_buttons);
                for word in 0..state_words {
                    w.u32(if word == 0 { dev.buttons_down } else { 0 });
                }
                (0..*num_buttons).for_each(|_| w.u32(0));
            }
            DeviceClass::Valuator { mode, axes, .. } => {
                for (i, axis) in axes.iter().enumerate() {
                    let value = dev.valuators.get(i).copied().unwrap_or(0);
                    w.u16(2);
                    w.u16(11);
                    w.u16(info.id as u16);
                    w.u16(valuator_index);
                    w.u32(0);
                    write_fp3232(w, axis.min_value);
                    write_fp3232(w, axis.max_value);
                    write_fp3232(w, value);
                    w.u32(axis.resolution);
                    w.u8(*mode);
                    w.zeros(3);
                    valuator_index += 1;
                }
            }
        }
    }
}

fn write_fp3232(w: &mut WireWriter, value: i32) {
    w.i32(value);
    w.u32(0);
}

/// XI 1.x device key, button or motion event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    /// Offset from [`XINPUT_FIRST_EVENT`], one of [`xi_event`]
    pub offset: u8,
    pub device: u8,
    pub data: InputEventData,
}

impl DeviceEvent {
    pub fn code(&self) -> u8 {
        XINPUT_FIRST_EVENT + self.offset
    }

    pub(crate) fn encode(&self, w: &mut WireWriter, sequence: u16) {
        w.u8(self.code());
        write_input_event(w, sequence, &self.data);
        w.u8(self.device);
    }
}

/// XI2 device event, sent as a GenericEvent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xi2DeviceEvent {
    pub evtype: u16,
    pub device: u16,
    pub source: u16,
    pub time: Timestamp,
    pub detail: u32,
    pub root: Window,
    pub event: Window,
    pub child: Window,
    pub root_x: i16,
    pub root_y: i16,
    pub event_x: i16,
    pub event_y: i16,
    pub buttons: u32,
    pub modifiers: u32,
}

impl Xi2DeviceEvent {
    pub(crate) fn encode(&self, w: &mut WireWriter, sequence: u16) {
        let start = w.len();
        w.u8(EventType::GenericEvent as u8);
        w.u8(XINPUT_MAJOR_OPCODE);
        w.u16(sequence);
        w.u32(0);
        w.u16(self.evtype);
        w.u16(self.device);
        w.u32(self.time.get());
        w.u32(self.detail);
        w.u32(self.root.xid());
        w.u32(self.event.xid());
        w.u32(self.child.xid());
        w.i32((self.root_x as i32) << 16);
        w.i32((self.root_y as i32) << 16);
        w.i32((self.event_x as i32) << 16);
        w.i32((self.event_y as i32) << 16);
        w.u16(1); // buttons_len
        w.u16(0); // valuators_len
        w.u16(self.source);
        w.zeros(2);
        w.u32(0); // flags
        w.zeros(12); // base, latched, locked modifiers
        w.u32(self.modifiers);
        w.zeros(4); // group
        w.u32(self.buttons);
        let extra = ((w.len() - start - 32) / 4) as u32;
        w.set_u32_at(start + 4, extra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_event_class_split() {
        let class = event_class(2, xi_event::DEVICE_BUTTON_PRESS);
        assert_eq!(class, 0x0245);
        assert_eq!(split_event_class(class), Some((2, xi_event::DEVICE_BUTTON_PRESS)));
        assert_eq!(split_event_class(0x0204), None);
    }

    #[test]
    fn test_parse_select_extension_event() {
        let mut body = le(&[0x0020_0001]);
        body.extend_from_slice(&[2, 0, 0, 0]);
        body.extend(le(&[0x0245, 0x0246]));
        let mut r = RequestReader::new(&body, ByteOrder::LSBFirst);
        match XiRequest::parse(6, &mut r).unwrap() {
            XiRequest::SelectExtensionEvent { window, classes } => {
                assert_eq!(window, Window::new(0x0020_0001));
                assert_eq!(classes, vec![0x0245, 0x0246]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_xi_select_events() {
        let mut body = le(&[0x0020_0001]);
        body.extend_from_slice(&[1, 0, 0, 0]);
        body.extend_from_slice(&[2, 0, 1, 0]);
        body.extend_from_slice(&[0x10, 0, 0, 0]);
        let mut r = RequestReader::new(&body, ByteOrder::LSBFirst);
        match XiRequest::parse(46, &mut r).unwrap() {
            XiRequest::XiSelectEvents { masks, .. } => {
                assert_eq!(masks, vec![Xi2Mask { device: 2, mask: 1 << xi2::BUTTON_PRESS }]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_minor() {
        let mut r = RequestReader::new(&[], ByteOrder::LSBFirst);
        assert_eq!(
            XiRequest::parse(40, &mut r).unwrap_err().code,
            ErrorCode::Implementation
        );
    }

    #[test]
    fn test_open_device_reply() {
        let reply = XiReply::OpenDevice {
            classes: vec![DeviceClass::Button { num_buttons: 5 }],
        };
        let bytes = reply.encode(4, ByteOrder::LSBFirst);
        assert_eq!(bytes[1], 3);
        assert_eq!(bytes[8], 1);
        assert_eq!(bytes[32], 1);
        assert_eq!(bytes[33], XINPUT_FIRST_EVENT + xi_event::DEVICE_BUTTON_PRESS);
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_device_event_carries_device_id() {
        let ev = DeviceEvent {
            offset: xi_event::DEVICE_KEY_PRESS,
            device: 3,
            data: InputEventData {
                detail: 38,
                time: Timestamp::new(5),
                root: Window::new(0x100),
                event: Window::new(0x0020_0001),
                child: Window::NONE,
                root_x: 0,
                root_y: 0,
                event_x: 0,
                event_y: 0,
                state: 0,
                same_screen: true,
            },
        };
        let mut w = WireWriter::new(ByteOrder::LSBFirst);
        ev.encode(&mut w, 9);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 67);
        assert_eq!(bytes[31], 3);
    }

    #[test]
    fn test_xi2_event_fixed_point_and_length() {
        let ev = Xi2DeviceEvent {
            evtype: xi2::BUTTON_PRESS,
            device: 2,
            source: 2,
            time: Timestamp::new(1),
            detail: 1,
            root: Window::new(0x100),
            event: Window::new(0x100),
            child: Window::NONE,
            root_x: 3,
            root_y: -1,
            event_x: 3,
            event_y: -1,
            buttons: 0,
            modifiers: 0,
        };
        let mut w = WireWriter::new(ByteOrder::LSBFirst);
        ev.encode(&mut w, 1);
        let bytes = w.into_bytes();
        assert_eq!(bytes[0], 35);
        assert_eq!(bytes[1], XINPUT_MAJOR_OPCODE);
        assert_eq!(bytes.len(), 84);
        assert_eq!(&bytes[4..8], &[13, 0, 0, 0]);
        assert_eq!(&bytes[32..36], &[0, 0, 3, 0]);
        assert_eq!(&bytes[36..40], &[0, 0, 0xFF, 0xFF]);
    }
}
