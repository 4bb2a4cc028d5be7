//! X11 protocol events
//!
//! Events are sent from the server to clients to notify them of state changes,
//! user input, and other interesting occurrences. They are encoded per
//! recipient, since each connection has its own byte order and sequence
//! number.

use super::encoder::WireWriter;
use super::requests::{read_u16_at, read_u32_at};
use super::types::*;
use super::xinput::{DeviceEvent, Xi2DeviceEvent};

/// Event type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    KeyPress = 2,
    KeyRelease = 3,
    ButtonPress = 4,
    ButtonRelease = 5,
    MotionNotify = 6,
    EnterNotify = 7,
    LeaveNotify = 8,
    FocusIn = 9,
    FocusOut = 10,
    KeymapNotify = 11,
    Expose = 12,
    GraphicsExposure = 13,
    NoExposure = 14,
    VisibilityNotify = 15,
    CreateNotify = 16,
    DestroyNotify = 17,
    UnmapNotify = 18,
    MapNotify = 19,
    MapRequest = 20,
    ReparentNotify = 21,
    ConfigureNotify = 22,
    ConfigureRequest = 23,
    GravityNotify = 24,
    ResizeRequest = 25,
    CirculateNotify = 26,
    CirculateRequest = 27,
    PropertyNotify = 28,
    SelectionClear = 29,
    SelectionRequest = 30,
    SelectionNotify = 31,
    ColormapNotify = 32,
    ClientMessage = 33,
    MappingNotify = 34,
    GenericEvent = 35,
}

/// Set on the type byte of events delivered through SendEvent.
pub const SEND_EVENT_FLAG: u8 = 0x80;

/// Fields shared by key, button and motion events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEventData {
    pub detail: u8,
    pub time: Timestamp,
    pub root: Window,
    pub event: Window,
    pub child: Window,
    pub root_x: i16,
    pub root_y: i16,
    pub event_x: i16,
    pub event_y: i16,
    pub state: u16,
    pub same_screen: bool,
}

/// PropertyNotify state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    NewValue = 0,
    Deleted = 1,
}

/// ClientMessage payload, interpreted by its format so that it can be
/// re-encoded in another client's byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessageData {
    Bytes([u8; 20]),
    Shorts([u16; 10]),
    Longs([u32; 5]),
}

/// Events the server generates or forwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    KeyPress(InputEventData),
    KeyRelease(InputEventData),
    ButtonPress(InputEventData),
    ButtonRelease(InputEventData),
    MotionNotify(InputEventData),
    CreateNotify {
        parent: Window,
        window: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        border_width: u16,
        override_redirect: bool,
    },
    DestroyNotify {
        event: Window,
        window: Window,
    },
    UnmapNotify {
        event: Window,
        window: Window,
        from_configure: bool,
    },
    MapNotify {
        event: Window,
        window: Window,
        override_redirect: bool,
    },
    MapRequest {
        parent: Window,
        window: Window,
    },
    ReparentNotify {
        event: Window,
        window: Window,
        parent: Window,
        x: i16,
        y: i16,
        override_redirect: bool,
    },
    ConfigureNotify {
        event: Window,
        window: Window,
        above_sibling: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        border_width: u16,
        override_redirect: bool,
    },
    ConfigureRequest {
        stack_mode: u8,
        parent: Window,
        window: Window,
        sibling: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        border_width: u16,
        value_mask: u16,
    },
    PropertyNotify {
        window: Window,
        atom: Atom,
        time: Timestamp,
        state: PropertyState,
    },
    SelectionClear {
        time: Timestamp,
        owner: Window,
        selection: Atom,
    },
    SelectionRequest {
        time: Timestamp,
        owner: Window,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
    },
    SelectionNotify {
        time: Timestamp,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
    },
    ClientMessage {
        format: u8,
        window: Window,
        type_: Atom,
        data: ClientMessageData,
    },
    /// XInput 1.x device event
    Device(DeviceEvent),
    /// XInput 2 device event, carried as a GenericEvent
    Xi2(Xi2DeviceEvent),
    /// A SendEvent payload of a type the server does not interpret
    Raw([u8; 32]),
}

impl Event {
    /// Core event code, or the raw type byte for opaque payloads
    pub fn code(&self) -> u8 {
        match self {
            Event::KeyPress(_) => EventType::KeyPress as u8,
            Event::KeyRelease(_) => EventType::KeyRelease as u8,
            Event::ButtonPress(_) => EventType::ButtonPress as u8,
            Event::ButtonRelease(_) => EventType::ButtonRelease as u8,
            Event::MotionNotify(_) => EventType::MotionNotify as u8,
            Event::CreateNotify { .. } => EventType::CreateNotify as u8,
            Event::DestroyNotify { .. } => EventType::DestroyNotify as u8,
            Event::UnmapNotify { .. } => EventType::UnmapNotify as u8,
            Event::MapNotify { .. } => EventType::MapNotify as u8,
            Event::MapRequest { .. } => EventType::MapRequest as u8,
            Event::ReparentNotify { .. } => EventType::ReparentNotify as u8,
            Event::ConfigureNotify { .. } => EventType::ConfigureNotify as u8,
            Event::ConfigureRequest { .. } => EventType::ConfigureRequest as u8,
            Event::PropertyNotify { .. } => EventType::PropertyNotify as u8,
            Event::SelectionClear { .. } => EventType::SelectionClear as u8,
            Event::SelectionRequest { .. } => EventType::SelectionRequest as u8,
            Event::SelectionNotify { .. } => EventType::SelectionNotify as u8,
            Event::ClientMessage { .. } => EventType::ClientMessage as u8,
            Event::Device(ev) => ev.code(),
            Event::Xi2(_) => EventType::GenericEvent as u8,
            Event::Raw(bytes) => bytes[0] & !SEND_EVENT_FLAG,
        }
    }

    /// Encode for one recipient
    pub fn encode(&self, sequence: u16, byte_order: ByteOrder, synthetic: bool) -> Vec<u8> {
        let mut w = WireWriter::new(byte_order);
        match self {
            Event::KeyPress(data)
            | Event::KeyRelease(data)
            | Event::ButtonPress(data)
            | Event::ButtonRelease(data)
            | Event::MotionNotify(data) => {
                w.u8(self.code());
                write_input_event(&mut w, sequence, data);
            }
            Event::CreateNotify {
                parent,
                window,
                x,
                y,
                width,
                height,
                border_width,
                override_redirect,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(parent.xid());
                w.u32(window.xid());
                w.i16(*x);
                w.i16(*y);
                w.u16(*width);
                w.u16(*height);
                w.u16(*border_width);
                w.bool(*override_redirect);
            }
            Event::DestroyNotify { event, window } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(event.xid());
                w.u32(window.xid());
            }
            Event::UnmapNotify {
                event,
                window,
                from_configure,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(event.xid());
                w.u32(window.xid());
                w.bool(*from_configure);
            }
            Event::MapNotify {
                event,
                window,
                override_redirect,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(event.xid());
                w.u32(window.xid());
                w.bool(*override_redirect);
            }
            Event::MapRequest { parent, window } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(parent.xid());
                w.u32(window.xid());
            }
            Event::ReparentNotify {
                event,
                window,
                parent,
                x,
                y,
                override_redirect,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(event.xid());
                w.u32(window.xid());
                w.u32(parent.xid());
                w.i16(*x);
                w.i16(*y);
                w.bool(*override_redirect);
            }
            Event::ConfigureNotify {
                event,
                window,
                above_sibling,
                x,
                y,
                width,
                height,
                border_width,
                override_redirect,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(event.xid());
                w.u32(window.xid());
                w.u32(above_sibling.xid());
                w.i16(*x);
                w.i16(*y);
                w.u16(*width);
                w.u16(*height);
                w.u16(*border_width);
                w.bool(*override_redirect);
            }
            Event::ConfigureRequest {
                stack_mode,
                parent,
                window,
                sibling,
                x,
                y,
                width,
                height,
                border_width,
                value_mask,
            } => {
                header(&mut w, self.code(), *stack_mode, sequence);
                w.u32(parent.xid());
                w.u32(window.xid());
                w.u32(sibling.xid());
                w.i16(*x);
                w.i16(*y);
                w.u16(*width);
                w.u16(*height);
                w.u16(*border_width);
                w.u16(*value_mask);
            }
            Event::PropertyNotify {
                window,
                atom,
                time,
                state,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(window.xid());
                w.u32(atom.get());
                w.u32(time.get());
                w.u8(*state as u8);
            }
            Event::SelectionClear {
                time,
                owner,
                selection,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(time.get());
                w.u32(owner.xid());
                w.u32(selection.get());
            }
            Event::SelectionRequest {
                time,
                owner,
                requestor,
                selection,
                target,
                property,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(time.get());
                w.u32(owner.xid());
                w.u32(requestor.xid());
                w.u32(selection.get());
                w.u32(target.get());
                w.u32(property.get());
            }
            Event::SelectionNotify {
                time,
                requestor,
                selection,
                target,
                property,
            } => {
                header(&mut w, self.code(), 0, sequence);
                w.u32(time.get());
                w.u32(requestor.xid());
                w.u32(selection.get());
                w.u32(target.get());
                w.u32(property.get());
            }
            Event::ClientMessage {
                format,
                window,
                type_,
                data,
            } => {
                header(&mut w, self.code(), *format, sequence);
                w.u32(window.xid());
                w.u32(type_.get());
                match data {
                    ClientMessageData::Bytes(bytes) => w.bytes(bytes),
                    ClientMessageData::Shorts(shorts) => shorts.iter().for_each(|s| w.u16(*s)),
                    ClientMessageData::Longs(longs) => longs.iter().for_each(|l| w.u32(*l)),
                }
            }
            Event::Device(ev) => ev.encode(&mut w, sequence),
            Event::Xi2(ev) => ev.encode(&mut w, sequence),
            Event::Raw(bytes) => {
                w.bytes(bytes);
                w.set_u16_at(2, sequence);
            }
        }
        if w.len() < 32 {
            w.zeros(32 - w.len());
        }
        let mut bytes = w.into_bytes();
        if synthetic {
            bytes[0] |= SEND_EVENT_FLAG;
        }
        bytes
    }

    /// Interpret a client-supplied SendEvent payload. Types the server has no
    /// structure for are kept verbatim.
    pub fn decode(bytes: &[u8; 32], byte_order: ByteOrder) -> Event {
        let u32_at = |pos: usize| read_u32_at(&bytes[pos..pos + 4], byte_order);
        let window_at = |pos: usize| Window::new(u32_at(pos));
        let atom_at = |pos: usize| Atom::new(u32_at(pos));
        let time_at = |pos: usize| Timestamp::new(u32_at(pos));

        match bytes[0] & !SEND_EVENT_FLAG {
            29 => Event::SelectionClear {
                time: time_at(4),
                owner: window_at(8),
                selection: atom_at(12),
            },
            30 => Event::SelectionRequest {
                time: time_at(4),
                owner: window_at(8),
                requestor: window_at(12),
                selection: atom_at(16),
                target: atom_at(20),
                property: atom_at(24),
            },
            31 => Event::SelectionNotify {
                time: time_at(4),
                requestor: window_at(8),
                selection: atom_at(12),
                target: atom_at(16),
                property: atom_at(20),
            },
            28 => Event::PropertyNotify {
                window: window_at(4),
                atom: atom_at(8),
                time: time_at(12),
                state: if bytes[16] == 0 {
                    PropertyState::NewValue
                } else {
                    PropertyState::Deleted
                },
            },
            33 => {
                let format = bytes[1];
                let payload = &bytes[12..32];
                let data = match format {
                    16 => {
                        let mut shorts = [0u16; 10];
                        for (i, s) in shorts.iter_mut().enumerate() {
                            *s = read_u16_at(&payload[i * 2..i * 2 + 2], byte_order);
                        }
                        ClientMessageData::Shorts(shorts)
                    }
                    32 => {
                        let mut longs = [0u32; 5];
                        for (i, l) in longs.iter_mut().enumerate() {
                            *l = read_u32_at(&payload[i * 4..i * 4 + 4], byte_order);
                        }
                        ClientMessageData::Longs(longs)
                    }
                    _ => {
                        let mut raw = [0u8; 20];
                        raw.copy_from_slice(payload);
                        ClientMessageData::Bytes(raw)
                    }
                };
                Event::ClientMessage {
                    format,
                    window: window_at(4),
                    type_: atom_at(8),
                    data,
                }
            }
            _ => Event::Raw(*bytes),
        }
    }
}

fn header(w: &mut WireWriter, code: u8, detail: u8, sequence: u16) {
    w.u8(code);
    w.u8(detail);
    w.u16(sequence);
}

/// Body shared by core key/button/motion events and XInput 1.x device
/// events. The type byte must already be written.
pub(crate) fn write_input_event(w: &mut WireWriter, sequence: u16, data: &InputEventData) {
    w.u8(data.detail);
    w.u16(sequence);
    w.u32(data.time.get());
    w.u32(data.root.xid());
    w.u32(data.event.xid());
    w.u32(data.child.xid());
    w.i16(data.root_x);
    w.i16(data.root_y);
    w.i16(data.event_x);
    w.i16(data.event_y);
    w.u16(data.state);
    w.bool(data.same_screen);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button_event() -> InputEventData {
        InputEventData {
            detail: 1,
            time: Timestamp::new(1000),
            root: Window::new(0x100),
            event: Window::new(0x0020_0001),
            child: Window::NONE,
            root_x: 10,
            root_y: 20,
            event_x: 5,
            event_y: 6,
            state: 0,
            same_screen: true,
        }
    }

    #[test]
    fn test_button_press_layout() {
        let bytes = Event::ButtonPress(button_event()).encode(3, ByteOrder::LSBFirst, false);
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[1], 1);
        assert_eq!(&bytes[2..4], &[3, 0]);
        assert_eq!(&bytes[12..16], &[0x01, 0x00, 0x20, 0x00]);
        assert_eq!(&bytes[20..22], &[10, 0]);
        assert_eq!(bytes[30], 1);
    }

    #[test]
    fn test_synthetic_flag() {
        let ev = Event::SelectionNotify {
            time: Timestamp::CURRENT_TIME,
            requestor: Window::new(0x0020_0001),
            selection: Atom::PRIMARY,
            target: Atom::STRING,
            property: Atom::NONE,
        };
        let bytes = ev.encode(1, ByteOrder::MSBFirst, true);
        assert_eq!(bytes[0], 31 | SEND_EVENT_FLAG);
    }

    #[test]
    fn test_decode_selection_notify_across_byte_orders() {
        let ev = Event::SelectionNotify {
            time: Timestamp::new(77),
            requestor: Window::new(0x0040_0002),
            selection: Atom::PRIMARY,
            target: Atom::STRING,
            property: Atom::new(80),
        };
        let wire = ev.encode(0, ByteOrder::MSBFirst, false);
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&wire);
        assert_eq!(Event::decode(&raw, ByteOrder::MSBFirst), ev);
    }

    #[test]
    fn test_client_message_long_data() {
        let ev = Event::ClientMessage {
            format: 32,
            window: Window::new(0x0020_0001),
            type_: Atom::new(90),
            data: ClientMessageData::Longs([1, 2, 3, 4, 5]),
        };
        let bytes = ev.encode(0, ByteOrder::LSBFirst, false);
        assert_eq!(&bytes[12..16], &[1, 0, 0, 0]);
        assert_eq!(&bytes[28..32], &[5, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_type_is_raw() {
        let mut raw = [0u8; 32];
        raw[0] = 12;
        raw[4] = 0xAB;
        match Event::decode(&raw, ByteOrder::LSBFirst) {
            Event::Raw(bytes) => assert_eq!(bytes[4], 0xAB),
            other => panic!("unexpected {:?}", other),
        }
    }
}
