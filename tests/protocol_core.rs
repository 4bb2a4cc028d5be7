//! End-to-end checks of the protocol core
//!
//! Requests are fed as little-endian wire frames through a `ClientSession`,
//! exactly as the listener does, and the resulting messages inspected.

use x11core::backend::NullBackend;
use x11core::protocol::*;
use x11core::server::{InputKind, RawInput};
use x11core::{ClientSession, Message, Outbound, SecurityPolicy, Server};

/// Little-endian request builder
struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    fn new(opcode: u8, detail: u8) -> Self {
        Frame {
            bytes: vec![opcode, detail, 0, 0],
        }
    }

    fn u8(mut self, v: u8) -> Self {
        self.bytes.push(v);
        self
    }

    fn u16(mut self, v: u16) -> Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u32(mut self, v: u32) -> Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn bytes(mut self, b: &[u8]) -> Self {
        self.bytes.extend_from_slice(b);
        self
    }

    fn build(mut self) -> Vec<u8> {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        let words = (self.bytes.len() / 4) as u16;
        self.bytes[2..4].copy_from_slice(&words.to_le_bytes());
        self.bytes
    }
}

struct Harness {
    server: Server,
    sessions: Vec<ClientSession>,
}

impl Harness {
    fn new(clients: usize) -> Self {
        Self::with_backend(NullBackend::new(), clients)
    }

    fn with_backend(backend: NullBackend, clients: usize) -> Self {
        let mut server = Server::new(Box::new(backend), SecurityPolicy::default()).unwrap();
        let sessions = (0..clients)
            .map(|_| {
                let id = server.register_client(ByteOrder::LSBFirst).unwrap();
                ClientSession::new(id, ByteOrder::LSBFirst)
            })
            .collect();
        Harness { server, sessions }
    }

    fn id(&self, index: usize) -> ClientId {
        self.sessions[index].id
    }

    fn send(&mut self, index: usize, frame: Vec<u8>) -> Vec<Outbound> {
        self.sessions[index].handle_frame(&mut self.server, &frame)
    }

    fn reply(&mut self, index: usize, frame: Vec<u8>) -> Reply {
        let client = self.id(index);
        let out = self.send(index, frame);
        out.into_iter()
            .find_map(|o| match o.message {
                Message::Reply { reply, .. } if o.client == client => Some(reply),
                _ => None,
            })
            .expect("no reply")
    }

    fn window(&self, index: usize, local: u32) -> Window {
        Window(ResourceId::new(self.id(index), local))
    }

    fn create_window(&mut self, index: usize, local: u32, parent: Window) -> Window {
        let wid = self.window(index, local);
        let out = self.send(
            index,
            Frame::new(1, 0)
                .u32(wid.xid())
                .u32(parent.xid())
                .u16(0)
                .u16(0)
                .u16(100)
                .u16(100)
                .u16(0)
                .u16(0)
                .u32(0)
                .u32(0)
                .build(),
        );
        assert!(
            !out.iter().any(|o| matches!(o.message, Message::Error(_))),
            "CreateWindow failed: {:?}",
            out
        );
        wid
    }

    fn select(&mut self, index: usize, window: Window, mask: u32) {
        let out = self.send(
            index,
            Frame::new(2, 0).u32(window.xid()).u32(1 << 11).u32(mask).build(),
        );
        assert!(out.is_empty(), "ChangeWindowAttributes: {:?}", out);
    }

    fn intern(&mut self, index: usize, name: &str, only_if_exists: bool) -> Atom {
        self.intern_bytes(index, name.as_bytes(), only_if_exists)
    }

    fn intern_bytes(&mut self, index: usize, name: &[u8], only_if_exists: bool) -> Atom {
        let frame = Frame::new(16, only_if_exists as u8)
            .u16(name.len() as u16)
            .u16(0)
            .bytes(name)
            .build();
        match self.reply(index, frame) {
            Reply::InternAtom { atom } => atom,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn atom_name(&mut self, index: usize, atom: Atom) -> Vec<u8> {
        match self.reply(index, Frame::new(17, 0).u32(atom.get()).build()) {
            Reply::GetAtomName { name } => name,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn set_string_property(&mut self, index: usize, window: Window, property: Atom, value: &[u8]) {
        let frame = Frame::new(18, 0)
            .u32(window.xid())
            .u32(property.get())
            .u32(Atom::STRING.get())
            .u8(8)
            .u8(0)
            .u16(0)
            .u32(value.len() as u32)
            .bytes(value)
            .build();
        let out = self.send(index, frame);
        assert!(out.is_empty(), "ChangeProperty: {:?}", out);
    }

    fn list_properties(&mut self, index: usize, window: Window) -> Vec<Atom> {
        match self.reply(index, Frame::new(21, 0).u32(window.xid()).build()) {
            Reply::ListProperties { atoms } => atoms,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn set_owner(&mut self, index: usize, owner: Window, selection: Atom) -> Vec<Outbound> {
        self.send(
            index,
            Frame::new(22, 0).u32(owner.xid()).u32(selection.get()).u32(0).build(),
        )
    }

    fn convert(&mut self, index: usize, requestor: Window, selection: Atom, target: Atom, property: Atom) -> Vec<Outbound> {
        self.send(
            index,
            Frame::new(24, 0)
                .u32(requestor.xid())
                .u32(selection.get())
                .u32(target.get())
                .u32(property.get())
                .u32(0)
                .build(),
        )
    }

    fn grab_pointer(&mut self, index: usize, window: Window) -> GrabStatus {
        let frame = Frame::new(26, 0)
            .u32(window.xid())
            .u16((event_mask::BUTTON_PRESS | event_mask::BUTTON_RELEASE) as u16)
            .u8(1)
            .u8(1)
            .u32(0)
            .u32(0)
            .u32(0)
            .build();
        match self.reply(index, frame) {
            Reply::Grab { status } => status,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn button(&mut self, kind: InputKind, button: u8) -> Vec<Outbound> {
        let time = self.server.now();
        self.server.inject_input_event(RawInput {
            kind,
            detail: button,
            root_x: 50,
            root_y: 50,
            modifiers: 0,
            time,
        })
    }
}

fn event_codes_for(out: &[Outbound], client: ClientId) -> Vec<u8> {
    out.iter()
        .filter(|o| o.client == client)
        .filter_map(|o| match &o.message {
            Message::Event { event, .. } => Some(event.code()),
            _ => None,
        })
        .collect()
}

fn events_for(out: &[Outbound], client: ClientId) -> Vec<&Event> {
    out.iter()
        .filter(|o| o.client == client)
        .filter_map(|o| match &o.message {
            Message::Event { event, .. } => Some(event),
            _ => None,
        })
        .collect()
}

const BUTTON_PRESS: u8 = 4;
const BUTTON_RELEASE: u8 = 5;
const DESTROY_NOTIFY: u8 = 17;
const PROPERTY_NOTIFY: u8 = 28;
const SELECTION_REQUEST: u8 = 30;
const SELECTION_NOTIFY: u8 = 31;

#[test]
fn test_resource_ids_are_unique_per_client() {
    let mut h = Harness::new(2);
    let root = h.server.root();
    let w = h.create_window(0, 1, root);

    // Reusing a live id is IDChoice, even for another kind
    let out = h.send(
        0,
        Frame::new(53, 24).u32(w.xid()).u32(root.xid()).u16(8).u16(8).build(),
    );
    match &out[0].message {
        Message::Error(err) => assert_eq!(err.code, ErrorCode::IDChoice),
        other => panic!("unexpected {:?}", other),
    }

    // Ids outside the client's own range are IDChoice too
    let foreign = h.window(1, 1);
    let out = h.send(
        0,
        Frame::new(53, 24).u32(foreign.xid()).u32(root.xid()).u16(8).u16(8).build(),
    );
    match &out[0].message {
        Message::Error(err) => assert_eq!(err.code, ErrorCode::IDChoice),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_destroy_cascades_children_first() {
    let mut h = Harness::new(2);
    let root = h.server.root();
    let before = h.server.window_tree().len();
    let parent = h.create_window(0, 1, root);
    let child = h.create_window(0, 2, parent);
    let grandchild = h.create_window(0, 3, child);
    h.set_string_property(0, child, Atom::WM_NAME, b"child");
    h.set_string_property(0, grandchild, Atom::WM_NAME, b"grandchild");
    h.select(1, parent, event_mask::SUBSTRUCTURE_NOTIFY);
    assert_eq!(h.server.window_tree().len(), before + 3);

    let watcher = h.id(1);
    let out = h.send(0, Frame::new(4, 0).u32(parent.xid()).build());
    assert_eq!(h.server.window_tree().len(), before);
    for w in [parent, child, grandchild] {
        assert!(!h.server.window_tree().contains(w));
    }
    assert_eq!(h.server.resource_count(h.id(0)), 0);

    let notifies: Vec<&Event> = events_for(&out, watcher)
        .into_iter()
        .filter(|e| e.code() == DESTROY_NOTIFY)
        .collect();
    assert_eq!(notifies.len(), 1);
    match notifies[0] {
        Event::DestroyNotify { window, .. } => assert_eq!(*window, child),
        other => panic!("unexpected {:?}", other),
    }

    // Freed ids may be reused, and come back without the old properties
    let child = h.create_window(0, 2, root);
    let grandchild = h.create_window(0, 3, child);
    assert!(h.list_properties(0, child).is_empty());
    assert!(h.list_properties(0, grandchild).is_empty());
}

#[test]
fn test_pointer_grab_is_exclusive() {
    let mut h = Harness::new(2);
    let root = h.server.root();
    assert_eq!(h.grab_pointer(0, root), GrabStatus::Success);
    assert_eq!(h.grab_pointer(1, root), GrabStatus::AlreadyGrabbed);
    assert_eq!(h.server.pointer_grab().map(|g| g.client), Some(h.id(0)));

    // UngrabPointer by a non-holder is ignored
    h.send(1, Frame::new(27, 0).u32(0).build());
    assert_eq!(h.server.pointer_grab().map(|g| g.client), Some(h.id(0)));
    h.send(0, Frame::new(27, 0).u32(0).build());
    assert!(h.server.pointer_grab().is_none());
}

#[test]
fn test_active_grab_takes_precedence_over_selection() {
    let mut h = Harness::new(2);
    let root = h.server.root();
    let target = h.create_window(1, 1, root);
    h.send(1, Frame::new(8, 0).u32(target.xid()).build());
    h.select(1, target, event_mask::BUTTON_PRESS | event_mask::BUTTON_RELEASE);

    // Without a grab the selecting client gets the press
    let out = h.button(InputKind::ButtonPress, 1);
    assert_eq!(event_codes_for(&out, h.id(1)), vec![BUTTON_PRESS]);
    h.button(InputKind::ButtonRelease, 1);

    assert_eq!(h.grab_pointer(0, root), GrabStatus::Success);
    let out = h.button(InputKind::ButtonPress, 1);
    assert_eq!(event_codes_for(&out, h.id(0)), vec![BUTTON_PRESS]);
    assert!(event_codes_for(&out, h.id(1)).is_empty());
}

#[test]
fn test_passive_grab_promotes_and_releases() {
    let mut h = Harness::new(1);
    let root = h.server.root();
    let frame = Frame::new(28, 0)
        .u32(root.xid())
        .u16((event_mask::BUTTON_PRESS | event_mask::BUTTON_RELEASE) as u16)
        .u8(1)
        .u8(1)
        .u32(0)
        .u32(0)
        .u8(1)
        .u8(0)
        .u16(0x8000)
        .build();
    assert!(h.send(0, frame).is_empty());
    assert!(h.server.pointer_grab().is_none());

    let out = h.button(InputKind::ButtonPress, 1);
    assert_eq!(event_codes_for(&out, h.id(0)), vec![BUTTON_PRESS]);
    assert_eq!(h.server.pointer_grab().map(|g| g.client), Some(h.id(0)));

    let out = h.button(InputKind::ButtonRelease, 1);
    assert_eq!(event_codes_for(&out, h.id(0)), vec![BUTTON_RELEASE]);
    assert!(h.server.pointer_grab().is_none());
}

#[test]
fn test_intern_atom_is_idempotent_across_clients() {
    let mut h = Harness::new(2);
    assert_eq!(h.intern(0, "_NET_WM_NAME", true), Atom::NONE);
    let a = h.intern(0, "_NET_WM_NAME", false);
    let b = h.intern(1, "_NET_WM_NAME", false);
    let c = h.intern(1, "_NET_WM_NAME", true);
    assert_ne!(a, Atom::NONE);
    assert_eq!(a, b);
    assert_eq!(b, c);
    // Predefined atoms keep their fixed values
    assert_eq!(h.intern(1, "PRIMARY", true), Atom::PRIMARY);
}

#[test]
fn test_selection_round_trip() {
    let mut h = Harness::new(2);
    let root = h.server.root();
    let owner_window = h.create_window(0, 1, root);
    let requestor = h.create_window(1, 1, root);

    h.send(
        0,
        Frame::new(22, 0)
            .u32(owner_window.xid())
            .u32(Atom::PRIMARY.get())
            .u32(0)
            .build(),
    );
    match h.reply(1, Frame::new(23, 0).u32(Atom::PRIMARY.get()).build()) {
        Reply::GetSelectionOwner { owner } => assert_eq!(owner, owner_window),
        other => panic!("unexpected {:?}", other),
    }

    let property = h.intern(1, "XSEL_DATA", false);
    let out = h.send(
        1,
        Frame::new(24, 0)
            .u32(requestor.xid())
            .u32(Atom::PRIMARY.get())
            .u32(Atom::STRING.get())
            .u32(property.get())
            .u32(0)
            .build(),
    );
    assert_eq!(event_codes_for(&out, h.id(0)), vec![SELECTION_REQUEST]);

    // Ownership dies with the owner's connection
    let owner = h.id(0);
    h.server.client_disconnected(owner);
    match h.reply(1, Frame::new(23, 0).u32(Atom::PRIMARY.get()).build()) {
        Reply::GetSelectionOwner { owner } => assert_eq!(owner, Window::NONE),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_atom_names_are_byte_strings() {
    let mut h = Harness::new(2);
    // Latin-1 names that are not valid UTF-8
    let e_acute = h.intern_bytes(0, &[0xE9], false);
    let y_umlaut = h.intern_bytes(0, &[0xFF], false);
    assert_ne!(e_acute, Atom::NONE);
    assert_ne!(e_acute, y_umlaut);
    assert_eq!(h.intern_bytes(1, &[0xE9], true), e_acute);
    assert_eq!(h.atom_name(1, e_acute), vec![0xE9]);
    assert_eq!(h.atom_name(1, y_umlaut), vec![0xFF]);
}

#[test]
fn test_convert_unowned_selection_notifies_without_property() {
    let mut h = Harness::new(1);
    let root = h.server.root();
    let requestor = h.create_window(0, 1, root);
    let property = h.intern(0, "XSEL_DATA", false);

    let out = h.convert(0, requestor, Atom::SECONDARY, Atom::STRING, property);
    let events = events_for(&out, h.id(0));
    assert_eq!(events.len(), 1);
    match events[0] {
        Event::SelectionNotify {
            requestor: r,
            selection,
            target,
            property,
            ..
        } => {
            assert_eq!(*r, requestor);
            assert_eq!(*selection, Atom::SECONDARY);
            assert_eq!(*target, Atom::STRING);
            assert_eq!(*property, Atom::NONE);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(h.list_properties(0, requestor).is_empty());
}

#[test]
fn test_owner_change_clears_previous_owner() {
    let mut h = Harness::new(2);
    let root = h.server.root();
    let first = h.create_window(0, 1, root);
    let second = h.create_window(1, 1, root);
    assert!(h.set_owner(0, first, Atom::PRIMARY).is_empty());

    // Taking it over from the same client is silent
    let again = h.create_window(0, 2, root);
    assert!(h.set_owner(0, again, Atom::PRIMARY).is_empty());

    let out = h.set_owner(1, second, Atom::PRIMARY);
    assert!(events_for(&out, h.id(1)).is_empty());
    let events = events_for(&out, h.id(0));
    assert_eq!(events.len(), 1);
    match events[0] {
        Event::SelectionClear { owner, selection, .. } => {
            assert_eq!(*owner, again);
            assert_eq!(*selection, Atom::PRIMARY);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_host_conversion_writes_property_before_notify() {
    let mut backend = NullBackend::new();
    backend.set_host_selection("CLIPBOARD", b"hello");
    let mut h = Harness::with_backend(backend, 1);
    let root = h.server.root();
    let requestor = h.create_window(0, 1, root);
    h.select(0, requestor, event_mask::PROPERTY_CHANGE);
    let clipboard = h.intern(0, "CLIPBOARD", false);
    let utf8 = h.intern(0, "UTF8_STRING", false);
    let property = h.intern(0, "XSEL_DATA", false);

    let out = h.convert(0, requestor, clipboard, utf8, property);
    assert_eq!(event_codes_for(&out, h.id(0)), vec![PROPERTY_NOTIFY, SELECTION_NOTIFY]);
    match events_for(&out, h.id(0))[1] {
        Event::SelectionNotify { property: p, .. } => assert_eq!(*p, property),
        other => panic!("unexpected {:?}", other),
    }

    let frame = Frame::new(20, 0)
        .u32(requestor.xid())
        .u32(property.get())
        .u32(0)
        .u32(0)
        .u32(16)
        .build();
    match h.reply(0, frame) {
        Reply::GetProperty {
            format,
            type_,
            bytes_after,
            value,
        } => {
            assert_eq!(format, 8);
            assert_eq!(type_, utf8);
            assert_eq!(bytes_after, 0);
            assert_eq!(value, b"hello");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_sequence_numbers_increase_with_every_request() {
    let mut h = Harness::new(1);
    let mut last = 0u16;
    for i in 0..5 {
        // Alternate a request with a reply and one without
        let frame = if i % 2 == 0 {
            Frame::new(43, 0).build()
        } else {
            Frame::new(127, 0).build()
        };
        let out = h.send(0, frame);
        for o in out {
            if let Message::Reply { sequence, .. } = o.message {
                assert!(sequence > last);
                last = sequence;
            }
        }
    }
    assert_eq!(last, 5);
    assert_eq!(h.server.client_info(h.id(0)).map(|i| i.last_sequence), Some(5));
}

#[test]
fn test_disconnect_releases_everything() {
    let mut h = Harness::new(2);
    let root = h.server.root();
    let w = h.create_window(0, 1, root);
    h.send(
        0,
        Frame::new(53, 24)
            .u32(ResourceId::new(h.id(0), 2).xid())
            .u32(w.xid())
            .u16(4)
            .u16(4)
            .build(),
    );
    assert_eq!(h.server.resource_count(h.id(0)), 2);
    assert_eq!(h.grab_pointer(0, root), GrabStatus::Success);

    let gone = h.id(0);
    h.server.client_disconnected(gone);
    assert_eq!(h.server.resource_count(gone), 0);
    assert!(!h.server.window_tree().contains(w));
    assert!(h.server.pointer_grab().is_none());
    assert_eq!(h.grab_pointer(1, root), GrabStatus::Success);
}
