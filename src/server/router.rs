//! Input event routing
//!
//! One routing pass decides who receives a raw input event: the holder of
//! an active grab (plus ordinary selectors when owner-events is set), the
//! client of a passive grab that the event activates, or the first window
//! up the hierarchy with a selecting client. The same pass serves the core
//! pointer and keyboard and every extension device; the caller supplies the
//! selection table and grab lists that belong to the device.

use super::grabs::{ActiveGrab, PassiveGrabTable};
use super::window::WindowTree;
use super::{Message, Outbound};
use crate::protocol::xinput::{xi2, xi_event, DeviceEvent, Xi2DeviceEvent};
use crate::protocol::*;

/// Raw input transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    KeyPress,
    KeyRelease,
    ButtonPress,
    ButtonRelease,
    Motion,
}

impl InputKind {
    pub fn is_press(&self) -> bool {
        matches!(self, InputKind::KeyPress | InputKind::ButtonPress)
    }

    pub fn is_release(&self) -> bool {
        matches!(self, InputKind::KeyRelease | InputKind::ButtonRelease)
    }

    pub fn is_key(&self) -> bool {
        matches!(self, InputKind::KeyPress | InputKind::KeyRelease)
    }

    fn xi_offset(&self) -> u8 {
        match self {
            InputKind::KeyPress => xi_event::DEVICE_KEY_PRESS,
            InputKind::KeyRelease => xi_event::DEVICE_KEY_RELEASE,
            InputKind::ButtonPress => xi_event::DEVICE_BUTTON_PRESS,
            InputKind::ButtonRelease => xi_event::DEVICE_BUTTON_RELEASE,
            InputKind::Motion => xi_event::DEVICE_MOTION_NOTIFY,
        }
    }

    fn xi2_type(&self) -> u16 {
        match self {
            InputKind::KeyPress => xi2::KEY_PRESS,
            InputKind::KeyRelease => xi2::KEY_RELEASE,
            InputKind::ButtonPress => xi2::BUTTON_PRESS,
            InputKind::ButtonRelease => xi2::BUTTON_RELEASE,
            InputKind::Motion => xi2::MOTION,
        }
    }
}

/// A transition fed in by the host. `time` may be `CurrentTime`; the
/// server stamps it on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInput {
    pub kind: InputKind,
    /// Button or keycode; ignored for motion
    pub detail: u8,
    pub root_x: i16,
    pub root_y: i16,
    /// Keyboard modifier state (low eight bits)
    pub modifiers: u16,
    pub time: Timestamp,
}

/// Event encoding a recipient asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Via {
    Core,
    XInput,
    XInput2,
}

impl Via {
    /// Selection bits that make `kind` interesting, in this channel's mask
    /// space. `buttons` is the button state before the event.
    pub fn mask_for(&self, kind: InputKind, buttons: u16) -> u32 {
        match self {
            Via::Core => match kind {
                InputKind::KeyPress => event_mask::KEY_PRESS,
                InputKind::KeyRelease => event_mask::KEY_RELEASE,
                InputKind::ButtonPress => event_mask::BUTTON_PRESS,
                InputKind::ButtonRelease => event_mask::BUTTON_RELEASE,
                InputKind::Motion => {
                    let mut mask = event_mask::POINTER_MOTION;
                    if buttons & 0x1F00 != 0 {
                        mask |= event_mask::BUTTON_MOTION;
                        for b in 1..=5u8 {
                            if buttons & modifier_mask::button(b) != 0 {
                                mask |= event_mask::button_motion(b);
                            }
                        }
                    }
                    mask
                }
            },
            Via::XInput => 1 << kind.xi_offset(),
            Via::XInput2 => xi2::mask_bit(kind.xi2_type()),
        }
    }
}

/// One delivery target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
    pub client: ClientId,
    /// Window the event is reported relative to
    pub window: Window,
    pub via: Via,
}

/// Event selections consulted by routing
pub trait DeliveryTable {
    /// Clients whose selection on `window` covers the event, with the
    /// channel each selected it through
    fn selecting_clients(&self, window: Window, kind: InputKind, buttons: u16) -> Vec<(ClientId, Via)>;

    /// The window's do-not-propagate setting stops the event here
    fn propagation_blocked(&self, window: Window, kind: InputKind, buttons: u16) -> bool;

    /// Full mask `client` selected on `window` through `via`
    fn selection_mask(&self, window: Window, client: ClientId, via: Via) -> u32;
}

/// Walk from `start` toward the root until some client accepts the event.
/// The walk never climbs past `stop_at`.
pub fn propagate(
    tree: &WindowTree,
    table: &dyn DeliveryTable,
    start: Window,
    stop_at: Option<Window>,
    kind: InputKind,
    buttons: u16,
) -> Vec<Recipient> {
    let mut window = start;
    loop {
        if !tree.contains(window) {
            return Vec::new();
        }
        let clients = table.selecting_clients(window, kind, buttons);
        if !clients.is_empty() {
            return clients
                .into_iter()
                .map(|(client, via)| Recipient {
                    client,
                    window,
                    via,
                })
                .collect();
        }
        if table.propagation_blocked(window, kind, buttons) || Some(window) == stop_at {
            return Vec::new();
        }
        match tree.parent(window) {
            Some(parent) => window = parent,
            None => return Vec::new(),
        }
    }
}

/// Everything one routing pass reads
pub struct RouteContext<'a> {
    pub tree: &'a WindowTree,
    pub table: &'a dyn DeliveryTable,
    pub passive: &'a PassiveGrabTable,
    /// Window under the pointer, or the focus target for keys
    pub event_window: Window,
    pub stop_at: Option<Window>,
    /// Button state before the event
    pub buttons: u16,
    pub modifiers: u16,
    /// Replay: passive grabs at and above this window are skipped
    pub skip_through: Option<Window>,
}

/// Routing outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Reported through the active grab
    Grabbed(Vec<Recipient>),
    /// A passive grab matched; the caller installs it
    Activate(ActiveGrab, Vec<Recipient>),
    /// Ordinary hierarchy delivery
    Normal(Vec<Recipient>),
}

impl Decision {
    pub fn recipients(&self) -> &[Recipient] {
        match self {
            Decision::Grabbed(r) | Decision::Activate(_, r) | Decision::Normal(r) => r,
        }
    }
}

/// Recipients under an active grab. With owner-events the ordinary
/// selectors come first; the grabbing client is reported relative to the
/// grab window only when it was not already reached. No client receives
/// the event twice.
pub fn grab_recipients(ctx: &RouteContext<'_>, grab: &ActiveGrab, kind: InputKind) -> Vec<Recipient> {
    let mut out: Vec<Recipient> = Vec::new();
    if grab.owner_events {
        for r in propagate(ctx.tree, ctx.table, ctx.event_window, ctx.stop_at, kind, ctx.buttons) {
            if !out.iter().any(|o| o.client == r.client) {
                out.push(r);
            }
        }
    }
    let wanted = grab.via.mask_for(kind, ctx.buttons);
    if grab.event_mask & wanted != 0 && !out.iter().any(|r| r.client == grab.client) {
        out.push(Recipient {
            client: grab.client,
            window: grab.window,
            via: grab.via,
        });
    }
    out
}

/// Decide who receives `input`
pub fn route(ctx: &RouteContext<'_>, active: Option<&ActiveGrab>, input: &RawInput) -> Decision {
    if let Some(grab) = active {
        return Decision::Grabbed(grab_recipients(ctx, grab, input.kind));
    }

    if input.kind.is_press() {
        let path = ctx.tree.path_from_root(ctx.event_window);
        let start = ctx
            .skip_through
            .and_then(|w| path.iter().position(|p| *p == w))
            .map(|i| i + 1)
            .unwrap_or(0);
        for window in &path[start..] {
            if let Some(passive) = ctx.passive.find(*window, input.detail, ctx.modifiers) {
                let grab = passive.activate(input.detail, input.time);
                log::debug!(
                    "Passive grab on 0x{:08x} activated for client {} (detail {})",
                    window.xid(),
                    grab.client,
                    input.detail
                );
                let recipients = grab_recipients(ctx, &grab, input.kind);
                return Decision::Activate(grab, recipients);
            }
        }
    }

    Decision::Normal(propagate(
        ctx.tree,
        ctx.table,
        ctx.event_window,
        ctx.stop_at,
        input.kind,
        ctx.buttons,
    ))
}

/// Build the per-recipient events for one routed input.
///
/// `pointer_window` is the deepest window under the pointer; each event's
/// child field names the recipient window's child on the way to it.
pub fn address(
    tree: &WindowTree,
    recipients: &[Recipient],
    input: &RawInput,
    pointer_window: Window,
    state: u16,
    device: u8,
) -> Vec<Outbound> {
    recipients
        .iter()
        .map(|r| {
            let (ox, oy) = tree.absolute_origin(r.window);
            let data = InputEventData {
                detail: if input.kind == InputKind::Motion { 0 } else { input.detail },
                time: input.time,
                root: tree.root(),
                event: r.window,
                child: tree.child_towards(r.window, pointer_window),
                root_x: input.root_x,
                root_y: input.root_y,
                event_x: (input.root_x as i32 - ox) as i16,
                event_y: (input.root_y as i32 - oy) as i16,
                state,
                same_screen: true,
            };
            log::trace!(
                "{:?} {:?} -> client {} window 0x{:08x}",
                r.via,
                input.kind,
                r.client,
                r.window.xid()
            );
            Outbound {
                client: r.client,
                message: Message::Event {
                    event: input_event(r.via, device, input.kind, data),
                    synthetic: false,
                },
            }
        })
        .collect()
}

fn input_event(via: Via, device: u8, kind: InputKind, data: InputEventData) -> Event {
    match via {
        Via::Core => match kind {
            InputKind::KeyPress => Event::KeyPress(data),
            InputKind::KeyRelease => Event::KeyRelease(data),
            InputKind::ButtonPress => Event::ButtonPress(data),
            InputKind::ButtonRelease => Event::ButtonRelease(data),
            InputKind::Motion => Event::MotionNotify(data),
        },
        Via::XInput => Event::Device(DeviceEvent {
            offset: kind.xi_offset(),
            device,
            data,
        }),
        Via::XInput2 => Event::Xi2(Xi2DeviceEvent {
            evtype: kind.xi2_type(),
            device: device as u16,
            source: device as u16,
            time: data.time,
            detail: data.detail as u32,
            root: data.root,
            event: data.event,
            child: data.child,
            root_x: data.root_x,
            root_y: data.root_y,
            event_x: data.event_x,
            event_y: data.event_y,
            // XI2 button masks are indexed by button number
            buttons: (((data.state >> 8) & 0x1F) as u32) << 1,
            modifiers: (data.state & modifier_mask::KEY_MASK) as u32,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::grabs::{GrabOrigin, PassiveGrab};
    use crate::server::window::WindowTree;

    fn tree() -> (WindowTree, Window, Window) {
        let mut tree = WindowTree::for_tests(200, 200);
        let top = Window::new(0x20_0001);
        let inner = Window::new(0x40_0001);
        tree.add_for_tests(top, tree.root(), 10, 10, 100, 100);
        tree.add_for_tests(inner, top, 5, 5, 20, 20);
        (tree, top, inner)
    }

    fn press(button: u8) -> RawInput {
        RawInput {
            kind: InputKind::ButtonPress,
            detail: button,
            root_x: 20,
            root_y: 20,
            modifiers: 0,
            time: Timestamp::new(10),
        }
    }

    fn ctx<'a>(tree: &'a WindowTree, passive: &'a PassiveGrabTable, at: Window) -> RouteContext<'a> {
        RouteContext {
            tree,
            table: tree,
            passive,
            event_window: at,
            stop_at: None,
            buttons: 0,
            modifiers: 0,
            skip_through: None,
        }
    }

    #[test]
    fn test_motion_mask_includes_held_buttons() {
        let held = modifier_mask::BUTTON1 | modifier_mask::BUTTON3;
        let mask = Via::Core.mask_for(InputKind::Motion, held);
        assert_ne!(mask & event_mask::BUTTON_MOTION, 0);
        assert_ne!(mask & event_mask::BUTTON1_MOTION, 0);
        assert_ne!(mask & event_mask::BUTTON3_MOTION, 0);
        assert_eq!(mask & event_mask::BUTTON2_MOTION, 0);
        assert_eq!(Via::Core.mask_for(InputKind::Motion, 0), event_mask::POINTER_MOTION);
    }

    #[test]
    fn test_propagates_to_first_selecting_ancestor() {
        let (mut tree, top, inner) = tree();
        tree.select_events(top, 1, event_mask::BUTTON_PRESS).unwrap();
        let passive = PassiveGrabTable::default();
        let decision = route(&ctx(&tree, &passive, inner), None, &press(1));
        assert_eq!(
            decision,
            Decision::Normal(vec![Recipient {
                client: 1,
                window: top,
                via: Via::Core
            }])
        );
    }

    #[test]
    fn test_do_not_propagate_stops_walk() {
        let (mut tree, top, inner) = tree();
        tree.select_events(top, 1, event_mask::BUTTON_PRESS).unwrap();
        tree.get_mut(inner).unwrap().attributes.do_not_propagate = event_mask::BUTTON_PRESS;
        let passive = PassiveGrabTable::default();
        let decision = route(&ctx(&tree, &passive, inner), None, &press(1));
        assert_eq!(decision, Decision::Normal(vec![]));
    }

    #[test]
    fn test_owner_events_delivers_once_per_client() {
        let (mut tree, top, inner) = tree();
        tree.select_events(inner, 1, event_mask::BUTTON_PRESS).unwrap();
        let passive = PassiveGrabTable::default();
        let grab = ActiveGrab {
            client: 2,
            window: top,
            owner_events: true,
            event_mask: event_mask::BUTTON_PRESS,
            via: Via::Core,
            this_mode: GrabMode::Asynchronous,
            other_mode: GrabMode::Asynchronous,
            confine_to: Window::NONE,
            cursor: Cursor::NONE,
            time: Timestamp::new(1),
            origin: GrabOrigin::Explicit,
        };
        let recipients = route(&ctx(&tree, &passive, inner), Some(&grab), &press(1));
        assert_eq!(recipients.recipients().len(), 2);

        // The grabbing client itself selecting the window is reached once
        let mut same = grab.clone();
        same.client = 1;
        let recipients = route(&ctx(&tree, &passive, inner), Some(&same), &press(1));
        assert_eq!(
            recipients.recipients(),
            &[Recipient {
                client: 1,
                window: inner,
                via: Via::Core
            }]
        );
    }

    #[test]
    fn test_passive_grab_found_from_root_down() {
        let (tree, top, inner) = tree();
        let mut passive = PassiveGrabTable::default();
        for (client, window) in [(1, top), (2, inner)] {
            passive
                .add(PassiveGrab::for_tests(client, window, 0, modifier_mask::ANY_MODIFIER))
                .unwrap();
        }
        match route(&ctx(&tree, &passive, inner), None, &press(3)) {
            Decision::Activate(grab, recipients) => {
                assert_eq!(grab.client, 1);
                assert_eq!(grab.origin, GrabOrigin::Passive { detail: 3 });
                assert_eq!(recipients[0].window, top);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Replay skips the outer grab
        let mut replay = ctx(&tree, &passive, inner);
        replay.skip_through = Some(top);
        match route(&replay, None, &press(3)) {
            Decision::Activate(grab, _) => assert_eq!(grab.client, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_address_computes_relative_coordinates() {
        let (tree, top, inner) = tree();
        let out = address(
            &tree,
            &[Recipient {
                client: 1,
                window: top,
                via: Via::Core,
            }],
            &press(1),
            inner,
            0,
            2,
        );
        match &out[0].message {
            Message::Event {
                event: Event::ButtonPress(data),
                synthetic: false,
            } => {
                assert_eq!((data.event_x, data.event_y), (10, 10));
                assert_eq!(data.child, inner);
                assert_eq!(data.detail, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
