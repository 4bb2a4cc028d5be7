//! Grab records and per-device freeze state
//!
//! Every input device (the core pointer, the core keyboard, each extension
//! device) owns one [`DeviceState`]: a single active-grab slot, its freeze
//! state and the queue of events that arrived while frozen. Passive grabs
//! are kept per window in a [`PassiveGrabTable`] next to the device.

use super::router::{RawInput, Via};
use crate::protocol::*;
use std::collections::{HashMap, VecDeque};

/// How an active grab came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOrigin {
    /// GrabPointer, GrabKeyboard, GrabDevice
    Explicit,
    /// Activated by a press; ends with the gesture
    Passive { detail: u8 },
}

/// The one active grab a device may have
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGrab {
    pub client: ClientId,
    pub window: Window,
    pub owner_events: bool,
    /// Interpreted in `via`'s mask space
    pub event_mask: u32,
    pub via: Via,
    /// Mode of the grabbed device
    pub this_mode: GrabMode,
    /// Mode of the paired device (keyboard for a pointer grab and back)
    pub other_mode: GrabMode,
    pub confine_to: Window,
    pub cursor: Cursor,
    pub time: Timestamp,
    pub origin: GrabOrigin,
}

/// Button or key a passive grab triggers on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    Any,
    Exact(u8),
}

impl Detail {
    /// 0 is AnyButton / AnyKey on the wire
    pub fn from_wire(value: u8) -> Self {
        if value == 0 {
            Detail::Any
        } else {
            Detail::Exact(value)
        }
    }

    pub fn matches(&self, detail: u8) -> bool {
        match self {
            Detail::Any => true,
            Detail::Exact(d) => *d == detail,
        }
    }

    fn overlaps(&self, other: &Detail) -> bool {
        match (self, other) {
            (Detail::Exact(a), Detail::Exact(b)) => a == b,
            _ => true,
        }
    }
}

/// Modifier combination a passive grab requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierMatch {
    Any,
    Exact(u16),
}

impl ModifierMatch {
    pub fn from_wire(value: u16) -> Self {
        if value & modifier_mask::ANY_MODIFIER != 0 {
            ModifierMatch::Any
        } else {
            ModifierMatch::Exact(value & modifier_mask::KEY_MASK)
        }
    }

    pub fn matches(&self, state: u16) -> bool {
        match self {
            ModifierMatch::Any => true,
            ModifierMatch::Exact(m) => *m == state & modifier_mask::KEY_MASK,
        }
    }

    fn overlaps(&self, other: &ModifierMatch) -> bool {
        match (self, other) {
            (ModifierMatch::Exact(a), ModifierMatch::Exact(b)) => a == b,
            _ => true,
        }
    }
}

/// A standing grab on a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveGrab {
    pub client: ClientId,
    pub window: Window,
    pub detail: Detail,
    pub modifiers: ModifierMatch,
    pub owner_events: bool,
    pub event_mask: u32,
    pub via: Via,
    pub this_mode: GrabMode,
    pub other_mode: GrabMode,
    pub confine_to: Window,
    pub cursor: Cursor,
}

impl PassiveGrab {
    pub fn matches(&self, detail: u8, modifiers: u16) -> bool {
        self.detail.matches(detail) && self.modifiers.matches(modifiers)
    }

    /// The active grab this entry turns into when `detail` triggers it
    pub fn activate(&self, detail: u8, time: Timestamp) -> ActiveGrab {
        ActiveGrab {
            client: self.client,
            window: self.window,
            owner_events: self.owner_events,
            event_mask: self.event_mask,
            via: self.via,
            this_mode: self.this_mode,
            other_mode: self.other_mode,
            confine_to: self.confine_to,
            cursor: self.cursor,
            time,
            origin: GrabOrigin::Passive { detail },
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(client: ClientId, window: Window, detail: u8, modifiers: u16) -> Self {
        PassiveGrab {
            client,
            window,
            detail: Detail::from_wire(detail),
            modifiers: ModifierMatch::from_wire(modifiers),
            owner_events: false,
            event_mask: event_mask::BUTTON_PRESS | event_mask::BUTTON_RELEASE,
            via: Via::Core,
            this_mode: GrabMode::Asynchronous,
            other_mode: GrabMode::Asynchronous,
            confine_to: Window::NONE,
            cursor: Cursor::NONE,
        }
    }
}

/// Passive grabs of one device, by window
#[derive(Debug, Clone, Default)]
pub struct PassiveGrabTable {
    by_window: HashMap<Window, Vec<PassiveGrab>>,
}

impl PassiveGrabTable {
    /// Install a grab. Another client's overlapping entry on the same
    /// window is `Access`; the client's own identical entry is replaced.
    pub fn add(&mut self, grab: PassiveGrab) -> X11Result<()> {
        let entries = self.by_window.entry(grab.window).or_default();
        let conflict = entries.iter().any(|e| {
            e.client != grab.client
                && e.detail.overlaps(&grab.detail)
                && e.modifiers.overlaps(&grab.modifiers)
        });
        if conflict {
            return Err(X11Error::bad_access());
        }
        entries.retain(|e| {
            !(e.client == grab.client && e.detail == grab.detail && e.modifiers == grab.modifiers)
        });
        entries.push(grab);
        Ok(())
    }

    /// Remove `client`'s entries on `window`. `Any` in either position
    /// removes every entry in that dimension.
    pub fn remove(&mut self, client: ClientId, window: Window, detail: Detail, modifiers: ModifierMatch) {
        if let Some(entries) = self.by_window.get_mut(&window) {
            entries.retain(|e| {
                let detail_hit = detail == Detail::Any || e.detail == detail;
                let modifier_hit = modifiers == ModifierMatch::Any || e.modifiers == modifiers;
                !(e.client == client && detail_hit && modifier_hit)
            });
            if entries.is_empty() {
                self.by_window.remove(&window);
            }
        }
    }

    pub fn find(&self, window: Window, detail: u8, modifiers: u16) -> Option<&PassiveGrab> {
        self.by_window
            .get(&window)?
            .iter()
            .find(|g| g.matches(detail, modifiers))
    }

    pub fn on_window(&self, window: Window) -> &[PassiveGrab] {
        self.by_window
            .get(&window)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn remove_window(&mut self, window: Window) {
        self.by_window.remove(&window);
    }

    pub fn remove_client(&mut self, client: ClientId) {
        self.by_window.retain(|_, entries| {
            entries.retain(|e| e.client != client);
            !entries.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.by_window.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_window.is_empty()
    }
}

/// Freeze state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freeze {
    Thawed,
    /// Events queue until the client allows them
    Frozen(ClientId),
    /// Delivering until the next press or release reaches the client
    ThawedUntilNext(ClientId),
}

impl Freeze {
    fn holder(&self) -> Option<ClientId> {
        match self {
            Freeze::Thawed => None,
            Freeze::Frozen(c) | Freeze::ThawedUntilNext(c) => Some(*c),
        }
    }
}

/// AllowEvents action on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allow {
    Async,
    Sync,
    Replay,
}

/// Event that activated a passive grab, kept for a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub input: RawInput,
    /// Button state bits held before the event arrived
    pub buttons: u16,
}

/// Grab and freeze state of one device
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub grab: Option<ActiveGrab>,
    pub freeze: Freeze,
    /// Events that arrived while frozen, oldest first
    pub queue: VecDeque<RawInput>,
    /// Event that activated the current passive grab
    pub replay: Option<Trigger>,
    pub last_grab_time: Timestamp,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState {
            grab: None,
            freeze: Freeze::Thawed,
            queue: VecDeque::new(),
            replay: None,
            last_grab_time: Timestamp::new(0),
        }
    }
}

impl DeviceState {
    pub fn is_frozen(&self) -> bool {
        matches!(self.freeze, Freeze::Frozen(_))
    }

    pub fn grabbed_by(&self, client: ClientId) -> bool {
        self.grab.as_ref().map(|g| g.client) == Some(client)
    }

    /// Status an explicit grab attempt by `client` would get
    pub fn check_grab(&self, client: ClientId, time: Timestamp, now: Timestamp, viewable: bool) -> GrabStatus {
        if let Some(grab) = &self.grab {
            if grab.client != client {
                return GrabStatus::AlreadyGrabbed;
            }
        }
        if !viewable {
            return GrabStatus::NotViewable;
        }
        if time < self.last_grab_time || time > now {
            return GrabStatus::InvalidTime;
        }
        if let Freeze::Frozen(holder) = self.freeze {
            if holder != client {
                return GrabStatus::Frozen;
            }
        }
        GrabStatus::Success
    }

    /// Install a grab. A synchronous grab freezes the device for its
    /// client; an asynchronous one lifts that client's own freeze.
    pub fn activate(&mut self, grab: ActiveGrab, trigger: Option<Trigger>) {
        self.last_grab_time = grab.time;
        self.set_mode(grab.client, grab.this_mode);
        self.replay = trigger;
        self.grab = Some(grab);
    }

    /// Apply the paired-device mode of a grab on the other device
    pub fn set_mode(&mut self, client: ClientId, mode: GrabMode) {
        if mode == GrabMode::Synchronous {
            self.freeze = Freeze::Frozen(client);
        } else if self.freeze.holder() == Some(client) {
            self.freeze = Freeze::Thawed;
        }
    }

    /// Release the grab and any freeze its client holds
    pub fn deactivate(&mut self) -> Option<ActiveGrab> {
        let grab = self.grab.take()?;
        self.release_freeze(grab.client);
        self.replay = None;
        Some(grab)
    }

    pub fn release_freeze(&mut self, client: ClientId) {
        if self.freeze.holder() == Some(client) {
            self.freeze = Freeze::Thawed;
        }
    }

    /// AllowEvents from `client`. Returns the event to replay and the grab
    /// window passive grabs must be skipped through.
    pub fn allow(&mut self, client: ClientId, action: Allow) -> Option<(Trigger, Window)> {
        if self.freeze.holder() != Some(client) {
            return None;
        }
        match action {
            Allow::Async => {
                self.freeze = Freeze::Thawed;
                None
            }
            Allow::Sync => {
                self.freeze = Freeze::ThawedUntilNext(client);
                None
            }
            Allow::Replay => {
                let passive = matches!(
                    self.grab.as_ref(),
                    Some(ActiveGrab {
                        origin: GrabOrigin::Passive { .. },
                        ..
                    })
                );
                if !passive || !self.is_frozen() || !self.grabbed_by(client) {
                    return None;
                }
                let trigger = self.replay.take();
                let grab = self.deactivate()?;
                trigger.map(|t| (t, grab.window))
            }
        }
    }

    /// A press or release reached the grabbing client: a one-shot thaw
    /// freezes again
    pub fn delivered(&mut self, input: &RawInput) {
        if let Freeze::ThawedUntilNext(client) = self.freeze {
            if input.kind.is_press() || input.kind.is_release() {
                self.freeze = Freeze::Frozen(client);
            }
        }
    }

    /// Next queued event, if the device may deliver it
    pub fn next_queued(&mut self) -> Option<RawInput> {
        if self.is_frozen() {
            return None;
        }
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router::InputKind;

    fn grab(client: ClientId, mode: GrabMode, origin: GrabOrigin) -> ActiveGrab {
        ActiveGrab {
            client,
            window: Window::new(0x20_0001),
            owner_events: false,
            event_mask: event_mask::BUTTON_PRESS,
            via: Via::Core,
            this_mode: mode,
            other_mode: GrabMode::Asynchronous,
            confine_to: Window::NONE,
            cursor: Cursor::NONE,
            time: Timestamp::new(5),
            origin,
        }
    }

    fn input(kind: InputKind) -> RawInput {
        RawInput {
            kind,
            detail: 1,
            root_x: 0,
            root_y: 0,
            modifiers: 0,
            time: Timestamp::new(6),
        }
    }

    #[test]
    fn test_passive_conflict_is_access() {
        let window = Window::new(0x20_0001);
        let mut table = PassiveGrabTable::default();
        table.add(PassiveGrab::for_tests(1, window, 1, 0)).unwrap();
        let err = table
            .add(PassiveGrab::for_tests(2, window, 0, modifier_mask::ANY_MODIFIER))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Access);
        // Different detail and modifiers do not overlap
        table
            .add(PassiveGrab::for_tests(2, window, 2, modifier_mask::SHIFT))
            .unwrap();
        // Same client re-grabbing replaces its entry
        table.add(PassiveGrab::for_tests(1, window, 1, 0)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_passive_remove_with_wildcards() {
        let window = Window::new(0x20_0001);
        let mut table = PassiveGrabTable::default();
        table.add(PassiveGrab::for_tests(1, window, 1, 0)).unwrap();
        table.add(PassiveGrab::for_tests(1, window, 2, 0)).unwrap();
        table.remove(1, window, Detail::Exact(1), ModifierMatch::Any);
        assert_eq!(table.len(), 1);
        table.remove(1, window, Detail::Any, ModifierMatch::Any);
        assert!(table.is_empty());
    }

    #[test]
    fn test_modifier_match_ignores_buttons() {
        let m = ModifierMatch::from_wire(modifier_mask::CONTROL);
        assert!(m.matches(modifier_mask::CONTROL | modifier_mask::BUTTON1));
        assert!(!m.matches(modifier_mask::SHIFT));
        assert!(ModifierMatch::from_wire(modifier_mask::ANY_MODIFIER).matches(0xFF));
    }

    #[test]
    fn test_check_grab_statuses() {
        let mut state = DeviceState::default();
        let now = Timestamp::new(100);
        assert_eq!(state.check_grab(1, Timestamp::new(10), now, true), GrabStatus::Success);
        assert_eq!(state.check_grab(1, Timestamp::new(10), now, false), GrabStatus::NotViewable);
        assert_eq!(state.check_grab(1, Timestamp::new(200), now, true), GrabStatus::InvalidTime);

        state.activate(grab(1, GrabMode::Synchronous, GrabOrigin::Explicit), None);
        assert_eq!(state.check_grab(2, Timestamp::new(10), now, true), GrabStatus::AlreadyGrabbed);
        assert_eq!(state.check_grab(1, Timestamp::new(4), now, true), GrabStatus::InvalidTime);
        state.deactivate();
        state.freeze = Freeze::Frozen(1);
        assert_eq!(state.check_grab(2, Timestamp::new(10), now, true), GrabStatus::Frozen);
    }

    #[test]
    fn test_sync_allow_refreezes_after_next_press() {
        let mut state = DeviceState::default();
        state.activate(grab(1, GrabMode::Synchronous, GrabOrigin::Explicit), None);
        assert!(state.is_frozen());

        // Another client cannot thaw it
        assert!(state.allow(2, Allow::Async).is_none());
        assert!(state.is_frozen());

        state.allow(1, Allow::Sync);
        assert!(!state.is_frozen());
        state.delivered(&input(InputKind::Motion));
        assert!(!state.is_frozen());
        state.delivered(&input(InputKind::ButtonPress));
        assert_eq!(state.freeze, Freeze::Frozen(1));
    }

    #[test]
    fn test_replay_needs_passive_grab() {
        let mut state = DeviceState::default();
        state.activate(grab(1, GrabMode::Synchronous, GrabOrigin::Explicit), None);
        assert!(state.allow(1, Allow::Replay).is_none());
        assert!(state.grab.is_some());

        let trigger = Trigger {
            input: input(InputKind::ButtonPress),
            buttons: modifier_mask::BUTTON3,
        };
        state.activate(
            grab(1, GrabMode::Synchronous, GrabOrigin::Passive { detail: 1 }),
            Some(trigger),
        );
        let (replayed, window) = state.allow(1, Allow::Replay).unwrap();
        assert_eq!(replayed, trigger);
        assert_eq!(replayed.buttons, modifier_mask::BUTTON3);
        assert_eq!(window, Window::new(0x20_0001));
        assert!(state.grab.is_none());
        assert_eq!(state.freeze, Freeze::Thawed);
    }

    #[test]
    fn test_queue_drains_only_when_thawed() {
        let mut state = DeviceState::default();
        state.freeze = Freeze::Frozen(1);
        state.queue.push_back(input(InputKind::Motion));
        assert!(state.next_queued().is_none());
        state.allow(1, Allow::Async);
        assert!(state.next_queued().is_some());
        assert!(state.next_queued().is_none());
    }
}
