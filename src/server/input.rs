//! Core pointer and keyboard
//!
//! Holds the pointer position, button and modifier state, input focus, and
//! the grab/freeze state of both core devices. Host transitions enter
//! through [`Server::inject_input_event`]; a frozen device queues them
//! until the grabbing client sends AllowEvents.

use super::grabs::{
    ActiveGrab, Allow, DeviceState, Detail, GrabOrigin, ModifierMatch, PassiveGrab, PassiveGrabTable, Trigger,
};
use super::router::{address, route, Decision, DeliveryTable, InputKind, RawInput, RouteContext, Via};
use super::{Outbound, Server};
use crate::protocol::*;

/// Keyboard focus target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    None,
    PointerRoot,
    Window(Window),
}

impl Focus {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => Focus::None,
            1 => Focus::PointerRoot,
            xid => Focus::Window(Window::new(xid)),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Focus::None => 0,
            Focus::PointerRoot => 1,
            Focus::Window(w) => w.xid(),
        }
    }
}

/// Revert-to modes of SetInputFocus
pub mod revert_to {
    pub const NONE: u8 = 0;
    pub const POINTER_ROOT: u8 = 1;
    pub const PARENT: u8 = 2;
}

/// State of the core pointer and keyboard
#[derive(Debug, Clone)]
pub struct CoreInput {
    pub pointer: DeviceState,
    pub keyboard: DeviceState,
    pub button_grabs: PassiveGrabTable,
    pub key_grabs: PassiveGrabTable,
    pub focus: Focus,
    pub revert_to: u8,
    pub focus_time: Timestamp,
    pub root_x: i16,
    pub root_y: i16,
    /// Held buttons as state bits
    pub buttons: u16,
    pub modifiers: u16,
}

impl Default for CoreInput {
    fn default() -> Self {
        CoreInput {
            pointer: DeviceState::default(),
            keyboard: DeviceState::default(),
            button_grabs: PassiveGrabTable::default(),
            key_grabs: PassiveGrabTable::default(),
            focus: Focus::PointerRoot,
            revert_to: revert_to::POINTER_ROOT,
            focus_time: Timestamp::new(0),
            root_x: 0,
            root_y: 0,
            buttons: 0,
            modifiers: 0,
        }
    }
}

impl CoreInput {
    pub fn state(&self) -> u16 {
        self.buttons | (self.modifiers & modifier_mask::KEY_MASK)
    }

    /// The device `kind` belongs to and its partner
    fn devices(&mut self, keyboard: bool) -> (&mut DeviceState, &mut DeviceState) {
        if keyboard {
            (&mut self.keyboard, &mut self.pointer)
        } else {
            (&mut self.pointer, &mut self.keyboard)
        }
    }
}

/// `time` is neither before the last grab nor in the future
fn time_in_window(time: Timestamp, since: Timestamp, now: Timestamp) -> bool {
    time >= since && time <= now
}

impl Server {
    /// Deepest viewable window under the pointer
    pub fn pointer_window(&self) -> Window {
        self.windows
            .window_at(self.input.root_x as i32, self.input.root_y as i32)
    }

    /// Feed one host transition into the core devices. Returns the
    /// messages it produced.
    pub fn inject_input_event(&mut self, mut input: RawInput) -> Vec<Outbound> {
        input.time = input.time.or_now(self.now());
        let device = if input.kind.is_key() {
            &mut self.input.keyboard
        } else {
            &mut self.input.pointer
        };
        if device.is_frozen() {
            log::trace!("Queued {:?} {} on frozen device", input.kind, input.detail);
            device.queue.push_back(input);
        } else {
            self.process_core(input, None);
            self.drain_core_queues();
        }
        self.take_outbox()
    }

    /// Route and deliver one core event, then update device state.
    /// A replayed trigger brings the grab window to skip through and the
    /// button state it was first routed under.
    fn process_core(&mut self, input: RawInput, replay: Option<(Window, u16)>) {
        let skip_through = replay.map(|(window, _)| window);
        let is_key = input.kind.is_key();
        if !is_key {
            self.input.root_x = input.root_x;
            self.input.root_y = input.root_y;
        }
        let pointer_window = self.pointer_window();
        let (event_window, stop_at) = if is_key {
            match self.input.focus {
                Focus::None => {
                    self.input.modifiers = input.modifiers & modifier_mask::KEY_MASK;
                    return;
                }
                Focus::PointerRoot => (pointer_window, None),
                Focus::Window(focus) => {
                    if pointer_window == focus || self.windows.is_inferior(pointer_window, focus) {
                        (pointer_window, Some(focus))
                    } else {
                        (focus, Some(focus))
                    }
                }
            }
        } else {
            (pointer_window, None)
        };

        let buttons = replay.map_or(self.input.buttons, |(_, held)| held);
        let modifiers = input.modifiers & modifier_mask::KEY_MASK;
        let state = buttons | modifiers;
        let decision = {
            let (device, passive) = if is_key {
                (&self.input.keyboard, &self.input.key_grabs)
            } else {
                (&self.input.pointer, &self.input.button_grabs)
            };
            let ctx = RouteContext {
                tree: &self.windows,
                table: &self.windows,
                passive,
                event_window,
                stop_at,
                buttons,
                modifiers,
                skip_through,
            };
            route(&ctx, device.grab.as_ref(), &input)
        };

        let recipients = match decision {
            Decision::Activate(grab, recipients) => {
                let (client, other_mode) = (grab.client, grab.other_mode);
                let (device, paired) = self.input.devices(is_key);
                device.activate(grab, Some(Trigger { input, buttons }));
                paired.set_mode(client, other_mode);
                recipients
            }
            Decision::Normal(recipients) => {
                if input.kind == InputKind::ButtonPress {
                    if let Some(first) = recipients.first() {
                        let mask = self.windows.selection_mask(first.window, first.client, Via::Core);
                        log::debug!(
                            "Automatic grab for client {} on 0x{:08x}",
                            first.client,
                            first.window.xid()
                        );
                        self.input.pointer.activate(
                            ActiveGrab {
                                client: first.client,
                                window: first.window,
                                owner_events: mask & event_mask::OWNER_GRAB_BUTTON != 0,
                                event_mask: mask,
                                via: Via::Core,
                                this_mode: GrabMode::Asynchronous,
                                other_mode: GrabMode::Asynchronous,
                                confine_to: Window::NONE,
                                cursor: Cursor::NONE,
                                time: input.time,
                                origin: GrabOrigin::Passive {
                                    detail: input.detail,
                                },
                            },
                            None,
                        );
                    }
                }
                recipients
            }
            Decision::Grabbed(recipients) => recipients,
        };

        let out = address(&self.windows, &recipients, &input, pointer_window, state, 0);
        self.outbox.extend(out);

        let (device, _) = self.input.devices(is_key);
        let holder = device.grab.as_ref().map(|g| g.client);
        if holder.is_some_and(|c| recipients.iter().any(|r| r.client == c)) {
            device.delivered(&input);
        }

        self.input.modifiers = modifiers;
        match input.kind {
            InputKind::ButtonPress => self.input.buttons |= modifier_mask::button(input.detail),
            InputKind::ButtonRelease => {
                self.input.buttons &= !modifier_mask::button(input.detail);
                let passive = matches!(
                    self.input.pointer.grab.as_ref().map(|g| g.origin),
                    Some(GrabOrigin::Passive { .. })
                );
                if passive && self.input.buttons == 0 {
                    self.release_core_grab(false);
                }
            }
            InputKind::KeyRelease => {
                let ends = matches!(
                    self.input.keyboard.grab.as_ref().map(|g| g.origin),
                    Some(GrabOrigin::Passive { detail }) if detail == input.detail
                );
                if ends {
                    self.release_core_grab(true);
                }
            }
            InputKind::KeyPress | InputKind::Motion => {}
        }
    }

    /// Deliver queued events of every core device that is no longer frozen
    fn drain_core_queues(&mut self) {
        loop {
            let next = match self.input.pointer.next_queued() {
                Some(input) => Some(input),
                None => self.input.keyboard.next_queued(),
            };
            match next {
                Some(input) => self.process_core(input, None),
                None => break,
            }
        }
    }

    /// Drop the active grab of one core device and thaw what it froze
    fn release_core_grab(&mut self, keyboard: bool) {
        let (device, paired) = self.input.devices(keyboard);
        if let Some(grab) = device.deactivate() {
            paired.release_freeze(grab.client);
            log::debug!(
                "{} grab of client {} released",
                if keyboard { "Keyboard" } else { "Pointer" },
                grab.client
            );
        }
    }

    fn check_grab_resources(&self, window: Window, confine_to: Window, cursor: Cursor) -> X11Result<()> {
        self.windows.get(window)?;
        if !confine_to.is_none() {
            self.windows.get(confine_to)?;
        }
        if !cursor.is_none() && !self.cursors.contains(cursor.id()) {
            return Err(X11Error::bad_cursor(cursor));
        }
        Ok(())
    }

    pub(crate) fn grab_pointer(&mut self, client: ClientId, req: GrabPointerRequest) -> X11Result<Reply> {
        self.check_grab_resources(req.grab_window, req.confine_to, req.cursor)?;
        let event_mask = req.event_mask as u32;
        if event_mask & !event_mask::POINTER_GRAB != 0 {
            return Err(X11Error::bad_value(event_mask));
        }
        if !self.policy.allow_pointer_grabs {
            log::debug!("GrabPointer by client {} refused by policy", client);
            return Ok(Reply::Grab {
                status: GrabStatus::AlreadyGrabbed,
            });
        }

        let now = self.now();
        let time = req.time.or_now(now);
        let viewable = self.windows.is_viewable(req.grab_window)
            && (req.confine_to.is_none() || self.windows.is_viewable(req.confine_to));
        let status = self.input.pointer.check_grab(client, time, now, viewable);
        if status == GrabStatus::Success {
            self.input.pointer.activate(
                ActiveGrab {
                    client,
                    window: req.grab_window,
                    owner_events: req.owner_events,
                    event_mask,
                    via: Via::Core,
                    this_mode: req.pointer_mode,
                    other_mode: req.keyboard_mode,
                    confine_to: req.confine_to,
                    cursor: req.cursor,
                    time,
                    origin: GrabOrigin::Explicit,
                },
                None,
            );
            self.input.keyboard.set_mode(client, req.keyboard_mode);
            log::debug!(
                "Pointer grabbed by client {} on 0x{:08x}",
                client,
                req.grab_window.xid()
            );
            self.drain_core_queues();
        }
        Ok(Reply::Grab { status })
    }

    pub(crate) fn ungrab_pointer(&mut self, client: ClientId, time: Timestamp) {
        let now = self.now();
        let since = self.input.pointer.last_grab_time;
        if self.input.pointer.grabbed_by(client) && time_in_window(time.or_now(now), since, now) {
            self.release_core_grab(false);
            self.drain_core_queues();
        }
    }

    pub(crate) fn change_active_pointer_grab(
        &mut self,
        client: ClientId,
        cursor: Cursor,
        time: Timestamp,
        mask: u16,
    ) -> X11Result<()> {
        if !cursor.is_none() && !self.cursors.contains(cursor.id()) {
            return Err(X11Error::bad_cursor(cursor));
        }
        let mask = mask as u32;
        if mask & !event_mask::POINTER_GRAB != 0 {
            return Err(X11Error::bad_value(mask));
        }
        let now = self.now();
        let since = self.input.pointer.last_grab_time;
        if let Some(grab) = self.input.pointer.grab.as_mut() {
            if grab.client == client && time_in_window(time.or_now(now), since, now) {
                grab.cursor = cursor;
                grab.event_mask = mask;
            }
        }
        Ok(())
    }

    pub(crate) fn grab_keyboard(&mut self, client: ClientId, req: GrabKeyboardRequest) -> X11Result<Reply> {
        self.windows.get(req.grab_window)?;
        if !self.policy.allow_keyboard_grabs {
            log::debug!("GrabKeyboard by client {} refused by policy", client);
            return Ok(Reply::Grab {
                status: GrabStatus::AlreadyGrabbed,
            });
        }
        let now = self.now();
        let time = req.time.or_now(now);
        let viewable = self.windows.is_viewable(req.grab_window);
        let status = self.input.keyboard.check_grab(client, time, now, viewable);
        if status == GrabStatus::Success {
            self.input.keyboard.activate(
                ActiveGrab {
                    client,
                    window: req.grab_window,
                    owner_events: req.owner_events,
                    event_mask: event_mask::KEY_PRESS | event_mask::KEY_RELEASE,
                    via: Via::Core,
                    this_mode: req.keyboard_mode,
                    other_mode: req.pointer_mode,
                    confine_to: Window::NONE,
                    cursor: Cursor::NONE,
                    time,
                    origin: GrabOrigin::Explicit,
                },
                None,
            );
            self.input.pointer.set_mode(client, req.pointer_mode);
            log::debug!(
                "Keyboard grabbed by client {} on 0x{:08x}",
                client,
                req.grab_window.xid()
            );
            self.drain_core_queues();
        }
        Ok(Reply::Grab { status })
    }

    pub(crate) fn ungrab_keyboard(&mut self, client: ClientId, time: Timestamp) {
        let now = self.now();
        let since = self.input.keyboard.last_grab_time;
        if self.input.keyboard.grabbed_by(client) && time_in_window(time.or_now(now), since, now) {
            self.release_core_grab(true);
            self.drain_core_queues();
        }
    }

    pub(crate) fn grab_button(&mut self, client: ClientId, req: GrabButtonRequest) -> X11Result<()> {
        self.check_grab_resources(req.grab_window, req.confine_to, req.cursor)?;
        let event_mask = req.event_mask as u32;
        if event_mask & !event_mask::POINTER_GRAB != 0 {
            return Err(X11Error::bad_value(event_mask));
        }
        if !self.policy.allow_pointer_grabs {
            return Err(X11Error::bad_access());
        }
        self.input.button_grabs.add(PassiveGrab {
            client,
            window: req.grab_window,
            detail: Detail::from_wire(req.button),
            modifiers: ModifierMatch::from_wire(req.modifiers),
            owner_events: req.owner_events,
            event_mask,
            via: Via::Core,
            this_mode: req.pointer_mode,
            other_mode: req.keyboard_mode,
            confine_to: req.confine_to,
            cursor: req.cursor,
        })?;
        log::debug!(
            "GrabButton {} by client {} on 0x{:08x}",
            req.button,
            client,
            req.grab_window.xid()
        );
        Ok(())
    }

    pub(crate) fn ungrab_button(&mut self, client: ClientId, button: u8, window: Window, modifiers: u16) -> X11Result<()> {
        self.windows.get(window)?;
        self.input.button_grabs.remove(
            client,
            window,
            Detail::from_wire(button),
            ModifierMatch::from_wire(modifiers),
        );
        Ok(())
    }

    fn check_keycode(&self, key: u8) -> X11Result<()> {
        if key != 0 && (key < self.min_keycode || key > self.max_keycode) {
            return Err(X11Error::bad_value(key as u32));
        }
        Ok(())
    }

    pub(crate) fn grab_key(&mut self, client: ClientId, req: GrabKeyRequest) -> X11Result<()> {
        self.windows.get(req.grab_window)?;
        self.check_keycode(req.key)?;
        if !self.policy.allow_keyboard_grabs {
            return Err(X11Error::bad_access());
        }
        self.input.key_grabs.add(PassiveGrab {
            client,
            window: req.grab_window,
            detail: Detail::from_wire(req.key),
            modifiers: ModifierMatch::from_wire(req.modifiers),
            owner_events: req.owner_events,
            event_mask: event_mask::KEY_PRESS | event_mask::KEY_RELEASE,
            via: Via::Core,
            this_mode: req.keyboard_mode,
            other_mode: req.pointer_mode,
            confine_to: Window::NONE,
            cursor: Cursor::NONE,
        })?;
        log::debug!(
            "GrabKey {} by client {} on 0x{:08x}",
            req.key,
            client,
            req.grab_window.xid()
        );
        Ok(())
    }

    pub(crate) fn ungrab_key(&mut self, client: ClientId, key: u8, window: Window, modifiers: u16) -> X11Result<()> {
        self.windows.get(window)?;
        self.check_keycode(key)?;
        self.input.key_grabs.remove(
            client,
            window,
            Detail::from_wire(key),
            ModifierMatch::from_wire(modifiers),
        );
        Ok(())
    }

    pub(crate) fn allow_events(&mut self, client: ClientId, mode: AllowMode, time: Timestamp) {
        let now = self.now();
        if time.or_now(now) > now {
            return;
        }
        let actions: &[(bool, Allow)] = match mode {
            AllowMode::AsyncPointer => &[(false, Allow::Async)],
            AllowMode::SyncPointer => &[(false, Allow::Sync)],
            AllowMode::ReplayPointer => &[(false, Allow::Replay)],
            AllowMode::AsyncKeyboard => &[(true, Allow::Async)],
            AllowMode::SyncKeyboard => &[(true, Allow::Sync)],
            AllowMode::ReplayKeyboard => &[(true, Allow::Replay)],
            AllowMode::AsyncBoth => &[(false, Allow::Async), (true, Allow::Async)],
            AllowMode::SyncBoth => &[(false, Allow::Sync), (true, Allow::Sync)],
        };
        log::debug!("AllowEvents {:?} from client {}", mode, client);
        for (keyboard, action) in actions.iter().copied() {
            let (device, paired) = self.input.devices(keyboard);
            if let Some((trigger, window)) = device.allow(client, action) {
                paired.release_freeze(client);
                log::debug!(
                    "Replaying {:?} {} below 0x{:08x}",
                    trigger.input.kind,
                    trigger.input.detail,
                    window.xid()
                );
                self.process_core(trigger.input, Some((window, trigger.buttons)));
            }
        }
        self.drain_core_queues();
    }

    pub(crate) fn set_input_focus(
        &mut self,
        revert_to: u8,
        focus: u32,
        time: Timestamp,
    ) -> X11Result<()> {
        if revert_to > revert_to::PARENT {
            return Err(X11Error::bad_value(revert_to as u32));
        }
        let focus = Focus::from_wire(focus);
        if let Focus::Window(window) = focus {
            self.windows.get(window)?;
            if !self.windows.is_viewable(window) {
                return Err(X11Error::bad_match());
            }
        }
        let now = self.now();
        let time = time.or_now(now);
        if !time_in_window(time, self.input.focus_time, now) {
            return Ok(());
        }
        self.input.focus = focus;
        self.input.revert_to = revert_to;
        self.input.focus_time = time;
        log::debug!("Input focus now {:?}", focus);
        Ok(())
    }

    pub(crate) fn get_input_focus(&self) -> Reply {
        Reply::GetInputFocus {
            revert_to: self.input.revert_to,
            focus: self.input.focus.to_wire(),
        }
    }

    pub(crate) fn query_pointer(&self, window: Window) -> X11Result<Reply> {
        self.windows.get(window)?;
        let (ox, oy) = self.windows.absolute_origin(window);
        let (x, y) = (self.input.root_x as i32, self.input.root_y as i32);
        Ok(Reply::QueryPointer {
            same_screen: true,
            root: self.windows.root(),
            child: self.windows.child_at(window, x, y),
            root_x: self.input.root_x,
            root_y: self.input.root_y,
            win_x: (x - ox) as i16,
            win_y: (y - oy) as i16,
            mask: self.input.state(),
        })
    }

    /// Move the focus off `window` according to the revert-to mode
    fn revert_focus(&mut self, window: Window) {
        let focus = match self.input.revert_to {
            revert_to::NONE => Focus::None,
            revert_to::POINTER_ROOT => Focus::PointerRoot,
            _ => {
                let mut current = self.windows.parent(window);
                while let Some(w) = current {
                    if self.windows.is_viewable(w) {
                        break;
                    }
                    current = self.windows.parent(w);
                }
                self.input.revert_to = revert_to::NONE;
                current.map(Focus::Window).unwrap_or(Focus::None)
            }
        };
        log::debug!("Focus reverted from 0x{:08x} to {:?}", window.xid(), focus);
        self.input.focus = focus;
    }

    /// Focus and grabs that depended on a window staying viewable
    pub(crate) fn viewability_changed(&mut self) {
        if let Focus::Window(focus) = self.input.focus {
            if !self.windows.is_viewable(focus) {
                self.revert_focus(focus);
            }
        }
        let pointer_lost = self.input.pointer.grab.as_ref().is_some_and(|g| {
            !self.windows.is_viewable(g.window)
                || (!g.confine_to.is_none() && !self.windows.is_viewable(g.confine_to))
        });
        if pointer_lost {
            self.release_core_grab(false);
        }
        let keyboard_lost = self
            .input
            .keyboard
            .grab
            .as_ref()
            .is_some_and(|g| !self.windows.is_viewable(g.window));
        if keyboard_lost {
            self.release_core_grab(true);
        }
        self.xinput_viewability_changed();
        self.drain_core_queues();
    }

    /// Core input references to a window about to be destroyed
    pub(crate) fn input_window_gone(&mut self, window: Window) {
        self.input.button_grabs.remove_window(window);
        self.input.key_grabs.remove_window(window);
        let names = |g: &ActiveGrab| g.window == window || g.confine_to == window;
        if self.input.pointer.grab.as_ref().is_some_and(names) {
            self.release_core_grab(false);
        }
        if self.input.keyboard.grab.as_ref().is_some_and(names) {
            self.release_core_grab(true);
        }
        if self.input.focus == Focus::Window(window) {
            self.revert_focus(window);
        }
        self.drain_core_queues();
    }

    /// Release everything a departing client held on the core devices
    pub(crate) fn input_client_gone(&mut self, client: ClientId) {
        if self.input.pointer.grabbed_by(client) {
            self.release_core_grab(false);
        }
        if self.input.keyboard.grabbed_by(client) {
            self.release_core_grab(true);
        }
        self.input.pointer.release_freeze(client);
        self.input.keyboard.release_freeze(client);
        self.input.button_grabs.remove_client(client);
        self.input.key_grabs.remove_client(client);
        self.drain_core_queues();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::security::SecurityPolicy;
    use crate::server::Message;

    fn server() -> (Server, ClientId, ClientId) {
        let mut server = Server::new(Box::new(NullBackend::new()), SecurityPolicy::default()).unwrap();
        let a = server.register_client(ByteOrder::LSBFirst).unwrap();
        let b = server.register_client(ByteOrder::LSBFirst).unwrap();
        (server, a, b)
    }

    fn window(server: &mut Server, client: ClientId, local: u32, parent: Window) -> Window {
        let wid = ResourceId::new(client, local);
        server
            .create_window(
                client,
                CreateWindowRequest {
                    depth: 0,
                    wid,
                    parent,
                    x: 10,
                    y: 10,
                    width: 100,
                    height: 100,
                    border_width: 0,
                    class: WindowClass::CopyFromParent,
                    visual: VisualID::COPY_FROM_PARENT,
                    values: WindowValues::default(),
                },
            )
            .unwrap();
        server.map_window(client, Window(wid)).unwrap();
        Window(wid)
    }

    fn input(kind: InputKind, detail: u8) -> RawInput {
        RawInput {
            kind,
            detail,
            root_x: 50,
            root_y: 50,
            modifiers: 0,
            time: Timestamp::CURRENT_TIME,
        }
    }

    fn recipients(out: &[Outbound]) -> Vec<ClientId> {
        out.iter()
            .filter(|o| matches!(o.message, Message::Event { .. }))
            .map(|o| o.client)
            .collect()
    }

    fn press_state(out: &[Outbound]) -> u16 {
        out.iter()
            .find_map(|o| match &o.message {
                Message::Event {
                    event: Event::ButtonPress(data),
                    ..
                } => Some(data.state),
                _ => None,
            })
            .expect("no ButtonPress")
    }

    fn grab_pointer(server: &mut Server, client: ClientId, window: Window, mode: GrabMode) -> GrabStatus {
        let reply = server
            .grab_pointer(
                client,
                GrabPointerRequest {
                    owner_events: false,
                    grab_window: window,
                    event_mask: (event_mask::BUTTON_PRESS | event_mask::BUTTON_RELEASE) as u16,
                    pointer_mode: mode,
                    keyboard_mode: GrabMode::Asynchronous,
                    confine_to: Window::NONE,
                    cursor: Cursor::NONE,
                    time: Timestamp::CURRENT_TIME,
                },
            )
            .unwrap();
        match reply {
            Reply::Grab { status } => status,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_second_pointer_grab_is_already_grabbed() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        let w = window(&mut server, a, 1, root);
        assert_eq!(grab_pointer(&mut server, a, w, GrabMode::Asynchronous), GrabStatus::Success);
        assert_eq!(grab_pointer(&mut server, b, w, GrabMode::Asynchronous), GrabStatus::AlreadyGrabbed);
        assert_eq!(server.pointer_grab().map(|g| g.client), Some(a));
    }

    #[test]
    fn test_grab_on_unmapped_window_not_viewable() {
        let (mut server, a, _) = server();
        let root = server.window_tree().root();
        let w = window(&mut server, a, 1, root);
        server.unmap_window(w).unwrap();
        assert_eq!(grab_pointer(&mut server, a, w, GrabMode::Asynchronous), GrabStatus::NotViewable);
    }

    #[test]
    fn test_automatic_grab_follows_press() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        let w = window(&mut server, a, 1, root);
        server
            .windows
            .select_events(w, a, event_mask::BUTTON_PRESS | event_mask::BUTTON_RELEASE)
            .unwrap();
        server
            .windows
            .select_events(root, b, event_mask::BUTTON_RELEASE)
            .unwrap();

        let out = server.inject_input_event(input(InputKind::ButtonPress, 1));
        assert_eq!(recipients(&out), vec![a]);
        assert_eq!(server.pointer_grab().map(|g| g.client), Some(a));

        // The release goes to the grabbing client, not the root selector
        let mut release = input(InputKind::ButtonRelease, 1);
        release.root_x = 150;
        let out = server.inject_input_event(release);
        assert_eq!(recipients(&out), vec![a]);
        assert!(server.pointer_grab().is_none());
    }

    #[test]
    fn test_sync_grab_queues_until_allow() {
        let (mut server, a, _) = server();
        let root = server.window_tree().root();
        let w = window(&mut server, a, 1, root);
        assert_eq!(grab_pointer(&mut server, a, w, GrabMode::Synchronous), GrabStatus::Success);

        assert!(server.inject_input_event(input(InputKind::ButtonPress, 1)).is_empty());
        assert!(server.inject_input_event(input(InputKind::ButtonRelease, 1)).is_empty());

        server.allow_events(a, AllowMode::AsyncPointer, Timestamp::CURRENT_TIME);
        let out = server.take_outbox();
        assert_eq!(recipients(&out), vec![a, a]);
        assert!(matches!(
            out[0].message,
            Message::Event {
                event: Event::ButtonPress(_),
                ..
            }
        ));
    }

    #[test]
    fn test_allow_from_other_client_ignored() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        let w = window(&mut server, a, 1, root);
        grab_pointer(&mut server, a, w, GrabMode::Synchronous);
        server.inject_input_event(input(InputKind::ButtonPress, 1));
        server.allow_events(b, AllowMode::AsyncPointer, Timestamp::CURRENT_TIME);
        assert!(server.take_outbox().is_empty());
        assert_eq!(server.input.pointer.queue.len(), 1);
    }

    #[test]
    fn test_replay_skips_outer_passive_grab() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        let outer = window(&mut server, a, 1, root);
        let inner = window(&mut server, b, 1, outer);
        server
            .grab_button(
                a,
                GrabButtonRequest {
                    owner_events: false,
                    grab_window: outer,
                    event_mask: event_mask::BUTTON_PRESS as u16,
                    pointer_mode: GrabMode::Synchronous,
                    keyboard_mode: GrabMode::Asynchronous,
                    confine_to: Window::NONE,
                    cursor: Cursor::NONE,
                    button: 0,
                    modifiers: modifier_mask::ANY_MODIFIER,
                },
            )
            .unwrap();
        server
            .windows
            .select_events(inner, b, event_mask::BUTTON_PRESS)
            .unwrap();

        let out = server.inject_input_event(input(InputKind::ButtonPress, 1));
        assert_eq!(recipients(&out), vec![a]);
        assert!(server.input.pointer.is_frozen());
        let first = press_state(&out);
        assert_eq!(first, 0);

        server.allow_events(a, AllowMode::ReplayPointer, Timestamp::CURRENT_TIME);
        let out = server.take_outbox();
        assert_eq!(recipients(&out), vec![b]);
        assert_eq!(server.pointer_grab().map(|g| g.client), Some(b));
        // The replay is the same event, not one with its own button held
        assert_eq!(press_state(&out), first);
        assert_eq!(server.input.buttons, modifier_mask::BUTTON1);
    }

    #[test]
    fn test_keyboard_follows_focus() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        let w = window(&mut server, a, 1, root);
        let other = window(&mut server, b, 1, root);
        server.windows.get_mut(other).unwrap().x = 300;
        server.windows.select_events(w, a, event_mask::KEY_PRESS).unwrap();
        server.windows.select_events(other, b, event_mask::KEY_PRESS).unwrap();

        server
            .set_input_focus(revert_to::PARENT, other.xid(), Timestamp::CURRENT_TIME)
            .unwrap();
        let out = server.inject_input_event(input(InputKind::KeyPress, 38));
        assert_eq!(recipients(&out), vec![b]);

        // Unmapping the focus window reverts to its parent
        server.unmap_window(other).unwrap();
        assert_eq!(server.input.focus, Focus::Window(root));
        assert_eq!(server.input.revert_to, revert_to::NONE);

        server
            .set_input_focus(revert_to::NONE, 0, Timestamp::CURRENT_TIME)
            .unwrap();
        assert!(server
            .inject_input_event(input(InputKind::KeyPress, 38))
            .is_empty());
    }

    #[test]
    fn test_destroying_grab_window_releases_grab() {
        let (mut server, a, _) = server();
        let root = server.window_tree().root();
        let w = window(&mut server, a, 1, root);
        grab_pointer(&mut server, a, w, GrabMode::Synchronous);
        server.destroy_window(w).unwrap();
        assert!(server.pointer_grab().is_none());
        assert!(!server.input.pointer.is_frozen());
    }
}
