//! Extended input devices
//!
//! Device descriptions come from the host once at startup and are shared
//! as immutable templates. Everything a request can change lives in the
//! device's [`DeviceRuntime`] or in a client's [`DeviceHandle`]; XI 1.x
//! selections hang off handles, XI2 selections off windows. Routing reuses
//! the core algorithm with a per-device [`DeliveryTable`], so device grabs
//! never interact with core grabs.

use super::grabs::{
    ActiveGrab, Allow, DeviceState, Detail, GrabOrigin, ModifierMatch, PassiveGrab, PassiveGrabTable, Trigger,
};
use super::input::{revert_to, Focus};
use super::router::{address, route, Decision, DeliveryTable, InputKind, RawInput, RouteContext, Via};
use super::{Outbound, Server};
use crate::protocol::xinput::*;
use crate::protocol::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Keyboard feedback mask bits of ChangeFeedbackControl
mod kb_feedback {
    pub const KEY_CLICK_PERCENT: u32 = 1 << 0;
    pub const BELL_PERCENT: u32 = 1 << 1;
    pub const BELL_PITCH: u32 = 1 << 2;
    pub const BELL_DURATION: u32 = 1 << 3;
    pub const LED: u32 = 1 << 4;
}

/// Pointer feedback mask bits of ChangeFeedbackControl
mod ptr_feedback {
    pub const ACCEL_NUMERATOR: u32 = 1 << 0;
    pub const ACCEL_DENOMINATOR: u32 = 1 << 1;
    pub const THRESHOLD: u32 = 1 << 2;
}

/// Mutable state of one device
#[derive(Debug, Clone)]
pub struct DeviceRuntime {
    pub template: Arc<DeviceInfo>,
    pub state: DeviceState,
    pub button_grabs: PassiveGrabTable,
    pub key_grabs: PassiveGrabTable,
    pub focus: Focus,
    pub revert_to: u8,
    pub focus_time: Timestamp,
    pub button_map: Vec<u8>,
    /// Valuator mode: 0 relative, 1 absolute
    pub mode: u8,
    pub valuators: Vec<i32>,
    pub resolutions: Vec<u32>,
    pub feedback: Vec<FeedbackState>,
    pub keys_down: [u8; 32],
    pub buttons_down: [u8; 32],
}

fn bit_set(bits: &mut [u8; 32], index: u8, on: bool) {
    let (byte, bit) = ((index / 8) as usize, index % 8);
    if on {
        bits[byte] |= 1 << bit;
    } else {
        bits[byte] &= !(1 << bit);
    }
}

fn bit_get(bits: &[u8; 32], index: u8) -> bool {
    bits[(index / 8) as usize] & (1 << (index % 8)) != 0
}

impl DeviceRuntime {
    pub fn new(template: Arc<DeviceInfo>) -> Self {
        let axes = template.axes();
        let mode = template
            .classes
            .iter()
            .find_map(|c| match c {
                DeviceClass::Valuator { mode, .. } => Some(*mode),
                _ => None,
            })
            .unwrap_or(0);
        let mut feedback = Vec::new();
        if template.has_class(0) {
            feedback.push(FeedbackState::Keyboard {
                id: 0,
                click: 0,
                percent: 50,
                pitch: 400,
                duration: 100,
                led_mask: 0,
                led_values: 0,
            });
        }
        if template.has_class(2) {
            feedback.push(FeedbackState::Pointer {
                id: 0,
                numerator: 2,
                denominator: 1,
                threshold: 4,
            });
        }
        DeviceRuntime {
            button_map: (1..=template.num_buttons()).map(|b| b as u8).collect(),
            mode,
            valuators: vec![0; axes.len()],
            resolutions: axes.iter().map(|a| a.resolution).collect(),
            feedback,
            state: DeviceState::default(),
            button_grabs: PassiveGrabTable::default(),
            key_grabs: PassiveGrabTable::default(),
            focus: Focus::PointerRoot,
            revert_to: revert_to::POINTER_ROOT,
            focus_time: Timestamp::new(0),
            keys_down: [0; 32],
            buttons_down: [0; 32],
            template,
        }
    }

    pub fn id(&self) -> u8 {
        self.template.id
    }

    /// Held buttons 1-5 as core state bits
    pub fn button_state(&self) -> u16 {
        (1..=5u8)
            .filter(|b| bit_get(&self.buttons_down, *b))
            .fold(0, |acc, b| acc | modifier_mask::button(b))
    }

    fn any_button_down(&self) -> bool {
        self.buttons_down.iter().any(|b| *b != 0)
    }

    /// Paired device id reported by XIQueryDevice
    fn attachment(&self) -> u16 {
        match self.template.device_use {
            DeviceUse::Pointer => 3,
            DeviceUse::Keyboard => 2,
            DeviceUse::ExtensionDevice => 0,
        }
    }

    fn snapshot(&self) -> Xi2DeviceSnapshot {
        let buttons_down = (0..32u8)
            .filter(|b| bit_get(&self.buttons_down, *b))
            .fold(0u32, |acc, b| acc | (1 << b));
        Xi2DeviceSnapshot {
            info: (*self.template).clone(),
            attachment: self.attachment(),
            buttons_down,
            valuators: self.valuators.clone(),
        }
    }
}

/// A client's open device: its own copy of the class list and its event
/// selections, as XI 1.x offset bits per window
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    pub classes: Vec<DeviceClass>,
    pub selections: HashMap<Window, u32>,
}

#[derive(Debug, Default)]
pub struct XInputState {
    pub devices: BTreeMap<u8, DeviceRuntime>,
    pub handles: HashMap<(ClientId, u8), DeviceHandle>,
    /// XI2 selections: window -> client -> device -> mask
    pub xi2_selections: HashMap<Window, HashMap<ClientId, BTreeMap<u16, u32>>>,
    pub versions: HashMap<ClientId, (u16, u16)>,
}

impl XInputState {
    pub fn new(templates: Vec<DeviceInfo>) -> Self {
        let devices = templates
            .into_iter()
            .map(|info| (info.id, DeviceRuntime::new(Arc::new(info))))
            .collect();
        XInputState {
            devices,
            ..Default::default()
        }
    }

    pub fn device(&self, id: u8) -> X11Result<&DeviceRuntime> {
        self.devices
            .get(&id)
            .ok_or_else(|| xi_error(xi_error::BAD_DEVICE, id as u32))
    }

    pub fn device_mut(&mut self, id: u8) -> X11Result<&mut DeviceRuntime> {
        self.devices
            .get_mut(&id)
            .ok_or_else(|| xi_error(xi_error::BAD_DEVICE, id as u32))
    }

    /// XI2 device ids, with the two pseudo ids allowed
    fn check_xi2_device(&self, id: u16) -> X11Result<()> {
        if id == xi2::ALL_DEVICES || id == xi2::ALL_MASTER_DEVICES {
            return Ok(());
        }
        match u8::try_from(id) {
            Ok(dev) if self.devices.contains_key(&dev) => Ok(()),
            _ => Err(xi_error(xi_error::BAD_DEVICE, id as u32)),
        }
    }

    /// XI2 mask `client` selected on `window` that applies to `device`
    fn xi2_mask(&self, window: Window, client: ClientId, device: u8) -> u32 {
        self.xi2_selections
            .get(&window)
            .and_then(|clients| clients.get(&client))
            .map(|masks| {
                masks
                    .iter()
                    .filter(|(d, _)| {
                        **d == device as u16 || **d == xi2::ALL_DEVICES || **d == xi2::ALL_MASTER_DEVICES
                    })
                    .fold(0, |acc, (_, m)| acc | m)
            })
            .unwrap_or(0)
    }

    pub fn remove_client(&mut self, client: ClientId) {
        self.handles.retain(|(c, _), _| *c != client);
        for clients in self.xi2_selections.values_mut() {
            clients.remove(&client);
        }
        self.xi2_selections.retain(|_, clients| !clients.is_empty());
        self.versions.remove(&client);
    }

    pub fn remove_window(&mut self, window: Window) {
        self.xi2_selections.remove(&window);
        for handle in self.handles.values_mut() {
            handle.selections.remove(&window);
        }
        for runtime in self.devices.values_mut() {
            runtime.button_grabs.remove_window(window);
            runtime.key_grabs.remove_window(window);
        }
    }
}

/// Selections of one device, as routing sees them
struct DeviceTable<'a> {
    xinput: &'a XInputState,
    device: u8,
}

impl DeliveryTable for DeviceTable<'_> {
    fn selecting_clients(&self, window: Window, kind: InputKind, buttons: u16) -> Vec<(ClientId, Via)> {
        let xi1 = Via::XInput.mask_for(kind, buttons);
        let xi2 = Via::XInput2.mask_for(kind, buttons);
        let mut out: Vec<(ClientId, Via)> = self
            .xinput
            .handles
            .iter()
            .filter(|((_, d), h)| {
                *d == self.device && h.selections.get(&window).is_some_and(|m| m & xi1 != 0)
            })
            .map(|((c, _), _)| (*c, Via::XInput))
            .collect();
        if let Some(clients) = self.xinput.xi2_selections.get(&window) {
            for client in clients.keys() {
                if self.xinput.xi2_mask(window, *client, self.device) & xi2 != 0 {
                    out.push((*client, Via::XInput2));
                }
            }
        }
        out.sort_unstable();
        out
    }

    fn propagation_blocked(&self, _window: Window, _kind: InputKind, _buttons: u16) -> bool {
        false
    }

    fn selection_mask(&self, window: Window, client: ClientId, via: Via) -> u32 {
        match via {
            Via::Core => 0,
            Via::XInput => self
                .xinput
                .handles
                .get(&(client, self.device))
                .and_then(|h| h.selections.get(&window).copied())
                .unwrap_or(0),
            Via::XInput2 => self.xinput.xi2_mask(window, client, self.device),
        }
    }
}

/// XI 1.x class list to (device, offset-bit mask) pairs
fn class_masks(classes: &[u32]) -> X11Result<BTreeMap<u8, u32>> {
    let mut masks = BTreeMap::new();
    for class in classes {
        let (device, offset) =
            split_event_class(*class).ok_or_else(|| xi_error(xi_error::BAD_CLASS, *class))?;
        *masks.entry(device).or_insert(0) |= 1 << offset;
    }
    Ok(masks)
}

fn to_allow(mode: DeviceAllowMode) -> Allow {
    match mode {
        DeviceAllowMode::Async => Allow::Async,
        DeviceAllowMode::Sync => Allow::Sync,
        DeviceAllowMode::Replay => Allow::Replay,
    }
}

fn xi_reply(reply: XiReply) -> Option<Reply> {
    Some(Reply::XInput(reply))
}

fn status(minor: u8, status: u8) -> Option<Reply> {
    xi_reply(XiReply::Status { minor, status })
}

impl Server {
    /// Feed one host transition into extended device `device`. Core
    /// grabs and selections are not consulted.
    pub fn inject_device_event(&mut self, device: u8, mut input: RawInput) -> Vec<Outbound> {
        input.time = input.time.or_now(self.now());
        let Some(runtime) = self.xinput.devices.get_mut(&device) else {
            log::warn!("Input for unknown device {} dropped", device);
            return Vec::new();
        };
        if runtime.state.is_frozen() {
            runtime.state.queue.push_back(input);
        } else {
            self.process_device(device, input, None);
            self.drain_device_queue(device);
        }
        self.take_outbox()
    }

    /// `replay` is the grab window to skip through and the button state
    /// of a replayed trigger
    fn process_device(&mut self, device: u8, input: RawInput, replay: Option<(Window, u16)>) {
        let skip_through = replay.map(|(window, _)| window);
        let Some(runtime) = self.xinput.devices.get(&device) else {
            return;
        };
        let is_key = input.kind.is_key();
        let pointer_window = if is_key {
            self.pointer_window()
        } else {
            self.windows
                .window_at(input.root_x as i32, input.root_y as i32)
        };
        let (event_window, stop_at) = if is_key {
            match runtime.focus {
                Focus::None => return,
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

        let buttons = replay.map_or_else(|| runtime.button_state(), |(_, held)| held);
        let modifiers = input.modifiers & modifier_mask::KEY_MASK;
        let table = DeviceTable {
            xinput: &self.xinput,
            device,
        };
        let ctx = RouteContext {
            tree: &self.windows,
            table: &table,
            passive: if is_key {
                &runtime.key_grabs
            } else {
                &runtime.button_grabs
            },
            event_window,
            stop_at,
            buttons,
            modifiers,
            skip_through,
        };
        let decision = route(&ctx, runtime.state.grab.as_ref(), &input);
        let automatic = match &decision {
            Decision::Normal(recipients) if input.kind == InputKind::ButtonPress => {
                recipients.first().map(|first| ActiveGrab {
                    client: first.client,
                    window: first.window,
                    owner_events: false,
                    event_mask: table.selection_mask(first.window, first.client, first.via),
                    via: first.via,
                    this_mode: GrabMode::Asynchronous,
                    other_mode: GrabMode::Asynchronous,
                    confine_to: Window::NONE,
                    cursor: Cursor::NONE,
                    time: input.time,
                    origin: GrabOrigin::Passive {
                        detail: input.detail,
                    },
                })
            }
            _ => None,
        };
        let out = address(
            &self.windows,
            decision.recipients(),
            &input,
            pointer_window,
            buttons | modifiers,
            device,
        );
        self.outbox.extend(out);

        let Some(runtime) = self.xinput.devices.get_mut(&device) else {
            return;
        };
        let holder = runtime.state.grab.as_ref().map(|g| g.client);
        match decision {
            Decision::Activate(grab, recipients) => {
                log::debug!("Device {} passive grab for client {}", device, grab.client);
                let client = grab.client;
                runtime.state.activate(grab, Some(Trigger { input, buttons }));
                if recipients.iter().any(|r| r.client == client) {
                    runtime.state.delivered(&input);
                }
            }
            Decision::Grabbed(recipients) => {
                if holder.is_some_and(|c| recipients.iter().any(|r| r.client == c)) {
                    runtime.state.delivered(&input);
                }
            }
            Decision::Normal(_) => {
                if let Some(grab) = automatic {
                    runtime.state.activate(grab, None);
                }
            }
        }

        match input.kind {
            InputKind::ButtonPress => bit_set(&mut runtime.buttons_down, input.detail, true),
            InputKind::KeyPress => bit_set(&mut runtime.keys_down, input.detail, true),
            InputKind::ButtonRelease => {
                bit_set(&mut runtime.buttons_down, input.detail, false);
                let passive = matches!(
                    runtime.state.grab.as_ref().map(|g| g.origin),
                    Some(GrabOrigin::Passive { .. })
                );
                if passive && !runtime.any_button_down() {
                    runtime.state.deactivate();
                }
            }
            InputKind::KeyRelease => {
                bit_set(&mut runtime.keys_down, input.detail, false);
                let ends = matches!(
                    runtime.state.grab.as_ref().map(|g| g.origin),
                    Some(GrabOrigin::Passive { detail }) if detail == input.detail
                );
                if ends {
                    runtime.state.deactivate();
                }
            }
            InputKind::Motion => {}
        }
    }

    fn drain_device_queue(&mut self, device: u8) {
        while let Some(input) = self
            .xinput
            .devices
            .get_mut(&device)
            .and_then(|r| r.state.next_queued())
        {
            self.process_device(device, input, None);
        }
    }

    fn release_device_grab(&mut self, device: u8) {
        if let Some(runtime) = self.xinput.devices.get_mut(&device) {
            if let Some(grab) = runtime.state.deactivate() {
                log::debug!("Device {} grab of client {} released", device, grab.client);
            }
        }
        self.drain_device_queue(device);
    }

    /// Device grabs and focus that depended on a window staying viewable
    pub(crate) fn xinput_viewability_changed(&mut self) {
        let ids: Vec<u8> = self.xinput.devices.keys().copied().collect();
        for id in ids {
            let Some(runtime) = self.xinput.devices.get(&id) else {
                continue;
            };
            let lost = runtime
                .state
                .grab
                .as_ref()
                .is_some_and(|g| !self.windows.is_viewable(g.window));
            let focus_lost = matches!(runtime.focus, Focus::Window(f) if !self.windows.is_viewable(f));
            if lost {
                self.release_device_grab(id);
            }
            if focus_lost {
                self.revert_device_focus(id);
            }
        }
    }

    fn revert_device_focus(&mut self, id: u8) {
        let Some(runtime) = self.xinput.devices.get(&id) else {
            return;
        };
        let Focus::Window(window) = runtime.focus else {
            return;
        };
        let (focus, revert) = match runtime.revert_to {
            revert_to::NONE => (Focus::None, revert_to::NONE),
            revert_to::POINTER_ROOT => (Focus::PointerRoot, revert_to::POINTER_ROOT),
            _ => {
                let mut current = self.windows.parent(window);
                while let Some(w) = current {
                    if self.windows.is_viewable(w) {
                        break;
                    }
                    current = self.windows.parent(w);
                }
                (current.map(Focus::Window).unwrap_or(Focus::None), revert_to::NONE)
            }
        };
        if let Some(runtime) = self.xinput.devices.get_mut(&id) {
            runtime.focus = focus;
            runtime.revert_to = revert;
        }
    }

    /// Device state naming a window about to be destroyed
    pub(crate) fn xinput_window_gone(&mut self, window: Window) {
        self.xinput.remove_window(window);
        let ids: Vec<u8> = self.xinput.devices.keys().copied().collect();
        for id in ids {
            let Some(runtime) = self.xinput.devices.get(&id) else {
                continue;
            };
            if runtime.state.grab.as_ref().is_some_and(|g| g.window == window) {
                self.release_device_grab(id);
            }
            if matches!(self.xinput.devices.get(&id).map(|r| r.focus), Some(Focus::Window(f)) if f == window) {
                self.revert_device_focus(id);
            }
        }
    }

    /// Release device grabs, freezes, handles and selections of a client
    pub(crate) fn xinput_client_gone(&mut self, client: ClientId) {
        let ids: Vec<u8> = self.xinput.devices.keys().copied().collect();
        for id in ids {
            if let Some(runtime) = self.xinput.devices.get_mut(&id) {
                if runtime.state.grabbed_by(client) {
                    runtime.state.deactivate();
                }
                runtime.state.release_freeze(client);
                runtime.button_grabs.remove_client(client);
                runtime.key_grabs.remove_client(client);
            }
            self.drain_device_queue(id);
        }
        self.xinput.remove_client(client);
    }

    fn open_handle(&self, client: ClientId, device: u8) -> X11Result<&DeviceHandle> {
        self.xinput.device(device)?;
        self.xinput
            .handles
            .get(&(client, device))
            .ok_or_else(|| xi_error(xi_error::BAD_DEVICE, device as u32))
    }

    /// Device and class check shared by the 1.x grab requests
    fn device_grab_mask(&self, client: ClientId, device: u8, classes: &[u32]) -> X11Result<u32> {
        self.open_handle(client, device)?;
        let masks = class_masks(classes)?;
        Ok(masks.get(&device).copied().unwrap_or(0))
    }

    fn check_modifier_device(&self, modifier_device: u8) -> X11Result<()> {
        // 255 names the core keyboard
        if modifier_device != 255 {
            self.xinput.device(modifier_device)?;
        }
        Ok(())
    }

    /// Grab `device` for `client`; returns the status code
    fn grab_device_common(
        &mut self,
        client: ClientId,
        device: u8,
        window: Window,
        time: Timestamp,
        grab: ActiveGrab,
    ) -> X11Result<GrabStatus> {
        self.windows.get(window)?;
        if !self.policy.allow_device_grabs {
            log::debug!("Device grab by client {} refused by policy", client);
            return Ok(GrabStatus::AlreadyGrabbed);
        }
        let now = self.now();
        let time = time.or_now(now);
        let viewable = self.windows.is_viewable(window);
        let runtime = self.xinput.device_mut(device)?;
        let status = runtime.state.check_grab(client, time, now, viewable);
        if status == GrabStatus::Success {
            runtime.state.activate(ActiveGrab { time, ..grab }, None);
            log::debug!(
                "Device {} grabbed by client {} on 0x{:08x}",
                device,
                client,
                window.xid()
            );
            self.drain_device_queue(device);
        }
        Ok(status)
    }

    fn ungrab_device_common(&mut self, client: ClientId, device: u8, time: Timestamp) -> X11Result<()> {
        let now = self.now();
        let runtime = self.xinput.device(device)?;
        let time = time.or_now(now);
        if runtime.state.grabbed_by(client) && time >= runtime.state.last_grab_time && time <= now {
            self.release_device_grab(device);
        }
        Ok(())
    }

    fn allow_device_common(&mut self, client: ClientId, device: u8, time: Timestamp, mode: DeviceAllowMode) -> X11Result<()> {
        let now = self.now();
        let runtime = self.xinput.device_mut(device)?;
        if time.or_now(now) > now {
            return Ok(());
        }
        if let Some((trigger, window)) = runtime.state.allow(client, to_allow(mode)) {
            log::debug!("Device {} replaying {:?}", device, trigger.input.kind);
            self.process_device(device, trigger.input, Some((window, trigger.buttons)));
        }
        self.drain_device_queue(device);
        Ok(())
    }

    fn set_device_focus(&mut self, device: u8, focus: u32, time: Timestamp, revert: u8) -> X11Result<()> {
        if revert > revert_to::PARENT {
            return Err(X11Error::bad_value(revert as u32));
        }
        let focus = Focus::from_wire(focus);
        if let Focus::Window(window) = focus {
            self.windows.get(window)?;
            if !self.windows.is_viewable(window) {
                return Err(X11Error::bad_match());
            }
        }
        let now = self.now();
        let runtime = self.xinput.device_mut(device)?;
        if !runtime.template.has_class(0) {
            return Err(X11Error::bad_match());
        }
        let time = time.or_now(now);
        if time < runtime.focus_time || time > now {
            return Ok(());
        }
        runtime.focus = focus;
        runtime.revert_to = revert;
        runtime.focus_time = time;
        Ok(())
    }

    fn select_extension_event(&mut self, client: ClientId, window: Window, classes: &[u32]) -> X11Result<()> {
        self.windows.get(window)?;
        let masks = class_masks(classes)?;
        for (device, _) in &masks {
            if !self.xinput.handles.contains_key(&(client, *device)) {
                return Err(xi_error(xi_error::BAD_CLASS, event_class(*device, 0)));
            }
        }
        for ((c, device), handle) in self.xinput.handles.iter_mut() {
            if *c != client {
                continue;
            }
            match masks.get(device) {
                Some(mask) => {
                    handle.selections.insert(window, *mask);
                }
                None => {
                    handle.selections.remove(&window);
                }
            }
        }
        log::debug!(
            "Client {} selected {} device classes on 0x{:08x}",
            client,
            classes.len(),
            window.xid()
        );
        Ok(())
    }

    fn selected_classes(&self, window: Window, client: Option<ClientId>) -> Vec<u32> {
        let mut classes: Vec<u32> = Vec::new();
        for ((c, device), handle) in &self.xinput.handles {
            if client.is_some_and(|want| want != *c) {
                continue;
            }
            let mask = handle.selections.get(&window).copied().unwrap_or(0);
            for offset in 0..=xi_event::DEVICE_MOTION_NOTIFY {
                if mask & (1 << offset) != 0 {
                    let class = event_class(*device, offset);
                    if !classes.contains(&class) {
                        classes.push(class);
                    }
                }
            }
        }
        classes.sort_unstable();
        classes
    }

    fn change_feedback(&mut self, device: u8, feedback_id: u8, mask: u32, change: FeedbackChange) -> X11Result<()> {
        let runtime = self.xinput.device_mut(device)?;
        let entry = runtime
            .feedback
            .iter_mut()
            .find(|f| match (f, &change) {
                (FeedbackState::Keyboard { id, .. }, FeedbackChange::Keyboard { .. })
                | (FeedbackState::Pointer { id, .. }, FeedbackChange::Pointer { .. }) => *id == feedback_id,
                _ => false,
            })
            .ok_or_else(X11Error::bad_match)?;
        let percent = |v: i8, default: u8| -> X11Result<u8> {
            match v {
                -1 => Ok(default),
                0..=100 => Ok(v as u8),
                _ => Err(X11Error::bad_value(v as u32)),
            }
        };
        match (entry, change) {
            (
                FeedbackState::Keyboard {
                    click,
                    percent: bell,
                    pitch,
                    duration,
                    led_values,
                    ..
                },
                FeedbackChange::Keyboard {
                    click: new_click,
                    percent: new_percent,
                    pitch: new_pitch,
                    duration: new_duration,
                    led_mask,
                    led_values: new_leds,
                },
            ) => {
                if mask & kb_feedback::KEY_CLICK_PERCENT != 0 {
                    *click = percent(new_click, 0)?;
                }
                if mask & kb_feedback::BELL_PERCENT != 0 {
                    *bell = percent(new_percent, 50)?;
                }
                if mask & kb_feedback::BELL_PITCH != 0 {
                    *pitch = if new_pitch < 0 { 400 } else { new_pitch as u16 };
                }
                if mask & kb_feedback::BELL_DURATION != 0 {
                    *duration = if new_duration < 0 { 100 } else { new_duration as u16 };
                }
                if mask & kb_feedback::LED != 0 {
                    *led_values = (*led_values & !led_mask) | (new_leds & led_mask);
                }
            }
            (
                FeedbackState::Pointer {
                    numerator,
                    denominator,
                    threshold,
                    ..
                },
                FeedbackChange::Pointer {
                    numerator: new_num,
                    denominator: new_den,
                    threshold: new_threshold,
                },
            ) => {
                if mask & ptr_feedback::ACCEL_DENOMINATOR != 0 && new_den == 0 {
                    return Err(X11Error::bad_value(0));
                }
                if mask & ptr_feedback::ACCEL_NUMERATOR != 0 {
                    *numerator = if new_num < 0 { 2 } else { new_num as u16 };
                }
                if mask & ptr_feedback::ACCEL_DENOMINATOR != 0 {
                    *denominator = if new_den < 0 { 1 } else { new_den as u16 };
                }
                if mask & ptr_feedback::THRESHOLD != 0 {
                    *threshold = if new_threshold < 0 { 4 } else { new_threshold as u16 };
                }
            }
            _ => return Err(X11Error::bad_match()),
        }
        Ok(())
    }

    fn query_device_state(&self, device: u8) -> X11Result<Vec<InputState>> {
        let runtime = self.xinput.device(device)?;
        Ok(runtime
            .template
            .classes
            .iter()
            .map(|class| match class {
                DeviceClass::Key {
                    min_keycode,
                    max_keycode,
                } => InputState::Key {
                    num_keys: max_keycode.saturating_sub(*min_keycode).saturating_add(1),
                    keys: runtime.keys_down,
                },
                DeviceClass::Button { num_buttons } => InputState::Button {
                    num_buttons: (*num_buttons).min(255) as u8,
                    buttons: runtime.buttons_down,
                },
                DeviceClass::Valuator { .. } => InputState::Valuator {
                    mode: runtime.mode,
                    values: runtime.valuators.clone(),
                },
            })
            .collect())
    }

    /// Check a valuator range and that no other client holds the device
    fn valuator_status(&self, client: ClientId, device: u8, first: u8, count: usize) -> X11Result<Option<u8>> {
        let runtime = self.xinput.device(device)?;
        let axes = runtime.template.axes().len();
        if axes == 0 {
            return Err(X11Error::bad_match());
        }
        if first as usize + count > axes {
            return Err(X11Error::bad_value(first as u32));
        }
        match &runtime.state.grab {
            Some(grab) if grab.client != client => Ok(Some(GrabStatus::AlreadyGrabbed as u8)),
            _ => Ok(None),
        }
    }

    fn xi2_modifiers(value: u32) -> ModifierMatch {
        if value & xi2::ANY_MODIFIER != 0 {
            ModifierMatch::Any
        } else {
            ModifierMatch::Exact(value as u16 & modifier_mask::KEY_MASK)
        }
    }

    fn xi2_detail(detail: u32) -> X11Result<Detail> {
        match detail {
            xi2::ANY_DETAIL => Ok(Detail::Any),
            d => u8::try_from(d)
                .map(Detail::Exact)
                .map_err(|_| X11Error::bad_value(d)),
        }
    }

    /// Handle one XInputExtension request
    pub(crate) fn xinput_request(&mut self, client: ClientId, req: XiRequest) -> X11Result<Option<Reply>> {
        match req {
            XiRequest::GetExtensionVersion { name } => Ok(xi_reply(XiReply::GetExtensionVersion {
                present: name == super::extensions::XINPUT_NAME.as_bytes(),
                major: XI_MAJOR_VERSION,
                minor: XI_MINOR_VERSION,
            })),

            XiRequest::ListInputDevices => Ok(xi_reply(XiReply::ListInputDevices {
                devices: self
                    .xinput
                    .devices
                    .values()
                    .map(|r| (*r.template).clone())
                    .collect(),
            })),

            XiRequest::OpenDevice { device } => {
                let classes = self.xinput.device(device)?.template.classes.clone();
                self.xinput
                    .handles
                    .entry((client, device))
                    .or_insert_with(|| DeviceHandle {
                        classes: classes.clone(),
                        selections: HashMap::new(),
                    });
                log::debug!("Client {} opened device {}", client, device);
                Ok(xi_reply(XiReply::OpenDevice { classes }))
            }

            XiRequest::CloseDevice { device } => {
                self.open_handle(client, device)?;
                self.xinput.handles.remove(&(client, device));
                if let Some(runtime) = self.xinput.devices.get_mut(&device) {
                    runtime.button_grabs.remove_client(client);
                    runtime.key_grabs.remove_client(client);
                }
                if self.xinput.device(device)?.state.grabbed_by(client) {
                    self.release_device_grab(device);
                }
                log::debug!("Client {} closed device {}", client, device);
                Ok(None)
            }

            XiRequest::SetDeviceMode { device, mode } => {
                self.open_handle(client, device)?;
                if mode > 1 {
                    return Err(X11Error::bad_value(mode as u32));
                }
                let runtime = self.xinput.device_mut(device)?;
                if !runtime.template.has_class(2) {
                    return Err(X11Error::bad_match());
                }
                runtime.mode = mode;
                Ok(status(5, 0))
            }

            XiRequest::SelectExtensionEvent { window, classes } => {
                self.select_extension_event(client, window, &classes)?;
                Ok(None)
            }

            XiRequest::GetSelectedExtensionEvents { window } => {
                self.windows.get(window)?;
                Ok(xi_reply(XiReply::GetSelectedExtensionEvents {
                    this_client: self.selected_classes(window, Some(client)),
                    all_clients: self.selected_classes(window, None),
                }))
            }

            XiRequest::GrabDevice {
                grab_window,
                time,
                classes,
                this_device_mode,
                other_device_mode,
                owner_events,
                device,
            } => {
                let event_mask = self.device_grab_mask(client, device, &classes)?;
                let grab = ActiveGrab {
                    client,
                    window: grab_window,
                    owner_events,
                    event_mask,
                    via: Via::XInput,
                    this_mode: this_device_mode,
                    other_mode: other_device_mode,
                    confine_to: Window::NONE,
                    cursor: Cursor::NONE,
                    time,
                    origin: GrabOrigin::Explicit,
                };
                let result = self.grab_device_common(client, device, grab_window, time, grab)?;
                Ok(status(13, result as u8))
            }

            XiRequest::UngrabDevice { time, device } => {
                self.ungrab_device_common(client, device, time)?;
                Ok(None)
            }

            XiRequest::GrabDeviceKey {
                grab_window,
                classes,
                modifiers,
                modifier_device,
                device,
                key,
                this_device_mode,
                other_device_mode,
                owner_events,
            } => {
                let mask = self.device_grab_mask(client, device, &classes)?;
                self.check_modifier_device(modifier_device)?;
                self.windows.get(grab_window)?;
                let runtime = self.xinput.device_mut(device)?;
                if !runtime.template.has_class(0) {
                    return Err(X11Error::bad_match());
                }
                if !self.policy.allow_device_grabs {
                    return Err(X11Error::bad_access());
                }
                runtime.key_grabs.add(PassiveGrab {
                    client,
                    window: grab_window,
                    detail: Detail::from_wire(key),
                    modifiers: ModifierMatch::from_wire(modifiers),
                    owner_events,
                    event_mask: if mask == 0 {
                        (1 << xi_event::DEVICE_KEY_PRESS) | (1 << xi_event::DEVICE_KEY_RELEASE)
                    } else {
                        mask
                    },
                    via: Via::XInput,
                    this_mode: this_device_mode,
                    other_mode: other_device_mode,
                    confine_to: Window::NONE,
                    cursor: Cursor::NONE,
                })?;
                Ok(None)
            }

            XiRequest::UngrabDeviceKey {
                grab_window,
                modifiers,
                modifier_device,
                key,
                device,
            } => {
                self.check_modifier_device(modifier_device)?;
                self.windows.get(grab_window)?;
                self.xinput.device_mut(device)?.key_grabs.remove(
                    client,
                    grab_window,
                    Detail::from_wire(key),
                    ModifierMatch::from_wire(modifiers),
                );
                Ok(None)
            }

            XiRequest::GrabDeviceButton {
                grab_window,
                device,
                modifier_device,
                classes,
                modifiers,
                this_device_mode,
                other_device_mode,
                button,
                owner_events,
            } => {
                let mask = self.device_grab_mask(client, device, &classes)?;
                self.check_modifier_device(modifier_device)?;
                self.windows.get(grab_window)?;
                let runtime = self.xinput.device_mut(device)?;
                if !runtime.template.has_class(1) {
                    return Err(X11Error::bad_match());
                }
                if !self.policy.allow_device_grabs {
                    return Err(X11Error::bad_access());
                }
                runtime.button_grabs.add(PassiveGrab {
                    client,
                    window: grab_window,
                    detail: Detail::from_wire(button),
                    modifiers: ModifierMatch::from_wire(modifiers),
                    owner_events,
                    event_mask: if mask == 0 {
                        (1 << xi_event::DEVICE_BUTTON_PRESS) | (1 << xi_event::DEVICE_BUTTON_RELEASE)
                    } else {
                        mask
                    },
                    via: Via::XInput,
                    this_mode: this_device_mode,
                    other_mode: other_device_mode,
                    confine_to: Window::NONE,
                    cursor: Cursor::NONE,
                })?;
                Ok(None)
            }

            XiRequest::UngrabDeviceButton {
                grab_window,
                modifiers,
                modifier_device,
                button,
                device,
            } => {
                self.check_modifier_device(modifier_device)?;
                self.windows.get(grab_window)?;
                self.xinput.device_mut(device)?.button_grabs.remove(
                    client,
                    grab_window,
                    Detail::from_wire(button),
                    ModifierMatch::from_wire(modifiers),
                );
                Ok(None)
            }

            XiRequest::AllowDeviceEvents { time, mode, device } => {
                self.allow_device_common(client, device, time, mode)?;
                Ok(None)
            }

            XiRequest::GetDeviceFocus { device } => {
                let runtime = self.xinput.device(device)?;
                if !runtime.template.has_class(0) {
                    return Err(X11Error::bad_match());
                }
                Ok(xi_reply(XiReply::GetDeviceFocus {
                    focus: runtime.focus.to_wire(),
                    time: runtime.focus_time,
                    revert_to: runtime.revert_to,
                }))
            }

            XiRequest::SetDeviceFocus {
                focus,
                time,
                revert_to,
                device,
            } => {
                self.set_device_focus(device, focus, time, revert_to)?;
                Ok(None)
            }

            XiRequest::GetFeedbackControl { device } => Ok(xi_reply(XiReply::GetFeedbackControl {
                feedbacks: self.xinput.device(device)?.feedback.clone(),
            })),

            XiRequest::ChangeFeedbackControl {
                device,
                feedback_id,
                mask,
                change,
            } => {
                self.change_feedback(device, feedback_id, mask, change)?;
                Ok(None)
            }

            XiRequest::GetDeviceButtonMapping { device } => {
                let runtime = self.xinput.device(device)?;
                if !runtime.template.has_class(1) {
                    return Err(X11Error::bad_match());
                }
                Ok(xi_reply(XiReply::GetDeviceButtonMapping {
                    map: runtime.button_map.clone(),
                }))
            }

            XiRequest::SetDeviceButtonMapping { device, map } => {
                let runtime = self.xinput.device_mut(device)?;
                if !runtime.template.has_class(1) {
                    return Err(X11Error::bad_match());
                }
                if map.len() != runtime.button_map.len() {
                    return Err(X11Error::bad_value(map.len() as u32));
                }
                // A held button whose mapping would change makes the device busy
                let busy = map
                    .iter()
                    .zip(&runtime.button_map)
                    .enumerate()
                    .any(|(i, (new, old))| new != old && bit_get(&runtime.buttons_down, (i + 1) as u8));
                if busy {
                    return Ok(status(29, 1));
                }
                runtime.button_map = map;
                Ok(status(29, 0))
            }

            XiRequest::QueryDeviceState { device } => Ok(xi_reply(XiReply::QueryDeviceState {
                classes: self.query_device_state(device)?,
            })),

            XiRequest::SetDeviceValuators {
                device,
                first_valuator,
                values,
            } => {
                if let Some(busy) = self.valuator_status(client, device, first_valuator, values.len())? {
                    return Ok(status(33, busy));
                }
                let runtime = self.xinput.device_mut(device)?;
                let first = first_valuator as usize;
                runtime.valuators[first..first + values.len()].copy_from_slice(&values);
                Ok(status(33, 0))
            }

            XiRequest::GetDeviceControl { device, control } => {
                if control != DEVICE_RESOLUTION {
                    return Err(X11Error::bad_value(control as u32));
                }
                let runtime = self.xinput.device(device)?;
                let axes = runtime.template.axes();
                if axes.is_empty() {
                    return Err(X11Error::bad_match());
                }
                Ok(xi_reply(XiReply::GetDeviceControl {
                    resolutions: runtime.resolutions.clone(),
                    min_resolutions: vec![1; axes.len()],
                    max_resolutions: axes.iter().map(|a| a.resolution.max(1)).collect(),
                }))
            }

            XiRequest::ChangeDeviceControl {
                device,
                first_valuator,
                resolutions,
            } => {
                if let Some(busy) = self.valuator_status(client, device, first_valuator, resolutions.len())? {
                    return Ok(status(35, busy));
                }
                let runtime = self.xinput.device_mut(device)?;
                let first = first_valuator as usize;
                let axes = runtime.template.axes().to_vec();
                for (i, resolution) in resolutions.iter().enumerate() {
                    if *resolution < 1 || *resolution > axes[first + i].resolution.max(1) {
                        return Err(X11Error::bad_value(*resolution));
                    }
                }
                runtime.resolutions[first..first + resolutions.len()].copy_from_slice(&resolutions);
                Ok(status(35, 0))
            }

            XiRequest::XiSelectEvents { window, masks } => {
                self.windows.get(window)?;
                for m in &masks {
                    self.xinput.check_xi2_device(m.device)?;
                    if m.mask & !xi2::SELECTABLE != 0 {
                        return Err(X11Error::bad_value(m.mask));
                    }
                }
                let clients = self.xinput.xi2_selections.entry(window).or_default();
                let selected = clients.entry(client).or_default();
                for m in masks {
                    if m.mask == 0 {
                        selected.remove(&m.device);
                    } else {
                        selected.insert(m.device, m.mask);
                    }
                }
                if selected.is_empty() {
                    clients.remove(&client);
                }
                if clients.is_empty() {
                    self.xinput.xi2_selections.remove(&window);
                }
                log::debug!("Client {} XI2 selection on 0x{:08x}", client, window.xid());
                Ok(None)
            }

            XiRequest::XiQueryVersion { major, minor } => {
                let version = if (major, minor) >= (XI2_MAJOR_VERSION, XI2_MINOR_VERSION) {
                    (XI2_MAJOR_VERSION, XI2_MINOR_VERSION)
                } else {
                    (major, minor)
                };
                self.xinput.versions.insert(client, version);
                Ok(xi_reply(XiReply::XiQueryVersion {
                    major: version.0,
                    minor: version.1,
                }))
            }

            XiRequest::XiQueryDevice { device } => {
                self.xinput.check_xi2_device(device)?;
                let devices = self
                    .xinput
                    .devices
                    .values()
                    .filter(|r| {
                        device == xi2::ALL_DEVICES
                            || (device == xi2::ALL_MASTER_DEVICES && r.template.device_use != DeviceUse::ExtensionDevice)
                            || r.id() as u16 == device
                    })
                    .map(DeviceRuntime::snapshot)
                    .collect();
                Ok(xi_reply(XiReply::XiQueryDevice { devices }))
            }

            XiRequest::XiGrabDevice {
                grab_window,
                time,
                cursor,
                device,
                mode,
                paired_device_mode,
                owner_events,
                mask,
            } => {
                let id = u8::try_from(device).map_err(|_| xi_error(xi_error::BAD_DEVICE, device as u32))?;
                self.xinput.device(id)?;
                if !cursor.is_none() && !self.cursors.contains(cursor.id()) {
                    return Err(X11Error::bad_cursor(cursor));
                }
                let grab = ActiveGrab {
                    client,
                    window: grab_window,
                    owner_events,
                    event_mask: mask,
                    via: Via::XInput2,
                    this_mode: mode,
                    other_mode: paired_device_mode,
                    confine_to: Window::NONE,
                    cursor,
                    time,
                    origin: GrabOrigin::Explicit,
                };
                let result = self.grab_device_common(client, id, grab_window, time, grab)?;
                Ok(status(51, result as u8))
            }

            XiRequest::XiUngrabDevice { time, device } => {
                let id = u8::try_from(device).map_err(|_| xi_error(xi_error::BAD_DEVICE, device as u32))?;
                self.ungrab_device_common(client, id, time)?;
                Ok(None)
            }

            XiRequest::XiAllowEvents { time, device, mode } => {
                let id = u8::try_from(device).map_err(|_| xi_error(xi_error::BAD_DEVICE, device as u32))?;
                self.allow_device_common(client, id, time, mode)?;
                Ok(None)
            }

            XiRequest::XiPassiveGrabDevice {
                time: _,
                grab_window,
                cursor,
                detail,
                device,
                grab_type,
                grab_mode,
                paired_device_mode,
                owner_events,
                mask,
                modifiers,
            } => {
                let id = u8::try_from(device).map_err(|_| xi_error(xi_error::BAD_DEVICE, device as u32))?;
                self.xinput.device(id)?;
                self.windows.get(grab_window)?;
                if !cursor.is_none() && !self.cursors.contains(cursor.id()) {
                    return Err(X11Error::bad_cursor(cursor));
                }
                if grab_type != xi2::GRAB_TYPE_BUTTON && grab_type != xi2::GRAB_TYPE_KEYCODE {
                    return Err(X11Error::bad_value(grab_type as u32));
                }
                let detail = Self::xi2_detail(detail)?;
                let allowed = self.policy.allow_device_grabs;
                let runtime = self.xinput.device_mut(id)?;
                let table = if grab_type == xi2::GRAB_TYPE_BUTTON {
                    &mut runtime.button_grabs
                } else {
                    &mut runtime.key_grabs
                };
                let mut failed = Vec::new();
                for m in modifiers {
                    if !allowed {
                        failed.push((m, GrabStatus::AlreadyGrabbed));
                        continue;
                    }
                    let added = table.add(PassiveGrab {
                        client,
                        window: grab_window,
                        detail,
                        modifiers: Self::xi2_modifiers(m),
                        owner_events,
                        event_mask: mask,
                        via: Via::XInput2,
                        this_mode: grab_mode,
                        other_mode: paired_device_mode,
                        confine_to: Window::NONE,
                        cursor,
                    });
                    if added.is_err() {
                        failed.push((m, GrabStatus::AlreadyGrabbed));
                    }
                }
                Ok(xi_reply(XiReply::XiPassiveGrabDevice { failed }))
            }

            XiRequest::XiPassiveUngrabDevice {
                grab_window,
                detail,
                device,
                grab_type,
                modifiers,
            } => {
                let id = u8::try_from(device).map_err(|_| xi_error(xi_error::BAD_DEVICE, device as u32))?;
                self.windows.get(grab_window)?;
                if grab_type != xi2::GRAB_TYPE_BUTTON && grab_type != xi2::GRAB_TYPE_KEYCODE {
                    return Err(X11Error::bad_value(grab_type as u32));
                }
                let detail = Self::xi2_detail(detail)?;
                let runtime = self.xinput.device_mut(id)?;
                let table = if grab_type == xi2::GRAB_TYPE_BUTTON {
                    &mut runtime.button_grabs
                } else {
                    &mut runtime.key_grabs
                };
                for m in modifiers {
                    table.remove(client, grab_window, detail, Self::xi2_modifiers(m));
                }
                Ok(None)
            }

            XiRequest::XiGetSelectedEvents { window } => {
                self.windows.get(window)?;
                let masks = self
                    .xinput
                    .xi2_selections
                    .get(&window)
                    .and_then(|clients| clients.get(&client))
                    .map(|selected| {
                        selected
                            .iter()
                            .map(|(device, mask)| Xi2Mask {
                                device: *device,
                                mask: *mask,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(xi_reply(XiReply::XiGetSelectedEvents { masks }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::security::SecurityPolicy;
    use crate::server::window::WindowTree;
    use crate::server::Message;

    const POINTER: u8 = 2;
    const KEYBOARD: u8 = 3;

    /// Every device grab names a live window
    fn grabs_valid(state: &XInputState, tree: &WindowTree) -> bool {
        state
            .devices
            .values()
            .filter_map(|r| r.state.grab.as_ref())
            .all(|g| tree.contains(g.window))
    }

    fn server() -> (Server, ClientId, ClientId) {
        let mut server = Server::new(Box::new(NullBackend::new()), SecurityPolicy::default()).unwrap();
        let a = server.register_client(ByteOrder::LSBFirst).unwrap();
        let b = server.register_client(ByteOrder::LSBFirst).unwrap();
        (server, a, b)
    }

    fn xi(server: &mut Server, client: ClientId, req: XiRequest) -> X11Result<Option<XiReply>> {
        server.xinput_request(client, req).map(|r| match r {
            Some(Reply::XInput(reply)) => Some(reply),
            Some(other) => panic!("unexpected {:?}", other),
            None => None,
        })
    }

    fn press(kind: InputKind, detail: u8) -> RawInput {
        RawInput {
            kind,
            detail,
            root_x: 5,
            root_y: 5,
            modifiers: 0,
            time: Timestamp::CURRENT_TIME,
        }
    }

    #[test]
    fn test_select_requires_open_device() {
        let (mut server, a, _) = server();
        let root = server.window_tree().root();
        let class = event_class(POINTER, xi_event::DEVICE_BUTTON_PRESS);
        let err = xi(
            &mut server,
            a,
            XiRequest::SelectExtensionEvent {
                window: root,
                classes: vec![class],
            },
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Extension(XINPUT_FIRST_ERROR + xi_error::BAD_CLASS));

        xi(&mut server, a, XiRequest::OpenDevice { device: POINTER }).unwrap();
        xi(
            &mut server,
            a,
            XiRequest::SelectExtensionEvent {
                window: root,
                classes: vec![class],
            },
        )
        .unwrap();
        let reply = xi(&mut server, a, XiRequest::GetSelectedExtensionEvents { window: root }).unwrap();
        assert_eq!(
            reply,
            Some(XiReply::GetSelectedExtensionEvents {
                this_client: vec![class],
                all_clients: vec![class],
            })
        );
    }

    #[test]
    fn test_unknown_device_is_bad_device() {
        let (mut server, a, _) = server();
        let err = xi(&mut server, a, XiRequest::OpenDevice { device: 9 }).unwrap_err();
        assert_eq!(err.code, ErrorCode::Extension(XINPUT_FIRST_ERROR + xi_error::BAD_DEVICE));
        assert_eq!(err.bad_value, 9);
    }

    #[test]
    fn test_device_events_follow_handle_selection() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        xi(&mut server, a, XiRequest::OpenDevice { device: POINTER }).unwrap();
        xi(
            &mut server,
            a,
            XiRequest::SelectExtensionEvent {
                window: root,
                classes: vec![event_class(POINTER, xi_event::DEVICE_BUTTON_PRESS)],
            },
        )
        .unwrap();
        // A core selection does not receive device events
        server.windows.select_events(root, b, event_mask::BUTTON_PRESS).unwrap();

        let out = server.inject_device_event(POINTER, press(InputKind::ButtonPress, 1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].client, a);
        match &out[0].message {
            Message::Event {
                event: Event::Device(ev),
                ..
            } => {
                assert_eq!(ev.device, POINTER);
                assert_eq!(ev.offset, xi_event::DEVICE_BUTTON_PRESS);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_xi2_selection_and_passive_grab() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        xi(
            &mut server,
            a,
            XiRequest::XiSelectEvents {
                window: root,
                masks: vec![Xi2Mask {
                    device: xi2::ALL_MASTER_DEVICES,
                    mask: xi2::mask_bit(xi2::KEY_PRESS),
                }],
            },
        )
        .unwrap();
        let out = server.inject_device_event(KEYBOARD, press(InputKind::KeyPress, 40));
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0].message,
            Message::Event {
                event: Event::Xi2(_),
                ..
            }
        ));
        server.inject_device_event(KEYBOARD, press(InputKind::KeyRelease, 40));

        let reply = xi(
            &mut server,
            b,
            XiRequest::XiPassiveGrabDevice {
                time: Timestamp::CURRENT_TIME,
                grab_window: root,
                cursor: Cursor::NONE,
                detail: 40,
                device: KEYBOARD as u16,
                grab_type: xi2::GRAB_TYPE_KEYCODE,
                grab_mode: GrabMode::Asynchronous,
                paired_device_mode: GrabMode::Asynchronous,
                owner_events: false,
                mask: xi2::mask_bit(xi2::KEY_PRESS) | xi2::mask_bit(xi2::KEY_RELEASE),
                modifiers: vec![xi2::ANY_MODIFIER],
            },
        )
        .unwrap();
        assert_eq!(reply, Some(XiReply::XiPassiveGrabDevice { failed: vec![] }));

        let out = server.inject_device_event(KEYBOARD, press(InputKind::KeyPress, 40));
        assert_eq!(out.iter().map(|o| o.client).collect::<Vec<_>>(), vec![b]);
        assert_eq!(
            server.xinput.devices[&KEYBOARD].state.grab.as_ref().map(|g| g.client),
            Some(b)
        );
        // Core state is untouched by device grabs
        assert!(server.keyboard_grab().is_none());

        server.inject_device_event(KEYBOARD, press(InputKind::KeyRelease, 40));
        assert!(server.xinput.devices[&KEYBOARD].state.grab.is_none());
    }

    fn mapped_window(server: &mut Server, client: ClientId, parent: Window) -> Window {
        let wid = ResourceId::new(client, 1);
        server
            .create_window(
                client,
                CreateWindowRequest {
                    depth: 0,
                    wid,
                    parent,
                    x: 0,
                    y: 0,
                    width: 50,
                    height: 50,
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

    fn device_press_state(out: &[Outbound]) -> Option<u16> {
        out.iter().find_map(|o| match &o.message {
            Message::Event {
                event: Event::Device(ev),
                ..
            } if ev.offset == xi_event::DEVICE_BUTTON_PRESS => Some(ev.data.state),
            _ => None,
        })
    }

    #[test]
    fn test_device_replay_keeps_original_state() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        let outer = mapped_window(&mut server, a, root);
        let inner = mapped_window(&mut server, b, outer);
        let class = event_class(POINTER, xi_event::DEVICE_BUTTON_PRESS);
        for client in [a, b] {
            xi(&mut server, client, XiRequest::OpenDevice { device: POINTER }).unwrap();
        }
        xi(
            &mut server,
            a,
            XiRequest::GrabDeviceButton {
                grab_window: outer,
                device: POINTER,
                modifier_device: 255,
                classes: vec![class],
                modifiers: modifier_mask::ANY_MODIFIER,
                this_device_mode: GrabMode::Synchronous,
                other_device_mode: GrabMode::Asynchronous,
                button: 0,
                owner_events: false,
            },
        )
        .unwrap();
        xi(
            &mut server,
            b,
            XiRequest::SelectExtensionEvent {
                window: inner,
                classes: vec![class],
            },
        )
        .unwrap();

        let out = server.inject_device_event(POINTER, press(InputKind::ButtonPress, 1));
        assert_eq!(out.iter().map(|o| o.client).collect::<Vec<_>>(), vec![a]);
        assert_eq!(device_press_state(&out), Some(0));
        assert!(server.xinput.devices[&POINTER].state.is_frozen());

        xi(
            &mut server,
            a,
            XiRequest::AllowDeviceEvents {
                time: Timestamp::CURRENT_TIME,
                mode: DeviceAllowMode::Replay,
                device: POINTER,
            },
        )
        .unwrap();
        let out = server.take_outbox();
        assert_eq!(out.iter().map(|o| o.client).collect::<Vec<_>>(), vec![b]);
        assert_eq!(device_press_state(&out), Some(0));
        assert_eq!(server.xinput.devices[&POINTER].button_state(), modifier_mask::BUTTON1);
    }

    #[test]
    fn test_core_and_device_grabs_coexist() {
        let (mut server, a, b) = server();
        let root = server.window_tree().root();
        let reply = server
            .grab_keyboard(
                a,
                GrabKeyboardRequest {
                    owner_events: false,
                    grab_window: root,
                    time: Timestamp::CURRENT_TIME,
                    pointer_mode: GrabMode::Asynchronous,
                    keyboard_mode: GrabMode::Asynchronous,
                },
            )
            .unwrap();
        assert_eq!(reply, Reply::Grab { status: GrabStatus::Success });

        xi(&mut server, b, XiRequest::OpenDevice { device: KEYBOARD }).unwrap();
        let reply = xi(
            &mut server,
            b,
            XiRequest::GrabDevice {
                grab_window: root,
                time: Timestamp::CURRENT_TIME,
                classes: vec![event_class(KEYBOARD, xi_event::DEVICE_KEY_PRESS)],
                this_device_mode: GrabMode::Asynchronous,
                other_device_mode: GrabMode::Asynchronous,
                owner_events: false,
                device: KEYBOARD,
            },
        )
        .unwrap();
        assert_eq!(reply, Some(XiReply::Status { minor: 13, status: 0 }));
        assert_eq!(server.keyboard_grab().map(|g| g.client), Some(a));
        assert!(grabs_valid(&server.xinput, &server.windows));
    }

    #[test]
    fn test_valuators_and_resolution() {
        let (mut server, a, b) = server();
        let reply = xi(
            &mut server,
            a,
            XiRequest::SetDeviceValuators {
                device: POINTER,
                first_valuator: 0,
                values: vec![10, 20],
            },
        )
        .unwrap();
        assert_eq!(reply, Some(XiReply::Status { minor: 33, status: 0 }));
        assert_eq!(server.xinput.devices[&POINTER].valuators, vec![10, 20]);

        let err = xi(
            &mut server,
            a,
            XiRequest::SetDeviceValuators {
                device: POINTER,
                first_valuator: 1,
                values: vec![1, 2],
            },
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Value);

        let reply = xi(
            &mut server,
            b,
            XiRequest::GetDeviceControl {
                device: POINTER,
                control: DEVICE_RESOLUTION,
            },
        )
        .unwrap();
        assert_eq!(
            reply,
            Some(XiReply::GetDeviceControl {
                resolutions: vec![1, 1],
                min_resolutions: vec![1, 1],
                max_resolutions: vec![1, 1],
            })
        );
    }

    #[test]
    fn test_button_mapping_busy_while_held() {
        let (mut server, a, _) = server();
        server.inject_device_event(POINTER, press(InputKind::ButtonPress, 1));
        let reply = xi(
            &mut server,
            a,
            XiRequest::SetDeviceButtonMapping {
                device: POINTER,
                map: vec![3, 2, 1, 4, 5],
            },
        )
        .unwrap();
        assert_eq!(reply, Some(XiReply::Status { minor: 29, status: 1 }));
        server.inject_device_event(POINTER, press(InputKind::ButtonRelease, 1));
        let reply = xi(
            &mut server,
            a,
            XiRequest::SetDeviceButtonMapping {
                device: POINTER,
                map: vec![3, 2, 1, 4, 5],
            },
        )
        .unwrap();
        assert_eq!(reply, Some(XiReply::Status { minor: 29, status: 0 }));
    }

    #[test]
    fn test_query_device_reports_attachment() {
        let (mut server, a, _) = server();
        let reply = xi(
            &mut server,
            a,
            XiRequest::XiQueryDevice {
                device: xi2::ALL_DEVICES,
            },
        )
        .unwrap();
        match reply {
            Some(XiReply::XiQueryDevice { devices }) => {
                let pairs: Vec<(u8, u16)> = devices.iter().map(|d| (d.info.id, d.attachment)).collect();
                assert_eq!(pairs, vec![(POINTER, 3), (KEYBOARD, 2)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
