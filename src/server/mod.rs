//! Core X11 server implementation
//!
//! [`Server`] owns every piece of state shared between connections: the
//! resource tables, the window tree, atoms and selections, and the grab and
//! focus state of every input device. Connections hold it behind one lock;
//! per-connection state (sequence counter, byte order, BIG-REQUESTS) lives in
//! a [`ClientSession`].
//!
//! Handlers never write to sockets. Events they generate are queued in an
//! outbox as [`Outbound`] messages and handed to the transport when the
//! request completes.

mod atoms;
pub mod client;
mod dispatch;
pub mod extensions;
pub mod grabs;
pub mod input;
pub mod listener;
mod property;
pub mod router;
mod selection;
pub mod window;
pub mod xinput;

pub use client::ClientSession;
pub use router::{InputKind, RawInput};

use crate::backend::{Backend, ScreenInfo, VisualInfo};
use crate::error::{ServerError, ServerResult};
use crate::protocol::*;
use crate::resources::{
    ColormapRecord, CursorRecord, FontRecord, GcRecord, IdSpace, PixmapRecord, ResourceKind,
    ResourceTable,
};
use crate::security::SecurityPolicy;
use atoms::AtomTable;
use extensions::ExtensionRegistry;
use grabs::ActiveGrab;
use input::CoreInput;
use selection::SelectionTable;
use std::collections::HashMap;
use std::time::Instant;
use window::{WindowRecord, WindowTree};
use xinput::XInputState;

/// Local id of the root window; owned by the server client
pub const ROOT_WINDOW_LOCAL: u32 = 0x100;

/// Local id of the default colormap; owned by the server client
pub const DEFAULT_COLORMAP_LOCAL: u32 = 0x20;

pub const VENDOR: &str = "x11core";

/// Something to send to one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Event { event: Event, synthetic: bool },
    Reply { sequence: u16, reply: Reply },
    Error(X11Error),
    /// Close the connection (KillClient)
    Close,
}

impl Message {
    /// Wire bytes in the receiver's byte order. Events carry `sequence`,
    /// the last request the receiver sent. `Close` has no bytes.
    pub fn encode(&self, byte_order: ByteOrder, sequence: u16) -> Option<Vec<u8>> {
        match self {
            Message::Event { event, synthetic } => Some(event.encode(sequence, byte_order, *synthetic)),
            Message::Reply { sequence, reply } => {
                Some(ProtocolEncoder::new(byte_order).encode_reply(*sequence, reply))
            }
            Message::Error(err) => Some(err.encode(byte_order)),
            Message::Close => None,
        }
    }
}

/// A message addressed to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub client: ClientId,
    pub message: Message,
}

/// Server-side record of a connected client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub byte_order: ByteOrder,
    /// Other clients' windows to rescue when this client goes away
    pub save_set: Vec<Window>,
    /// Sequence number of the last request handled
    pub last_sequence: u16,
}

/// The main X11 server
pub struct Server {
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) policy: SecurityPolicy,
    pub(crate) screen: ScreenInfo,
    pub(crate) visuals: Vec<VisualInfo>,
    pub(crate) default_colormap: Colormap,
    pub(crate) min_keycode: u8,
    pub(crate) max_keycode: u8,

    pub(crate) ids: IdSpace,
    pub(crate) windows: WindowTree,
    pub(crate) pixmaps: ResourceTable<PixmapRecord>,
    pub(crate) gcs: ResourceTable<GcRecord>,
    pub(crate) colormaps: ResourceTable<ColormapRecord>,
    pub(crate) cursors: ResourceTable<CursorRecord>,
    pub(crate) fonts: ResourceTable<FontRecord>,

    pub(crate) atoms: AtomTable,
    pub(crate) selections: SelectionTable,
    pub(crate) input: CoreInput,
    pub(crate) xinput: XInputState,
    pub(crate) extensions: ExtensionRegistry,

    pub(crate) clients: HashMap<ClientId, ClientInfo>,
    next_client: ClientId,
    /// Client holding GrabServer
    pub(crate) server_grab: Option<ClientId>,
    pub(crate) outbox: Vec<Outbound>,
    started: Instant,
}

impl Server {
    /// Build the server state from what the host describes
    pub fn new(mut backend: Box<dyn Backend>, policy: SecurityPolicy) -> ServerResult<Self> {
        backend
            .init()
            .map_err(|e| ServerError::Backend(e.to_string()))?;
        let screen = backend
            .get_screen_info()
            .map_err(|e| ServerError::Backend(e.to_string()))?;
        let visuals = backend
            .get_visuals()
            .map_err(|e| ServerError::Backend(e.to_string()))?;
        let root_visual = visuals
            .iter()
            .find(|v| v.visual_id == screen.root_visual)
            .cloned()
            .ok_or_else(|| ServerError::Backend("root visual not among the visuals".to_string()))?;

        let root_id = Window(ResourceId::new(SERVER_CLIENT, ROOT_WINDOW_LOCAL));
        let default_colormap = Colormap(ResourceId::new(SERVER_CLIENT, DEFAULT_COLORMAP_LOCAL));

        let mut root = WindowRecord::new(root_id, Window::NONE);
        root.width = screen.width;
        root.height = screen.height;
        root.depth = screen.root_depth;
        root.visual = screen.root_visual;
        root.mapped = true;
        root.attributes.colormap = default_colormap;

        let mut ids = IdSpace::new();
        ids.reserve(root_id.id(), ResourceKind::Window);
        ids.reserve(default_colormap.id(), ResourceKind::Colormap);

        let mut colormaps = ResourceTable::new(ResourceKind::Colormap);
        let cmap = ColormapRecord::new(&root_visual, false, SERVER_CLIENT)
            .map_err(|e| ServerError::Backend(format!("default colormap: {}", e.code)))?;
        colormaps
            .insert(default_colormap.id(), cmap)
            .map_err(|e| ServerError::Backend(format!("default colormap: {}", e.code)))?;

        let devices = backend.device_capabilities();
        log::info!(
            "Screen {}x{} depth {}, {} visuals, {} input devices",
            screen.width,
            screen.height,
            screen.root_depth,
            visuals.len(),
            devices.len()
        );

        Ok(Server {
            backend,
            policy,
            screen,
            visuals,
            default_colormap,
            min_keycode: 8,
            max_keycode: 255,
            ids,
            windows: WindowTree::new(root),
            pixmaps: ResourceTable::new(ResourceKind::Pixmap),
            gcs: ResourceTable::new(ResourceKind::GContext),
            colormaps,
            cursors: ResourceTable::new(ResourceKind::Cursor),
            fonts: ResourceTable::new(ResourceKind::Font),
            atoms: AtomTable::new(),
            selections: SelectionTable::new(),
            input: CoreInput::default(),
            xinput: XInputState::new(devices),
            extensions: ExtensionRegistry::new(),
            clients: HashMap::new(),
            next_client: 1,
            server_grab: None,
            outbox: Vec::new(),
            started: Instant::now(),
        })
    }

    /// Milliseconds since startup; never `CurrentTime`
    pub fn now(&self) -> Timestamp {
        let ms = self.started.elapsed().as_millis() as u32;
        Timestamp::new(ms.max(1))
    }

    pub fn window_tree(&self) -> &WindowTree {
        &self.windows
    }

    pub fn root(&self) -> Window {
        self.windows.root()
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn pointer_grab(&self) -> Option<&ActiveGrab> {
        self.input.pointer.grab.as_ref()
    }

    pub fn keyboard_grab(&self) -> Option<&ActiveGrab> {
        self.input.keyboard.grab.as_ref()
    }

    pub fn server_grabbed_by(&self) -> Option<ClientId> {
        self.server_grab
    }

    pub fn client_info(&self, client: ClientId) -> Option<&ClientInfo> {
        self.clients.get(&client)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of live resources of any kind `client` owns
    pub fn resource_count(&self, client: ClientId) -> usize {
        self.ids.count_owned_by(client)
    }

    /// Allocate a client number for a new connection
    pub fn register_client(&mut self, byte_order: ByteOrder) -> ServerResult<ClientId> {
        for _ in 0..MAX_CLIENTS {
            let candidate = self.next_client;
            self.next_client = if candidate >= MAX_CLIENTS { 1 } else { candidate + 1 };
            // Ids of a departed client may linger until its last resource goes
            if !self.clients.contains_key(&candidate) && self.ids.count_owned_by(candidate) == 0 {
                self.clients.insert(
                    candidate,
                    ClientInfo {
                        byte_order,
                        save_set: Vec::new(),
                        last_sequence: 0,
                    },
                );
                log::info!("Client {} registered ({:?})", candidate, byte_order);
                return Ok(candidate);
            }
        }
        Err(ServerError::ClientsExhausted)
    }

    /// Setup reply for a freshly registered client
    pub fn setup_reply(&self, client: ClientId) -> SetupSuccess {
        let mut depths: Vec<u8> = self.visuals.iter().map(|v| v.depth).collect();
        depths.push(1);
        depths.sort_unstable();
        depths.dedup();

        let allowed_depths = depths
            .iter()
            .map(|depth| Depth {
                depth: *depth,
                visuals: self
                    .visuals
                    .iter()
                    .filter(|v| v.depth == *depth)
                    .map(|v| VisualType {
                        visual_id: v.visual_id,
                        class: v.class,
                        bits_per_rgb_value: v.bits_per_rgb,
                        colormap_entries: v.colormap_entries,
                        red_mask: v.red_mask,
                        green_mask: v.green_mask,
                        blue_mask: v.blue_mask,
                    })
                    .collect(),
            })
            .collect();

        let pixmap_formats = depths
            .iter()
            .map(|depth| Format {
                depth: *depth,
                bits_per_pixel: match depth {
                    1 => 1,
                    2..=8 => 8,
                    9..=16 => 16,
                    _ => 32,
                },
                scanline_pad: 32,
            })
            .collect();

        let root = self.windows.root();
        let root_masks = self
            .windows
            .get(root)
            .map(|r| r.all_event_masks())
            .unwrap_or(0);

        SetupSuccess {
            protocol_major_version: PROTOCOL_MAJOR_VERSION,
            protocol_minor_version: PROTOCOL_MINOR_VERSION,
            release_number: 1,
            resource_id_base: client << CLIENT_ID_SHIFT,
            resource_id_mask: RESOURCE_ID_MASK,
            motion_buffer_size: 0,
            maximum_request_length: u16::MAX,
            image_byte_order: ByteOrder::LSBFirst,
            bitmap_format_bit_order: ByteOrder::LSBFirst,
            bitmap_format_scanline_unit: 32,
            bitmap_format_scanline_pad: 32,
            min_keycode: self.min_keycode,
            max_keycode: self.max_keycode,
            vendor: VENDOR.to_string(),
            pixmap_formats,
            roots: vec![Screen {
                root,
                default_colormap: self.default_colormap,
                white_pixel: self.screen.white_pixel,
                black_pixel: self.screen.black_pixel,
                current_input_masks: root_masks,
                width_in_pixels: self.screen.width,
                height_in_pixels: self.screen.height,
                width_in_millimeters: self.screen.width_mm,
                height_in_millimeters: self.screen.height_mm,
                min_installed_maps: 1,
                max_installed_maps: 1,
                root_visual: self.screen.root_visual,
                backing_stores: 0,
                save_unders: false,
                root_depth: self.screen.root_depth,
                allowed_depths,
            }],
        }
    }

    /// Claim a new resource id, enforcing the per-client cap
    pub(crate) fn claim(&mut self, client: ClientId, id: ResourceId, kind: ResourceKind) -> X11Result<()> {
        if !self.policy.may_allocate(self.ids.count_owned_by(client)) {
            log::warn!(
                "Client {} hit the resource limit ({})",
                client,
                self.policy.max_resources_per_client
            );
            return Err(X11Error::bad_alloc());
        }
        self.ids.claim(client, id, kind)
    }

    /// Queue a server-generated event for a live client
    pub(crate) fn send_event(&mut self, client: ClientId, event: Event) {
        if !self.clients.contains_key(&client) {
            return;
        }
        log::trace!("Event {} queued for client {}", event.code(), client);
        self.outbox.push(Outbound {
            client,
            message: Message::Event {
                event,
                synthetic: false,
            },
        });
    }

    /// Everything queued since the last call, oldest first
    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Tear down everything a departing client left behind. Calling it
    /// again for the same client does nothing.
    pub fn client_disconnected(&mut self, client: ClientId) {
        let Some(info) = self.clients.get(&client).cloned() else {
            return;
        };
        log::info!("Client {} disconnected, releasing its state", client);

        // Grabs, freezes and selections first so nothing below can route
        // input to the departing client
        self.input_client_gone(client);
        self.xinput_client_gone(client);
        self.selections.clear_client(client);
        if self.server_grab == Some(client) {
            self.server_grab = None;
        }
        self.windows.remove_client_selections(client);

        for window in info.save_set {
            if let Err(err) = self.rescue_saved_window(client, window) {
                log::debug!(
                    "Save-set window 0x{:08x} not restored: {:?}",
                    window.xid(),
                    err.code
                );
            }
        }

        let owned = self.windows.owned_by(client);
        for window in owned {
            let top_level = self
                .windows
                .parent(window)
                .is_some_and(|parent| parent.id().client != client);
            if top_level && self.windows.contains(window) {
                if let Err(err) = self.destroy_window(window) {
                    log::warn!("Destroying 0x{:08x} failed: {:?}", window.xid(), err.code);
                }
            }
        }

        for (id, _) in self.pixmaps.remove_owned_by(client) {
            self.ids.release(id);
        }
        for (id, _) in self.gcs.remove_owned_by(client) {
            self.ids.release(id);
        }
        for (id, _) in self.cursors.remove_owned_by(client) {
            self.ids.release(id);
        }
        for (id, _) in self.fonts.remove_owned_by(client) {
            self.ids.release(id);
        }
        for (id, _) in self.colormaps.remove_owned_by(client) {
            self.ids.release(id);
        }
        for (_, cmap) in self.colormaps.iter_mut() {
            cmap.release_client(client);
        }

        self.clients.remove(&client);
        self.outbox.retain(|o| o.client != client);
    }

    /// Move a save-set window out from under the departing client's
    /// windows and make sure it is mapped
    fn rescue_saved_window(&mut self, client: ClientId, window: Window) -> X11Result<()> {
        if !self.windows.contains(window) {
            return Ok(());
        }
        let mut target = self.windows.parent(window);
        while let Some(candidate) = target {
            if candidate.id().client != client {
                break;
            }
            target = self.windows.parent(candidate);
        }
        let Some(new_parent) = target else {
            return Ok(());
        };
        if self.windows.parent(window) != Some(new_parent) {
            let (wx, wy) = self.windows.absolute_origin(window);
            let (px, py) = self.windows.absolute_origin(new_parent);
            let border = self.windows.get(window)?.border_width as i32;
            let x = (wx - px - border) as i16;
            let y = (wy - py - border) as i16;
            self.reparent_window(SERVER_CLIENT, window, new_parent, x, y)?;
        }
        if !self.windows.get(window)?.mapped {
            self.map_window(SERVER_CLIENT, window)?;
        }
        log::debug!(
            "Save-set window 0x{:08x} restored under 0x{:08x}",
            window.xid(),
            new_parent.xid()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;

    fn server() -> Server {
        Server::new(Box::new(NullBackend::new()), SecurityPolicy::default()).unwrap()
    }

    fn create(server: &mut Server, client: ClientId, local: u32, parent: Window) -> Window {
        let wid = ResourceId::new(client, local);
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
        Window(wid)
    }

    #[test]
    fn test_setup_reply_describes_client_range() {
        let mut server = server();
        let client = server.register_client(ByteOrder::LSBFirst).unwrap();
        let setup = server.setup_reply(client);
        assert_eq!(setup.resource_id_base, client << 21);
        assert_eq!(setup.resource_id_mask, 0x1F_FFFF);
        assert_eq!(setup.roots[0].root.xid(), 0x100);
        assert_eq!(setup.roots[0].default_colormap.xid(), 0x20);
        assert!(setup.pixmap_formats.iter().any(|f| f.depth == 1));
    }

    #[test]
    fn test_register_client_skips_live_ids() {
        let mut server = server();
        let a = server.register_client(ByteOrder::LSBFirst).unwrap();
        let b = server.register_client(ByteOrder::MSBFirst).unwrap();
        assert_ne!(a, b);
        assert_eq!(server.client_info(b).map(|i| i.byte_order), Some(ByteOrder::MSBFirst));
    }

    #[test]
    fn test_resource_cap_is_alloc() {
        let mut server = Server::new(
            Box::new(NullBackend::new()),
            SecurityPolicy {
                max_resources_per_client: 1,
                ..SecurityPolicy::default()
            },
        )
        .unwrap();
        let client = server.register_client(ByteOrder::LSBFirst).unwrap();
        server
            .claim(client, ResourceId::new(client, 1), ResourceKind::Pixmap)
            .unwrap();
        let err = server
            .claim(client, ResourceId::new(client, 2), ResourceKind::Pixmap)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Alloc);
    }

    #[test]
    fn test_disconnect_is_idempotent_and_restores_save_set() {
        let mut server = server();
        let wm = server.register_client(ByteOrder::LSBFirst).unwrap();
        let app = server.register_client(ByteOrder::LSBFirst).unwrap();
        let root = server.root();
        let frame = create(&mut server, wm, 1, root);
        let inner = create(&mut server, wm, 2, frame);
        let app_window = create(&mut server, app, 1, root);
        server.reparent_window(wm, app_window, inner, 5, 5).unwrap();
        server.change_save_set(wm, true, app_window).unwrap();

        server.client_disconnected(wm);
        assert!(!server.windows.contains(frame));
        assert!(!server.windows.contains(inner));
        assert_eq!(server.windows.parent(app_window), Some(root));
        assert!(server.windows.get(app_window).unwrap().mapped);
        assert_eq!(server.resource_count(wm), 0);

        server.client_disconnected(wm);
        assert_eq!(server.client_count(), 1);
    }
}
