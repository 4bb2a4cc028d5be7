//! Request execution
//!
//! [`Server::execute`] takes one parsed request from one client and either
//! produces its reply, produces nothing (requests without replies), or fails
//! with the protocol error to send back. Handlers for the larger areas live
//! next to their state (`window`, `property`, `selection`, `input`,
//! `xinput`); the small resource requests are handled here.

use super::input::Focus;
use super::{Message, Outbound, Server};
use crate::protocol::*;
use crate::resources::gc::{GC_CLIP_MASK, GC_FONT, GC_STIPPLE, GC_TILE};
use crate::resources::{
    ColormapRecord, CursorRecord, FontRecord, GcRecord, PixmapRecord, ResourceKind,
};

/// CopyPlane shares the CopyArea request shape
const COPY_PLANE_OPCODE: u8 = 63;

/// KillClient target that names every client in RetainTemporary mode
const ALL_TEMPORARY: u32 = 0;

impl Server {
    /// Execute one request on behalf of `client`
    pub fn execute(&mut self, client: ClientId, request: Request) -> X11Result<Option<Reply>> {
        match request {
            Request::CreateWindow(req) => self.create_window(client, req).map(|_| None),
            Request::ChangeWindowAttributes { window, values } => self
                .change_window_attributes(client, window, values)
                .map(|_| None),
            Request::GetWindowAttributes { window } => {
                self.get_window_attributes(client, window).map(Some)
            }
            Request::DestroyWindow { window } => {
                // Destroying the root is a no-op
                if window == self.windows.root() {
                    return Ok(None);
                }
                self.destroy_window(window).map(|_| None)
            }
            Request::DestroySubwindows { window } => self.destroy_subwindows(window).map(|_| None),
            Request::ChangeSaveSet { insert, window } => {
                self.change_save_set(client, insert, window).map(|_| None)
            }
            Request::ReparentWindow { window, parent, x, y } => self
                .reparent_window(client, window, parent, x, y)
                .map(|_| None),
            Request::MapWindow { window } => self.map_window(client, window).map(|_| None),
            Request::MapSubwindows { window } => self.map_subwindows(client, window).map(|_| None),
            Request::UnmapWindow { window } => self.unmap_window(window).map(|_| None),
            Request::UnmapSubwindows { window } => self.unmap_subwindows(window).map(|_| None),
            Request::ConfigureWindow { window, values } => {
                self.configure_window(client, window, values).map(|_| None)
            }
            Request::GetGeometry { drawable } => self.get_geometry(drawable).map(Some),
            Request::QueryTree { window } => self.query_tree(window).map(Some),
            Request::TranslateCoordinates {
                src_window,
                dst_window,
                src_x,
                src_y,
            } => self
                .translate_coordinates(src_window, dst_window, src_x, src_y)
                .map(Some),

            Request::InternAtom {
                only_if_exists,
                name,
            } => {
                let atom = self.atoms.intern(&name, only_if_exists).unwrap_or(Atom::NONE);
                log::trace!("InternAtom \"{}\" -> {}", name.escape_ascii(), atom.get());
                Ok(Some(Reply::InternAtom { atom }))
            }
            Request::GetAtomName { atom } => match self.atoms.name(atom) {
                Some(name) => Ok(Some(Reply::GetAtomName {
                    name: name.to_vec(),
                })),
                None => Err(X11Error::bad_atom(atom)),
            },

            Request::ChangeProperty(req) => self.change_property(req).map(|_| None),
            Request::DeleteProperty { window, property } => {
                self.delete_property(window, property).map(|_| None)
            }
            Request::GetProperty(req) => self.get_property(req).map(Some),
            Request::ListProperties { window } => self.list_properties(window).map(Some),

            Request::SetSelectionOwner {
                owner,
                selection,
                time,
            } => self
                .set_selection_owner(client, owner, selection, time)
                .map(|_| None),
            Request::GetSelectionOwner { selection } => self.get_selection_owner(selection).map(Some),
            Request::ConvertSelection(req) => self.convert_selection(client, req).map(|_| None),
            Request::SendEvent(req) => self.send_event_request(client, req).map(|_| None),

            Request::GrabPointer(req) => self.grab_pointer(client, req).map(Some),
            Request::UngrabPointer { time } => {
                self.ungrab_pointer(client, time);
                Ok(None)
            }
            Request::GrabButton(req) => self.grab_button(client, req).map(|_| None),
            Request::UngrabButton {
                button,
                grab_window,
                modifiers,
            } => self
                .ungrab_button(client, button, grab_window, modifiers)
                .map(|_| None),
            Request::ChangeActivePointerGrab {
                cursor,
                time,
                event_mask,
            } => self
                .change_active_pointer_grab(client, cursor, time, event_mask)
                .map(|_| None),
            Request::GrabKeyboard(req) => self.grab_keyboard(client, req).map(Some),
            Request::UngrabKeyboard { time } => {
                self.ungrab_keyboard(client, time);
                Ok(None)
            }
            Request::GrabKey(req) => self.grab_key(client, req).map(|_| None),
            Request::UngrabKey {
                key,
                grab_window,
                modifiers,
            } => self
                .ungrab_key(client, key, grab_window, modifiers)
                .map(|_| None),
            Request::AllowEvents { mode, time } => {
                self.allow_events(client, mode, time);
                Ok(None)
            }
            Request::GrabServer => {
                log::debug!("Client {} grabbed the server", client);
                self.server_grab = Some(client);
                Ok(None)
            }
            Request::UngrabServer => {
                if self.server_grab == Some(client) {
                    log::debug!("Client {} released the server", client);
                    self.server_grab = None;
                }
                Ok(None)
            }
            Request::QueryPointer { window } => self.query_pointer(window).map(Some),
            Request::SetInputFocus {
                revert_to,
                focus,
                time,
            } => self.set_input_focus(revert_to, focus, time).map(|_| None),
            Request::GetInputFocus => Ok(Some(self.get_input_focus())),

            Request::OpenFont { fid, name } => self.open_font(client, fid, &name).map(|_| None),
            Request::CloseFont { font } => {
                self.fonts.remove(font.id())?;
                self.ids.release(font.id());
                Ok(None)
            }
            Request::QueryFont { fontable } => self.query_font(fontable).map(Some),

            Request::CreatePixmap {
                depth,
                pid,
                drawable,
                width,
                height,
            } => self
                .create_pixmap(client, depth, pid, drawable, width, height)
                .map(|_| None),
            Request::FreePixmap { pixmap } => {
                self.pixmaps.remove(pixmap.id())?;
                self.ids.release(pixmap.id());
                Ok(None)
            }
            Request::CreateGC {
                cid,
                drawable,
                values,
            } => self.create_gc(client, cid, drawable, values).map(|_| None),
            Request::ChangeGC { gc, values } => {
                let depth = self.gcs.get(gc.id())?.depth;
                self.check_gc_values(depth, &values)?;
                self.gcs.get_mut(gc.id())?.apply(&values)?;
                Ok(None)
            }
            Request::CopyGC { src, dst, mask } => {
                let source = self.gcs.get(src.id())?.clone();
                let target = self.gcs.get_mut(dst.id())?;
                if source.depth != target.depth {
                    return Err(X11Error::bad_match());
                }
                target.copy_from(&source, mask)?;
                Ok(None)
            }
            Request::FreeGC { gc } => {
                self.gcs.remove(gc.id())?;
                self.ids.release(gc.id());
                Ok(None)
            }
            Request::ClearArea { window, .. } => {
                if self.windows.get(window)?.class == WindowClass::InputOnly {
                    return Err(X11Error::bad_match());
                }
                Ok(None)
            }
            Request::CopyArea {
                opcode,
                src,
                dst,
                gc,
            } => {
                let (src_depth, _) = self.drawable_depth(src)?;
                let dst_depth = self.check_draw_target(dst, gc)?;
                if opcode != COPY_PLANE_OPCODE && src_depth != dst_depth {
                    return Err(X11Error::bad_match());
                }
                Ok(None)
            }
            Request::Draw { drawable, gc, .. } => {
                self.check_draw_target(drawable, gc)?;
                Ok(None)
            }

            Request::CreateColormap {
                alloc_all,
                mid,
                window,
                visual,
            } => self
                .create_colormap(client, alloc_all, mid, window, visual)
                .map(|_| None),
            Request::FreeColormap { cmap } => self.free_colormap(cmap).map(|_| None),
            Request::AllocColor { cmap, color } => {
                let (pixel, color) = self.colormaps.get_mut(cmap.id())?.alloc_color(client, color)?;
                Ok(Some(Reply::AllocColor { color, pixel }))
            }
            Request::AllocColorCells {
                cmap,
                colors,
                planes,
                ..
            } => {
                let (pixels, masks) = self
                    .colormaps
                    .get_mut(cmap.id())?
                    .alloc_color_cells(client, colors, planes)?;
                Ok(Some(Reply::AllocColorCells { pixels, masks }))
            }
            Request::FreeColors {
                cmap,
                plane_mask,
                pixels,
            } => {
                self.colormaps
                    .get_mut(cmap.id())?
                    .free_colors(client, plane_mask, &pixels)?;
                Ok(None)
            }
            Request::StoreColors { cmap, items } => {
                self.colormaps
                    .get_mut(cmap.id())?
                    .store_colors(client, &items)?;
                Ok(None)
            }
            Request::QueryColors { cmap, pixels } => {
                let colors = self.colormaps.get(cmap.id())?.query_colors(&pixels)?;
                Ok(Some(Reply::QueryColors { colors }))
            }

            Request::CreateCursor {
                cid,
                source,
                mask,
                foreground,
                background,
                x,
                y,
            } => {
                let src = self.pixmaps.get(source.id())?;
                if src.depth != 1 || x >= src.width || y >= src.height {
                    return Err(X11Error::bad_match());
                }
                if !mask.is_none() {
                    let m = self.pixmaps.get(mask.id())?;
                    if m.depth != 1 || m.width != src.width || m.height != src.height {
                        return Err(X11Error::bad_match());
                    }
                }
                self.claim(client, cid, ResourceKind::Cursor)?;
                self.cursors.insert(
                    cid,
                    CursorRecord {
                        foreground,
                        background,
                        hotspot: (x, y),
                        glyph: None,
                    },
                )?;
                Ok(None)
            }
            Request::CreateGlyphCursor {
                cid,
                source_font,
                mask_font,
                source_char,
                mask_char,
                foreground,
                background,
            } => {
                check_glyph(self.fonts.get(source_font.id())?, source_char)?;
                if !mask_font.is_none() {
                    check_glyph(self.fonts.get(mask_font.id())?, mask_char)?;
                }
                self.claim(client, cid, ResourceKind::Cursor)?;
                self.cursors.insert(
                    cid,
                    CursorRecord {
                        foreground,
                        background,
                        hotspot: (0, 0),
                        glyph: Some(source_char),
                    },
                )?;
                Ok(None)
            }
            Request::FreeCursor { cursor } => {
                self.cursors.remove(cursor.id())?;
                self.ids.release(cursor.id());
                Ok(None)
            }

            Request::QueryExtension { name } => Ok(Some(self.extensions.query(&name))),
            Request::ListExtensions => Ok(Some(self.extensions.list())),
            Request::Bell { percent } => {
                if !(-100..=100).contains(&percent) {
                    return Err(X11Error::bad_value(percent as u8 as u32));
                }
                self.backend.bell(percent);
                Ok(None)
            }
            Request::KillClient { resource } => self.kill_client(client, resource).map(|_| None),
            Request::NoOperation => Ok(None),
            Request::BigReqEnable => Ok(Some(Reply::BigReqEnable {
                maximum_request_length: super::extensions::MAX_BIG_REQUEST_LENGTH,
            })),
            Request::XInput(req) => self.xinput_request(client, req),
        }
    }

    fn depth_supported(&self, depth: u8) -> bool {
        depth == 1 || self.visuals.iter().any(|v| v.depth == depth)
    }

    /// Depth of a window or pixmap, and whether it is an InputOnly window
    fn drawable_depth(&self, drawable: Drawable) -> X11Result<(u8, bool)> {
        if let Ok(window) = self.windows.get(Window(drawable.id())) {
            return Ok((window.depth, window.class == WindowClass::InputOnly));
        }
        match self.pixmaps.get(drawable.id()) {
            Ok(pixmap) => Ok((pixmap.depth, false)),
            Err(_) => Err(X11Error::bad_drawable(drawable)),
        }
    }

    /// A drawing request may target `drawable` through `gc`; returns the
    /// drawable's depth
    fn check_draw_target(&self, drawable: Drawable, gc: GContext) -> X11Result<u8> {
        let (depth, input_only) = self.drawable_depth(drawable)?;
        let gc = self.gcs.get(gc.id())?;
        if input_only || gc.depth != depth {
            return Err(X11Error::bad_match());
        }
        Ok(depth)
    }

    fn create_pixmap(
        &mut self,
        client: ClientId,
        depth: u8,
        pid: ResourceId,
        drawable: Drawable,
        width: u16,
        height: u16,
    ) -> X11Result<()> {
        self.drawable_depth(drawable)?;
        if width == 0 || height == 0 {
            return Err(X11Error::bad_value(0));
        }
        if !self.depth_supported(depth) {
            return Err(X11Error::bad_value(depth as u32));
        }
        self.claim(client, pid, ResourceKind::Pixmap)?;
        self.pixmaps.insert(pid, PixmapRecord { width, height, depth })?;
        log::trace!("Pixmap {} {}x{} depth {}", pid, width, height, depth);
        Ok(())
    }

    /// Resources a GC value-list names must exist and suit the GC
    fn check_gc_values(&self, depth: u8, values: &ValueList) -> X11Result<()> {
        if let Some(font) = values.get(GC_FONT) {
            self.fonts.get(Font::new(font).id())?;
        }
        if let Some(tile) = values.get(GC_TILE) {
            if self.pixmaps.get(Pixmap::new(tile).id())?.depth != depth {
                return Err(X11Error::bad_match());
            }
        }
        for bit in [GC_STIPPLE, GC_CLIP_MASK] {
            match values.get(bit) {
                Some(0) | None => {}
                Some(xid) => {
                    if self.pixmaps.get(Pixmap::new(xid).id())?.depth != 1 {
                        return Err(X11Error::bad_match());
                    }
                }
            }
        }
        Ok(())
    }

    fn create_gc(
        &mut self,
        client: ClientId,
        cid: ResourceId,
        drawable: Drawable,
        values: ValueList,
    ) -> X11Result<()> {
        let (depth, _) = self.drawable_depth(drawable)?;
        self.check_gc_values(depth, &values)?;
        let mut gc = GcRecord::new(depth);
        gc.apply(&values)?;
        self.claim(client, cid, ResourceKind::GContext)?;
        self.gcs.insert(cid, gc)?;
        Ok(())
    }

    /// Font names are ISO Latin-1 on the wire; host fonts are named in ASCII
    fn open_font(&mut self, client: ClientId, fid: ResourceId, name: &[u8]) -> X11Result<()> {
        let metrics = std::str::from_utf8(name)
            .ok()
            .and_then(|pattern| self.backend.lookup_font(pattern))
            .ok_or_else(|| {
                log::debug!("OpenFont \"{}\": no match", name.escape_ascii());
                X11Error::bad_name()
            })?;
        self.claim(client, fid, ResourceKind::Font)?;
        log::debug!("OpenFont \"{}\" -> {}", name.escape_ascii(), metrics.name);
        self.fonts.insert(fid, FontRecord { metrics })?;
        Ok(())
    }

    /// QueryFont accepts a font or a GC; a GC reports its current font
    fn query_font(&self, fontable: u32) -> X11Result<Reply> {
        let id = ResourceId::from_xid(fontable);
        if let Ok(font) = self.fonts.get(id) {
            return Ok(Reply::QueryFont(font.query_reply()));
        }
        let gc = self
            .gcs
            .get(id)
            .map_err(|_| X11Error::bad_font(Font::new(fontable)))?;
        let font = gc.get(GC_FONT);
        if font != 0 {
            if let Ok(record) = self.fonts.get(ResourceId::from_xid(font)) {
                return Ok(Reply::QueryFont(record.query_reply()));
            }
        }
        let metrics = self
            .backend
            .lookup_font("fixed")
            .ok_or_else(|| X11Error::bad_font(Font::new(fontable)))?;
        Ok(Reply::QueryFont(FontRecord { metrics }.query_reply()))
    }

    fn create_colormap(
        &mut self,
        client: ClientId,
        alloc_all: bool,
        mid: ResourceId,
        window: Window,
        visual: VisualID,
    ) -> X11Result<()> {
        self.windows.get(window)?;
        let info = self
            .visuals
            .iter()
            .find(|v| v.visual_id == visual)
            .cloned()
            .ok_or_else(X11Error::bad_match)?;
        let cmap = ColormapRecord::new(&info, alloc_all, client)?;
        self.claim(client, mid, ResourceKind::Colormap)?;
        self.colormaps.insert(mid, cmap)?;
        Ok(())
    }

    fn free_colormap(&mut self, cmap: Colormap) -> X11Result<()> {
        self.colormaps.get(cmap.id())?;
        if cmap == self.default_colormap {
            return Ok(());
        }
        self.colormaps.remove(cmap.id())?;
        self.ids.release(cmap.id());
        let users: Vec<Window> = self
            .windows
            .windows()
            .filter(|w| w.attributes.colormap == cmap)
            .map(|w| w.id)
            .collect();
        for window in users {
            if let Ok(record) = self.windows.get_mut(window) {
                record.attributes.colormap = Colormap::NONE;
            }
        }
        Ok(())
    }

    /// Close the connection of the client owning `resource`
    fn kill_client(&mut self, client: ClientId, resource: u32) -> X11Result<()> {
        if resource == ALL_TEMPORARY {
            return Ok(());
        }
        let id = ResourceId::from_xid(resource);
        let victim = id.client;
        if victim == SERVER_CLIENT
            || !self.clients.contains_key(&victim)
            || self.ids.kind_of(id).is_none()
        {
            return Err(X11Error::bad_value(resource));
        }
        log::info!("Client {} killed client {} via 0x{:08x}", client, victim, resource);
        self.client_disconnected(victim);
        self.outbox.push(Outbound {
            client: victim,
            message: Message::Close,
        });
        Ok(())
    }

    fn send_event_request(&mut self, client: ClientId, req: SendEventRequest) -> X11Result<()> {
        let code = req.event[0] & !SEND_EVENT_FLAG;
        if code < 2 {
            return Err(X11Error::bad_value(code as u32));
        }
        let pointer_window = self.pointer_window();
        let (target, stop_at) = match req.destination {
            SendDestination::PointerWindow => (pointer_window, None),
            SendDestination::InputFocus => match self.input.focus {
                Focus::None => return Ok(()),
                Focus::PointerRoot => (pointer_window, None),
                Focus::Window(focus) => {
                    if self.windows.is_inferior(pointer_window, focus) {
                        (pointer_window, Some(focus))
                    } else {
                        (focus, Some(focus))
                    }
                }
            },
            SendDestination::Window(window) => (window, None),
        };
        self.windows.get(target)?;
        if !self.policy.allow_synthetic_events {
            log::debug!("SendEvent from client {} dropped by policy", client);
            return Ok(());
        }

        let order = self
            .clients
            .get(&client)
            .map(|info| info.byte_order)
            .unwrap_or(ByteOrder::LSBFirst);
        let event = Event::decode(&req.event, order);

        let recipients = if req.event_mask == 0 {
            let creator = target.id().client;
            if creator != SERVER_CLIENT && self.clients.contains_key(&creator) {
                vec![creator]
            } else {
                Vec::new()
            }
        } else {
            self.synthetic_recipients(target, stop_at, req.event_mask, req.propagate)
        };

        log::debug!(
            "SendEvent code {} from client {} to 0x{:08x}: {} recipients",
            code,
            client,
            target.xid(),
            recipients.len()
        );
        for recipient in recipients {
            self.outbox.push(Outbound {
                client: recipient,
                message: Message::Event {
                    event: event.clone(),
                    synthetic: true,
                },
            });
        }
        Ok(())
    }

    /// Clients selecting `mask` on the first window from `start` upward that
    /// has any, when propagation is allowed
    fn synthetic_recipients(
        &self,
        start: Window,
        stop_at: Option<Window>,
        mask: u32,
        propagate: bool,
    ) -> Vec<ClientId> {
        let mut window = start;
        loop {
            let clients = self.windows.clients_selecting(window, mask);
            if !clients.is_empty() || !propagate || Some(window) == stop_at {
                return clients;
            }
            let blocked = self
                .windows
                .get(window)
                .map(|r| r.attributes.do_not_propagate & mask != 0)
                .unwrap_or(true);
            if blocked {
                return Vec::new();
            }
            match self.windows.parent(window) {
                Some(parent) => window = parent,
                None => return Vec::new(),
            }
        }
    }
}

fn check_glyph(font: &FontRecord, glyph: u16) -> X11Result<()> {
    if glyph < font.metrics.min_char || glyph > font.metrics.max_char {
        return Err(X11Error::bad_value(glyph as u32));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::security::SecurityPolicy;

    fn setup() -> (Server, ClientId, ClientId) {
        let mut server =
            Server::new(Box::new(NullBackend::new()), SecurityPolicy::default()).unwrap();
        let a = server.register_client(ByteOrder::LSBFirst).unwrap();
        let b = server.register_client(ByteOrder::LSBFirst).unwrap();
        (server, a, b)
    }

    fn window(server: &mut Server, client: ClientId, local: u32, parent: Window) -> Window {
        let wid = ResourceId::new(client, local);
        server
            .execute(
                client,
                Request::CreateWindow(CreateWindowRequest {
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
                }),
            )
            .unwrap();
        Window(wid)
    }

    fn client_message(window: Window) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[0] = 33;
        bytes[1] = 32;
        bytes[4..8].copy_from_slice(&window.xid().to_le_bytes());
        bytes
    }

    #[test]
    fn test_pixmap_validation() {
        let (mut server, a, _) = setup();
        let root = Drawable::from(server.root());
        let pid = ResourceId::new(a, 1);
        let err = server
            .execute(a, Request::CreatePixmap { depth: 7, pid, drawable: root, width: 4, height: 4 })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Value);
        let err = server
            .execute(a, Request::CreatePixmap { depth: 24, pid, drawable: root, width: 0, height: 4 })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Value);
        server
            .execute(a, Request::CreatePixmap { depth: 1, pid, drawable: root, width: 4, height: 4 })
            .unwrap();
        let err = server
            .execute(a, Request::CreatePixmap { depth: 1, pid, drawable: root, width: 4, height: 4 })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IDChoice);
    }

    #[test]
    fn test_draw_requires_matching_depth() {
        let (mut server, a, _) = setup();
        let root = Drawable::from(server.root());
        let pid = ResourceId::new(a, 1);
        server
            .execute(a, Request::CreatePixmap { depth: 1, pid, drawable: root, width: 8, height: 8 })
            .unwrap();
        let cid = ResourceId::new(a, 2);
        server
            .execute(a, Request::CreateGC { cid, drawable: root, values: ValueList::default() })
            .unwrap();
        let gc = GContext(cid);
        server
            .execute(a, Request::Draw { opcode: 70, drawable: root, gc })
            .unwrap();
        let err = server
            .execute(a, Request::Draw { opcode: 70, drawable: Drawable(pid), gc })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Match);
        let err = server
            .execute(a, Request::CopyArea { opcode: 62, src: Drawable(pid), dst: root, gc })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Match);
        server
            .execute(a, Request::CopyArea { opcode: COPY_PLANE_OPCODE, src: Drawable(pid), dst: root, gc })
            .unwrap();
    }

    #[test]
    fn test_gc_font_reference_must_exist() {
        let (mut server, a, _) = setup();
        let root = Drawable::from(server.root());
        let values = ValueList {
            mask: 1 << GC_FONT,
            values: vec![ResourceId::new(a, 9).xid()],
        };
        let err = server
            .execute(a, Request::CreateGC { cid: ResourceId::new(a, 1), drawable: root, values })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Font);
        assert_eq!(server.resource_count(a), 0);
    }

    #[test]
    fn test_query_font_through_gc() {
        let (mut server, a, _) = setup();
        let root = Drawable::from(server.root());
        let cid = ResourceId::new(a, 1);
        server
            .execute(a, Request::CreateGC { cid, drawable: root, values: ValueList::default() })
            .unwrap();
        match server.execute(a, Request::QueryFont { fontable: cid.xid() }).unwrap() {
            Some(Reply::QueryFont(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        let err = server
            .execute(a, Request::QueryFont { fontable: ResourceId::new(a, 5).xid() })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Font);
        let err = server
            .execute(a, Request::OpenFont { fid: ResourceId::new(a, 2), name: "no-such-font".into() })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Name);
    }

    #[test]
    fn test_atoms_are_idempotent() {
        let (mut server, a, b) = setup();
        let first = server
            .execute(a, Request::InternAtom { only_if_exists: false, name: "WM_PROTOCOLS".into() })
            .unwrap();
        let second = server
            .execute(b, Request::InternAtom { only_if_exists: true, name: "WM_PROTOCOLS".into() })
            .unwrap();
        assert_eq!(first, second);
        let missing = server
            .execute(a, Request::InternAtom { only_if_exists: true, name: "NOT_YET".into() })
            .unwrap();
        assert_eq!(missing, Some(Reply::InternAtom { atom: Atom::NONE }));
        let err = server
            .execute(a, Request::GetAtomName { atom: Atom::new(9999) })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Atom);
    }

    #[test]
    fn test_send_event_empty_mask_goes_to_creator() {
        let (mut server, a, b) = setup();
        let root = server.root();
        let w = window(&mut server, a, 1, root);
        server
            .execute(
                b,
                Request::SendEvent(SendEventRequest {
                    propagate: false,
                    destination: SendDestination::Window(w),
                    event_mask: 0,
                    event: client_message(w),
                }),
            )
            .unwrap();
        let out = server.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].client, a);
        assert!(matches!(out[0].message, Message::Event { synthetic: true, .. }));
    }

    #[test]
    fn test_send_event_propagates_to_selecting_ancestor() {
        let (mut server, a, b) = setup();
        let root = server.root();
        let parent = window(&mut server, a, 1, root);
        let child = window(&mut server, a, 2, parent);
        server
            .windows
            .select_events(parent, b, event_mask::STRUCTURE_NOTIFY)
            .unwrap();
        let send = |propagate| {
            Request::SendEvent(SendEventRequest {
                propagate,
                destination: SendDestination::Window(child),
                event_mask: event_mask::STRUCTURE_NOTIFY,
                event: client_message(child),
            })
        };
        server.execute(a, send(false)).unwrap();
        assert!(server.take_outbox().is_empty());
        server.execute(a, send(true)).unwrap();
        let out = server.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].client, b);
    }

    #[test]
    fn test_send_event_rejects_reply_code() {
        let (mut server, a, _) = setup();
        let root = server.root();
        let mut event = client_message(root);
        event[0] = 1;
        let err = server
            .execute(
                a,
                Request::SendEvent(SendEventRequest {
                    propagate: false,
                    destination: SendDestination::PointerWindow,
                    event_mask: 0,
                    event,
                }),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Value);
    }

    #[test]
    fn test_kill_client_closes_owner() {
        let (mut server, a, b) = setup();
        let root = server.root();
        let w = window(&mut server, b, 1, root);
        server.take_outbox();
        server.execute(a, Request::KillClient { resource: w.xid() }).unwrap();
        assert!(!server.windows.contains(w));
        let out = server.take_outbox();
        assert!(out.iter().any(|o| o.client == b && o.message == Message::Close));
        let err = server
            .execute(a, Request::KillClient { resource: w.xid() })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Value);
        server.execute(a, Request::KillClient { resource: 0 }).unwrap();
    }

    #[test]
    fn test_bell_range_and_default_colormap() {
        let (mut server, a, _) = setup();
        let err = server.execute(a, Request::Bell { percent: -101 }).unwrap_err();
        assert_eq!(err.code, ErrorCode::Value);
        server.execute(a, Request::Bell { percent: 50 }).unwrap();
        let cmap = server.default_colormap;
        server.execute(a, Request::FreeColormap { cmap }).unwrap();
        assert!(server.colormaps.contains(cmap.id()));
    }

    #[test]
    fn test_cursor_hotspot_inside_source() {
        let (mut server, a, _) = setup();
        let root = Drawable::from(server.root());
        let pid = ResourceId::new(a, 1);
        server
            .execute(a, Request::CreatePixmap { depth: 1, pid, drawable: root, width: 16, height: 16 })
            .unwrap();
        let cursor = |x| Request::CreateCursor {
            cid: ResourceId::new(a, 2),
            source: Pixmap(pid),
            mask: Pixmap::NONE,
            foreground: Rgb::new(0, 0, 0),
            background: Rgb::new(0xffff, 0xffff, 0xffff),
            x,
            y: 0,
        };
        let err = server.execute(a, cursor(16)).unwrap_err();
        assert_eq!(err.code, ErrorCode::Match);
        server.execute(a, cursor(15)).unwrap();
        assert!(server.cursors.contains(ResourceId::new(a, 2)));
    }

    #[test]
    fn test_grab_server_released_only_by_holder() {
        let (mut server, a, b) = setup();
        server.execute(a, Request::GrabServer).unwrap();
        server.execute(b, Request::UngrabServer).unwrap();
        assert_eq!(server.server_grabbed_by(), Some(a));
        server.execute(a, Request::UngrabServer).unwrap();
        assert_eq!(server.server_grabbed_by(), None);
    }
}
