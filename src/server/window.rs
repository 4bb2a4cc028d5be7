//! Window hierarchy
//!
//! Windows form a tree under the root; each parent keeps its children in
//! stacking order, bottom first. Geometry is used only for containment
//! tests and geometry replies. Event selections are per client: every
//! client holds its own mask on a window.

use super::router::{DeliveryTable, InputKind, Via};
use super::property::PropertyStore;
use super::Server;
use crate::protocol::*;
use crate::resources::ResourceKind;
use std::collections::HashMap;

/// Attributes settable through CreateWindow / ChangeWindowAttributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAttributes {
    pub background_pixmap: u32,
    pub background_pixel: u32,
    pub border_pixmap: u32,
    pub border_pixel: u32,
    pub bit_gravity: u8,
    pub win_gravity: u8,
    pub backing_store: u8,
    pub backing_planes: u32,
    pub backing_pixel: u32,
    pub override_redirect: bool,
    pub save_under: bool,
    pub do_not_propagate: u32,
    pub colormap: Colormap,
    pub cursor: Cursor,
}

impl Default for WindowAttributes {
    fn default() -> Self {
        WindowAttributes {
            background_pixmap: 0,
            background_pixel: 0,
            border_pixmap: 0,
            border_pixel: 0,
            bit_gravity: 0,
            win_gravity: 1,
            backing_store: 0,
            backing_planes: 0xFFFF_FFFF,
            backing_pixel: 0,
            override_redirect: false,
            save_under: false,
            do_not_propagate: 0,
            colormap: Colormap::NONE,
            cursor: Cursor::NONE,
        }
    }
}

impl WindowAttributes {
    /// Copy every present value except the event mask, which is per client.
    /// `parent_colormap` stands in for CopyFromParent.
    fn apply(&mut self, values: &WindowValues, parent_colormap: Colormap) {
        if let Some(v) = values.background_pixmap {
            self.background_pixmap = v;
        }
        if let Some(v) = values.background_pixel {
            self.background_pixel = v;
        }
        if let Some(v) = values.border_pixmap {
            self.border_pixmap = v;
        }
        if let Some(v) = values.border_pixel {
            self.border_pixel = v;
        }
        if let Some(v) = values.bit_gravity {
            self.bit_gravity = v;
        }
        if let Some(v) = values.win_gravity {
            self.win_gravity = v;
        }
        if let Some(v) = values.backing_store {
            self.backing_store = v;
        }
        if let Some(v) = values.backing_planes {
            self.backing_planes = v;
        }
        if let Some(v) = values.backing_pixel {
            self.backing_pixel = v;
        }
        if let Some(v) = values.override_redirect {
            self.override_redirect = v;
        }
        if let Some(v) = values.save_under {
            self.save_under = v;
        }
        if let Some(v) = values.do_not_propagate_mask {
            self.do_not_propagate = v;
        }
        if let Some(v) = values.colormap {
            self.colormap = if v.is_none() { parent_colormap } else { v };
        }
        if let Some(v) = values.cursor {
            self.cursor = v;
        }
    }
}

/// One window
#[derive(Debug, Clone)]
pub struct WindowRecord {
    pub id: Window,
    /// NONE for the root
    pub parent: Window,
    /// Bottom to top
    pub children: Vec<Window>,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub depth: u8,
    pub class: WindowClass,
    pub visual: VisualID,
    pub mapped: bool,
    pub attributes: WindowAttributes,
    /// Event mask of every selecting client
    pub selections: HashMap<ClientId, u32>,
    pub properties: PropertyStore,
}

impl WindowRecord {
    /// Unmapped 1x1 InputOutput window; callers fill in the rest
    pub fn new(id: Window, parent: Window) -> Self {
        WindowRecord {
            id,
            parent,
            children: Vec::new(),
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            border_width: 0,
            depth: 0,
            class: WindowClass::InputOutput,
            visual: VisualID::COPY_FROM_PARENT,
            mapped: false,
            attributes: WindowAttributes::default(),
            selections: HashMap::new(),
            properties: PropertyStore::new(),
        }
    }

    pub fn all_event_masks(&self) -> u32 {
        self.selections.values().fold(0, |acc, m| acc | m)
    }

    fn outer_size(&self) -> (i32, i32) {
        let border = 2 * self.border_width as i32;
        (self.width as i32 + border, self.height as i32 + border)
    }
}

/// Event bits only one client at a time may select on a window
const EXCLUSIVE_EVENTS: [u32; 2] = [event_mask::BUTTON_PRESS, event_mask::SUBSTRUCTURE_REDIRECT];

#[derive(Debug)]
pub struct WindowTree {
    root: Window,
    windows: HashMap<Window, WindowRecord>,
}

impl WindowTree {
    pub fn new(root: WindowRecord) -> Self {
        let id = root.id;
        let mut windows = HashMap::new();
        windows.insert(id, root);
        WindowTree { root: id, windows }
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn contains(&self, window: Window) -> bool {
        self.windows.contains_key(&window)
    }

    pub fn get(&self, window: Window) -> X11Result<&WindowRecord> {
        self.windows
            .get(&window)
            .ok_or_else(|| X11Error::bad_window(window))
    }

    pub fn get_mut(&mut self, window: Window) -> X11Result<&mut WindowRecord> {
        self.windows
            .get_mut(&window)
            .ok_or_else(|| X11Error::bad_window(window))
    }

    pub fn parent(&self, window: Window) -> Option<Window> {
        self.windows
            .get(&window)
            .map(|w| w.parent)
            .filter(|p| !p.is_none())
    }

    pub fn windows(&self) -> impl Iterator<Item = &WindowRecord> {
        self.windows.values()
    }

    /// Add a window on top of its parent's stack
    pub fn insert(&mut self, record: WindowRecord) {
        let id = record.id;
        if let Some(parent) = self.windows.get_mut(&record.parent) {
            parent.children.push(id);
        }
        self.windows.insert(id, record);
    }

    /// Detach and drop a window. Its children must already be gone.
    pub fn remove(&mut self, window: Window) -> Option<WindowRecord> {
        let record = self.windows.remove(&window)?;
        if let Some(parent) = self.windows.get_mut(&record.parent) {
            parent.children.retain(|c| *c != window);
        }
        Some(record)
    }

    /// Mapped, with every ancestor mapped
    pub fn is_viewable(&self, window: Window) -> bool {
        let mut current = window;
        loop {
            match self.windows.get(&current) {
                Some(record) if record.mapped => {
                    if record.parent.is_none() {
                        return true;
                    }
                    current = record.parent;
                }
                _ => return false,
            }
        }
    }

    pub fn map_state(&self, window: Window) -> MapState {
        match self.windows.get(&window) {
            Some(record) if record.mapped => {
                if self.is_viewable(window) {
                    MapState::Viewable
                } else {
                    MapState::Unviewable
                }
            }
            _ => MapState::Unmapped,
        }
    }

    /// `window` lies strictly below `ancestor`
    pub fn is_inferior(&self, window: Window, ancestor: Window) -> bool {
        let mut current = self.parent(window);
        while let Some(w) = current {
            if w == ancestor {
                return true;
            }
            current = self.parent(w);
        }
        false
    }

    /// Root first, `window` last
    pub fn path_from_root(&self, window: Window) -> Vec<Window> {
        let mut path = Vec::new();
        if !self.contains(window) {
            return path;
        }
        let mut current = Some(window);
        while let Some(w) = current {
            path.push(w);
            current = self.parent(w);
        }
        path.reverse();
        path
    }

    /// Root coordinates of the window's inside top-left corner
    pub fn absolute_origin(&self, window: Window) -> (i32, i32) {
        let (mut x, mut y) = (0i32, 0i32);
        let mut current = self.windows.get(&window);
        while let Some(record) = current {
            x += record.x as i32 + record.border_width as i32;
            y += record.y as i32 + record.border_width as i32;
            current = self.windows.get(&record.parent);
        }
        (x, y)
    }

    /// Topmost mapped child of `window` containing the root point
    pub fn child_at(&self, window: Window, x: i32, y: i32) -> Window {
        let Some(record) = self.windows.get(&window) else {
            return Window::NONE;
        };
        let (ox, oy) = self.absolute_origin(window);
        for child in record.children.iter().rev() {
            let Some(c) = self.windows.get(child) else {
                continue;
            };
            if !c.mapped {
                continue;
            }
            let left = ox + c.x as i32;
            let top = oy + c.y as i32;
            let (w, h) = c.outer_size();
            if x >= left && x < left + w && y >= top && y < top + h {
                return *child;
            }
        }
        Window::NONE
    }

    /// Deepest viewable window containing the root point
    pub fn window_at(&self, x: i32, y: i32) -> Window {
        let mut current = self.root;
        loop {
            let child = self.child_at(current, x, y);
            if child.is_none() {
                return current;
            }
            current = child;
        }
    }

    /// Child of `ancestor` on the way down to `leaf`, or NONE
    pub fn child_towards(&self, ancestor: Window, leaf: Window) -> Window {
        let mut current = leaf;
        while let Some(parent) = self.parent(current) {
            if parent == ancestor {
                return current;
            }
            current = parent;
        }
        Window::NONE
    }

    /// `window` and all its inferiors, children before parents
    pub fn inferiors_postorder(&self, window: Window) -> Vec<Window> {
        let mut out = Vec::new();
        self.collect_postorder(window, &mut out);
        out
    }

    fn collect_postorder(&self, window: Window, out: &mut Vec<Window>) {
        if let Some(record) = self.windows.get(&window) {
            for child in &record.children {
                self.collect_postorder(*child, out);
            }
            out.push(window);
        }
    }

    /// Move under a new parent at the top of its stack
    pub fn reparent(&mut self, window: Window, parent: Window, x: i16, y: i16) {
        let old = match self.windows.get_mut(&window) {
            Some(record) => {
                let old = record.parent;
                record.parent = parent;
                record.x = x;
                record.y = y;
                old
            }
            None => return,
        };
        if let Some(record) = self.windows.get_mut(&old) {
            record.children.retain(|c| *c != window);
        }
        if let Some(record) = self.windows.get_mut(&parent) {
            record.children.push(window);
        }
    }

    /// Window directly below in the stack, or NONE at the bottom
    pub fn sibling_below(&self, window: Window) -> Window {
        let Some(parent) = self.parent(window).and_then(|p| self.windows.get(&p)) else {
            return Window::NONE;
        };
        match parent.children.iter().position(|c| *c == window) {
            Some(i) if i > 0 => parent.children[i - 1],
            _ => Window::NONE,
        }
    }

    fn rects_intersect(&self, a: Window, b: Window) -> bool {
        let (Some(ra), Some(rb)) = (self.windows.get(&a), self.windows.get(&b)) else {
            return false;
        };
        if !ra.mapped || !rb.mapped {
            return false;
        }
        let (aw, ah) = ra.outer_size();
        let (bw, bh) = rb.outer_size();
        let (ax, ay, bx, by) = (ra.x as i32, ra.y as i32, rb.x as i32, rb.y as i32);
        ax < bx + bw && bx < ax + aw && ay < by + bh && by < ay + ah
    }

    /// `upper` is above `lower` among their siblings and overlaps it
    fn occludes(&self, siblings: &[Window], upper: Window, lower: Window) -> bool {
        let pos = |w: Window| siblings.iter().position(|c| *c == w);
        match (pos(upper), pos(lower)) {
            (Some(u), Some(l)) => u > l && self.rects_intersect(upper, lower),
            _ => false,
        }
    }

    /// Apply a stack-mode change
    pub fn restack(&mut self, window: Window, sibling: Option<Window>, mode: StackMode) {
        let Some(parent) = self.parent(window) else {
            return;
        };
        let siblings = match self.windows.get(&parent) {
            Some(record) => record.children.clone(),
            None => return,
        };
        let others: Vec<Window> = siblings.iter().copied().filter(|c| *c != window).collect();
        let occluded_by = |tree: &Self, other: Window| tree.occludes(&siblings, other, window);
        let occluding = |tree: &Self, other: Window| tree.occludes(&siblings, window, other);

        let mut order = others.clone();
        let top = order.len();
        let index = match (mode, sibling) {
            (StackMode::Above, Some(s)) => order.iter().position(|c| *c == s).map(|i| i + 1),
            (StackMode::Above, None) => Some(top),
            (StackMode::Below, Some(s)) => order.iter().position(|c| *c == s),
            (StackMode::Below, None) => Some(0),
            (StackMode::TopIf, Some(s)) => occluded_by(self, s).then_some(top),
            (StackMode::TopIf, None) => others.iter().any(|o| occluded_by(self, *o)).then_some(top),
            (StackMode::BottomIf, Some(s)) => occluding(self, s).then_some(0),
            (StackMode::BottomIf, None) => others.iter().any(|o| occluding(self, *o)).then_some(0),
            (StackMode::Opposite, Some(s)) => {
                if occluded_by(self, s) {
                    Some(top)
                } else if occluding(self, s) {
                    Some(0)
                } else {
                    None
                }
            }
            (StackMode::Opposite, None) => {
                if others.iter().any(|o| occluded_by(self, *o)) {
                    Some(top)
                } else if others.iter().any(|o| occluding(self, *o)) {
                    Some(0)
                } else {
                    None
                }
            }
        };
        let Some(index) = index else {
            return;
        };
        order.insert(index, window);
        if let Some(record) = self.windows.get_mut(&parent) {
            record.children = order;
        }
    }

    /// Set `client`'s selection on `window`. Mask 0 removes it.
    pub fn select_events(&mut self, window: Window, client: ClientId, mask: u32) -> X11Result<()> {
        let record = self.get_mut(window)?;
        for bit in EXCLUSIVE_EVENTS {
            if mask & bit != 0
                && record
                    .selections
                    .iter()
                    .any(|(c, m)| *c != client && m & bit != 0)
            {
                return Err(X11Error::bad_access());
            }
        }
        if mask == 0 {
            record.selections.remove(&client);
        } else {
            record.selections.insert(client, mask);
        }
        Ok(())
    }

    /// Clients selecting any bit of `mask` on `window`, in client order
    pub fn clients_selecting(&self, window: Window, mask: u32) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self
            .windows
            .get(&window)
            .map(|r| {
                r.selections
                    .iter()
                    .filter(|(_, m)| *m & mask != 0)
                    .map(|(c, _)| *c)
                    .collect()
            })
            .unwrap_or_default();
        clients.sort_unstable();
        clients
    }

    /// Client redirecting structure requests on `window`'s children
    pub fn redirect_holder(&self, window: Window) -> Option<ClientId> {
        self.clients_selecting(window, event_mask::SUBSTRUCTURE_REDIRECT)
            .first()
            .copied()
    }

    /// (client, event window) pairs for a structure event about `window`:
    /// StructureNotify selectors on the window, SubstructureNotify
    /// selectors on its parent
    pub fn structure_targets(&self, window: Window) -> Vec<(ClientId, Window)> {
        let mut targets: Vec<(ClientId, Window)> = self
            .clients_selecting(window, event_mask::STRUCTURE_NOTIFY)
            .into_iter()
            .map(|c| (c, window))
            .collect();
        if let Some(parent) = self.parent(window) {
            targets.extend(
                self.clients_selecting(parent, event_mask::SUBSTRUCTURE_NOTIFY)
                    .into_iter()
                    .map(|c| (c, parent)),
            );
        }
        targets
    }

    pub fn remove_client_selections(&mut self, client: ClientId) {
        for record in self.windows.values_mut() {
            record.selections.remove(&client);
        }
    }

    /// Windows whose id belongs to `client`
    pub fn owned_by(&self, client: ClientId) -> Vec<Window> {
        let mut owned: Vec<Window> = self
            .windows
            .keys()
            .filter(|w| w.owner() == client)
            .copied()
            .collect();
        owned.sort();
        owned
    }

    #[cfg(test)]
    pub(crate) fn for_tests(width: u16, height: u16) -> Self {
        let mut root = WindowRecord::new(Window::new(0x100), Window::NONE);
        root.width = width;
        root.height = height;
        root.depth = 24;
        root.mapped = true;
        WindowTree::new(root)
    }

    #[cfg(test)]
    pub(crate) fn add_for_tests(&mut self, id: Window, parent: Window, x: i16, y: i16, width: u16, height: u16) {
        let mut record = WindowRecord::new(id, parent);
        record.x = x;
        record.y = y;
        record.width = width;
        record.height = height;
        record.mapped = true;
        self.insert(record);
    }
}

impl DeliveryTable for WindowTree {
    fn selecting_clients(&self, window: Window, kind: InputKind, buttons: u16) -> Vec<(ClientId, Via)> {
        self.clients_selecting(window, Via::Core.mask_for(kind, buttons))
            .into_iter()
            .map(|c| (c, Via::Core))
            .collect()
    }

    fn propagation_blocked(&self, window: Window, kind: InputKind, buttons: u16) -> bool {
        self.windows
            .get(&window)
            .map(|r| r.attributes.do_not_propagate & Via::Core.mask_for(kind, buttons) != 0)
            .unwrap_or(true)
    }

    fn selection_mask(&self, window: Window, client: ClientId, via: Via) -> u32 {
        if via != Via::Core {
            return 0;
        }
        self.windows
            .get(&window)
            .and_then(|r| r.selections.get(&client).copied())
            .unwrap_or(0)
    }
}

impl Server {
    fn emit_structure(&mut self, window: Window, make: impl Fn(Window) -> Event) {
        for (client, event_window) in self.windows.structure_targets(window) {
            self.send_event(client, make(event_window));
        }
    }

    /// Check the resources a window value-list refers to
    fn check_window_values(&self, values: &WindowValues, class: WindowClass) -> X11Result<()> {
        if class == WindowClass::InputOnly
            && (values.background_pixmap.is_some()
                || values.background_pixel.is_some()
                || values.border_pixmap.is_some()
                || values.border_pixel.is_some()
                || values.colormap.is_some())
        {
            return Err(X11Error::bad_match());
        }
        // Background 0 is None and 1 ParentRelative; border 0 is CopyFromParent
        if let Some(v) = values.background_pixmap.filter(|v| *v > 1) {
            self.pixmaps.get(Pixmap::new(v).id())?;
        }
        if let Some(v) = values.border_pixmap.filter(|v| *v != 0) {
            self.pixmaps.get(Pixmap::new(v).id())?;
        }
        if let Some(cmap) = values.colormap.filter(|c| !c.is_none()) {
            self.colormaps.get(cmap.id())?;
        }
        if let Some(cursor) = values.cursor.filter(|c| !c.is_none()) {
            self.cursors.get(cursor.id())?;
        }
        Ok(())
    }

    pub(crate) fn create_window(&mut self, client: ClientId, req: CreateWindowRequest) -> X11Result<()> {
        let parent = self.windows.get(req.parent)?;
        let class = match req.class {
            WindowClass::CopyFromParent => parent.class,
            class => class,
        };
        if class == WindowClass::InputOutput && parent.class == WindowClass::InputOnly {
            return Err(X11Error::bad_match());
        }
        let visual = if req.visual == VisualID::COPY_FROM_PARENT {
            parent.visual
        } else {
            req.visual
        };
        let depth = if class == WindowClass::InputOnly {
            if req.depth != 0 || req.border_width != 0 {
                return Err(X11Error::bad_match());
            }
            0
        } else if req.depth == 0 {
            parent.depth
        } else {
            req.depth
        };
        let known = self.visuals.iter().find(|v| v.visual_id == visual);
        match known {
            Some(v) if class == WindowClass::InputOnly || v.depth == depth => {}
            _ => return Err(X11Error::bad_match()),
        }
        let parent_colormap = parent.attributes.colormap;
        self.check_window_values(&req.values, class)?;

        let window = Window(req.wid);
        self.claim(client, req.wid, ResourceKind::Window)?;

        let mut record = WindowRecord::new(window, req.parent);
        record.x = req.x;
        record.y = req.y;
        record.width = req.width;
        record.height = req.height;
        record.border_width = req.border_width;
        record.depth = depth;
        record.class = class;
        record.visual = visual;
        record.attributes.colormap = parent_colormap;
        record.attributes.apply(&req.values, parent_colormap);
        if let Some(mask) = req.values.event_mask.filter(|m| *m != 0) {
            record.selections.insert(client, mask);
        }
        let override_redirect = record.attributes.override_redirect;
        self.windows.insert(record);

        log::debug!(
            "Created window 0x{:08x} in 0x{:08x} at {},{} {}x{}",
            window.xid(),
            req.parent.xid(),
            req.x,
            req.y,
            req.width,
            req.height
        );

        for c in self
            .windows
            .clients_selecting(req.parent, event_mask::SUBSTRUCTURE_NOTIFY)
        {
            self.send_event(
                c,
                Event::CreateNotify {
                    parent: req.parent,
                    window,
                    x: req.x,
                    y: req.y,
                    width: req.width,
                    height: req.height,
                    border_width: req.border_width,
                    override_redirect,
                },
            );
        }
        Ok(())
    }

    pub(crate) fn change_window_attributes(
        &mut self,
        client: ClientId,
        window: Window,
        values: WindowValues,
    ) -> X11Result<()> {
        let record = self.windows.get(window)?;
        let parent_colormap = self
            .windows
            .get(record.parent)
            .map(|p| p.attributes.colormap)
            .unwrap_or(self.default_colormap);
        self.check_window_values(&values, record.class)?;
        if let Some(mask) = values.event_mask {
            self.windows.select_events(window, client, mask)?;
        }
        self.windows
            .get_mut(window)?
            .attributes
            .apply(&values, parent_colormap);
        Ok(())
    }

    pub(crate) fn get_window_attributes(&self, client: ClientId, window: Window) -> X11Result<Reply> {
        let record = self.windows.get(window)?;
        let attrs = &record.attributes;
        Ok(Reply::GetWindowAttributes(WindowAttributesReply {
            backing_store: attrs.backing_store,
            visual: record.visual,
            class: record.class as u16,
            bit_gravity: attrs.bit_gravity,
            win_gravity: attrs.win_gravity,
            backing_planes: attrs.backing_planes,
            backing_pixel: attrs.backing_pixel,
            save_under: attrs.save_under,
            map_is_installed: attrs.colormap == self.default_colormap,
            map_state: self.windows.map_state(window),
            override_redirect: attrs.override_redirect,
            colormap: attrs.colormap,
            all_event_masks: record.all_event_masks(),
            your_event_mask: record.selections.get(&client).copied().unwrap_or(0),
            do_not_propagate_mask: attrs.do_not_propagate as u16,
        }))
    }

    /// Destroy a window and its inferiors, children first
    pub(crate) fn destroy_window(&mut self, window: Window) -> X11Result<()> {
        let record = self.windows.get(window)?;
        if window == self.windows.root() {
            return Ok(());
        }
        if record.mapped {
            self.unmap_window(window)?;
        }
        let doomed = self.windows.inferiors_postorder(window);
        log::debug!(
            "Destroying window 0x{:08x} ({} windows)",
            window.xid(),
            doomed.len()
        );
        for w in doomed {
            self.emit_structure(w, |event| Event::DestroyNotify { event, window: w });
            self.forget_window(w);
            self.windows.remove(w);
            self.ids.release(w.id());
        }
        Ok(())
    }

    /// Drop every reference other state holds to a window about to go
    fn forget_window(&mut self, window: Window) {
        self.selections.clear_window(window);
        self.input_window_gone(window);
        self.xinput_window_gone(window);
        for info in self.clients.values_mut() {
            info.save_set.retain(|w| *w != window);
        }
    }

    pub(crate) fn destroy_subwindows(&mut self, window: Window) -> X11Result<()> {
        let children = self.windows.get(window)?.children.clone();
        for child in children.into_iter().rev() {
            self.destroy_window(child)?;
        }
        Ok(())
    }

    pub(crate) fn change_save_set(&mut self, client: ClientId, insert: bool, window: Window) -> X11Result<()> {
        self.windows.get(window)?;
        if window.owner() == client {
            return Err(X11Error::bad_match());
        }
        if let Some(info) = self.clients.get_mut(&client) {
            info.save_set.retain(|w| *w != window);
            if insert {
                info.save_set.push(window);
            }
        }
        Ok(())
    }

    pub(crate) fn reparent_window(
        &mut self,
        client: ClientId,
        window: Window,
        parent: Window,
        x: i16,
        y: i16,
    ) -> X11Result<()> {
        let record = self.windows.get(window)?;
        let new_parent = self.windows.get(parent)?;
        if window == self.windows.root()
            || parent == window
            || self.windows.is_inferior(parent, window)
            || (new_parent.class == WindowClass::InputOnly && record.class == WindowClass::InputOutput)
        {
            return Err(X11Error::bad_match());
        }
        let old_parent = record.parent;
        let was_mapped = record.mapped;
        let override_redirect = record.attributes.override_redirect;

        if was_mapped {
            self.unmap_window(window)?;
        }
        self.windows.reparent(window, parent, x, y);
        log::debug!(
            "Reparented 0x{:08x} from 0x{:08x} to 0x{:08x}",
            window.xid(),
            old_parent.xid(),
            parent.xid()
        );

        let mut targets: Vec<(ClientId, Window)> = self
            .windows
            .clients_selecting(window, event_mask::STRUCTURE_NOTIFY)
            .into_iter()
            .map(|c| (c, window))
            .collect();
        for p in [old_parent, parent] {
            for c in self.windows.clients_selecting(p, event_mask::SUBSTRUCTURE_NOTIFY) {
                if !targets.contains(&(c, p)) {
                    targets.push((c, p));
                }
            }
        }
        for (c, event) in targets {
            self.send_event(
                c,
                Event::ReparentNotify {
                    event,
                    window,
                    parent,
                    x,
                    y,
                    override_redirect,
                },
            );
        }

        if was_mapped {
            self.map_window(client, window)?;
        }
        Ok(())
    }

    pub(crate) fn map_window(&mut self, client: ClientId, window: Window) -> X11Result<()> {
        let record = self.windows.get(window)?;
        if record.mapped {
            return Ok(());
        }
        let parent = record.parent;
        let override_redirect = record.attributes.override_redirect;
        if !override_redirect {
            if let Some(holder) = self.windows.redirect_holder(parent) {
                if holder != client {
                    log::debug!(
                        "MapWindow 0x{:08x} redirected to client {}",
                        window.xid(),
                        holder
                    );
                    self.send_event(holder, Event::MapRequest { parent, window });
                    return Ok(());
                }
            }
        }
        self.windows.get_mut(window)?.mapped = true;
        self.emit_structure(window, |event| Event::MapNotify {
            event,
            window,
            override_redirect,
        });
        Ok(())
    }

    pub(crate) fn map_subwindows(&mut self, client: ClientId, window: Window) -> X11Result<()> {
        let children = self.windows.get(window)?.children.clone();
        for child in children.into_iter().rev() {
            self.map_window(client, child)?;
        }
        Ok(())
    }

    pub(crate) fn unmap_window(&mut self, window: Window) -> X11Result<()> {
        let record = self.windows.get(window)?;
        if !record.mapped || window == self.windows.root() {
            return Ok(());
        }
        self.windows.get_mut(window)?.mapped = false;
        self.emit_structure(window, |event| Event::UnmapNotify {
            event,
            window,
            from_configure: false,
        });
        self.viewability_changed();
        Ok(())
    }

    pub(crate) fn unmap_subwindows(&mut self, window: Window) -> X11Result<()> {
        let children = self.windows.get(window)?.children.clone();
        for child in children {
            self.unmap_window(child)?;
        }
        Ok(())
    }

    pub(crate) fn configure_window(
        &mut self,
        client: ClientId,
        window: Window,
        values: ConfigureValues,
    ) -> X11Result<()> {
        let record = self.windows.get(window)?;
        if values.sibling.is_some() && values.stack_mode.is_none() {
            return Err(X11Error::bad_match());
        }
        if let Some(sibling) = values.sibling {
            let s = self.windows.get(sibling)?;
            if sibling == window || s.parent != record.parent {
                return Err(X11Error::bad_match());
            }
        }
        if window == self.windows.root() {
            return Ok(());
        }

        let parent = record.parent;
        if !record.attributes.override_redirect {
            if let Some(holder) = self.windows.redirect_holder(parent) {
                if holder != client {
                    let event = Event::ConfigureRequest {
                        stack_mode: values.stack_mode.map(|m| m as u8).unwrap_or(0),
                        parent,
                        window,
                        sibling: values.sibling.unwrap_or(Window::NONE),
                        x: values.x.unwrap_or(record.x),
                        y: values.y.unwrap_or(record.y),
                        width: values.width.unwrap_or(record.width),
                        height: values.height.unwrap_or(record.height),
                        border_width: values.border_width.unwrap_or(record.border_width),
                        value_mask: values.mask,
                    };
                    self.send_event(holder, event);
                    return Ok(());
                }
            }
        }

        let record = self.windows.get_mut(window)?;
        if let Some(x) = values.x {
            record.x = x;
        }
        if let Some(y) = values.y {
            record.y = y;
        }
        if let Some(width) = values.width {
            record.width = width;
        }
        if let Some(height) = values.height {
            record.height = height;
        }
        if let Some(border_width) = values.border_width {
            record.border_width = border_width;
        }
        let (x, y, width, height, border_width) =
            (record.x, record.y, record.width, record.height, record.border_width);
        let override_redirect = record.attributes.override_redirect;
        if let Some(mode) = values.stack_mode {
            self.windows.restack(window, values.sibling, mode);
        }
        let above_sibling = self.windows.sibling_below(window);

        self.emit_structure(window, |event| Event::ConfigureNotify {
            event,
            window,
            above_sibling,
            x,
            y,
            width,
            height,
            border_width,
            override_redirect,
        });
        Ok(())
    }

    pub(crate) fn get_geometry(&self, drawable: Drawable) -> X11Result<Reply> {
        let root = self.windows.root();
        if let Ok(record) = self.windows.get(Window(drawable.id())) {
            return Ok(Reply::GetGeometry {
                depth: record.depth,
                root,
                x: record.x,
                y: record.y,
                width: record.width,
                height: record.height,
                border_width: record.border_width,
            });
        }
        match self.pixmaps.get(drawable.id()) {
            Ok(pixmap) => Ok(Reply::GetGeometry {
                depth: pixmap.depth,
                root,
                x: 0,
                y: 0,
                width: pixmap.width,
                height: pixmap.height,
                border_width: 0,
            }),
            Err(_) => Err(X11Error::bad_drawable(drawable)),
        }
    }

    pub(crate) fn query_tree(&self, window: Window) -> X11Result<Reply> {
        let record = self.windows.get(window)?;
        Ok(Reply::QueryTree {
            root: self.windows.root(),
            parent: record.parent,
            children: record.children.clone(),
        })
    }

    pub(crate) fn translate_coordinates(
        &self,
        src_window: Window,
        dst_window: Window,
        src_x: i16,
        src_y: i16,
    ) -> X11Result<Reply> {
        self.windows.get(src_window)?;
        self.windows.get(dst_window)?;
        let (sx, sy) = self.windows.absolute_origin(src_window);
        let (dx, dy) = self.windows.absolute_origin(dst_window);
        let root_x = sx + src_x as i32;
        let root_y = sy + src_y as i32;
        Ok(Reply::TranslateCoordinates {
            same_screen: true,
            child: self.windows.child_at(dst_window, root_x, root_y),
            dst_x: (root_x - dx) as i16,
            dst_y: (root_y - dy) as i16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(n: u32) -> Window {
        Window::new(0x20_0000 | n)
    }

    #[test]
    fn test_containment_picks_topmost_deepest() {
        let mut tree = WindowTree::for_tests(100, 100);
        let root = tree.root();
        tree.add_for_tests(w(1), root, 0, 0, 50, 50);
        tree.add_for_tests(w(2), root, 25, 25, 50, 50);
        tree.add_for_tests(w(3), w(2), 0, 0, 10, 10);
        assert_eq!(tree.window_at(30, 30), w(3));
        assert_eq!(tree.window_at(40, 40), w(2));
        assert_eq!(tree.window_at(10, 10), w(1));
        assert_eq!(tree.window_at(90, 10), root);

        tree.get_mut(w(2)).unwrap().mapped = false;
        assert_eq!(tree.window_at(30, 30), w(1));
        assert!(!tree.is_viewable(w(3)));
        assert_eq!(tree.map_state(w(3)), MapState::Unviewable);
    }

    #[test]
    fn test_absolute_origin_includes_borders() {
        let mut tree = WindowTree::for_tests(100, 100);
        let root = tree.root();
        tree.add_for_tests(w(1), root, 10, 20, 50, 50);
        tree.get_mut(w(1)).unwrap().border_width = 2;
        tree.add_for_tests(w(2), w(1), 5, 5, 10, 10);
        assert_eq!(tree.absolute_origin(w(1)), (12, 22));
        assert_eq!(tree.absolute_origin(w(2)), (17, 27));
        assert_eq!(tree.child_towards(root, w(2)), w(1));
        assert_eq!(tree.child_towards(w(2), w(2)), Window::NONE);
    }

    #[test]
    fn test_postorder_lists_children_first() {
        let mut tree = WindowTree::for_tests(100, 100);
        let root = tree.root();
        tree.add_for_tests(w(1), root, 0, 0, 10, 10);
        tree.add_for_tests(w(2), w(1), 0, 0, 10, 10);
        tree.add_for_tests(w(3), w(2), 0, 0, 10, 10);
        tree.add_for_tests(w(4), w(1), 0, 0, 10, 10);
        assert_eq!(tree.inferiors_postorder(w(1)), vec![w(3), w(2), w(4), w(1)]);
        assert_eq!(tree.path_from_root(w(3)), vec![root, w(1), w(2), w(3)]);
        assert!(tree.is_inferior(w(3), w(1)));
        assert!(!tree.is_inferior(w(1), w(3)));
    }

    #[test]
    fn test_restack_modes() {
        let mut tree = WindowTree::for_tests(100, 100);
        let root = tree.root();
        for n in 1..=3 {
            tree.add_for_tests(w(n), root, 0, 0, 10, 10);
        }
        tree.restack(w(1), None, StackMode::Above);
        assert_eq!(tree.get(root).unwrap().children, vec![w(2), w(3), w(1)]);
        tree.restack(w(1), Some(w(2)), StackMode::Below);
        assert_eq!(tree.get(root).unwrap().children, vec![w(1), w(2), w(3)]);
        assert_eq!(tree.sibling_below(w(2)), w(1));

        // w(1) is occluded by w(3), so TopIf raises it
        tree.restack(w(1), Some(w(3)), StackMode::TopIf);
        assert_eq!(tree.get(root).unwrap().children, vec![w(2), w(3), w(1)]);
        // Nothing above w(1) now, BottomIf against w(2) lowers it
        tree.restack(w(1), Some(w(2)), StackMode::BottomIf);
        assert_eq!(tree.get(root).unwrap().children, vec![w(1), w(2), w(3)]);
    }

    #[test]
    fn test_exclusive_selections() {
        let mut tree = WindowTree::for_tests(100, 100);
        let root = tree.root();
        tree.select_events(root, 1, event_mask::SUBSTRUCTURE_REDIRECT).unwrap();
        let err = tree
            .select_events(root, 2, event_mask::SUBSTRUCTURE_REDIRECT)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Access);
        tree.select_events(root, 2, event_mask::SUBSTRUCTURE_NOTIFY).unwrap();
        assert_eq!(tree.redirect_holder(root), Some(1));
        assert_eq!(tree.clients_selecting(root, event_mask::ALL), vec![1, 2]);
        tree.select_events(root, 1, 0).unwrap();
        assert_eq!(tree.redirect_holder(root), None);
    }

    #[test]
    fn test_structure_targets() {
        let mut tree = WindowTree::for_tests(100, 100);
        let root = tree.root();
        tree.add_for_tests(w(1), root, 0, 0, 10, 10);
        tree.select_events(w(1), 1, event_mask::STRUCTURE_NOTIFY).unwrap();
        tree.select_events(root, 2, event_mask::SUBSTRUCTURE_NOTIFY).unwrap();
        assert_eq!(tree.structure_targets(w(1)), vec![(1, w(1)), (2, root)]);
    }
}
