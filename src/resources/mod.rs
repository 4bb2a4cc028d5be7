//! Resource tracking for X11 clients
//!
//! Every resource a client creates is keyed by its composite [`ResourceId`].
//! One [`IdSpace`] records which kind each live id belongs to, so a client
//! cannot reuse an id across kinds, and per-kind [`ResourceTable`]s hold the
//! records. Lookups that miss map to the error code of the kind asked for.

pub mod colormap;
pub mod gc;

pub use colormap::ColormapRecord;
pub use gc::GcRecord;

use crate::backend::FontMetrics;
use crate::protocol::*;
use std::collections::HashMap;

/// Resource kinds sharing the per-client id namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Window,
    Pixmap,
    GContext,
    Colormap,
    Cursor,
    Font,
}

impl ResourceKind {
    /// Error for a reference to an id that is not a live resource of this kind
    pub fn missing(&self, xid: u32) -> X11Error {
        let code = match self {
            ResourceKind::Window => ErrorCode::Window,
            ResourceKind::Pixmap => ErrorCode::Pixmap,
            ResourceKind::GContext => ErrorCode::GContext,
            ResourceKind::Colormap => ErrorCode::Colormap,
            ResourceKind::Cursor => ErrorCode::Cursor,
            ResourceKind::Font => ErrorCode::Font,
        };
        X11Error::new(code, xid)
    }
}

/// Which kind every live id belongs to
#[derive(Debug, Default)]
pub struct IdSpace {
    owners: HashMap<ResourceId, ResourceKind>,
}

impl IdSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for `kind`. The id must lie in `client`'s range and must
    /// not already be in use by any kind.
    pub fn claim(&mut self, client: ClientId, id: ResourceId, kind: ResourceKind) -> X11Result<()> {
        if id.client != client || self.owners.contains_key(&id) {
            return Err(X11Error::bad_id_choice(id.xid()));
        }
        self.owners.insert(id, kind);
        Ok(())
    }

    /// Register a server-owned resource created at startup
    pub fn reserve(&mut self, id: ResourceId, kind: ResourceKind) {
        self.owners.insert(id, kind);
    }

    pub fn release(&mut self, id: ResourceId) {
        self.owners.remove(&id);
    }

    pub fn kind_of(&self, id: ResourceId) -> Option<ResourceKind> {
        self.owners.get(&id).copied()
    }

    pub fn count_owned_by(&self, client: ClientId) -> usize {
        self.owners.keys().filter(|id| id.client == client).count()
    }

    /// Ids owned by `client` of one kind
    pub fn owned_by(&self, client: ClientId, kind: ResourceKind) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .owners
            .iter()
            .filter(|(id, k)| id.client == client && **k == kind)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

/// Records of one resource kind
#[derive(Debug)]
pub struct ResourceTable<T> {
    kind: ResourceKind,
    entries: HashMap<ResourceId, T>,
}

impl<T> ResourceTable<T> {
    pub fn new(kind: ResourceKind) -> Self {
        ResourceTable {
            kind,
            entries: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn insert(&mut self, id: ResourceId, record: T) -> X11Result<()> {
        if self.entries.contains_key(&id) {
            return Err(X11Error::bad_id_choice(id.xid()));
        }
        self.entries.insert(id, record);
        Ok(())
    }

    pub fn get(&self, id: ResourceId) -> X11Result<&T> {
        self.entries.get(&id).ok_or_else(|| self.kind.missing(id.xid()))
    }

    pub fn get_mut(&mut self, id: ResourceId) -> X11Result<&mut T> {
        let kind = self.kind;
        self.entries.get_mut(&id).ok_or_else(|| kind.missing(id.xid()))
    }

    pub fn remove(&mut self, id: ResourceId) -> X11Result<T> {
        self.entries.remove(&id).ok_or_else(|| self.kind.missing(id.xid()))
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every record owned by `client`
    pub fn remove_owned_by(&mut self, client: ClientId) -> Vec<(ResourceId, T)> {
        let ids: Vec<ResourceId> = self
            .entries
            .keys()
            .filter(|id| id.client == client)
            .copied()
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|record| (id, record)))
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ResourceId, &mut T)> {
        self.entries.iter_mut()
    }
}

/// Pixmap record. Contents are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixmapRecord {
    pub width: u16,
    pub height: u16,
    pub depth: u8,
}

/// Cursor record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRecord {
    pub foreground: Rgb,
    pub background: Rgb,
    pub hotspot: (u16, u16),
    /// Glyph index when created from the cursor font
    pub glyph: Option<u16>,
}

/// Font record: the host metrics the name resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRecord {
    pub metrics: FontMetrics,
}

impl FontRecord {
    pub fn query_reply(&self) -> QueryFontReply {
        let m = &self.metrics;
        let width = if m.char_width == 0 {
            // Proportional fonts report the average advance as the bound
            (m.ascent + m.descent) / 2
        } else {
            m.char_width
        };
        let bounds = CharInfo {
            left_side_bearing: 0,
            right_side_bearing: width,
            character_width: width,
            ascent: m.ascent,
            descent: m.descent,
            attributes: 0,
        };
        QueryFontReply {
            min_bounds: bounds,
            max_bounds: bounds,
            min_char_or_byte2: m.min_char,
            max_char_or_byte2: m.max_char,
            default_char: m.default_char,
            draw_direction: 0,
            min_byte1: 0,
            max_byte1: 0,
            all_chars_exist: true,
            font_ascent: m.ascent,
            font_descent: m.descent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_space_shared_across_kinds() {
        let mut ids = IdSpace::new();
        let id = ResourceId::new(1, 5);
        ids.claim(1, id, ResourceKind::Pixmap).unwrap();
        let err = ids.claim(1, id, ResourceKind::Window).unwrap_err();
        assert_eq!(err.code, ErrorCode::IDChoice);
        ids.release(id);
        ids.claim(1, id, ResourceKind::Window).unwrap();
        assert_eq!(ids.kind_of(id), Some(ResourceKind::Window));
    }

    #[test]
    fn test_id_outside_client_range() {
        let mut ids = IdSpace::new();
        let err = ids
            .claim(1, ResourceId::new(2, 5), ResourceKind::Window)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IDChoice);
        assert_eq!(err.bad_value, ResourceId::new(2, 5).xid());
    }

    #[test]
    fn test_missing_maps_to_kind() {
        let table: ResourceTable<PixmapRecord> = ResourceTable::new(ResourceKind::Pixmap);
        let err = table.get(ResourceId::new(1, 9)).unwrap_err();
        assert_eq!(err.code, ErrorCode::Pixmap);
        let table: ResourceTable<GcRecord> = ResourceTable::new(ResourceKind::GContext);
        assert_eq!(
            table.get(ResourceId::new(1, 9)).unwrap_err().code,
            ErrorCode::GContext
        );
    }

    #[test]
    fn test_remove_owned_by() {
        let mut table = ResourceTable::new(ResourceKind::Cursor);
        for (client, local) in [(1, 1), (1, 2), (2, 1)] {
            table
                .insert(
                    ResourceId::new(client, local),
                    CursorRecord {
                        foreground: Rgb::default(),
                        background: Rgb::default(),
                        hotspot: (0, 0),
                        glyph: None,
                    },
                )
                .unwrap();
        }
        assert_eq!(table.remove_owned_by(1).len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.contains(ResourceId::new(2, 1)));
    }
}
