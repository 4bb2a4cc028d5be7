//! Atom interning
//!
//! Atoms live for the whole server lifetime: a name interned once keeps its
//! number until exit, whichever client asked first.

use crate::protocol::Atom;
use std::collections::HashMap;

/// Names of the predefined atoms, in atom order starting at 1
const PREDEFINED: [&str; 68] = [
    "PRIMARY",
    "SECONDARY",
    "ARC",
    "ATOM",
    "BITMAP",
    "CARDINAL",
    "COLORMAP",
    "CURSOR",
    "CUT_BUFFER0",
    "CUT_BUFFER1",
    "CUT_BUFFER2",
    "CUT_BUFFER3",
    "CUT_BUFFER4",
    "CUT_BUFFER5",
    "CUT_BUFFER6",
    "CUT_BUFFER7",
    "DRAWABLE",
    "FONT",
    "INTEGER",
    "PIXMAP",
    "POINT",
    "RECTANGLE",
    "RESOURCE_MANAGER",
    "RGB_COLOR_MAP",
    "RGB_BEST_MAP",
    "RGB_BLUE_MAP",
    "RGB_DEFAULT_MAP",
    "RGB_GRAY_MAP",
    "RGB_GREEN_MAP",
    "RGB_RED_MAP",
    "STRING",
    "VISUALID",
    "WINDOW",
    "WM_COMMAND",
    "WM_HINTS",
    "WM_CLIENT_MACHINE",
    "WM_ICON_NAME",
    "WM_ICON_SIZE",
    "WM_NAME",
    "WM_NORMAL_HINTS",
    "WM_SIZE_HINTS",
    "WM_ZOOM_HINTS",
    "MIN_SPACE",
    "NORM_SPACE",
    "MAX_SPACE",
    "END_SPACE",
    "SUPERSCRIPT_X",
    "SUPERSCRIPT_Y",
    "SUBSCRIPT_X",
    "SUBSCRIPT_Y",
    "UNDERLINE_POSITION",
    "UNDERLINE_THICKNESS",
    "STRIKEOUT_ASCENT",
    "STRIKEOUT_DESCENT",
    "ITALIC_ANGLE",
    "X_HEIGHT",
    "QUAD_WIDTH",
    "WEIGHT",
    "POINT_SIZE",
    "RESOLUTION",
    "COPYRIGHT",
    "NOTICE",
    "FONT_NAME",
    "FAMILY_NAME",
    "FULL_NAME",
    "CAP_HEIGHT",
    "WM_CLASS",
    "WM_TRANSIENT_FOR",
];

/// Two-way atom table
///
/// Names are byte strings; a client may intern any bytes, Latin-1 included.
#[derive(Debug)]
pub struct AtomTable {
    by_name: HashMap<Vec<u8>, Atom>,
    /// Index 0 is atom 1
    names: Vec<Vec<u8>>,
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomTable {
    pub fn new() -> Self {
        let mut table = AtomTable {
            by_name: HashMap::new(),
            names: Vec::with_capacity(PREDEFINED.len()),
        };
        for name in PREDEFINED {
            table.push(name.as_bytes());
        }
        table
    }

    fn push(&mut self, name: &[u8]) -> Atom {
        self.names.push(name.to_vec());
        let atom = Atom::new(self.names.len() as u32);
        self.by_name.insert(name.to_vec(), atom);
        atom
    }

    /// Look a name up, creating it unless `only_if_exists` is set
    pub fn intern(&mut self, name: &[u8], only_if_exists: bool) -> Option<Atom> {
        if let Some(atom) = self.by_name.get(name) {
            return Some(*atom);
        }
        if only_if_exists {
            return None;
        }
        let atom = self.push(name);
        log::debug!("Interned atom {} = \"{}\"", atom.get(), name.escape_ascii());
        Some(atom)
    }

    pub fn name(&self, atom: Atom) -> Option<&[u8]> {
        let index = (atom.get() as usize).checked_sub(1)?;
        self.names.get(index).map(|s| s.as_slice())
    }

    /// The name as text, for callers outside the wire protocol
    pub fn name_str(&self, atom: Atom) -> Option<&str> {
        self.name(atom).and_then(|name| std::str::from_utf8(name).ok())
    }

    pub fn contains(&self, atom: Atom) -> bool {
        self.name(atom).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_atoms_line_up() {
        let table = AtomTable::new();
        assert_eq!(table.name(Atom::PRIMARY), Some(&b"PRIMARY"[..]));
        assert_eq!(table.name(Atom::STRING), Some(&b"STRING"[..]));
        assert_eq!(table.name(Atom::WM_TRANSIENT_FOR), Some(&b"WM_TRANSIENT_FOR"[..]));
        assert_eq!(table.len() as u32, Atom::FIRST_USER_ATOM - 1);
        assert_eq!(table.name(Atom::NONE), None);
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = AtomTable::new();
        let first = table.intern(b"FOO", false).unwrap();
        assert_eq!(first.get(), Atom::FIRST_USER_ATOM);
        assert_eq!(table.intern(b"FOO", false), Some(first));
        assert_eq!(table.intern(b"FOO", true), Some(first));
        assert_eq!(table.intern(b"WM_NAME", false), Some(Atom::WM_NAME));
    }

    #[test]
    fn test_only_if_exists_does_not_create() {
        let mut table = AtomTable::new();
        assert_eq!(table.intern(b"BAR", true), None);
        assert_eq!(table.len(), 68);
        assert!(!table.contains(Atom::new(Atom::FIRST_USER_ATOM)));
    }

    #[test]
    fn test_names_are_bytes_not_text() {
        let mut table = AtomTable::new();
        let e_acute = table.intern(&[0xE9], false).unwrap();
        let y_umlaut = table.intern(&[0xFF], false).unwrap();
        assert_ne!(e_acute, y_umlaut);
        assert_eq!(table.name(e_acute), Some(&[0xE9u8][..]));
        assert_eq!(table.name(y_umlaut), Some(&[0xFFu8][..]));
        assert_eq!(table.intern(&[0xE9], true), Some(e_acute));
        assert_eq!(table.name_str(e_acute), None);
        assert_eq!(table.name_str(Atom::PRIMARY), Some("PRIMARY"));
    }
}
