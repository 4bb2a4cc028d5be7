//! Window properties
//!
//! Each window carries its own [`PropertyStore`]; destroying the window
//! drops its properties with it. Reads may page through a value in 4-byte
//! units and report how much remains.

use super::Server;
use crate::protocol::*;

/// Stored property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub type_: Atom,
    /// 8, 16 or 32
    pub format: u8,
    pub data: Vec<u8>,
}

/// Outcome of a GetProperty read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRead {
    pub reply: Reply,
    /// The read consumed the property and removed it
    pub deleted: bool,
}

/// Properties of one window, in creation order
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    entries: Vec<(Atom, Property)>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: Atom) -> Option<&Property> {
        self.entries.iter().find(|(a, _)| *a == name).map(|(_, p)| p)
    }

    pub fn names(&self) -> Vec<Atom> {
        self.entries.iter().map(|(a, _)| *a).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a ChangeProperty. Prepend and Append on a missing property
    /// behave like Replace.
    pub fn change(
        &mut self,
        name: Atom,
        mode: PropertyMode,
        type_: Atom,
        format: u8,
        data: Vec<u8>,
    ) -> X11Result<()> {
        let existing = self.entries.iter_mut().find(|(a, _)| *a == name);
        match (mode, existing) {
            (PropertyMode::Replace, Some((_, prop))) => {
                *prop = Property {
                    type_,
                    format,
                    data,
                };
            }
            (_, None) => {
                self.entries.push((
                    name,
                    Property {
                        type_,
                        format,
                        data,
                    },
                ));
            }
            (mode, Some((_, prop))) => {
                if prop.type_ != type_ || prop.format != format {
                    return Err(X11Error::bad_match());
                }
                if mode == PropertyMode::Append {
                    prop.data.extend_from_slice(&data);
                } else {
                    let mut joined = data;
                    joined.extend_from_slice(&prop.data);
                    prop.data = joined;
                }
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, name: Atom) -> Option<Property> {
        let index = self.entries.iter().position(|(a, _)| *a == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Partial read with the GetProperty rules
    pub fn read(&mut self, req: &GetPropertyRequest) -> X11Result<PropertyRead> {
        let prop = match self.get(req.property) {
            Some(prop) => prop,
            None => {
                return Ok(PropertyRead {
                    reply: Reply::GetProperty {
                        format: 0,
                        type_: Atom::NONE,
                        bytes_after: 0,
                        value: Vec::new(),
                    },
                    deleted: false,
                })
            }
        };

        let len = prop.data.len() as u64;
        if req.type_ != Atom::ANY_PROPERTY_TYPE && req.type_ != prop.type_ {
            return Ok(PropertyRead {
                reply: Reply::GetProperty {
                    format: prop.format,
                    type_: prop.type_,
                    bytes_after: len as u32,
                    value: Vec::new(),
                },
                deleted: false,
            });
        }

        let start = req.long_offset as u64 * 4;
        if start > len {
            return Err(X11Error::bad_value(req.long_offset));
        }
        let end = start + (len - start).min(req.long_length as u64 * 4);
        let bytes_after = (len - end) as u32;
        let reply = Reply::GetProperty {
            format: prop.format,
            type_: prop.type_,
            bytes_after,
            value: prop.data[start as usize..end as usize].to_vec(),
        };

        let deleted = req.delete && bytes_after == 0;
        if deleted {
            self.delete(req.property);
        }
        Ok(PropertyRead { reply, deleted })
    }
}

impl Server {
    fn check_atom(&self, atom: Atom) -> X11Result<()> {
        if self.atoms.contains(atom) {
            Ok(())
        } else {
            Err(X11Error::bad_atom(atom))
        }
    }

    fn notify_property(&mut self, window: Window, atom: Atom, state: PropertyState) {
        let time = self.now();
        let clients = self.windows.clients_selecting(window, event_mask::PROPERTY_CHANGE);
        for client in clients {
            self.send_event(
                client,
                Event::PropertyNotify {
                    window,
                    atom,
                    time,
                    state,
                },
            );
        }
    }

    pub(crate) fn change_property(&mut self, req: ChangePropertyRequest) -> X11Result<()> {
        self.windows.get(req.window)?;
        self.check_atom(req.property)?;
        self.check_atom(req.type_)?;
        log::debug!(
            "ChangeProperty window=0x{:08x} atom={} type={} format={} bytes={}",
            req.window.xid(),
            req.property.get(),
            req.type_.get(),
            req.format,
            req.data.len()
        );
        self.windows.get_mut(req.window)?.properties.change(
            req.property,
            req.mode,
            req.type_,
            req.format,
            req.data,
        )?;
        self.notify_property(req.window, req.property, PropertyState::NewValue);
        Ok(())
    }

    /// Replace a property on behalf of the server itself
    pub(crate) fn replace_property(
        &mut self,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: Vec<u8>,
    ) -> X11Result<()> {
        self.change_property(ChangePropertyRequest {
            mode: PropertyMode::Replace,
            window,
            property,
            type_,
            format,
            data,
        })
    }

    pub(crate) fn delete_property(&mut self, window: Window, property: Atom) -> X11Result<()> {
        self.check_atom(property)?;
        let removed = self.windows.get_mut(window)?.properties.delete(property);
        if removed.is_some() {
            self.notify_property(window, property, PropertyState::Deleted);
        }
        Ok(())
    }

    pub(crate) fn get_property(&mut self, req: GetPropertyRequest) -> X11Result<Reply> {
        self.windows.get(req.window)?;
        self.check_atom(req.property)?;
        if req.type_ != Atom::ANY_PROPERTY_TYPE {
            self.check_atom(req.type_)?;
        }
        let read = self.windows.get_mut(req.window)?.properties.read(&req)?;
        if read.deleted {
            self.notify_property(req.window, req.property, PropertyState::Deleted);
        }
        Ok(read.reply)
    }

    pub(crate) fn list_properties(&self, window: Window) -> X11Result<Reply> {
        Ok(Reply::ListProperties {
            atoms: self.windows.get(window)?.properties.names(),
        })
    }
}
