//! Selection ownership
//!
//! The table maps a selection atom to the window and client that last took
//! it. Conversions for owned selections are forwarded to the owner as a
//! SelectionRequest; unowned selections are offered to the host.

use super::Server;
use crate::protocol::*;
use std::collections::HashMap;

/// Current owner of one selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOwner {
    pub window: Window,
    pub client: ClientId,
    /// Last-change time
    pub time: Timestamp,
}

#[derive(Debug, Default)]
pub struct SelectionTable {
    owners: HashMap<Atom, SelectionOwner>,
}

impl SelectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, selection: Atom) -> Option<&SelectionOwner> {
        self.owners.get(&selection)
    }

    pub fn set(&mut self, selection: Atom, owner: SelectionOwner) -> Option<SelectionOwner> {
        self.owners.insert(selection, owner)
    }

    pub fn clear(&mut self, selection: Atom) -> Option<SelectionOwner> {
        self.owners.remove(&selection)
    }

    /// Drop every selection owned through `window`
    pub fn clear_window(&mut self, window: Window) {
        self.owners.retain(|_, owner| owner.window != window);
    }

    /// Drop every selection taken by `client`
    pub fn clear_client(&mut self, client: ClientId) {
        self.owners.retain(|_, owner| owner.client != client);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl Server {
    pub(crate) fn set_selection_owner(
        &mut self,
        client: ClientId,
        owner: Window,
        selection: Atom,
        time: Timestamp,
    ) -> X11Result<()> {
        if !owner.is_none() {
            self.windows.get(owner)?;
        }
        if !self.atoms.contains(selection) {
            return Err(X11Error::bad_atom(selection));
        }
        let time = time.or_now(self.now());
        let previous = self.selections.get(selection).copied();
        if let Some(prev) = previous {
            if time < prev.time {
                log::debug!(
                    "SetSelectionOwner atom={} ignored: time {} before {}",
                    selection.get(),
                    time.get(),
                    prev.time.get()
                );
                return Ok(());
            }
        }

        if owner.is_none() {
            self.selections.clear(selection);
        } else {
            self.selections.set(
                selection,
                SelectionOwner {
                    window: owner,
                    client,
                    time,
                },
            );
        }
        log::debug!(
            "Selection {} now owned by 0x{:08x} (client {})",
            selection.get(),
            owner.xid(),
            client
        );

        if let Some(prev) = previous {
            if prev.client != client {
                self.send_event(
                    prev.client,
                    Event::SelectionClear {
                        time,
                        owner: prev.window,
                        selection,
                    },
                );
            }
        }
        Ok(())
    }

    pub(crate) fn get_selection_owner(&self, selection: Atom) -> X11Result<Reply> {
        if !self.atoms.contains(selection) {
            return Err(X11Error::bad_atom(selection));
        }
        let owner = self
            .selections
            .get(selection)
            .map(|o| o.window)
            .unwrap_or(Window::NONE);
        Ok(Reply::GetSelectionOwner { owner })
    }

    pub(crate) fn convert_selection(
        &mut self,
        client: ClientId,
        req: ConvertSelectionRequest,
    ) -> X11Result<()> {
        self.windows.get(req.requestor)?;
        for atom in [req.selection, req.target] {
            if !self.atoms.contains(atom) {
                return Err(X11Error::bad_atom(atom));
            }
        }
        if req.property != Atom::NONE && !self.atoms.contains(req.property) {
            return Err(X11Error::bad_atom(req.property));
        }

        if let Some(owner) = self.selections.get(req.selection).copied() {
            log::debug!(
                "ConvertSelection {} -> SelectionRequest to client {}",
                req.selection.get(),
                owner.client
            );
            self.send_event(
                owner.client,
                Event::SelectionRequest {
                    time: req.time,
                    owner: owner.window,
                    requestor: req.requestor,
                    selection: req.selection,
                    target: req.target,
                    property: req.property,
                },
            );
            return Ok(());
        }

        // Unowned: the host may hold the data, named in text
        let names = (
            self.atoms.name_str(req.selection).map(str::to_string),
            self.atoms.name_str(req.target).map(str::to_string),
        );
        let host = match names {
            (Some(selection), Some(target)) => self.backend.convert_selection(&selection, &target),
            _ => None,
        };

        let property = match host {
            Some(data) => {
                let property = if req.property == Atom::NONE {
                    req.target
                } else {
                    req.property
                };
                let type_ = self
                    .atoms
                    .intern(data.type_name.as_bytes(), false)
                    .unwrap_or(Atom::STRING);
                self.replace_property(req.requestor, property, type_, data.format, data.data)?;
                property
            }
            None => Atom::NONE,
        };
        log::debug!(
            "ConvertSelection {} answered by host, property={}",
            req.selection.get(),
            property.get()
        );

        let recipient = match req.requestor.owner() {
            SERVER_CLIENT => client,
            owner => owner,
        };
        self.send_event(
            recipient,
            Event::SelectionNotify {
                time: req.time,
                requestor: req.requestor,
                selection: req.selection,
                target: req.target,
                property,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(window: u32, client: ClientId, time: u32) -> SelectionOwner {
        SelectionOwner {
            window: Window::new(window),
            client,
            time: Timestamp::new(time),
        }
    }

    #[test]
    fn test_set_replaces_previous() {
        let mut table = SelectionTable::new();
        assert!(table.set(Atom::PRIMARY, owner(0x20_0001, 1, 5)).is_none());
        let prev = table.set(Atom::PRIMARY, owner(0x40_0001, 2, 6)).unwrap();
        assert_eq!(prev.client, 1);
        assert_eq!(table.get(Atom::PRIMARY).unwrap().client, 2);
    }

    #[test]
    fn test_clear_by_window_and_client() {
        let mut table = SelectionTable::new();
        table.set(Atom::PRIMARY, owner(0x20_0001, 1, 5));
        table.set(Atom::SECONDARY, owner(0x20_0002, 1, 5));
        table.set(Atom::new(70), owner(0x40_0001, 2, 5));

        table.clear_window(Window::new(0x20_0001));
        assert!(table.get(Atom::PRIMARY).is_none());
        assert_eq!(table.len(), 2);

        table.clear_client(1);
        assert_eq!(table.len(), 1);
        assert!(table.get(Atom::new(70)).is_some());
    }
}
