//! Extension registry
//!
//! The server advertises two extensions: BIG-REQUESTS, which only changes
//! how a connection frames requests, and XInputExtension, whose requests
//! are handled in [`super::xinput`].

use crate::protocol::xinput::{XINPUT_FIRST_ERROR, XINPUT_FIRST_EVENT};
use crate::protocol::{Reply, BIG_REQUESTS_MAJOR_OPCODE, XINPUT_MAJOR_OPCODE};

pub const BIG_REQUESTS_NAME: &str = "BIG-REQUESTS";
pub const XINPUT_NAME: &str = "XInputExtension";

/// Largest request, in 4-byte units, once BIG-REQUESTS is enabled
pub const MAX_BIG_REQUEST_LENGTH: u32 = 4_194_303;

/// Opcode and event/error bases of one extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: &'static str,
    pub major_opcode: u8,
    /// 0 when the extension defines no events
    pub first_event: u8,
    /// 0 when the extension defines no errors
    pub first_error: u8,
}

#[derive(Debug, Clone)]
pub struct ExtensionRegistry {
    extensions: Vec<ExtensionInfo>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        ExtensionRegistry {
            extensions: vec![
                ExtensionInfo {
                    name: BIG_REQUESTS_NAME,
                    major_opcode: BIG_REQUESTS_MAJOR_OPCODE,
                    first_event: 0,
                    first_error: 0,
                },
                ExtensionInfo {
                    name: XINPUT_NAME,
                    major_opcode: XINPUT_MAJOR_OPCODE,
                    first_event: XINPUT_FIRST_EVENT,
                    first_error: XINPUT_FIRST_ERROR,
                },
            ],
        }
    }

    /// Extension names are matched byte for byte, case included
    pub fn find(&self, name: &[u8]) -> Option<&ExtensionInfo> {
        self.extensions.iter().find(|e| e.name.as_bytes() == name)
    }

    pub fn by_opcode(&self, major_opcode: u8) -> Option<&ExtensionInfo> {
        self.extensions.iter().find(|e| e.major_opcode == major_opcode)
    }

    pub fn query(&self, name: &[u8]) -> Reply {
        match self.find(name) {
            Some(info) => {
                log::debug!(
                    "QueryExtension {} -> major {}",
                    name.escape_ascii(),
                    info.major_opcode
                );
                Reply::QueryExtension {
                    present: true,
                    major_opcode: info.major_opcode,
                    first_event: info.first_event,
                    first_error: info.first_error,
                }
            }
            None => {
                log::debug!("QueryExtension {} -> not present", name.escape_ascii());
                Reply::QueryExtension {
                    present: false,
                    major_opcode: 0,
                    first_event: 0,
                    first_error: 0,
                }
            }
        }
    }

    pub fn list(&self) -> Reply {
        Reply::ListExtensions {
            names: self.extensions.iter().map(|e| e.name.to_string()).collect(),
        }
    }
}
