//! Client session management
//!
//! A [`ClientSession`] is the per-connection half of a client: the byte
//! order it chose at setup, the sequence number of its last request and
//! whether it enabled BIG-REQUESTS. It turns one framed request into the
//! messages that answer it.

use super::{Message, Outbound, Server};
use crate::protocol::*;

/// Represents a connected X11 client
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Client number assigned by the server
    pub id: ClientId,
    byte_order: ByteOrder,
    /// Sequence number of the last request, wrapping at 16 bits
    sequence: u16,
    big_requests: bool,
}

impl ClientSession {
    /// Create a new client session
    pub fn new(id: ClientId, byte_order: ByteOrder) -> Self {
        ClientSession {
            id,
            byte_order,
            sequence: 0,
            big_requests: false,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn big_requests(&self) -> bool {
        self.big_requests
    }

    fn next_sequence(&mut self, server: &mut Server) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        if let Some(info) = server.clients.get_mut(&self.id) {
            info.last_sequence = self.sequence;
        }
        self.sequence
    }

    /// Execute one complete request frame, header included.
    ///
    /// Returns everything to send, in order: events the request generated
    /// (for this and other clients) and then this request's reply or error.
    pub fn handle_frame(&mut self, server: &mut Server, frame: &[u8]) -> Vec<Outbound> {
        let sequence = self.next_sequence(server);
        let opcode = frame.first().copied().unwrap_or(0);
        let minor = match (frame.get(1), server.extensions.by_opcode(opcode)) {
            (Some(detail), Some(_)) => *detail as u16,
            _ => 0,
        };

        let result = RequestHeader::parse(frame, self.byte_order, self.big_requests)
            .and_then(|header| {
                if header.size() != frame.len() {
                    return Err(X11Error::bad_length());
                }
                ProtocolParser::new(self.byte_order).parse(&header, &frame[header.header_len..])
            })
            .and_then(|request| {
                log::trace!("Client {} seq {}: {:?}", self.id, sequence, request);
                if request == Request::BigReqEnable {
                    self.big_requests = true;
                }
                server.execute(self.id, request)
            });

        let mut out = server.take_outbox();
        match result {
            Ok(Some(reply)) => out.push(Outbound {
                client: self.id,
                message: Message::Reply { sequence, reply },
            }),
            Ok(None) => {}
            Err(err) => {
                log::debug!(
                    "Client {} seq {}: opcode {} failed with {} (0x{:08x})",
                    self.id,
                    sequence,
                    opcode,
                    err.code,
                    err.bad_value
                );
                out.push(Outbound {
                    client: self.id,
                    message: Message::Error(err.stamp(sequence, opcode, minor)),
                });
            }
        }
        out
    }

    /// The stream can no longer be framed: count the broken request and
    /// answer it with `err` before the connection closes
    pub fn reject_frame(&mut self, server: &mut Server, opcode: u8, err: X11Error) -> Outbound {
        let sequence = self.next_sequence(server);
        Outbound {
            client: self.id,
            message: Message::Error(err.stamp(sequence, opcode, 0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::security::SecurityPolicy;

    fn session() -> (Server, ClientSession) {
        let mut server =
            Server::new(Box::new(NullBackend::new()), SecurityPolicy::default()).unwrap();
        let id = server.register_client(ByteOrder::LSBFirst).unwrap();
        (server, ClientSession::new(id, ByteOrder::LSBFirst))
    }

    #[test]
    fn test_sequence_counts_every_request() {
        let (mut server, mut session) = session();
        // NoOperation, then GetInputFocus
        assert!(session.handle_frame(&mut server, &[127, 0, 1, 0]).is_empty());
        let out = session.handle_frame(&mut server, &[43, 0, 1, 0]);
        assert_eq!(out.len(), 1);
        match &out[0].message {
            Message::Reply { sequence, .. } => assert_eq!(*sequence, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(server.client_info(session.id).map(|i| i.last_sequence), Some(2));
    }

    #[test]
    fn test_error_is_stamped_with_opcodes() {
        let (mut server, mut session) = session();
        // MapWindow on a window that does not exist
        let out = session.handle_frame(&mut server, &[8, 0, 2, 0, 0x99, 0, 0, 0]);
        match &out[0].message {
            Message::Error(err) => {
                assert_eq!(err.code, ErrorCode::Window);
                assert_eq!(err.sequence, 1);
                assert_eq!(err.major_opcode, 8);
                assert_eq!(err.minor_opcode, 0);
                assert_eq!(err.bad_value, 0x99);
            }
            other => panic!("unexpected {:?}", other),
        }
        // Unknown extension minor keeps its minor opcode
        let out = session.handle_frame(&mut server, &[133, 7, 1, 0]);
        match &out[0].message {
            Message::Error(err) => {
                assert_eq!(err.code, ErrorCode::Implementation);
                assert_eq!(err.major_opcode, 133);
                assert_eq!(err.minor_opcode, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch_is_length_error() {
        let (mut server, mut session) = session();
        // Claims two words but carries three
        let out = session.handle_frame(&mut server, &[8, 0, 2, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        match &out[0].message {
            Message::Error(err) => assert_eq!(err.code, ErrorCode::Length),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_big_requests_enable_switches_framing() {
        let (mut server, mut session) = session();
        assert!(!session.big_requests());
        let out = session.handle_frame(&mut server, &[133, 0, 1, 0]);
        assert_eq!(
            out[0].message,
            Message::Reply {
                sequence: 1,
                reply: Reply::BigReqEnable {
                    maximum_request_length: 4_194_303,
                },
            }
        );
        assert!(session.big_requests());
        // NoOperation framed with the extended length
        let out = session.handle_frame(&mut server, &[127, 0, 0, 0, 2, 0, 0, 0]);
        assert!(out.is_empty());
        assert_eq!(session.sequence(), 2);
    }

    #[test]
    fn test_sequence_wraps() {
        let (mut server, mut session) = session();
        session.sequence = u16::MAX;
        session.handle_frame(&mut server, &[127, 0, 1, 0]);
        assert_eq!(session.sequence(), 0);
        let out = session.reject_frame(&mut server, 127, X11Error::bad_length());
        match out.message {
            Message::Error(err) => assert_eq!(err.sequence, 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
