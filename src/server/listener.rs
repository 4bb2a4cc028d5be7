//! Server listener and connection handling
//!
//! Every connection gets a reader thread, which frames requests and runs
//! them against the shared [`Server`], and a writer thread, which drains a
//! channel of encoded messages onto the socket. Requests from all clients
//! are serialized by one lock; a client holding GrabServer keeps the others
//! waiting on a condition variable until it lets go or disconnects.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use super::{ClientSession, Message, Outbound, RawInput, Server};
use crate::connection::{read_frame, Connection, Listener};
use crate::error::{ServerError, ServerResult};
use crate::protocol::setup::{SetupFailed, SetupRequest, SetupResponse};
use crate::protocol::*;

/// What a writer thread receives
enum Outgoing {
    Bytes(Vec<u8>),
    Close,
}

struct Route {
    /// Distinguishes connections that reuse a client number
    serial: u64,
    sender: Sender<Outgoing>,
}

/// The server plus what the connection threads need to reach each other
pub struct SharedServer {
    server: Mutex<Server>,
    /// Signalled whenever GrabServer may have been released
    grab_released: Condvar,
    routes: Mutex<HashMap<ClientId, Route>>,
    next_serial: AtomicU64,
}

impl SharedServer {
    pub fn new(server: Server) -> Arc<Self> {
        Arc::new(SharedServer {
            server: Mutex::new(server),
            grab_released: Condvar::new(),
            routes: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        })
    }

    /// Lock the server regardless of any server grab
    pub fn lock(&self) -> MutexGuard<'_, Server> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the server once no other client holds GrabServer
    fn lock_for(&self, client: ClientId) -> MutexGuard<'_, Server> {
        let mut guard = self.lock();
        while guard.server_grabbed_by().is_some_and(|holder| holder != client) {
            guard = self
                .grab_released
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        guard
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<ClientId, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, client: ClientId, serial: u64) -> bool {
        self.routes().get(&client).is_some_and(|r| r.serial == serial)
    }

    /// Encode and queue messages. Called with the server locked so every
    /// client sees messages in the order they were generated.
    fn deliver(&self, server: &Server, outbound: Vec<Outbound>) {
        let mut routes = self.routes();
        for Outbound { client, message } in outbound {
            if message == Message::Close {
                if let Some(route) = routes.remove(&client) {
                    let _ = route.sender.send(Outgoing::Close);
                }
                continue;
            }
            let Some(info) = server.client_info(client) else {
                continue;
            };
            let Some(bytes) = message.encode(info.byte_order, info.last_sequence) else {
                continue;
            };
            if let Some(route) = routes.get(&client) {
                if route.sender.send(Outgoing::Bytes(bytes)).is_err() {
                    log::debug!("Writer for client {} is gone", client);
                }
            }
        }
    }

    /// Feed a core input event from the host
    pub fn inject_input(&self, input: RawInput) {
        let mut server = self.lock();
        let out = server.inject_input_event(input);
        self.deliver(&server, out);
    }

    /// Feed an input event from one extension device
    pub fn inject_device_input(&self, device: u8, input: RawInput) {
        let mut server = self.lock();
        let out = server.inject_device_event(device, input);
        self.deliver(&server, out);
    }
}

/// Accept connections until the listener fails
pub fn serve(listener: Listener, shared: Arc<SharedServer>) -> ServerResult<()> {
    loop {
        match listener.accept() {
            Ok(connection) => {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let peer = connection.peer();
                    if let Err(e) = handle_client(connection, shared) {
                        log::warn!("Connection {} ended: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                log::error!("Accept failed: {}", e);
                if e.kind() != ErrorKind::Interrupted && e.kind() != ErrorKind::ConnectionAborted {
                    return Err(e.into());
                }
            }
        }
    }
}

fn refuse(connection: &mut Connection, order: ByteOrder, reason: &str) -> ServerResult<()> {
    let failed = SetupResponse::Failed(SetupFailed {
        protocol_major_version: PROTOCOL_MAJOR_VERSION,
        protocol_minor_version: PROTOCOL_MINOR_VERSION,
        reason: reason.to_string(),
    });
    connection.write_all(&failed.encode(order))?;
    connection.flush()?;
    Err(ServerError::SetupRejected(reason.to_string()))
}

fn handle_client(mut connection: Connection, shared: Arc<SharedServer>) -> ServerResult<()> {
    log::info!("New connection from {}", connection.peer());

    let setup = SetupRequest::parse(&mut connection)?;
    log::debug!("Setup request: {:?}", setup);
    let order = setup.byte_order;
    if setup.protocol_major_version != PROTOCOL_MAJOR_VERSION {
        return refuse(
            &mut connection,
            order,
            &format!("protocol version {} not supported", setup.protocol_major_version),
        );
    }

    let serial = shared.next_serial.fetch_add(1, Ordering::Relaxed);
    let (sender, receiver) = mpsc::channel();
    let (client, reply) = {
        let mut server = shared.lock();
        match server.register_client(order) {
            Ok(client) => {
                shared.routes().insert(client, Route { serial, sender });
                (client, server.setup_reply(client))
            }
            Err(e) => {
                drop(server);
                return refuse(&mut connection, order, &e.to_string());
            }
        }
    };

    let mut writer = connection.try_clone()?;
    // The setup reply goes out before anything the writer may queue
    writer.write_all(&SetupResponse::Success(reply).encode(order))?;
    writer.flush()?;
    log::info!("Client {} connected from {}", client, connection.peer());

    let writer_thread = thread::spawn(move || {
        for outgoing in receiver {
            match outgoing {
                Outgoing::Bytes(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                        log::debug!("Write to client {} failed: {}", client, e);
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        writer.shutdown();
    });

    let mut session = ClientSession::new(client, order);
    let result = read_requests(&mut connection, &mut session, &shared, serial);

    if shared.is_current(client, serial) {
        let mut server = shared.lock();
        server.client_disconnected(client);
        shared.routes().remove(&client);
        let out = server.take_outbox();
        shared.deliver(&server, out);
    }
    shared.grab_released.notify_all();
    let _ = writer_thread.join();
    log::info!("Client {} closed", client);
    result
}

fn read_requests(
    connection: &mut Connection,
    session: &mut ClientSession,
    shared: &SharedServer,
    serial: u64,
) -> ServerResult<()> {
    let client = session.id;
    loop {
        let frame = match read_frame(connection, session.byte_order(), session.big_requests()) {
            Ok(frame) => frame,
            Err(ServerError::Framing(err)) => {
                let mut server = shared.lock_for(client);
                let out = vec![session.reject_frame(&mut server, 0, err.clone())];
                shared.deliver(&server, out);
                return Err(ServerError::Framing(err));
            }
            Err(ServerError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut server = shared.lock_for(client);
        if !shared.is_current(client, serial) {
            // Killed while this frame was in flight
            return Ok(());
        }
        let grabbed = server.server_grabbed_by();
        let out = session.handle_frame(&mut server, &frame);
        shared.deliver(&server, out);
        let released = grabbed.is_some() && server.server_grabbed_by().is_none();
        drop(server);
        if released {
            shared.grab_released.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::security::SecurityPolicy;

    fn shared() -> Arc<SharedServer> {
        SharedServer::new(
            Server::new(Box::new(NullBackend::new()), SecurityPolicy::default()).unwrap(),
        )
    }

    #[test]
    fn test_deliver_encodes_in_receiver_order() {
        let shared = shared();
        let (sender, receiver) = mpsc::channel();
        let client = {
            let mut server = shared.lock();
            let client = server.register_client(ByteOrder::MSBFirst).unwrap();
            shared.routes().insert(client, Route { serial: 1, sender });
            client
        };
        let server = shared.lock();
        shared.deliver(
            &server,
            vec![Outbound {
                client,
                message: Message::Reply {
                    sequence: 7,
                    reply: Reply::InternAtom { atom: Atom::new(1) },
                },
            }],
        );
        match receiver.try_recv() {
            Ok(Outgoing::Bytes(bytes)) => {
                assert_eq!(bytes[0], 1);
                assert_eq!(&bytes[2..4], &[0, 7]);
                assert_eq!(&bytes[8..12], &[0, 0, 0, 1]);
            }
            _ => panic!("expected reply bytes"),
        }
    }

    #[test]
    fn test_close_drops_route() {
        let shared = shared();
        let (sender, receiver) = mpsc::channel();
        shared.routes().insert(3, Route { serial: 9, sender });
        assert!(shared.is_current(3, 9));
        let server = shared.lock();
        shared.deliver(
            &server,
            vec![Outbound {
                client: 3,
                message: Message::Close,
            }],
        );
        assert!(!shared.is_current(3, 9));
        assert!(matches!(receiver.try_recv(), Ok(Outgoing::Close)));
    }
}
