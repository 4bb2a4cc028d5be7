/// x11core - the protocol core of an X11 display server
///
/// This library keeps the state an X11 server shares between its clients
/// (resources, the window tree, atoms, selections, grabs and input focus,
/// XInput devices) and executes requests against it. Rendering and the
/// host display stay behind the [`Backend`] trait.

pub mod backend;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod resources;
pub mod security;
pub mod server;

pub use backend::Backend;
pub use error::{ServerError, ServerResult};
pub use protocol::{Atom, ClientId, Drawable, GContext, Pixmap, Window};
pub use security::SecurityPolicy;
pub use server::{ClientSession, Message, Outbound, Server};

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
