//! Broadcast gateway contract
//!
//! This module defines the trait through which the session core reaches the
//! real-time transport. The core never talks to sockets directly; it asks
//! the gateway to manage room membership and to deliver events either to a
//! whole room or to a single connection. Implementations might use
//! WebSockets, Server-Sent Events, or an in-memory fan-out in tests.
//!
//! Sends are fire-and-forget: the core does not wait for delivery and the
//! gateway must not call back into the core. Connection identification and
//! disconnect notification are the transport's side of the contract; the
//! transport reports disconnects by invoking
//! [`Registry::handle_disconnect`](crate::registry::Registry::handle_disconnect).

use crate::{Event, connection::ConnectionId, join_code::JoinCode};

/// Room-scoped send primitives consumed by the session core.
///
/// A room corresponds one-to-one with a live session and is addressed by
/// the session's join code.
pub trait Gateway {
    /// Adds a connection to a session's room
    fn join_room(&self, connection: ConnectionId, code: JoinCode);

    /// Removes a connection from a session's room
    fn leave_room(&self, connection: ConnectionId, code: JoinCode);

    /// Delivers an event to every connection in a session's room
    fn send_to_room(&self, code: JoinCode, event: &Event);

    /// Delivers an event to a single connection
    fn send_to_connection(&self, connection: ConnectionId, event: &Event);
}
