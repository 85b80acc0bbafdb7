//! Chat transport collaborators
//!
//! The engine never talks to a chat platform directly. It reports everything
//! it wants said through a [`Tunnel`], and asks an [`AdminCheck`] whether an
//! actor may run administrative commands. Implementations typically enqueue
//! outgoing messages on a channel drained by the bot's network task.

use std::future::Future;

use crate::{game_id::RoomId, quiz::question::OptionKey, roster::Id};

/// Trait for sending messages into a chat room
///
/// Calls are made while the room's state is locked, so implementations
/// should hand the message off (for example to a channel) rather than
/// perform network I/O inline.
pub trait Tunnel {
    /// Shows a question with one answer button per option
    ///
    /// The options arrive in display order; each button must carry
    /// [`OptionKey::callback_data`] so answers can be mapped back.
    fn present(&self, room: RoomId, text: &str, options: &[(OptionKey, String)]);

    /// Sends a private acknowledgement to one actor
    fn notify(&self, room: RoomId, actor: Id, text: &str);

    /// Sends a message visible to the whole room
    fn broadcast(&self, room: RoomId, text: &str);

    /// Deletes every game message the transport has tracked for `room`
    fn delete_tracked(&self, room: RoomId);
}

/// Trait for checking an actor's administrative role in a room
pub trait AdminCheck: Send + Sync + 'static {
    /// Whether `actor` administers `room`
    fn is_admin(&self, room: RoomId, actor: Id) -> impl Future<Output = bool> + Send;
}
