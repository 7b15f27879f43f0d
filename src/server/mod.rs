//! Room actors, their registry and the broadcast layer they publish through.

pub mod dispatch;
pub mod hub;
pub mod room;

pub use dispatch::{BroadcastLayer, ChannelBroadcaster, EventReceiver, EventSender};
pub use hub::RoomHub;
pub use room::{spawn_room, RoomCommand, RoomHandle};
