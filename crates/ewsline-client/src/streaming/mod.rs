//! Streaming notifications over a hanging `GetStreamingEvents` request.

mod connection;
mod events;
mod hanging;

pub use connection::{StreamingConnectionConfig, StreamingSubscriptionConnection};
pub use events::{StreamingEvent, StreamingEventHandler, channel_handler};
pub use hanging::{
    ConnectionState, Disconnect, DisconnectListener, DisconnectReason, HangingConnection,
    HangingSettings, ResponseHandler,
};
