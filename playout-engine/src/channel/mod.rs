//! Channel controllers and persisted channel state

mod controller;
mod state;

pub use controller::{ChannelController, ChannelIo, ChannelSettings, LoadedItem, QUIT_ACK_TIMEOUT};
pub use state::{state_name, ChannelState, TransportState, POSITION_KEYS};
