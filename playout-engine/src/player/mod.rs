//! Player units and the audio engine boundary

mod audio;
mod protocol;
mod unit;

pub use audio::{AudioEngine, SimulatedEngine};
pub use protocol::{
    PlayerCommand, PlayerLink, PlayerReport, PlayerStatus, PlayerVerb, ReportReceiver, ReportSender,
};
pub use unit::PlayerUnit;
