//! Audio engine boundary
//!
//! Decoding and output belong to an external engine. Player units drive it
//! through [`AudioEngine`] and poll it for position and end-of-item.
//! [`SimulatedEngine`] keeps a clock instead of producing sound; it backs the
//! default binary and the tests.

use std::path::{Path, PathBuf};
use tokio::time::Instant;

use crate::{Error, Result};

/// Transport operations a player unit needs from an audio engine
///
/// Positions and lengths are seconds.
pub trait AudioEngine: Send {
    /// Open `path` for playback, returning its length
    ///
    /// `length_hint` is the plan's recorded length (0 when unknown).
    fn load(&mut self, path: &Path, length_hint: f64) -> Result<f64>;
    fn unload(&mut self);
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn unpause(&mut self) -> Result<()>;
    /// Stop and rewind to the start
    fn stop(&mut self) -> Result<()>;
    fn seek(&mut self, pos: f64) -> Result<()>;
    fn position(&self) -> f64;
    fn is_playing(&self) -> bool;
    /// Loaded item has reached its end
    fn is_finished(&self) -> bool;
    fn set_output(&mut self, device: Option<&str>) -> Result<()>;
}

#[derive(Debug)]
struct Track {
    path: PathBuf,
    length: f64,
}

/// Clock-driven stand-in for a real audio engine
///
/// Uses the tokio clock, so tests running with a paused runtime control how
/// far playback advances.
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    track: Option<Track>,
    /// Position accumulated before the current play run
    offset: f64,
    started: Option<Instant>,
    output: Option<String>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded_path(&self) -> Option<&Path> {
        self.track.as_ref().map(|t| t.path.as_path())
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    fn length(&self) -> f64 {
        self.track.as_ref().map(|t| t.length).unwrap_or(0.0)
    }

    fn require_track(&self) -> Result<()> {
        match self.track {
            Some(_) => Ok(()),
            None => Err(Error::Audio("nothing loaded".into())),
        }
    }
}

impl AudioEngine for SimulatedEngine {
    fn load(&mut self, path: &Path, length_hint: f64) -> Result<f64> {
        if !(length_hint.is_finite() && length_hint > 0.0) {
            return Err(Error::Audio(format!(
                "cannot simulate {} without a known length",
                path.display()
            )));
        }
        self.track = Some(Track {
            path: path.to_path_buf(),
            length: length_hint,
        });
        self.offset = 0.0;
        self.started = None;
        Ok(length_hint)
    }

    fn unload(&mut self) {
        self.track = None;
        self.offset = 0.0;
        self.started = None;
    }

    fn play(&mut self) -> Result<()> {
        self.require_track()?;
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.require_track()?;
        self.offset = self.position();
        self.started = None;
        Ok(())
    }

    fn unpause(&mut self) -> Result<()> {
        self.play()
    }

    fn stop(&mut self) -> Result<()> {
        self.require_track()?;
        self.offset = 0.0;
        self.started = None;
        Ok(())
    }

    fn seek(&mut self, pos: f64) -> Result<()> {
        self.require_track()?;
        self.offset = pos.clamp(0.0, self.length());
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn position(&self) -> f64 {
        let running = self
            .started
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (self.offset + running).min(self.length())
    }

    fn is_playing(&self) -> bool {
        self.started.is_some() && !self.is_finished()
    }

    fn is_finished(&self) -> bool {
        self.track.is_some() && self.position() >= self.length()
    }

    fn set_output(&mut self, device: Option<&str>) -> Result<()> {
        self.output = device.map(str::to_string);
        Ok(())
    }
}
