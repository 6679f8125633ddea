//! Processing recipes expressed as host commands.
//!
//! The effects themselves run inside the host; this module only decides
//! which commands to send, with which parameters, in which order.

use crate::error::Result;
use crate::pipe::client::PipeClient;
use crate::pipe::protocol::Command;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Which effect chain a recording gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Live shows: peak normalisation only
    Live,
    /// Pre-recorded shows: compressor followed by a soft limiter
    Prerecord,
}

impl Profile {
    pub fn from_live(live: bool) -> Self {
        if live {
            Profile::Live
        } else {
            Profile::Prerecord
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Live => "live",
            Profile::Prerecord => "prerecord",
        }
    }

    /// Effect commands for this profile, applied to the current selection.
    pub fn effects(&self) -> Vec<Command> {
        match self {
            Profile::Live => vec![normalize()],
            Profile::Prerecord => vec![compressor(), limiter()],
        }
    }
}

pub fn select_all() -> Command {
    Command::new("SelectAll")
}

pub fn track_close() -> Command {
    Command::new("TrackClose")
}

pub fn import(path: &Path) -> Command {
    Command::new("Import2").param("Filename", path.display().to_string())
}

pub fn export(path: &Path) -> Command {
    Command::new("Export2")
        .param("Filename", path.display().to_string())
        .param("NumChannels", 2i64)
}

pub fn compressor() -> Command {
    Command::new("Compressor")
        .param("Threshold", -12i64)
        .param("NoiseFloor", -40i64)
        .param("Ratio", 2i64)
        .param("AttackTime", 3i64)
        .param("ReleaseTime", 10i64)
        .param("Normalize", true)
        .param("UsePeak", true)
}

pub fn limiter() -> Command {
    Command::new("Limiter")
        .param("type", "SoftLimit")
        .param("gain-L", 0i64)
        .param("gain-R", 0i64)
        .param("thresh", -4i64)
        .param("hold", 6.2)
        .param("makeup", "No")
}

pub fn normalize() -> Command {
    Command::new("Normalize")
        .param("PeakLevel", -0.3)
        .param("ApplyGain", true)
        .param("RemoveDcOffset", true)
        .param("StereoIndepend", false)
}

/// Full command sequence for one file.
///
/// Open tracks are closed before importing and again after exporting so a
/// file never inherits state from the previous one.
pub fn process_commands(import_path: &Path, export_path: &Path, profile: Profile) -> Vec<Command> {
    let mut commands = vec![select_all(), track_close(), import(import_path), select_all()];
    commands.extend(profile.effects());
    commands.push(export(export_path));
    commands.push(select_all());
    commands.push(track_close());
    commands
}

/// Run the recipe for one file, stopping at the first failed command.
pub async fn process<R, W>(
    client: &mut PipeClient<R, W>,
    import_path: &Path,
    export_path: &Path,
    profile: Profile,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(
        input = %import_path.display(),
        output = %export_path.display(),
        profile = profile.as_str(),
        "Processing"
    );
    for command in process_commands(import_path, export_path, profile) {
        client.execute(&command).await?;
    }
    Ok(())
}
