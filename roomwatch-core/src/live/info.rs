use serde::Serialize;

use super::{Live, LiveId};
use crate::config::LiveRoom;

/// Snapshot of a room as reported by its source, plus the engine's own flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    pub host_name: String,
    pub room_name: String,
    /// Whether the room is on air
    pub status: bool,
    /// Reported by placeholders whose real source is not resolved yet
    pub initializing: bool,
    /// Platform supplied id that replaces the url derived one
    pub custom_live_id: Option<String>,
    pub audio_only: bool,
    pub rtmp_url: String,
    pub listen: bool,
    pub record: bool,
    pub push: bool,
    pub listening: bool,
    pub recording: bool,
    pub pushing: bool,
}

impl Info {
    /// Copy the room's configured switches and re-emit target
    pub fn apply_room(&mut self, room: &LiveRoom) {
        self.listen = room.listen;
        self.record = room.record;
        self.push = room.push;
        self.rtmp_url.clone_from(&room.rtmp);
    }

    /// Build the JSON document written next to recordings
    #[must_use]
    pub fn document(&self, live: &dyn Live) -> InfoDocument {
        let last_start = live.last_start_time();
        InfoDocument {
            id: live.live_id(),
            live_url: live.raw_url(),
            platform_cn_name: live.platform_name(),
            host_name: self.host_name.clone(),
            room_name: self.room_name.clone(),
            status: self.status,
            listening: self.listening,
            recording: self.recording,
            pushing: self.pushing,
            initializing: self.initializing,
            last_start_time: last_start.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            last_start_time_unix: last_start.map(|t| t.timestamp()),
            audio_only: self.audio_only,
            rtmp_url: self.rtmp_url.clone(),
            listen: self.listen,
            record: self.record,
            push: self.push,
        }
    }
}

/// Serialized room metadata
#[derive(Debug, Clone, Serialize)]
pub struct InfoDocument {
    pub id: LiveId,
    pub live_url: String,
    pub platform_cn_name: String,
    pub host_name: String,
    pub room_name: String,
    pub status: bool,
    pub listening: bool,
    pub recording: bool,
    pub pushing: bool,
    pub initializing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_start_time_unix: Option<i64>,
    pub audio_only: bool,
    pub rtmp_url: String,
    pub listen: bool,
    pub record: bool,
    pub push: bool,
}
