/// Last observed state of a room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStatus {
    pub room_name: String,
    pub is_live: bool,
}

/// Transition between two consecutive observations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    NoChange,
    WentLive,
    WentOffline,
    /// Live in both observations under different titles
    Renamed,
}

impl RoomStatus {
    pub fn new(room_name: impl Into<String>, is_live: bool) -> Self {
        Self {
            room_name: room_name.into(),
            is_live,
        }
    }

    #[must_use]
    pub fn diff(&self, latest: &Self) -> StatusChange {
        match (self.is_live, latest.is_live) {
            (false, true) => StatusChange::WentLive,
            (true, false) => StatusChange::WentOffline,
            (true, true) if self.room_name != latest.room_name => StatusChange::Renamed,
            _ => StatusChange::NoChange,
        }
    }
}
