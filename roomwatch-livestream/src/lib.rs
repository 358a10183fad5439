// roomwatch-livestream - room watching, capture and re-emit for roomwatch
//
// Layout:
// - parser/    - Stream parsers (ffmpeg subprocess, native FLV remuxer)
// - watcher/   - Liveness poll loop per room and its manager
// - recorder/  - Capture-to-file workers, split scheduling, post-processing
// - pusher/    - Re-emit workers forwarding a live room to an rtmp target
// - template   - Output path and command line rendering
// - worker     - Lifecycle state shared by every per-room worker
// - util       - Jittered poll delays and stop-aware sleeps
//
// Recorders and pushers are created and removed by roomwatch-core bus events;
// the only direct call between managers is the "is this room watched" check.

pub mod parser;
pub mod pusher;
pub mod recorder;
pub mod template;
pub mod util;
pub mod watcher;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use parser::{locate_ffmpeg, new_parser, Parser, ParserConfig, ParserError, StatusParser};
pub use pusher::{Pusher, PusherError, PusherManager};
pub use recorder::{Recorder, RecorderError, RecorderManager};
pub use template::PathTemplate;
pub use watcher::{Watcher, WatcherError, WatcherManager};
pub use worker::{WorkerLifecycle, WorkerState};
