/// RTSP/1.0 client engine
pub mod rtsp;

pub use self::rtsp::{RtspClient, RtspUrl, SessionOrchestrator};
