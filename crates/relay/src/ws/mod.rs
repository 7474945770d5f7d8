mod handler;
pub mod protocol;

pub use handler::{
    router, CollabRouterState, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES,
};
