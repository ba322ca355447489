pub mod client;
pub mod decode;

// Re-export the pieces the rest of the crate wires together.
pub use client::{EventSink, FeedClient};
pub use decode::decode_frame;
