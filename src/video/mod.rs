//! Video frames and the capture/encode collaborator boundary

pub mod buffer;
pub mod frame;
pub mod source;

pub use buffer::{create_shared_queue, FrameQueue, SharedFrameQueue};
pub use frame::{EncodedFrame, ReassembledFrame};
pub use source::{FileSequenceSource, FrameSource, TestPatternSource};
