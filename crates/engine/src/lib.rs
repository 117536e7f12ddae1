pub mod naming;
pub mod segment;
pub mod similarity;
pub mod timecode;

pub use segment::*;
pub use timecode::*;
