pub mod accumulator;
pub mod classifier;

pub use accumulator::WindowStats;
pub use classifier::{classify_against, Classification};
