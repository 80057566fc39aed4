pub mod engine;

pub use engine::{OcrMode, OcrOutput, TierEngine};
