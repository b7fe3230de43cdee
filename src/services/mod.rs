pub mod gemini;
pub mod generator;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod verifier;
