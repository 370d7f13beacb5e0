//! Word and sentence accumulation
//!
//! The assembler runs on the capture thread and turns confirmed keys into
//! text events; the transcript rebuilds the same text on the consumer side
//! from those events.

mod assembler;
mod transcript;

pub use assembler::TextAssembler;
pub use transcript::Transcript;
