mod flag;
mod latch;

pub use flag::*;
pub use latch::*;
