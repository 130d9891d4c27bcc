pub mod chunk;
pub mod transcript;

pub use chunk::*;
pub use transcript::*;
