pub mod catalog;
pub mod scheduler;

pub use catalog::*;
pub use scheduler::*;
