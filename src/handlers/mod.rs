pub mod projects;
pub mod transcribe;

pub use projects::*;
pub use transcribe::*;
