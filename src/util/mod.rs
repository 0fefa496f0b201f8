pub mod clock;
pub mod retention;
