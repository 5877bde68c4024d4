pub mod console;
pub mod disk;
pub mod terminal;
