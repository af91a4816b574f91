pub mod file;
pub mod shell;
