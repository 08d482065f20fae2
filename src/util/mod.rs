pub mod command;
pub mod paths;
pub mod retry;
pub mod workdir;
