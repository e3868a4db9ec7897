pub mod autostart;
pub mod install;
