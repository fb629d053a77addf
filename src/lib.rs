pub mod assets;
pub mod bootstrap;
pub mod bot;
pub mod config;
pub mod db;
pub mod gate;
pub mod handoff;
pub mod logging;
pub mod password;
pub mod topology;
