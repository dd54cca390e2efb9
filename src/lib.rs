//! Echofield library - spatial soundscape for live agent session activity

pub mod audio;
pub mod cli;
pub mod events;
pub mod overlay;
pub mod params;
pub mod radar;
pub mod rendering;
pub mod store;
