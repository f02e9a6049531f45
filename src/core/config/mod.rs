pub mod data;
pub mod io;

pub use data::{AutoSpeak, ChatAutoAi, Config, SettingsProvider};
pub use io::ConfigError;

#[cfg(test)]
pub mod tests;
