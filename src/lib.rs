pub mod config;
pub mod database;
pub mod error;
pub mod fivem;
pub mod job;
pub mod logger;
pub mod model;
pub mod twitch;

#[cfg(test)]
mod test_support;
