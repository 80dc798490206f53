pub mod rfc5005;
pub mod strategy;
pub mod wordpress;

pub use strategy::{FeedPage, OldPage, Strategy, StrategyRegistry, UpdateFeedHistory};
