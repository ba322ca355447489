pub mod quest;
pub mod store;

pub use quest::QuestStore;
pub use store::{IngestStats, MarketStore};
