//! Service layer: the sealed vault, the leveling runner, and the clients for
//! Redis, the event webhook, and the memo collaborator.

pub mod cache;
pub mod clock;
pub mod events;
pub mod leveling;
pub mod memo;
pub mod vault;

pub use cache::RedisCache;
pub use clock::{Clock, SystemClock};
pub use events::EventPublisher;
pub use leveling::LevelingLocks;
pub use memo::MemoClient;
