use uuid::{NoContext, Timestamp, Uuid};

use crate::clock::Clock;

/// Generates time-ordered message identifiers.
///
/// IDs are UUIDv7, so their text rendering sorts by creation time. The admin
/// pagination cursor relies on that ordering (`id DESC` pages backwards
/// through arrival order).
pub struct MessageIdGenerator;

impl MessageIdGenerator {
    pub fn generate(clock: &dyn Clock) -> String {
        let now_ms = clock.now_ms();
        let ts = Timestamp::from_unix(
            NoContext,
            (now_ms / 1000) as u64,
            ((now_ms % 1000) as u32) * 1_000_000,
        );
        Uuid::new_v7(ts).to_string()
    }
}
