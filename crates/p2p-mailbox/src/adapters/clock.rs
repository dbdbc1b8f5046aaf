//! System clock adapter.

use shared_types::Timestamp;

use crate::ports::TimeSource;

/// Production time source using the system clock.
///
/// For testing, use [`crate::testing::FixedTimeSource`].
///
/// # Example
///
/// ```rust
/// use p2p_mailbox::adapters::SystemTimeSource;
/// use p2p_mailbox::ports::TimeSource;
///
/// let now = SystemTimeSource::new().now();
/// assert!(now.as_millis() > 0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    /// Create a new system time source.
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
