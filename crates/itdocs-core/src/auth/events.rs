/// Capacity of the session event channel. Events are rare; a lagging
/// receiver only ever misses duplicates of the latest state.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Session-wide notifications broadcast by the refresh coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new token pair was stored
    Refreshed,
    /// The refresh failed and the tokens were cleared; the user must log in again
    Expired,
}
