#[cfg(test)]
mod test_utils;
mod ticker;
mod time;

#[cfg(test)]
pub(crate) use test_utils::{mocked_clock, MockClock, MockClockController};
pub(crate) use ticker::Ticker;
pub(crate) use time::Clock;
pub(crate) use time::RealClock;
