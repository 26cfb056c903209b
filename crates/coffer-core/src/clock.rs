//! Virtual-time support.
//!
//! The device never reads a clock; every event carries the current instant.
//! Production passes `std::time::Instant`, the harness passes a virtual
//! clock it advances by hand.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

/// Instant type usable by the device state machines.
///
/// `std::time::Instant` satisfies this; simulated clocks only need the same
/// arithmetic.
pub trait DeviceInstant:
    Copy + Ord + Add<Duration, Output = Self> + Sub<Self, Output = Duration> + std::fmt::Debug
{
}

impl<T> DeviceInstant for T where
    T: Copy + Ord + Add<Duration, Output = T> + Sub<T, Output = Duration> + std::fmt::Debug
{
}

#[cfg(test)]
mod tests {
    use super::*;

    fn takes_instant<I: DeviceInstant>(_: I) {}

    #[test]
    fn std_instant_qualifies() {
        takes_instant(std::time::Instant::now());
    }
}
