//! Dedicated logic for path quality.
//!
//! Route requests accumulate a running weighted mean of the received signal
//! strength along the path they travelled. Together with the hop count this
//! yields a scalar path cost, which the destination uses to prefer a short
//! path over strong links or vice versa.

use core::fmt;

/// Nominal sensitivity floor of the radio, in dBm. Signal strength terms are
/// normalised against this value.
pub const RSSI_MIN: i32 = -90;

/// A received signal strength indicator, in dBm. Averaged over a path as a
/// quality term.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rssi(i8);

impl Rssi {
    /// Create a new `Rssi` from a raw dBm value.
    pub const fn new(value: i8) -> Self {
        Rssi(value)
    }

    /// Fold one more link sample into the running mean of a path which
    /// crossed `hops` links so far.
    pub fn running_mean(&self, hops: u8, sample: i8) -> Rssi {
        let hops = hops as i32;
        Rssi(((self.0 as i32 * hops + sample as i32) / (hops + 1)) as i8)
    }
}

impl fmt::Display for Rssi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}dBm", self.0))
    }
}

impl From<i8> for Rssi {
    fn from(value: i8) -> Self {
        Rssi(value)
    }
}

impl From<Rssi> for i8 {
    fn from(value: Rssi) -> Self {
        value.0
    }
}

/// Scalar cost of a path, trading hops against link quality. Lower is
/// better.
///
/// A hop costs 10 points, and the signal strength term contributes up to 10
/// more as the mean approaches [`RSSI_MIN`]. Integer arithmetic throughout,
/// matching the comparison done on reception of competing route requests.
pub fn path_cost(hop_count: u8, rssi: Rssi) -> i32 {
    hop_count as i32 * 10 + (i8::from(rssi) as i32 * 10) / RSSI_MIN
}

#[cfg(test)]
mod tests {
    use super::{path_cost, Rssi};

    #[test]
    fn running_mean_first_sample() {
        // With no hops travelled yet the stored value carries no weight.
        assert_eq!(Rssi::new(0).running_mean(0, -70), Rssi::new(-70));
    }

    #[test]
    fn running_mean_weighs_previous_hops() {
        // Two links at -80 averaged with a third at -50.
        assert_eq!(Rssi::new(-80).running_mean(2, -50), Rssi::new(-70));
    }

    #[test]
    fn cost_prefers_fewer_hops_on_equal_quality() {
        assert!(path_cost(2, Rssi::new(-70)) < path_cost(3, Rssi::new(-70)));
    }

    #[test]
    fn cost_prefers_strong_links_on_equal_hops() {
        assert!(path_cost(2, Rssi::new(-50)) < path_cost(2, Rssi::new(-85)));
    }

    #[test]
    fn cost_of_competing_paths() {
        // A short strong path beats a longer weak one.
        assert_eq!(path_cost(3, Rssi::new(-85)), 39);
        assert_eq!(path_cost(2, Rssi::new(-70)), 27);
    }
}
