//! Two-speed polling cadence.

use std::fmt;

/// Polling mode of a gossip client, decided solely by the outcome of its last merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pacing {
    /// The last merge grew the registry: keep probing fast.
    Discovering,
    /// The last merge added nothing: back off.
    Stable,
}

impl Pacing {
    /// Mode following a merge that took the registry from `size_before` to `size_after`.
    pub fn after_merge(size_before: usize, size_after: usize) -> Self {
        if size_after > size_before {
            Pacing::Discovering
        } else {
            Pacing::Stable
        }
    }
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pacing::Discovering => write!(f, "discovering"),
            Pacing::Stable => write!(f, "stable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_means_discovering() {
        assert_eq!(Pacing::after_merge(3, 4), Pacing::Discovering);
        assert_eq!(Pacing::after_merge(3, 10), Pacing::Discovering);
    }

    #[test]
    fn no_growth_means_stable() {
        assert_eq!(Pacing::after_merge(3, 3), Pacing::Stable);
        assert_eq!(Pacing::after_merge(0, 0), Pacing::Stable);
    }
}
