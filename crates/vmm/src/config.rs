//! Memory manager configuration.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// Page replacement strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum PolicyKind {
    /// Evict the page that has been resident longest.
    #[default]
    Fifo,
    /// Evict the page loaded most recently.
    Lifo,
    /// Evict a uniformly chosen page.
    Random,
    /// Second-chance scan over the referenced bit.
    Clock,
    /// Scan preferring pages that are neither referenced nor dirty.
    EnhancedClock,
    /// Evict the page whose last access is oldest.
    Lru,
}

impl PolicyKind {
    /// All strategies, in declaration order.
    pub const ALL: [PolicyKind; 6] = [
        PolicyKind::Fifo,
        PolicyKind::Lifo,
        PolicyKind::Random,
        PolicyKind::Clock,
        PolicyKind::EnhancedClock,
        PolicyKind::Lru,
    ];

    /// Returns the configuration name of this strategy.
    pub const fn name(self) -> &'static str {
        match self {
            PolicyKind::Fifo => "fifo",
            PolicyKind::Lifo => "lifo",
            PolicyKind::Random => "random",
            PolicyKind::Clock => "clock",
            PolicyKind::EnhancedClock => "enhanced-clock",
            PolicyKind::Lru => "lru",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PolicyKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or(ConfigError::UnknownPolicy)
    }
}

/// Errors in a [`VmConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The frame pool would be empty.
    #[error("num_frames must be at least 1")]
    NoFrames,
    /// No space could ever hold a page.
    #[error("max_resident must be at least 1")]
    NoResidency,
    /// No space identifiers to hand out.
    #[error("max_spaces must be at least 1")]
    NoSpaces,
    /// The policy name did not match any strategy.
    #[error("unknown replacement policy (expected one of fifo, lifo, random, clock, enhanced-clock, lru)")]
    UnknownPolicy,
}

/// Tunables for a [`VirtualMemory`](crate::VirtualMemory) context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct VmConfig {
    /// Number of physical frames.
    pub num_frames: usize,
    /// Residency ceiling: the most pages one address space may hold in frames at once.
    pub max_resident: usize,
    /// Spaces with more pages than this are demand paged, and this many leading pages
    /// are loaded eagerly.
    pub min_resident: usize,
    /// Bytes reserved for the user stack at the top of every address space.
    pub user_stack_size: usize,
    /// Size of the address space identifier pool.
    pub max_spaces: usize,
    /// Page replacement strategy.
    pub policy: PolicyKind,
    /// Seed for the RANDOM strategy.
    pub seed: u64,
}

impl VmConfig {
    /// Checks that the configuration can run at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_frames == 0 {
            return Err(ConfigError::NoFrames);
        }
        if self.max_resident == 0 {
            return Err(ConfigError::NoResidency);
        }
        if self.max_spaces == 0 {
            return Err(ConfigError::NoSpaces);
        }
        Ok(())
    }

    /// Returns the number of leading pages loaded when a demand-paged space is created.
    pub fn eager_pages(&self) -> usize {
        self.min_resident.min(self.max_resident)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            num_frames: 32,
            max_resident: 16,
            min_resident: 4,
            user_stack_size: 1024,
            max_spaces: 128,
            policy: PolicyKind::Fifo,
            seed: 0x5EED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(VmConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_empty_pools() {
        let config = VmConfig {
            num_frames: 0,
            ..VmConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoFrames));

        let config = VmConfig {
            max_resident: 0,
            ..VmConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoResidency));

        let config = VmConfig {
            max_spaces: 0,
            ..VmConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoSpaces));
    }

    #[test]
    fn eager_prefix_is_capped_by_ceiling() {
        let config = VmConfig {
            min_resident: 8,
            max_resident: 3,
            ..VmConfig::default()
        };
        assert_eq!(config.eager_pages(), 3);
    }

    #[test]
    fn policy_names_round_trip() {
        for kind in PolicyKind::ALL {
            assert_eq!(kind.name().parse::<PolicyKind>(), Ok(kind));
        }
        assert_eq!("CLOCK".parse::<PolicyKind>(), Ok(PolicyKind::Clock));
        assert_eq!(
            "optimal".parse::<PolicyKind>(),
            Err(ConfigError::UnknownPolicy)
        );
    }
}
