//! Bootstrap phases and orchestrator states.

use std::fmt;

/// The ordered bootstrap phases. Numbering starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    SeedFunding = 1,
    AliasFunding = 2,
    CollateralDistribution = 3,
    InputFragmentation = 4,
    ChainFinalization = 5,
    KeyGeneration = 6,
    CollateralDiscovery = 7,
    RegistrationAssembly = 8,
    ConfigurationFanOut = 9,
    ControlledRestart = 10,
    Activation = 11,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 11] = [
        Phase::SeedFunding,
        Phase::AliasFunding,
        Phase::CollateralDistribution,
        Phase::InputFragmentation,
        Phase::ChainFinalization,
        Phase::KeyGeneration,
        Phase::CollateralDiscovery,
        Phase::RegistrationAssembly,
        Phase::ConfigurationFanOut,
        Phase::ControlledRestart,
        Phase::Activation,
    ];

    /// 1-based phase number.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Phase::SeedFunding => "seed funding",
            Phase::AliasFunding => "alias funding",
            Phase::CollateralDistribution => "collateral distribution",
            Phase::InputFragmentation => "input fragmentation",
            Phase::ChainFinalization => "chain finalization",
            Phase::KeyGeneration => "service-node key generation",
            Phase::CollateralDiscovery => "collateral discovery",
            Phase::RegistrationAssembly => "registration assembly",
            Phase::ConfigurationFanOut => "configuration fan-out",
            Phase::ControlledRestart => "controlled restart",
            Phase::Activation => "activation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// Where a run currently is.
///
/// Transitions only move forward. `Failed` is reachable from any
/// non-terminal state and `Stopped` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    ImagesBuilding,
    ContainersStarting,
    AwaitingReadiness,
    Bootstrapping(Phase),
    AwaitingRestartReadiness,
    Activating,
    Ready,
    Failed,
    Stopped,
}

impl BootstrapState {
    fn rank(self) -> (u8, u8) {
        match self {
            BootstrapState::NotStarted => (0, 0),
            BootstrapState::ImagesBuilding => (1, 0),
            BootstrapState::ContainersStarting => (2, 0),
            BootstrapState::AwaitingReadiness => (3, 0),
            BootstrapState::Bootstrapping(phase) => (4, phase.number()),
            BootstrapState::AwaitingRestartReadiness => (5, 0),
            BootstrapState::Activating => (6, 0),
            BootstrapState::Ready => (7, 0),
            BootstrapState::Failed => (8, 0),
            BootstrapState::Stopped => (9, 0),
        }
    }

    /// True for `Ready`, `Failed` and `Stopped`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BootstrapState::Ready | BootstrapState::Failed | BootstrapState::Stopped
        )
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: BootstrapState) -> bool {
        match next {
            BootstrapState::Stopped => true,
            BootstrapState::Failed => !self.is_terminal(),
            _ => !self.is_terminal() && next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::NotStarted => write!(f, "not started"),
            BootstrapState::ImagesBuilding => write!(f, "building images"),
            BootstrapState::ContainersStarting => write!(f, "starting containers"),
            BootstrapState::AwaitingReadiness => write!(f, "awaiting readiness"),
            BootstrapState::Bootstrapping(phase) => write!(f, "bootstrapping: phase {phase}"),
            BootstrapState::AwaitingRestartReadiness => write!(f, "awaiting readiness after restart"),
            BootstrapState::Activating => write!(f, "activating"),
            BootstrapState::Ready => write!(f, "ready"),
            BootstrapState::Failed => write!(f, "failed"),
            BootstrapState::Stopped => write!(f, "stopped"),
        }
    }
}
