//! Enumeration types for HighRes-MT configuration.

use burn::prelude::*;

/// Non-linearity applied after normalisation.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum Activation {
    /// Parametric ReLU with a single learned slope.
    PRelu,
    /// Rectified linear unit.
    Relu,
    /// No activation.
    None,
}

impl Default for Activation {
    fn default() -> Self {
        Self::PRelu
    }
}

/// How a grouped convolution combines the branches of a three-stream input.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum GroupConnection {
    /// Task streams receive their own branch plus the shared branch.
    Mixed,
    /// Every stream only sees its own branch.
    Separate,
    /// All branches are summed, then split as for a single input.
    Dense,
}

impl Default for GroupConnection {
    fn default() -> Self {
        Self::Mixed
    }
}

/// Index of a stream in a grouped flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Task1 = 0,
    Shared = 1,
    Task2 = 2,
}

impl Stream {
    pub const ALL: [Self; 3] = [Self::Task1, Self::Shared, Self::Task2];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Task1 => "task_1",
            Self::Shared => "shared",
            Self::Task2 => "task_2",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}
