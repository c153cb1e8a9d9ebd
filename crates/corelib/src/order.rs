//! Draw-order selection shared by the renderer and the platform layer.

use std::{fmt, str::FromStr};

use crate::CoreError;

/// How a draw list is ordered before submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawOrder {
    /// Farthest first; correct alpha blending.
    #[default]
    BackToFront,
    /// Nearest first; early depth rejection.
    FrontToBack,
    /// Grouped by graphics state; fewer pipeline switches.
    State,
}

/// Direction of a distance sort.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthOrder {
    /// Farthest first.
    #[default]
    BackToFront,
    /// Nearest first.
    FrontToBack,
}

impl DepthOrder {
    pub fn reversed(self) -> Self {
        match self {
            Self::BackToFront => Self::FrontToBack,
            Self::FrontToBack => Self::BackToFront,
        }
    }
}

impl DrawOrder {
    /// The distance direction, or `None` for state ordering.
    pub fn depth(self) -> Option<DepthOrder> {
        match self {
            Self::BackToFront => Some(DepthOrder::BackToFront),
            Self::FrontToBack => Some(DepthOrder::FrontToBack),
            Self::State => None,
        }
    }
}

impl From<DepthOrder> for DrawOrder {
    fn from(order: DepthOrder) -> Self {
        match order {
            DepthOrder::BackToFront => Self::BackToFront,
            DepthOrder::FrontToBack => Self::FrontToBack,
        }
    }
}

impl FromStr for DrawOrder {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "back-to-front" | "btf" | "dist" => Ok(Self::BackToFront),
            "front-to-back" | "ftb" => Ok(Self::FrontToBack),
            "state" => Ok(Self::State),
            other => Err(CoreError::Parse {
                what: "draw order",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DrawOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BackToFront => "back-to-front",
            Self::FrontToBack => "front-to-back",
            Self::State => "state",
        };
        f.write_str(name)
    }
}
