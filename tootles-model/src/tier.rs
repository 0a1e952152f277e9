use std::fmt::{self, Display, Formatter};

/// One of the two cache levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Tier {
    Memory,
    Disk,
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Memory => f.write_str("memory"),
            Tier::Disk => f.write_str("disk"),
        }
    }
}
