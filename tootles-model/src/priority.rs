/// Scheduling class of a media request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// The item is on screen and the UI is waiting for it.
    Foreground,
    /// Ahead-of-scroll warmup; must never delay foreground work.
    Preload,
}

impl Priority {
    /// Queue weight (higher is more urgent).
    pub fn weight(&self) -> u8 {
        match self {
            Priority::Foreground => 2,
            Priority::Preload => 1,
        }
    }

    pub fn max(self, other: Self) -> Self {
        if other.weight() > self.weight() {
            other
        } else {
            self
        }
    }
}
