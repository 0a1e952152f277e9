use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A strongly-typed byte size.
///
/// Base-2 (KiB, MiB, GiB), which is how cache budgets are reasoned about.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const ZERO: Self = Self(0);
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn from_usize(bytes: usize) -> Self {
        Self(u64::try_from(bytes).unwrap_or(u64::MAX))
    }

    pub const fn from_kib(kib: u64) -> Self {
        Self(kib.saturating_mul(Self::KIB))
    }

    pub const fn from_mib(mib: u64) -> Self {
        Self(mib.saturating_mul(Self::MIB))
    }

    pub const fn from_gib(gib: u64) -> Self {
        Self(gib.saturating_mul(Self::GIB))
    }

    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0 as f64;
        if self.0 >= Self::GIB {
            write!(f, "{:.2} GiB", bytes / Self::GIB as f64)
        } else if self.0 >= Self::MIB {
            write!(f, "{:.1} MiB", bytes / Self::MIB as f64)
        } else if self.0 >= Self::KIB {
            write!(f, "{:.1} KiB", bytes / Self::KIB as f64)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

/// Parses `1048576`, `512KiB`, `50 MiB`, `2gib`, also the decimal-looking
/// `KB`/`MB`/`GB` spellings which are read as base-2.
impl FromStr for ByteSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid byte size '{raw}'"))?;
        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => Self::KIB,
            "m" | "mb" | "mib" => Self::MIB,
            "g" | "gb" | "gib" => Self::GIB,
            other => {
                return Err(format!("unknown byte size unit '{other}' in '{raw}'"));
            }
        };
        value
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| format!("byte size '{raw}' overflows"))
    }
}

#[cfg(test)]
mod tests {
    use super::ByteSize;

    #[test]
    fn parses_suffixed_sizes() {
        assert_eq!("1024".parse::<ByteSize>(), Ok(ByteSize::from_kib(1)));
        assert_eq!("50 MiB".parse::<ByteSize>(), Ok(ByteSize::from_mib(50)));
        assert_eq!("2gb".parse::<ByteSize>(), Ok(ByteSize::from_gib(2)));
        assert!("ten".parse::<ByteSize>().is_err());
        assert!("10 parsecs".parse::<ByteSize>().is_err());
    }

    #[test]
    fn displays_human_units() {
        assert_eq!(ByteSize::from_bytes(512).to_string(), "512 B");
        assert_eq!(ByteSize::from_kib(30).to_string(), "30.0 KiB");
        assert_eq!(ByteSize::from_mib(500).to_string(), "500.0 MiB");
    }
}
