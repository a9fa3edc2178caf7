use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Per-token attribute bits reported by the engine.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TokenAttributes(u32);

impl TokenAttributes {
    pub const UNDEFINED: Self = Self(0);
    pub const UNKNOWN: Self = Self(1 << 0);
    pub const UNUSED: Self = Self(1 << 1);
    pub const NORMAL: Self = Self(1 << 2);
    pub const CONTROL: Self = Self(1 << 3);
    pub const USER_DEFINED: Self = Self(1 << 4);
    pub const BYTE: Self = Self(1 << 5);
    pub const NORMALIZED: Self = Self(1 << 6);
    pub const LSTRIP: Self = Self(1 << 7);
    pub const RSTRIP: Self = Self(1 << 8);
    pub const SINGLE_WORD: Self = Self(1 << 9);

    const NAMES: [(Self, &'static str); 10] = [
        (Self::UNKNOWN, "unknown"),
        (Self::UNUSED, "unused"),
        (Self::NORMAL, "normal"),
        (Self::CONTROL, "control"),
        (Self::USER_DEFINED, "userDefined"),
        (Self::BYTE, "byte"),
        (Self::NORMALIZED, "normalized"),
        (Self::LSTRIP, "lstrip"),
        (Self::RSTRIP, "rstrip"),
        (Self::SINGLE_WORD, "singleWord"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_undefined(self) -> bool {
        self.0 == 0
    }

    /// Control and unknown tokens carry no user-visible text.
    pub const fn is_special(self) -> bool {
        self.0 & (Self::CONTROL.0 | Self::UNKNOWN.0) != 0
    }

    /// Names of the set flags, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        if self.is_undefined() {
            return vec!["undefined"];
        }
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for TokenAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TokenAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TokenAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenAttributes({})", self.names().join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let attrs = TokenAttributes::CONTROL | TokenAttributes::RSTRIP;
        assert!(attrs.contains(TokenAttributes::CONTROL));
        assert!(!attrs.contains(TokenAttributes::BYTE));
        assert!(attrs.is_special());
        assert_eq!(attrs.names(), vec!["control", "rstrip"]);
        assert_eq!(attrs.bits(), 0b1_0000_1000);
    }

    #[test]
    fn test_undefined() {
        assert!(TokenAttributes::default().is_undefined());
        assert_eq!(TokenAttributes::UNDEFINED.names(), vec!["undefined"]);
        assert!(!TokenAttributes::NORMAL.is_special());
    }
}
