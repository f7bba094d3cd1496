//! Domain state flags as reported by `xl list`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;
use thiserror::Error;

/// Set of state flags of a domain.
///
/// `xl list` prints the state as a six character code where each position
/// belongs to one flag (`r b p s c d`) and a `-` means the flag is clear.
/// Several flags can be set at once, e.g. a dying domain that crashed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DomainState(u8);

/// Positional symbols of the state code, in column order.
const SYMBOLS: [(char, DomainState); 6] = [
    ('r', DomainState::RUNNING),
    ('b', DomainState::BLOCKED),
    ('p', DomainState::PAUSED),
    ('s', DomainState::SHUTDOWN),
    ('c', DomainState::CRASHED),
    ('d', DomainState::DYING),
];

/// A state code that is not exactly six characters long.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("domain state string '{0}' should have length 6")]
pub struct InvalidStateCode(pub String);

impl DomainState {
    pub const UNKNOWN: Self = Self(0x00);
    pub const RUNNING: Self = Self(0x01);
    pub const BLOCKED: Self = Self(0x02);
    pub const PAUSED: Self = Self(0x04);
    pub const SHUTDOWN: Self = Self(0x08);
    pub const CRASHED: Self = Self(0x10);
    pub const DYING: Self = Self(0x20);

    /// Raw flag bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build a state from raw bits, dropping bits outside the six known flags.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & 0x3f)
    }

    /// True iff every flag of `mask` is set.
    pub const fn check(self, mask: Self) -> bool {
        self.0 & mask.0 == mask.0
    }

    /// True if no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True once the guest stopped executing on its own.
    pub const fn has_exited(self) -> bool {
        self.check(Self::SHUTDOWN) || self.check(Self::CRASHED)
    }

    /// True if any flag of the terminal set {shutdown, crashed, dying} is set.
    pub const fn is_terminal(self) -> bool {
        self.0 & (Self::SHUTDOWN.0 | Self::CRASHED.0 | Self::DYING.0) != 0
    }

    /// Parse the positional six character code printed by `xl list`.
    pub fn parse_code(code: &str) -> Result<Self, InvalidStateCode> {
        if code.chars().count() != SYMBOLS.len() {
            return Err(InvalidStateCode(code.to_string()));
        }

        let state = code
            .chars()
            .zip(SYMBOLS.iter())
            .filter(|(c, (symbol, _))| c == symbol)
            .fold(Self::UNKNOWN, |acc, (_, (_, flag))| acc | *flag);
        Ok(state)
    }
}

impl BitOr for DomainState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DomainState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromStr for DomainState {
    type Err = InvalidStateCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_code(s)
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (symbol, flag) in SYMBOLS {
            if self.check(flag) {
                write!(f, "{symbol}")?;
            } else {
                write!(f, "-")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainState({self})")
    }
}
