use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Behavior flags for a listener. Bit values are stable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u32);

impl Flags {
    /// Accepted sockets are handed over without being made non-blocking.
    pub const LEAVE_SOCKETS_BLOCKING: Flags = Flags(1 << 0);
    /// The listening socket is closed when the listener is destroyed.
    pub const CLOSE_ON_FREE: Flags = Flags(1 << 1);
    /// The listening socket is not inherited across `exec`.
    pub const CLOSE_ON_EXEC: Flags = Flags(1 << 2);
    /// Address reuse is enabled before binding.
    pub const REUSEABLE: Flags = Flags(1 << 3);

    const ALL: u32 = 0b1111;

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Flags(bits & Self::ALL)
    }

    pub const fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Flags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 4] = [
            (Flags::LEAVE_SOCKETS_BLOCKING, "LEAVE_SOCKETS_BLOCKING"),
            (Flags::CLOSE_ON_FREE, "CLOSE_ON_FREE"),
            (Flags::CLOSE_ON_EXEC, "CLOSE_ON_EXEC"),
            (Flags::REUSEABLE, "REUSEABLE"),
        ];
        if self.is_empty() {
            return f.write_str("Flags(empty)");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Flags({})", names.join(" | "))
    }
}
