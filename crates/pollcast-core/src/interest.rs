//! Interest and readiness masks.
//!
//! A slot in the poll set carries two masks: the [`Interest`] the relay wants
//! to be woken for, and the [`Readiness`] the multiplexer observed during the
//! last wait. Both use the same four conditions as `poll(2)`: readable,
//! writable, error and peer half-close (hangup).

use std::{fmt, ops::BitOr};

const READABLE: u8 = 0b0001;
const WRITABLE: u8 = 0b0010;
const ERROR: u8 = 0b0100;
const HANGUP: u8 = 0b1000;

/// Conditions a slot wants to be woken for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    /// Data can be read (or a connection can be accepted).
    pub const READABLE: Self = Self(READABLE);
    /// Data can be written without blocking.
    pub const WRITABLE: Self = Self(WRITABLE);
    /// A socket error is pending.
    pub const ERROR: Self = Self(ERROR);
    /// The peer shut down its write half.
    pub const HANGUP: Self = Self(HANGUP);

    /// Interest of the listening slot.
    pub const LISTENER: Self = Self(READABLE | ERROR);

    /// Interest of a client slot waiting for inbound data.
    pub const RECEIVING: Self = Self(READABLE | HANGUP | ERROR);

    /// Interest of a client slot with a staged outbound payload.
    pub const SENDING: Self = Self(WRITABLE | HANGUP | ERROR);

    /// Empty mask.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no bits are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Wants readable events.
    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    /// Wants writable events.
    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    /// Wants hangup events.
    pub const fn is_hangup(self) -> bool {
        self.0 & HANGUP != 0
    }

    /// Swap read interest for write interest, keeping error and hangup.
    #[must_use]
    pub const fn to_sending(self) -> Self {
        Self((self.0 & !READABLE) | WRITABLE)
    }

    /// Swap write interest for read interest, keeping error and hangup.
    #[must_use]
    pub const fn to_receiving(self) -> Self {
        Self((self.0 & !WRITABLE) | READABLE)
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0)
    }
}

/// Conditions observed on a slot by the last wait.
///
/// Errors and hangups are always reported when they occur, regardless of the
/// interest mask, matching `poll(2)`. Readable and writable are only reported
/// when the slot asked for them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Readiness(u8);

impl Readiness {
    /// Data can be read (or a connection can be accepted).
    pub const READABLE: Self = Self(READABLE);
    /// Data can be written without blocking.
    pub const WRITABLE: Self = Self(WRITABLE);
    /// A socket error is pending.
    pub const ERROR: Self = Self(ERROR);
    /// The peer shut down its write half.
    pub const HANGUP: Self = Self(HANGUP);

    /// Nothing observed.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// True if nothing was observed.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Readable was observed.
    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    /// Writable was observed.
    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    /// A socket error was observed.
    pub const fn is_error(self) -> bool {
        self.0 & ERROR != 0
    }

    /// A peer half-close was observed.
    pub const fn is_hangup(self) -> bool {
        self.0 & HANGUP != 0
    }

    /// Add `other` to the observed set.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Remove `other` from the observed set.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Restrict the observed set to what `interest` asked for.
    ///
    /// Error and hangup pass through unconditionally.
    #[must_use]
    pub const fn filter(self, interest: Interest) -> Self {
        let wanted = (interest.0 & (READABLE | WRITABLE)) | ERROR | HANGUP;
        Self(self.0 & wanted)
    }
}

impl BitOr for Readiness {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0)
    }
}

fn write_flags(f: &mut fmt::Formatter<'_>, bits: u8) -> fmt::Result {
    if bits == 0 {
        return f.write_str("(empty)");
    }

    let names = [(READABLE, "READABLE"), (WRITABLE, "WRITABLE"), (ERROR, "ERROR"), (HANGUP, "HANGUP")];
    let mut first = true;
    for (bit, name) in names {
        if bits & bit != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flipping_keeps_error_and_hangup() {
        let sending = Interest::RECEIVING.to_sending();
        assert_eq!(sending, Interest::SENDING);
        assert!(sending.is_hangup());
        assert!(!sending.is_readable());

        assert_eq!(sending.to_receiving(), Interest::RECEIVING);
    }

    #[test]
    fn filter_drops_unrequested_directions() {
        let observed = Readiness::READABLE | Readiness::WRITABLE;

        assert_eq!(observed.filter(Interest::RECEIVING), Readiness::READABLE);
        assert_eq!(observed.filter(Interest::SENDING), Readiness::WRITABLE);
    }

    #[test]
    fn filter_always_passes_error_and_hangup() {
        let observed = Readiness::ERROR | Readiness::HANGUP;

        assert_eq!(observed.filter(Interest::READABLE), observed);
        assert_eq!(observed.filter(Interest::empty()), observed);
    }

    #[test]
    fn debug_lists_flags() {
        assert_eq!(format!("{:?}", Interest::LISTENER), "READABLE | ERROR");
        assert_eq!(format!("{:?}", Readiness::empty()), "(empty)");
    }
}
