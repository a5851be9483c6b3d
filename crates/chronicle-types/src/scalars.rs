//! Type-safe wrappers around the integer scalars of the turn core.
//!
//! A [`Turn`] identifies one step of simulation time and a
//! [`HistoryVersion`] identifies the schema of one participant's saved
//! state. Both are plain integers on the wire (`#[serde(transparent)]`) so
//! that stored history stays readable by older and newer binaries alike.

use serde::{Deserialize, Serialize};

/// A relative number of turns, e.g. a timer delay or repeat period.
pub type TurnCount = u64;

/// Generates a newtype wrapper around an unsigned integer with standard derives.
macro_rules! define_scalar {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Wrap a raw value.
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Return the raw value.
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_scalar! {
    /// Identifier of a turn.
    ///
    /// The first turn of the world is 1 and each turn increments by exactly
    /// one. [`Turn::INITIAL`] is the value during world initialization,
    /// before the first turn has run. The value never wraps.
    Turn(u64)
}

define_scalar! {
    /// Schema version of a participant's saved state.
    ///
    /// All participant data starts at [`HistoryVersion::FIRST`]. A binary
    /// only ever moves a participant's version forward.
    HistoryVersion(u32)
}

impl Turn {
    /// The turn value before any turn has executed.
    pub const INITIAL: Self = Self(0);

    /// Whether this is [`Turn::INITIAL`].
    pub const fn is_initial(self) -> bool {
        self.0 == Self::INITIAL.0
    }

    /// The turn after this one, or `None` at the end of time.
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// This turn moved forward by `count` turns, or `None` on overflow.
    pub const fn checked_add(self, count: TurnCount) -> Option<Self> {
        match self.0.checked_add(count) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Number of turns from `earlier` to `self`, or `None` if `earlier` is later.
    pub const fn turns_since(self, earlier: Self) -> Option<TurnCount> {
        self.0.checked_sub(earlier.0)
    }
}

impl HistoryVersion {
    /// The version of all participant data that has never been migrated.
    pub const FIRST: Self = Self(0);
}
