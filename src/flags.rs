//! Small bit sets for the phase and per-frame output state of a program instance.

macro_rules! bit_flags {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
        pub struct $name(u8);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name(1 << $bit);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn bits(self) -> u8 {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bit_flags! {
    /// What a program instance is currently doing.
    PhaseFlags {
        /// Probe run during compilation; frame and reduce functions return defaults.
        COMPILING = 0,
        /// Running the `reduce` entry point over merged globals.
        REDUCING = 1,
    }
}

bit_flags! {
    /// Side effects observed while running one frame (or the reduce pass).
    OutputFlags {
        /// `datawrite` modified the result series.
        DATA_MODIFIED = 0,
        /// The structure has been superposed onto the reference this frame.
        ALIGNED = 1,
    }
}
