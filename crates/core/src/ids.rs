use std::fmt;

use serde::{Deserialize, Serialize};

// Macro keeps the ID wrappers structurally identical.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $raw:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $raw);

        impl $name {
            pub const fn new(raw: $raw) -> Self {
                Self(raw)
            }

            pub const fn get(&self) -> $raw {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<$raw> for $name {
            fn from(value: $raw) -> Self {
                Self::new(value)
            }
        }
    };
}

define_id!(
    /// Identifier for one streaming session.
    ///
    /// Changes on every submit so frames from an abandoned stream can be rejected.
    StreamSessionId,
    u64
);

define_id!(
    /// Backend-assigned conversation thread identifier.
    ThreadId,
    i64
);

impl StreamSessionId {
    /// Returns the identifier that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}
