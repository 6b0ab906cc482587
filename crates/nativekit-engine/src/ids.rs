//! Opaque handles given out to the scripting layer.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn next() -> Self {
                static COUNTER: AtomicU32 = AtomicU32::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            pub fn id(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// A compiled program.
    ProgramId
);
define_id!(IndexBufferId);
define_id!(VertexBufferId);
define_id!(
    /// One geometry's index buffer plus its per-attribute vertex streams.
    VertexArrayId
);
define_id!(
    /// A texture shell; valid for sampling once a load has completed.
    TextureId
);
define_id!(FrameBufferId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_per_kind() {
        let a = TextureId::next();
        let b = TextureId::next();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
        assert_eq!(a.to_string(), a.id().to_string());
    }
}
