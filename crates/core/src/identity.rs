use std::fmt;

use uuid::Uuid;

/// Stable key distinguishing one conversing party from another.
///
/// Players carry their account UUID. The console (or any other
/// non-interactive caller) uses the nil-UUID sentinel so it still gets its
/// own rate slot and history without being mistaken for a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(pub Uuid);

impl Identity {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Sentinel identity for the console / non-player caller.
    pub fn console() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_console(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_console() {
            write!(f, "console")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<Uuid> for Identity {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
