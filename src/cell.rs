use serde::{Deserialize, Serialize};

/// Player-visible state of one board cell.
///
/// `Revealed` carries the cell's adjacency count so querying the board never
/// needs the mine field itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cell {
    Hidden,
    Revealed(u8),
    Flagged,
}

impl Cell {
    pub const fn is_unrevealed(self) -> bool {
        matches!(self, Self::Hidden | Self::Flagged)
    }

    pub const fn is_flagged(self) -> bool {
        matches!(self, Self::Flagged)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::Hidden
    }
}
