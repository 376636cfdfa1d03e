use core::ops::{BitOr, Index};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub use cell::*;
pub use engine::*;
pub use error::*;
pub use generator::*;
pub use types::*;
pub use view::*;

mod cell;
mod engine;
mod error;
mod generator;
mod types;
mod view;

/// Board dimensions and requested mine count.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    pub size: Coord2,
    pub mines: CellCount,
}

impl GameConfig {
    pub const fn new_unchecked(size: Coord2, mines: CellCount) -> Self {
        Self { size, mines }
    }

    /// Builds a config, clamping out-of-range values instead of rejecting
    /// them. At least one cell is always kept safe, so a full-board mine
    /// request comes down to `rows * columns - 1`.
    pub fn new((rows, cols): Coord2, mines: CellCount) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let max_mines = mult(rows, cols) - 1;
        if mines > max_mines {
            log::warn!("Requested {mines} mines, clamped to {max_mines}");
        }
        Self::new_unchecked((rows, cols), mines.min(max_mines))
    }

    pub const fn total_cells(&self) -> CellCount {
        mult(self.size.0, self.size.1)
    }

    pub const fn safe_cells(&self) -> CellCount {
        self.total_cells() - self.mines
    }
}

/// Immutable mine placement plus per-cell adjacency counts.
///
/// Built once per game (deferred until the first reveal) and never mutated
/// afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MineField {
    mask: Array2<bool>,
    counts: Array2<u8>,
    mine_count: CellCount,
}

impl MineField {
    pub fn from_mine_mask(mask: Array2<bool>) -> Self {
        let mine_count = mask.iter().filter(|&&is_mine| is_mine).count();

        let mut counts: Array2<u8> = Array2::zeros(mask.dim());
        for (index, &is_mine) in mask.indexed_iter() {
            if !is_mine {
                continue;
            }
            let center = (index.0 as Coord, index.1 as Coord);
            for pos in mask.iter_neighbors(center) {
                counts[pos.to_nd_index()] += 1;
            }
        }

        Self {
            mask,
            counts,
            mine_count: mine_count.try_into().unwrap(),
        }
    }

    pub fn from_mine_coords(size: Coord2, mine_coords: &[Coord2]) -> Result<Self> {
        let mut mask: Array2<bool> = Array2::default(size.to_nd_index());

        for &coords in mine_coords {
            if coords.0 >= size.0 || coords.1 >= size.1 {
                return Err(GameError::InvalidCoords);
            }
            mask[coords.to_nd_index()] = true;
        }

        Ok(Self::from_mine_mask(mask))
    }

    pub fn game_config(&self) -> GameConfig {
        GameConfig::new_unchecked(self.size(), self.mine_count)
    }

    pub fn validate_coords(&self, coords: Coord2) -> Result<Coord2> {
        let size = self.size();
        if coords.0 < size.0 && coords.1 < size.1 {
            Ok(coords)
        } else {
            Err(GameError::InvalidCoords)
        }
    }

    pub fn size(&self) -> Coord2 {
        let dim = self.mask.dim();
        (dim.0.try_into().unwrap(), dim.1.try_into().unwrap())
    }

    pub fn total_cells(&self) -> CellCount {
        self.mask.len().try_into().unwrap()
    }

    pub fn safe_cell_count(&self) -> CellCount {
        self.total_cells() - self.mine_count
    }

    pub fn mine_count(&self) -> CellCount {
        self.mine_count
    }

    pub fn contains_mine(&self, coords: Coord2) -> bool {
        self[coords]
    }

    /// Number of mines in the Moore neighborhood, precomputed at build time.
    pub fn adjacent_mine_count(&self, coords: Coord2) -> u8 {
        self.counts[coords.to_nd_index()]
    }

    pub(crate) fn iter_neighbors(&self, coords: Coord2) -> NeighborIter {
        self.mask.iter_neighbors(coords)
    }
}

impl Index<Coord2> for MineField {
    type Output = bool;

    fn index(&self, coords: Coord2) -> &Self::Output {
        &self.mask[coords.to_nd_index()]
    }
}

/// Outcome of a flag operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    NoChange,
    Changed,
}

impl MarkOutcome {
    pub const fn has_update(self) -> bool {
        match self {
            Self::NoChange => false,
            Self::Changed => true,
        }
    }
}

/// Outcome of a reveal or chord operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RevealOutcome {
    NoChange,
    Revealed,
    HitMine,
    Won,
}

impl RevealOutcome {
    pub const fn has_update(self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

impl BitOr for RevealOutcome {
    type Output = RevealOutcome;

    fn bitor(self, rhs: Self) -> Self::Output {
        use RevealOutcome::*;
        match (self, rhs) {
            (HitMine, _) | (_, HitMine) => HitMine,
            (Won, _) | (_, Won) => Won,
            (Revealed, _) | (_, Revealed) => Revealed,
            (NoChange, NoChange) => NoChange,
        }
    }
}
