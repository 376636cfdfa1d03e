use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::*;

/// Everything a renderer must be able to draw for one cell.
///
/// Closed set: the numeric faces 0 through 8 plus the flag, covered, and
/// loss-overlay faces. `Mine`, `MineExploded`, and `FlagWrong` only appear
/// on lost boards; won boards show their mines as `Flag`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellFace {
    Covered,
    Flag,
    FlagWrong,
    Open(u8),
    Mine,
    MineExploded,
}

/// Read-only snapshot of the board for the presentation layer.
///
/// Derived from the engine between operations; building one never mutates
/// gameplay state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardView {
    pub size: Coord2,
    pub faces: Array2<CellFace>,
    pub mines_left: i32,
    pub state: GameState,
    pub detonated: Option<Coord2>,
}

impl BoardView {
    pub fn face_at(&self, coords: Coord2) -> CellFace {
        self.faces[coords.to_nd_index()]
    }
}

impl BoardEngine {
    /// Projects the current board into render faces. On a lost board this
    /// derives the three loss overlays: the detonated cell, every exposed
    /// (unflagged) mine, and every flag sitting on a safe cell.
    pub fn view(&self) -> BoardView {
        let lost = matches!(self.state(), GameState::Lost);
        let faces = Array2::from_shape_fn(self.size().to_nd_index(), |(row, col)| {
            let coords = (row as Coord, col as Coord);
            let mine = lost && self.view_mine_at(coords);

            match self.cells()[coords.to_nd_index()] {
                Cell::Revealed(count) => CellFace::Open(count),
                Cell::Flagged if lost && !mine => CellFace::FlagWrong,
                Cell::Flagged => CellFace::Flag,
                Cell::Hidden if self.detonated_mine() == Some(coords) => CellFace::MineExploded,
                Cell::Hidden if mine => CellFace::Mine,
                Cell::Hidden => CellFace::Covered,
            }
        });

        BoardView {
            size: self.size(),
            faces,
            mines_left: self.mines_left(),
            state: self.state(),
            detonated: self.detonated_mine(),
        }
    }

    fn view_mine_at(&self, coords: Coord2) -> bool {
        self.mine_field()
            .is_some_and(|field| field.contains_mine(coords))
    }
}
