use ndarray::Array2;
use rand::prelude::*;

use crate::*;

/// Places mines for one game, given the cell the player revealed first.
///
/// Generation runs at most once per game, after the first reveal, so an
/// implementation sees exactly which cell must stay safe.
pub trait MineFieldGenerator {
    fn generate(self, config: GameConfig, exclude: Coord2) -> MineField;
}

/// Uniform random placement with first-click substitution.
///
/// All `config.mines` positions are drawn uniformly without replacement from
/// the whole board. If the excluded cell was drawn, it is swapped for a
/// uniformly random free cell. A free cell always exists because the config
/// keeps `mines < rows * columns`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RandomMineFieldGenerator {
    seed: u64,
}

impl RandomMineFieldGenerator {
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl MineFieldGenerator for RandomMineFieldGenerator {
    fn generate(self, config: GameConfig, exclude: Coord2) -> MineField {
        let total = config.total_cells() as usize;
        let mines = config.mines.min(config.total_cells() - 1) as usize;
        let (rows, cols) = config.size;
        let excluded = exclude.0 as usize * cols as usize + exclude.1 as usize;

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut mask: Array2<bool> = Array2::default((rows as usize, cols as usize));
        {
            let cells = mask.as_slice_mut().expect("layout should be standard");
            for index in rand::seq::index::sample(&mut rng, total, mines) {
                cells[index] = true;
            }

            if cells[excluded] {
                let free: Vec<usize> = (0..total)
                    .filter(|&index| !cells[index] && index != excluded)
                    .collect();
                let swap = free[rng.random_range(0..free.len())];
                cells[swap] = true;
                cells[excluded] = false;
            }
        }

        let field = MineField::from_mine_mask(mask);
        if field.mine_count() as usize != mines {
            log::warn!(
                "Generated mine count mismatch, actual: {}, requested: {}",
                field.mine_count(),
                mines
            );
        }
        field
    }
}
