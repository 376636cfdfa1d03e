use core::num::Saturating;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use crate::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    Ready,
    Running,
    Won,
    Lost,
}

impl GameState {
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::Ready
    }
}

/// The board engine: owns the cell grid, the (deferred) mine field, and the
/// game-state machine.
///
/// Mine placement happens on the first reveal so that cell can be excluded
/// from the candidate set. Until then `mines` is `None` and the board is all
/// `Hidden`.
///
/// All operations are synchronous and bounded by one full grid pass; callers
/// serialize access through `&mut self`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardEngine {
    config: GameConfig,
    mines: Option<MineField>,
    cells: Array2<Cell>,
    revealed_count: Saturating<CellCount>,
    flagged_count: Saturating<CellCount>,
    state: GameState,
    detonated: Option<Coord2>,
    next_seed: u64,
}

impl BoardEngine {
    /// New engine with an entropy-derived generation seed.
    pub fn new(config: GameConfig) -> Self {
        Self::with_seed(config, rand::random())
    }

    /// New engine with a fixed seed; every game it plays is reproducible.
    pub fn with_seed(config: GameConfig, seed: u64) -> Self {
        Self {
            config,
            mines: None,
            cells: Array2::default(config.size.to_nd_index()),
            revealed_count: Saturating(0),
            flagged_count: Saturating(0),
            state: GameState::default(),
            detonated: None,
            next_seed: seed,
        }
    }

    /// Engine over a pre-placed mine field, for tests and replays. The first
    /// reveal performs no placement, so it carries no first-click guarantee.
    pub fn from_mine_field(field: MineField) -> Self {
        let mut engine = Self::with_seed(field.game_config(), 0);
        engine.mines = Some(field);
        engine
    }

    pub fn config(&self) -> GameConfig {
        self.config
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn size(&self) -> Coord2 {
        self.config.size
    }

    pub fn total_mines(&self) -> CellCount {
        self.config.mines
    }

    /// Mines minus flags. Goes negative when the player over-flags; the
    /// counter is informational, never a limit.
    pub fn mines_left(&self) -> i32 {
        i32::from(self.config.mines) - i32::from(self.flagged_count.0)
    }

    pub fn revealed_safe_count(&self) -> CellCount {
        self.revealed_count.0
    }

    pub fn cell_at(&self, coords: Coord2) -> Result<Cell> {
        let coords = self.validate_coords(coords)?;
        Ok(self.cells[coords.to_nd_index()])
    }

    /// Detonation site, present only after a loss.
    pub fn detonated_mine(&self) -> Option<Coord2> {
        self.detonated
    }

    /// Whether the cell holds a mine. Only answerable once the game has
    /// ended; while it is live the mine field stays opaque to callers.
    pub fn is_mine(&self, coords: Coord2) -> Result<bool> {
        let coords = self.validate_coords(coords)?;
        if !self.state.is_finished() {
            return Err(GameError::NotFinished);
        }
        Ok(self.field_mine_at(coords))
    }

    /// Back to an untouched board. The mine field is dropped and placed anew
    /// on the next first reveal, from a fresh seed.
    pub fn reset(&mut self) {
        self.mines = None;
        self.cells.fill(Cell::Hidden);
        self.revealed_count = Saturating(0);
        self.flagged_count = Saturating(0);
        self.state = GameState::Ready;
        self.detonated = None;
    }

    pub fn reveal(&mut self, coords: Coord2) -> Result<RevealOutcome> {
        let coords = self.validate_coords(coords)?;
        self.check_not_finished()?;

        if !matches!(self.cells[coords.to_nd_index()], Cell::Hidden) {
            return Ok(RevealOutcome::NoChange);
        }

        self.ensure_mines_placed(coords);
        Ok(self.reveal_single_cell(coords))
    }

    pub fn toggle_flag(&mut self, coords: Coord2) -> Result<MarkOutcome> {
        let coords = self.validate_coords(coords)?;
        self.check_not_finished()?;

        Ok(match self.cells[coords.to_nd_index()] {
            Cell::Hidden => {
                self.cells[coords.to_nd_index()] = Cell::Flagged;
                self.flagged_count += 1;
                MarkOutcome::Changed
            }
            Cell::Flagged => {
                self.cells[coords.to_nd_index()] = Cell::Hidden;
                self.flagged_count -= 1;
                MarkOutcome::Changed
            }
            Cell::Revealed(_) => MarkOutcome::NoChange,
        })
    }

    /// Reveals every hidden neighbor of a satisfied number cell.
    ///
    /// The anchor must be revealed with a nonzero count, and its flagged
    /// neighbors must match that count exactly; otherwise nothing happens.
    /// Neighbors are revealed with the same per-cell logic as `reveal`, so a
    /// wrong flag detonates. Once the game ends mid-chord, the remaining
    /// neighbors are left untouched.
    pub fn chord(&mut self, coords: Coord2) -> Result<RevealOutcome> {
        let coords = self.validate_coords(coords)?;
        self.check_not_finished()?;

        let Cell::Revealed(count) = self.cells[coords.to_nd_index()] else {
            return Ok(RevealOutcome::NoChange);
        };
        if count == 0 || count != self.count_flagged_neighbors(coords) {
            return Ok(RevealOutcome::NoChange);
        }

        let mut outcome = RevealOutcome::NoChange;
        let neighbors: Vec<Coord2> = self.iter_neighbors(coords).collect();
        for pos in neighbors {
            if self.state.is_finished() {
                break;
            }
            if matches!(self.cells[pos.to_nd_index()], Cell::Hidden) {
                outcome = outcome | self.reveal_single_cell(pos);
            }
        }
        Ok(outcome)
    }

    fn reveal_single_cell(&mut self, coords: Coord2) -> RevealOutcome {
        debug_assert!(matches!(self.cells[coords.to_nd_index()], Cell::Hidden));

        if self.field_mine_at(coords) {
            self.detonated = Some(coords);
            self.end_game(false);
            return RevealOutcome::HitMine;
        }

        let adjacent = self.adjacent_count(coords);
        self.cells[coords.to_nd_index()] = Cell::Revealed(adjacent);
        self.revealed_count += 1;

        if adjacent == 0 && !self.flood_reveal(coords) {
            return RevealOutcome::HitMine;
        }

        if self.revealed_count.0 == self.config.safe_cells() {
            self.end_game(true);
            RevealOutcome::Won
        } else {
            self.mark_started();
            RevealOutcome::Revealed
        }
    }

    /// Opens the zero region around `seed` with an explicit worklist, so
    /// region size never translates into call-stack depth. Returns `false`
    /// on the anomalous case of dequeuing a mine, which ends the game and
    /// aborts the rest of the flood.
    fn flood_reveal(&mut self, seed: Coord2) -> bool {
        let mut visited = BTreeSet::from([seed]);
        let mut worklist: VecDeque<Coord2> = self
            .iter_neighbors(seed)
            .filter(|&pos| matches!(self.cells[pos.to_nd_index()], Cell::Hidden))
            .collect();

        while let Some(coords) = worklist.pop_front() {
            if !visited.insert(coords) {
                continue;
            }
            if !matches!(self.cells[coords.to_nd_index()], Cell::Hidden) {
                continue;
            }

            // Unreachable when placement is correct: zero cells have no mine
            // neighbors. Handled as an immediate loss rather than expanding
            // past a mine.
            if self.field_mine_at(coords) {
                self.detonated = Some(coords);
                self.end_game(false);
                return false;
            }

            let adjacent = self.adjacent_count(coords);
            self.cells[coords.to_nd_index()] = Cell::Revealed(adjacent);
            self.revealed_count += 1;

            if adjacent == 0 {
                let feed = self
                    .iter_neighbors(coords)
                    .filter(|&pos| matches!(self.cells[pos.to_nd_index()], Cell::Hidden))
                    .filter(|pos| !visited.contains(pos))
                    .collect::<Vec<_>>();
                worklist.extend(feed);
            }
        }
        true
    }

    fn ensure_mines_placed(&mut self, exclude: Coord2) {
        if self.mines.is_none() {
            let seed = self.next_seed;
            self.next_seed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
            let field = RandomMineFieldGenerator::new(seed).generate(self.config, exclude);
            self.mines = Some(field);
        }
        self.mark_started();
    }

    fn mark_started(&mut self) {
        if self.state.is_ready() {
            self.state = GameState::Running;
        }
    }

    fn end_game(&mut self, won: bool) {
        if self.state.is_finished() {
            return;
        }
        self.state = if won { GameState::Won } else { GameState::Lost };

        if won {
            self.detonated = None;
            self.sweep_won_board();
        }
    }

    /// One-time display sweep at the win transition: every mine cell shows
    /// as identified and the remaining-mines counter lands on zero. All safe
    /// cells are already revealed when this runs.
    fn sweep_won_board(&mut self) {
        let (rows, cols) = self.config.size;
        for row in 0..rows {
            for col in 0..cols {
                if self.field_mine_at((row, col)) {
                    self.cells[(row, col).to_nd_index()] = Cell::Flagged;
                }
            }
        }
        self.flagged_count = Saturating(self.config.mines);
    }

    fn count_flagged_neighbors(&self, coords: Coord2) -> u8 {
        self.iter_neighbors(coords)
            .filter(|&pos| self.cells[pos.to_nd_index()].is_flagged())
            .count()
            .try_into()
            .unwrap()
    }

    fn field_mine_at(&self, coords: Coord2) -> bool {
        self.mines
            .as_ref()
            .is_some_and(|field| field.contains_mine(coords))
    }

    fn adjacent_count(&self, coords: Coord2) -> u8 {
        self.mines
            .as_ref()
            .map_or(0, |field| field.adjacent_mine_count(coords))
    }

    pub(crate) fn cells(&self) -> &Array2<Cell> {
        &self.cells
    }

    pub(crate) fn mine_field(&self) -> Option<&MineField> {
        self.mines.as_ref()
    }

    fn validate_coords(&self, coords: Coord2) -> Result<Coord2> {
        let (rows, cols) = self.config.size;
        if coords.0 < rows && coords.1 < cols {
            Ok(coords)
        } else {
            Err(GameError::InvalidCoords)
        }
    }

    fn check_not_finished(&self) -> Result<()> {
        if self.state.is_finished() {
            Err(GameError::AlreadyEnded)
        } else {
            Ok(())
        }
    }

    fn iter_neighbors(&self, coords: Coord2) -> NeighborIter {
        self.cells.iter_neighbors(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_mines(size: Coord2, mines: &[Coord2]) -> BoardEngine {
        BoardEngine::from_mine_field(MineField::from_mine_coords(size, mines).unwrap())
    }

    #[test]
    fn first_reveal_is_never_a_mine() {
        for seed in 0..100 {
            let mut engine = BoardEngine::with_seed(GameConfig::new((8, 8), 10), seed);

            let outcome = engine.reveal((4, 5)).unwrap();

            assert_ne!(outcome, RevealOutcome::HitMine, "seed {seed} detonated");
            assert_ne!(engine.state(), GameState::Lost);
        }
    }

    #[test]
    fn first_reveal_places_exactly_the_configured_mines() {
        let mut engine = BoardEngine::with_seed(GameConfig::new((8, 8), 10), 42);
        engine.reveal((0, 0)).unwrap();

        // drive the game to an end so mine locations become queryable
        'sweep: for row in 0..8 {
            for col in 0..8 {
                if engine.is_finished() {
                    break 'sweep;
                }
                let _ = engine.reveal((row, col)).unwrap();
            }
        }
        assert!(engine.is_finished());

        let mut mines = 0;
        for row in 0..8 {
            for col in 0..8 {
                if engine.is_mine((row, col)).unwrap() {
                    mines += 1;
                }
            }
        }
        assert_eq!(mines, 10);
    }

    #[test]
    fn reveal_hits_mine_and_records_detonation() {
        let mut engine = engine_with_mines((2, 2), &[(0, 0)]);

        let outcome = engine.reveal((0, 0)).unwrap();

        assert_eq!(outcome, RevealOutcome::HitMine);
        assert_eq!(engine.state(), GameState::Lost);
        assert_eq!(engine.detonated_mine(), Some((0, 0)));
        assert_eq!(engine.cell_at((0, 0)).unwrap(), Cell::Hidden);
    }

    #[test]
    fn reveal_out_of_bounds_is_rejected_without_mutation() {
        let mut engine = BoardEngine::with_seed(GameConfig::new((4, 4), 3), 1);

        assert_eq!(engine.reveal((4, 0)).unwrap_err(), GameError::InvalidCoords);
        assert_eq!(engine.state(), GameState::Ready);
        assert_eq!(engine.revealed_safe_count(), 0);
    }

    #[test]
    fn reveal_on_revealed_cell_is_a_no_op() {
        let mut engine = engine_with_mines((3, 3), &[(0, 0), (2, 2)]);

        engine.reveal((1, 1)).unwrap();
        let before = engine.revealed_safe_count();

        assert_eq!(engine.reveal((1, 1)).unwrap(), RevealOutcome::NoChange);
        assert_eq!(engine.revealed_safe_count(), before);
    }

    #[test]
    fn flagged_cell_cannot_be_revealed() {
        let mut engine = engine_with_mines((2, 2), &[(0, 0)]);

        engine.toggle_flag((0, 0)).unwrap();
        assert_eq!(engine.reveal((0, 0)).unwrap(), RevealOutcome::NoChange);
        assert_eq!(engine.state(), GameState::Ready);
    }

    #[test]
    fn flood_opens_entire_mine_free_board() {
        let mut engine = engine_with_mines((5, 5), &[]);

        let outcome = engine.reveal((2, 2)).unwrap();

        assert_eq!(outcome, RevealOutcome::Won);
        assert_eq!(engine.revealed_safe_count(), 25);
        for row in 0..5 {
            for col in 0..5 {
                assert_eq!(engine.cell_at((row, col)).unwrap(), Cell::Revealed(0));
            }
        }
    }

    #[test]
    fn flood_stops_at_numbered_border() {
        let mut engine = engine_with_mines((3, 3), &[(2, 2)]);

        let outcome = engine.reveal((0, 0)).unwrap();

        assert_eq!(outcome, RevealOutcome::Won);
        assert_eq!(engine.cell_at((0, 0)).unwrap(), Cell::Revealed(0));
        assert_eq!(engine.cell_at((1, 1)).unwrap(), Cell::Revealed(1));
        assert_eq!(engine.cell_at((2, 2)).unwrap(), Cell::Flagged);
    }

    #[test]
    fn flood_skips_flagged_cells() {
        let mut engine = engine_with_mines((4, 4), &[]);

        engine.toggle_flag((3, 3)).unwrap();
        let outcome = engine.reveal((0, 0)).unwrap();

        assert_eq!(outcome, RevealOutcome::Revealed);
        assert_eq!(engine.cell_at((3, 3)).unwrap(), Cell::Flagged);
        assert_eq!(engine.revealed_safe_count(), 15);
    }

    #[test]
    fn large_sparse_board_floods_without_overflow() {
        // 50x40 with a handful of far-corner mines; the worklist keeps this
        // off the call stack no matter the region size.
        let mut engine = engine_with_mines((50, 40), &[(49, 39)]);

        let outcome = engine.reveal((0, 0)).unwrap();

        assert_eq!(outcome, RevealOutcome::Won);
        assert_eq!(engine.revealed_safe_count(), 50 * 40 - 1);
    }

    #[test]
    fn flag_toggle_is_an_involution() {
        let mut engine = BoardEngine::with_seed(GameConfig::new((4, 4), 5), 3);
        let before = engine.mines_left();

        assert_eq!(engine.toggle_flag((1, 1)).unwrap(), MarkOutcome::Changed);
        assert_eq!(engine.mines_left(), before - 1);
        assert_eq!(engine.cell_at((1, 1)).unwrap(), Cell::Flagged);

        assert_eq!(engine.toggle_flag((1, 1)).unwrap(), MarkOutcome::Changed);
        assert_eq!(engine.mines_left(), before);
        assert_eq!(engine.cell_at((1, 1)).unwrap(), Cell::Hidden);
    }

    #[test]
    fn over_flagging_drives_the_counter_negative() {
        let mut engine = BoardEngine::with_seed(GameConfig::new((3, 3), 2), 3);

        for row in 0..3 {
            for col in 0..3 {
                engine.toggle_flag((row, col)).unwrap();
            }
        }
        assert_eq!(engine.mines_left(), 2 - 9);
    }

    #[test]
    fn revealed_cell_cannot_be_flagged() {
        let mut engine = engine_with_mines((3, 3), &[(0, 0), (2, 2)]);

        engine.reveal((1, 1)).unwrap();
        assert_eq!(engine.toggle_flag((1, 1)).unwrap(), MarkOutcome::NoChange);
        assert_eq!(engine.cell_at((1, 1)).unwrap(), Cell::Revealed(2));
    }

    #[test]
    fn chord_reveals_hidden_neighbors_when_flags_match() {
        let mines = &[(0, 1), (2, 1)];
        let mut engine = engine_with_mines((3, 3), mines);

        engine.reveal((1, 1)).unwrap();
        engine.toggle_flag((0, 1)).unwrap();
        engine.toggle_flag((2, 1)).unwrap();

        let outcome = engine.chord((1, 1)).unwrap();

        assert_eq!(outcome, RevealOutcome::Won);
        assert_eq!(engine.cell_at((1, 0)).unwrap(), Cell::Revealed(2));
        assert_eq!(engine.cell_at((1, 2)).unwrap(), Cell::Revealed(2));
        assert_eq!(engine.cell_at((0, 1)).unwrap(), Cell::Flagged);
        assert_eq!(engine.cell_at((2, 1)).unwrap(), Cell::Flagged);
    }

    #[test]
    fn chord_with_short_flag_count_is_a_no_op() {
        let mines = &[(0, 1), (2, 1)];
        let mut engine = engine_with_mines((3, 3), mines);

        engine.reveal((1, 1)).unwrap();
        engine.toggle_flag((0, 1)).unwrap();

        assert_eq!(engine.chord((1, 1)).unwrap(), RevealOutcome::NoChange);
        assert_eq!(engine.cell_at((1, 0)).unwrap(), Cell::Hidden);
    }

    #[test]
    fn chord_on_hidden_or_zero_cell_is_a_no_op() {
        let mut engine = engine_with_mines((3, 3), &[(2, 2)]);

        assert_eq!(engine.chord((0, 0)).unwrap(), RevealOutcome::NoChange);

        engine.reveal((0, 0)).unwrap();
        assert!(engine.is_finished()); // flood won the board
    }

    #[test]
    fn chord_with_wrong_flag_detonates() {
        // (1,1) sees one mine at (0,1); the player flags (0,0) instead.
        let mut engine = engine_with_mines((3, 3), &[(0, 1)]);

        engine.reveal((1, 1)).unwrap();
        engine.toggle_flag((0, 0)).unwrap();

        let outcome = engine.chord((1, 1)).unwrap();

        assert_eq!(outcome, RevealOutcome::HitMine);
        assert_eq!(engine.state(), GameState::Lost);
        assert_eq!(engine.detonated_mine(), Some((0, 1)));
    }

    #[test]
    fn revealing_every_safe_cell_wins_and_identifies_mines() {
        let mut engine = BoardEngine::with_seed(GameConfig::new((8, 8), 10), 11);

        let mut last = RevealOutcome::NoChange;
        'sweep: for row in 0..8 {
            for col in 0..8 {
                if engine.is_finished() {
                    break 'sweep;
                }
                if engine.is_mine_internal((row, col)) {
                    continue;
                }
                last = engine.reveal((row, col)).unwrap();
            }
        }

        assert_eq!(last, RevealOutcome::Won);
        assert_eq!(engine.state(), GameState::Won);
        assert_eq!(engine.revealed_safe_count(), 54);
        assert_eq!(engine.mines_left(), 0);
        for row in 0..8 {
            for col in 0..8 {
                if engine.is_mine((row, col)).unwrap() {
                    assert_eq!(engine.cell_at((row, col)).unwrap(), Cell::Flagged);
                }
            }
        }
    }

    #[test]
    fn finished_game_rejects_further_moves() {
        let mut engine = engine_with_mines((2, 2), &[(0, 0)]);

        engine.reveal((0, 0)).unwrap();
        let snapshot = engine.clone();

        assert_eq!(engine.reveal((1, 1)).unwrap_err(), GameError::AlreadyEnded);
        assert_eq!(
            engine.toggle_flag((1, 1)).unwrap_err(),
            GameError::AlreadyEnded
        );
        assert_eq!(engine.chord((1, 1)).unwrap_err(), GameError::AlreadyEnded);
        assert_eq!(engine, snapshot);
    }

    #[test]
    fn reset_returns_to_a_fresh_ready_board() {
        let mut engine = engine_with_mines((2, 2), &[(0, 0)]);

        engine.toggle_flag((1, 0)).unwrap();
        engine.reveal((0, 0)).unwrap();
        engine.reset();

        assert_eq!(engine.state(), GameState::Ready);
        assert_eq!(engine.revealed_safe_count(), 0);
        assert_eq!(engine.mines_left(), 1);
        assert_eq!(engine.detonated_mine(), None);
        for row in 0..2 {
            for col in 0..2 {
                assert_eq!(engine.cell_at((row, col)).unwrap(), Cell::Hidden);
            }
        }
    }

    #[test]
    fn reset_rerolls_the_mine_layout() {
        let mut engine = BoardEngine::with_seed(GameConfig::new((16, 16), 40), 5);

        engine.reveal((0, 0)).unwrap();
        let first = engine.mine_field().cloned();
        engine.reset();
        engine.reveal((0, 0)).unwrap();
        let second = engine.mine_field().cloned();

        assert_ne!(first, second);
    }

    #[test]
    fn mine_query_is_gated_until_the_game_ends() {
        let mut engine = engine_with_mines((2, 2), &[(0, 0)]);

        assert_eq!(engine.is_mine((0, 0)).unwrap_err(), GameError::NotFinished);

        engine.reveal((0, 0)).unwrap();
        assert!(engine.is_mine((0, 0)).unwrap());
        assert!(!engine.is_mine((1, 1)).unwrap());
    }

    #[test]
    fn flagging_before_the_first_reveal_is_legal() {
        let mut engine = BoardEngine::with_seed(GameConfig::new((4, 4), 3), 9);

        assert_eq!(engine.toggle_flag((2, 2)).unwrap(), MarkOutcome::Changed);
        assert_eq!(engine.state(), GameState::Ready);

        engine.reveal((0, 0)).unwrap();
        assert_eq!(engine.state(), GameState::Running);
        assert_eq!(engine.cell_at((2, 2)).unwrap(), Cell::Flagged);
    }

    #[test]
    fn engine_state_survives_a_serde_round_trip() {
        let mut engine = engine_with_mines((3, 3), &[(2, 2)]);
        engine.toggle_flag((2, 2)).unwrap();
        engine.reveal((0, 1)).unwrap();

        let json = serde_json::to_string(&engine).unwrap();
        let restored: BoardEngine = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, engine);
    }

    impl BoardEngine {
        /// Test-only peek at the mine field, live games included.
        fn is_mine_internal(&self, coords: Coord2) -> bool {
            self.field_mine_at(coords)
        }
    }
}
