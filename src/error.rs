use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Coordinates outside the board")]
    InvalidCoords,
    #[error("Game already ended, no new moves are accepted")]
    AlreadyEnded,
    #[error("Mine locations are only queryable once the game has ended")]
    NotFinished,
}

pub type Result<T> = core::result::Result<T, GameError>;
