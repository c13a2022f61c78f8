//! A perfect solver for the board game 'Connect 4'
//!
//! The solver uses an optimised game tree search to compute the exact
//! score of any position under perfect play, or only its win/draw/loss
//! sign in 'weak' mode.
//!
//! # Basic Usage
//!
//! ```
//! use connect4_solver::{position::Position, solver::Solver};
//!
//!# fn main() -> connect4_solver::Result<()> {
//! let position = Position::from_moves("112233")?;
//! let mut solver = Solver::new();
//!
//! assert_eq!(solver.solve(&position, false), 18);
//! assert_eq!(solver.solve(&position, true), 1);
//!# Ok(())
//!# }
//! ```

use static_assertions::*;

pub mod error;

pub mod transposition_table;

pub mod position;

pub mod opening_book;

pub mod solver;

mod test;

pub use error::{Error, Result};

/// The width of the game board in tiles
pub const WIDTH: usize = 7;

/// The height of the game board in tiles
pub const HEIGHT: usize = 6;

/// log2 of the number of slots in the solver's transposition table
pub const TABLE_LOG_SIZE: u32 = 24;

/// Maximum number of plies of the positions stored in a generated opening book
pub const BOOK_DEPTH: usize = 14;

/// log2 of the number of slots in a generated opening book
pub const BOOK_LOG_SIZE: u32 = 23;

// columns are labelled with a single digit in move sequences
const_assert!(WIDTH < 10);
// ensure that the given dimensions fit in a u64 for the bitboard representation
const_assert!(WIDTH * (HEIGHT + 1) <= 64);

/// The conventional file name of the opening book for the compiled board size
pub fn default_book_path() -> String {
    format!("{}x{}.book", WIDTH, HEIGHT)
}
