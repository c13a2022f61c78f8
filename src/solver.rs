//! An agent to solve the game of Connect 4

use rayon::prelude::*;
use tracing::{debug, trace};

use std::sync::Arc;

use crate::{opening_book::*, position::*, transposition_table::*, HEIGHT, TABLE_LOG_SIZE, WIDTH};

/// The minimum possible score of a position
pub const MIN_SCORE: i32 = -((WIDTH * HEIGHT) as i32) / 2 + 3;
/// The maximum possible score of a postion
pub const MAX_SCORE: i32 = ((WIDTH * HEIGHT) as i32 + 1) / 2 - 3;

/// The score printed for a full column in an analysis
pub const INVALID_MOVE: i32 = -1000;

const CELLS: i32 = (WIDTH * HEIGHT) as i32;

pub(crate) struct MoveSorter {
    size: usize,
    // move bitmap, column and score
    moves: [(u64, usize, i32); WIDTH],
}

impl MoveSorter {
    pub fn new() -> Self {
        Self {
            size: 0,
            moves: [(0, 0, 0); WIDTH],
        }
    }
    // equal scores keep insertion order, so the last pushed is searched first
    pub fn push(&mut self, new_move: u64, column: usize, score: i32) {
        let mut pos = self.size;
        self.size += 1;
        while pos != 0 && self.moves[pos - 1].2 > score {
            self.moves[pos] = self.moves[pos - 1];
            pos -= 1;
        }
        self.moves[pos] = (new_move, column, score);
    }
}
impl Iterator for MoveSorter {
    type Item = (u64, usize);

    fn next(&mut self) -> Option<Self::Item> {
        match self.size {
            0 => None,
            _ => {
                self.size -= 1;
                Some((self.moves[self.size].0, self.moves[self.size].1))
            }
        }
    }
}

/// Returns the columns ordered from the middle outwards, as
/// the middle columns are often better moves
pub const fn move_order() -> [usize; WIDTH] {
    let mut move_order = [0; WIDTH];
    let mut i = 0;
    while i < WIDTH {
        move_order[i] = (WIDTH / 2) + (i % 2) * (i / 2 + 1) - (1 - i % 2) * (i / 2);
        i += 1;
    }
    move_order
}

/// The score of a position where the player to move wins with their next tile
pub fn immediate_win_score(position: &Position) -> i32 {
    (CELLS + 1 - position.num_moves() as i32) / 2
}

/// An agent to solve Connect 4 positions
///
/// # Notes
/// This agent uses a classical game tree search with various optimisations to
/// find the mathematically best move(s) in any position, thus 'solving' the game
///
/// # Position Scoring
/// A position is scored from the point of view of the player to move. A win with
/// their final tile (the 21st tile of a player in a 7x6 board) scores 1, a loss
/// to the opponent's final tile scores -1. Earlier wins have scores further from 0,
/// up to 18/-18 where a player wins with their 4th tile. A drawn position
/// has a score of 0. In weak mode only the sign of the score is computed.
#[derive(Clone)]
pub struct Solver<T = TranspositionTable> {
    /// The number of nodes searched by this `Solver` so far (for diagnostics only)
    pub node_count: u64,
    transposition_table: T,
    opening_book: Option<Arc<OpeningBook>>,
}

impl Solver {
    /// Creates a new `Solver` with an empty transposition table
    pub fn new() -> Self {
        Self::with_transposition_table(TranspositionTable::new(TABLE_LOG_SIZE))
    }
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver<SharedTranspositionTable> {
    /// Creates a new `Solver` whose table can be shared by parallel searches
    pub fn new_shared() -> Self {
        Self::with_transposition_table(SharedTranspositionTable::new(TABLE_LOG_SIZE))
    }

    /// Same result as [`Solver::analyze`], searching every column on its own thread
    ///
    /// The searches share this solver's transposition table and opening book.
    pub fn analyze_parallel(&mut self, position: &Position, weak: bool) -> [Option<i32>; WIDTH] {
        let solver = &*self;
        let results: Vec<(Option<i32>, u64)> = (0..WIDTH)
            .into_par_iter()
            .map(|column| {
                let mut next = solver.clone();
                next.node_count = 0;
                let score = next.analyze_column(position, column, weak);
                (score, next.node_count)
            })
            .collect();

        let mut scores = [None; WIDTH];
        for (column, (score, node_count)) in results.into_iter().enumerate() {
            scores[column] = score;
            self.node_count += node_count;
        }
        scores
    }
}

impl<T: TranspositionStore> Solver<T> {
    /// Creates a new `Solver` with a given transposition table
    pub fn with_transposition_table(transposition_table: T) -> Self {
        Self {
            node_count: 0,
            transposition_table,
            opening_book: None,
        }
    }

    /// Adds an opening book to an existing `Solver`
    pub fn with_opening_book(mut self, opening_book: Arc<OpeningBook>) -> Self {
        self.opening_book = Some(opening_book);
        self
    }

    /// Replaces the opening book used by this `Solver`
    pub fn set_opening_book(&mut self, opening_book: Option<Arc<OpeningBook>>) {
        self.opening_book = opening_book;
    }

    pub fn opening_book(&self) -> Option<&OpeningBook> {
        self.opening_book.as_deref()
    }

    /// Clears the transposition table and the node counter
    pub fn reset(&mut self) {
        self.node_count = 0;
        self.transposition_table.reset();
    }

    /// Performs game tree search
    ///
    /// Returns the score of the position within `[alpha, beta]`, or a bound
    /// outside of it (see [Position Scoring])
    ///
    /// The player to move must not be able to win immediately.
    ///
    /// [Position Scoring]: #position-scoring
    fn negamax(&mut self, position: &Position, mut alpha: i32, mut beta: i32) -> i32 {
        debug_assert!(alpha < beta);
        debug_assert!(!position.can_win_next());

        self.node_count += 1;
        let num_moves = position.num_moves() as i32;

        // look for moves that don't give the opponent a next turn win
        let non_losing_moves = position.non_losing_moves();
        if non_losing_moves == 0 {
            return -(CELLS - num_moves) / 2;
        }

        // check for draw, two cells left are not enough for a win
        if num_moves >= CELLS - 2 {
            return 0;
        }

        // lower bound of score, the opponent cannot win on their next move
        let min = -(CELLS - 2 - num_moves) / 2;
        if alpha < min {
            alpha = min;
            if alpha >= beta {
                return alpha;
            }
        }

        // upper bound of score, we cannot win on our next move
        let max = (CELLS - 1 - num_moves) / 2;
        if beta > max {
            // clamp beta to calculated upper bound
            beta = max;
            // if the upper bound is lower than alpha, we can prune the exploration
            if alpha >= beta {
                return beta;
            }
        }

        // try to fetch the upper/lower bound of the score from the transposition table
        let key = position.key();
        let value = self.transposition_table.get(key) as i32;
        if value != 0 {
            // check if lower bound
            if value > MAX_SCORE - MIN_SCORE + 1 {
                let min = value + 2 * MIN_SCORE - MAX_SCORE - 2;
                if alpha < min {
                    alpha = min;
                    if alpha >= beta {
                        // prune the exploration
                        return alpha;
                    }
                }
            // else upper bound
            } else {
                let max = value + MIN_SCORE - 1;
                if beta > max {
                    beta = max;
                    if alpha >= beta {
                        // prune the exploration
                        return beta;
                    }
                }
            }
        }

        // the opening book stores exact scores for any position it contains
        if let Some(book) = &self.opening_book {
            let value = book.get(position) as i32;
            if value != 0 {
                return value + MIN_SCORE - 1;
            }
        }

        let mut moves = MoveSorter::new();
        // reversing move order to put edges first reduces the amount of sorting
        // as these moves are worse on average
        for i in (0..WIDTH).rev() {
            let column = move_order()[i];
            let candidate = non_losing_moves & Position::column_mask(column);
            if candidate != 0 {
                moves.push(candidate, column, position.move_score(candidate))
            }
        }

        // search the next level of the tree
        for (move_bitmap, _column) in moves {
            let mut next = *position;
            next.play(move_bitmap);
            // the search window is flipped for the other player
            let score = -self.negamax(&next, -beta, -alpha);
            // if a child node's score is better than beta, we can prune the tree
            // here because a perfect opponent will not pick this branch
            if score >= beta {
                // save a lower bound of the score
                self.transposition_table.put(key, (score + MAX_SCORE - 2 * MIN_SCORE + 2) as u8);
                return score;
            }
            if score > alpha {
                alpha = score;
            }
        }

        // save an upper bound, offset of one to prevent putting a 0, which represents an empty entry
        self.transposition_table.put(key, (alpha - MIN_SCORE + 1) as u8);
        alpha
    }

    /// Calculates the score of a position (see [Position Scoring])
    ///
    /// With `weak` set only the sign of the score is computed: 1 for a win,
    /// 0 for a draw and -1 for a loss.
    ///
    /// [Position Scoring]: #position-scoring
    pub fn solve(&mut self, position: &Position, weak: bool) -> i32 {
        // check for win for current player on this move
        if position.can_win_next() {
            return if weak { 1 } else { immediate_win_score(position) };
        }

        let num_moves = position.num_moves() as i32;
        let (mut min, mut max) = if weak {
            (-1, 1)
        } else {
            (-(CELLS - num_moves) / 2, (CELLS + 1 - num_moves) / 2)
        };
        let start_count = self.node_count;

        // iteratively narrow the search window
        while min < max {
            let mut mid = min + (max - min) / 2;
            // tweak the search value for both negative and positive searches
            if mid <= 0 && min / 2 < mid {
                mid = min / 2
            } else if mid >= 0 && max / 2 > mid {
                mid = max / 2
            }
            trace!(min, max, mid, "null window search");

            // use a null-window to determine if the actual score is greater or less that mid
            let r = self.negamax(position, mid, mid + 1);

            // r is not necessarily the exact true score, but its value indicates
            // whether the true score is above or below the search target
            if r <= mid {
                // actual score <= mid
                max = r
            } else {
                // actual score > mid
                min = r;
            }
        }
        debug!(
            score = min,
            weak,
            nodes = self.node_count - start_count,
            "solved position"
        );
        // min and max should be equal here, except in weak mode where a
        // null window search can fail high with a bound above 1
        if weak {
            min.signum()
        } else {
            min
        }
    }

    /// Scores every column of a position, `None` for full columns
    ///
    /// Each score is the score of the position after that move, seen from the
    /// player to move in `position`.
    pub fn analyze(&mut self, position: &Position, weak: bool) -> [Option<i32>; WIDTH] {
        let mut scores = [None; WIDTH];
        for (column, score) in scores.iter_mut().enumerate() {
            *score = self.analyze_column(position, column, weak);
        }
        scores
    }

    fn analyze_column(&mut self, position: &Position, column: usize, weak: bool) -> Option<i32> {
        if !position.playable(column) {
            return None;
        }
        if position.check_winning_move(column) {
            return Some(if weak { 1 } else { immediate_win_score(position) });
        }
        let mut next = *position;
        next.play_column(column);
        Some(-self.solve(&next, weak))
    }
}
