//! Bitboard representation of a Connect 4 position
//!
//! Each column uses `HEIGHT + 1` bits, the extra bit on top of every column
//! stops carries and shifts from bleeding into the neighbouring column.

use crate::{Error, Result, HEIGHT, WIDTH};

mod static_masks {
    use crate::{HEIGHT, WIDTH};

    pub const fn bottom_mask() -> u64 {
        let mut mask = 0;
        let mut column = 0;
        while column < WIDTH {
            mask |= 1 << (column * (HEIGHT + 1));
            column += 1;
        }
        mask
    }
    pub const fn full_board_mask() -> u64 {
        bottom_mask() * ((1 << HEIGHT as u64) - 1)
    }
}

/// A Connect 4 position, seen from the player to move
///
/// The stones of the player to move are stored in `player_mask`, every stone
/// is stored in `board_mask`. Playing a move swaps the point of view, so no
/// player tag is needed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    // mask of the current player's tiles
    player_mask: u64,
    // mask of all tiles
    board_mask: u64,
    num_moves: usize,
}

impl Position {
    pub fn new() -> Self {
        Self {
            player_mask: 0,
            board_mask: 0,
            num_moves: 0,
        }
    }

    /// Replays a sequence of 1-indexed column labels, e.g. `"4453"`
    ///
    /// Fails with the 1-based ply of the first move that is out of range,
    /// lands in a full column or would end the game.
    pub fn from_moves<S: AsRef<str>>(moves: S) -> Result<Self> {
        let moves = moves.as_ref();
        let mut position = Self::new();
        let played = position.play_sequence(moves);
        if played != moves.chars().count() {
            return Err(Error::InvalidMove {
                ply: played + 1,
                sequence: moves.to_string(),
            });
        }
        Ok(position)
    }

    /// Plays the moves of a sequence until one of them is invalid
    ///
    /// A move is invalid when its label is not a column of the board, when
    /// the column is full, or when it would win the game: positions reached
    /// through an already won game are never scored.
    ///
    /// Returns the number of moves played, which is the length of the
    /// sequence iff every move was valid.
    pub fn play_sequence(&mut self, moves: &str) -> usize {
        for (played, column_char) in moves.chars().enumerate() {
            let column = match column_char.to_digit(10).map(|c| c as usize) {
                Some(column @ 1..=WIDTH) => column - 1,
                _ => return played,
            };
            if !self.playable(column) || self.check_winning_move(column) {
                return played;
            }
            self.play_column(column);
        }
        moves.chars().count()
    }

    pub fn player_mask(&self) -> u64 {
        self.player_mask
    }

    pub fn board_mask(&self) -> u64 {
        self.board_mask
    }

    pub fn num_moves(&self) -> usize {
        self.num_moves
    }

    pub fn top_mask(column: usize) -> u64 {
        1 << (column * (HEIGHT + 1) + (HEIGHT - 1))
    }

    pub fn bottom_mask(column: usize) -> u64 {
        1 << (column * (HEIGHT + 1))
    }

    pub fn column_mask(column: usize) -> u64 {
        ((1 << HEIGHT) - 1) << (column * (HEIGHT + 1))
    }

    pub fn playable(&self, column: usize) -> bool {
        Self::top_mask(column) & self.board_mask == 0
    }

    /// Plays a single-bit move bitmap, which must be a playable cell
    pub fn play(&mut self, move_bitmap: u64) {
        debug_assert!(move_bitmap & self.possible_moves() == move_bitmap);
        // switch the current player
        self.player_mask ^= self.board_mask;
        // add a cell of the previous player to the correct column
        self.board_mask |= move_bitmap;
        self.num_moves += 1;
    }

    pub fn play_column(&mut self, column: usize) {
        debug_assert!(self.playable(column));
        self.play((self.board_mask + Self::bottom_mask(column)) & Self::column_mask(column));
    }

    pub fn check_winning_move(&self, column: usize) -> bool {
        self.winning_positions() & self.possible_moves() & Self::column_mask(column) != 0
    }

    pub fn can_win_next(&self) -> bool {
        self.winning_positions() & self.possible_moves() != 0
    }

    /// Bitmap of the lowest empty cell of every column that is not full
    pub fn possible_moves(&self) -> u64 {
        (self.board_mask + static_masks::bottom_mask()) & static_masks::full_board_mask()
    }

    /// Bitmap of the moves that don't give the opponent a next turn win
    ///
    /// Must only be called when the current player cannot win immediately.
    pub fn non_losing_moves(&self) -> u64 {
        debug_assert!(!self.can_win_next());
        let mut possible_moves = self.possible_moves();
        let opponent_winning_positions = self.opponent_winning_positions();
        let forced_moves = possible_moves & opponent_winning_positions;

        if forced_moves != 0 {
            // if more than one forced move exists, you can't prevent the opponent winning
            if forced_moves & (forced_moves - 1) != 0 {
                return 0;
            } else {
                possible_moves = forced_moves
            }
        }
        // avoid playing below an opponent's winning move
        possible_moves & !(opponent_winning_positions >> 1)
    }

    /// Open cells that complete an alignment for the current player
    pub fn winning_positions(&self) -> u64 {
        self.compute_winning_positions(self.player_mask)
    }

    /// Open cells that complete an alignment for the opponent
    pub fn opponent_winning_positions(&self) -> u64 {
        self.compute_winning_positions(self.player_mask ^ self.board_mask)
    }

    fn compute_winning_positions(&self, player_mask: u64) -> u64 {
        // vertical
        // find the top ends of 3-alignemnts
        let mut r = (player_mask << 1) & (player_mask << 2) & (player_mask << 3);

        // horizontal, then both diagonals
        for shift in [HEIGHT + 1, HEIGHT, HEIGHT + 2] {
            let mut p = (player_mask << shift) & (player_mask << (2 * shift));
            // find the right ends of 3-alignments
            r |= p & (player_mask << (3 * shift));
            // find holes of the type ...O O _ O...
            r |= p & (player_mask >> shift);

            p = (player_mask >> shift) & (player_mask >> (2 * shift));
            // find the left ends of 3-alignments
            r |= p & (player_mask >> (3 * shift));
            // find holes of the type ...O _ O O...
            r |= p & (player_mask << shift);
        }

        r & (static_masks::full_board_mask() ^ self.board_mask)
    }

    /// Move ordering heuristic: the number of open cells completing an
    /// alignment for the current player once `candidate` is played
    pub fn move_score(&self, candidate: u64) -> i32 {
        self.compute_winning_positions(self.player_mask | candidate)
            .count_ones() as i32
    }

    /// Key for the transposition table, unique for every reachable position
    pub fn key(&self) -> u64 {
        self.player_mask + self.board_mask
    }

    /// Base 3 key for the opening book, identical for mirrored positions
    pub fn key3(&self) -> u64 {
        let key_forward = (0..WIDTH).fold(0, |key, column| self.partial_key3(key, column));
        let key_reverse = (0..WIDTH)
            .rev()
            .fold(0, |key, column| self.partial_key3(key, column));

        key_forward.min(key_reverse) / 3
    }

    // 1 is a tile of the current player, 2 an opponent tile, 0 ends the column
    fn partial_key3(&self, mut key: u64, column: usize) -> u64 {
        let mut tile_mask = Self::bottom_mask(column);
        while tile_mask & self.board_mask != 0 {
            key = key.wrapping_mul(3);
            key = if tile_mask & self.player_mask != 0 {
                key.wrapping_add(1)
            } else {
                key.wrapping_add(2)
            };
            tile_mask <<= 1;
        }
        key.wrapping_mul(3)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}
