//! Precomputed scores of early positions, used as an oracle by the solver
//!
//! # File format
//! All integers are little endian.
//! - 1 byte: board width
//! - 1 byte: board height
//! - 1 byte: maximum number of plies of a stored position
//! - 1 byte: partial key size in bytes
//! - 1 byte: value size in bytes (always 1)
//! - 1 byte: log2 of the nominal table size
//! - `next_prime(2^log_size)` partial keys
//! - `next_prime(2^log_size)` values

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use indicatif::*;
use rayon::prelude::*;
use tracing::{info, warn};

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    position::Position,
    solver::{Solver, MAX_SCORE, MIN_SCORE},
    transposition_table::*,
    Error, Result, HEIGHT, WIDTH,
};

const LOG2_3: f64 = 1.584_962_500_721_156;
/// Largest table accepted in a book file
pub const MAX_LOG_SIZE: u32 = 32;

/// An opening book mapping canonical positions to their exact score
#[derive(Clone)]
pub struct OpeningBook {
    depth: usize,
    table: TranspositionTable,
}

/// Number of bytes needed to store the part of a `key3` of a position with at
/// most `depth` plies that is not implied by its slot in the table
pub fn partial_key_bytes(depth: usize, log_size: u32) -> usize {
    let key_bits = ((depth + WIDTH - 1) as f64 * LOG2_3) as i64 + 1 - log_size as i64;
    match key_bits {
        bits if bits <= 8 => 1,
        bits if bits <= 16 => 2,
        _ => 4,
    }
}

impl OpeningBook {
    /// Creates an empty book for positions of at most `depth` plies
    pub fn new(depth: usize, log_size: u32, key_bytes: usize) -> Self {
        Self {
            depth,
            table: TranspositionTable::with_key_bytes(log_size, key_bytes),
        }
    }

    /// The maximum number of plies of a stored position
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Records the exact score of a position and of its mirror image
    pub fn insert(&mut self, position: &Position, score: i32) {
        debug_assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
        self.table.put(position.key3(), (score - MIN_SCORE + 1) as u8);
    }

    /// Returns the stored value of a position, `score - MIN_SCORE + 1`, or 0
    /// if the position is not in the book
    pub fn get(&self, position: &Position) -> u8 {
        if position.num_moves() > self.depth {
            0
        } else {
            self.table.get(position.key3())
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let book = Self::read_from(BufReader::new(File::open(path.as_ref())?))?;
        info!(
            path = %path.as_ref().display(),
            depth = book.depth,
            "loaded opening book"
        );
        Ok(book)
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let width = reader.read_u8()? as usize;
        if width != WIDTH {
            return Err(Error::InvalidBook(format!(
                "board width {} does not match {}",
                width, WIDTH
            )));
        }
        let height = reader.read_u8()? as usize;
        if height != HEIGHT {
            return Err(Error::InvalidBook(format!(
                "board height {} does not match {}",
                height, HEIGHT
            )));
        }
        let depth = reader.read_u8()? as usize;
        if depth > WIDTH * HEIGHT {
            return Err(Error::InvalidBook(format!("depth {} is too large", depth)));
        }
        let key_bytes = reader.read_u8()? as usize;
        if !matches!(key_bytes, 1 | 2 | 4) {
            return Err(Error::InvalidBook(format!(
                "unsupported key size {}",
                key_bytes
            )));
        }
        let value_bytes = reader.read_u8()?;
        if value_bytes != 1 {
            return Err(Error::InvalidBook(format!(
                "unsupported value size {}",
                value_bytes
            )));
        }
        let log_size = reader.read_u8()? as u32;
        if log_size > MAX_LOG_SIZE {
            return Err(Error::InvalidBook(format!(
                "log size {} is too large",
                log_size
            )));
        }

        let size = table_size(log_size);
        let raw = read_section(&mut reader, size * key_bytes)?;
        let keys = match key_bytes {
            1 => raw.into_iter().map(u32::from).collect(),
            2 => raw
                .chunks_exact(2)
                .map(|bytes| u32::from(LittleEndian::read_u16(bytes)))
                .collect(),
            _ => raw.chunks_exact(4).map(LittleEndian::read_u32).collect(),
        };
        let values = read_section(&mut reader, size)?;

        Ok(Self {
            depth,
            table: TranspositionTable::from_parts(log_size, key_bytes, keys, values),
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut file)?;
        file.flush()?;
        info!(path = %path.as_ref().display(), "saved opening book");
        Ok(())
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u8(WIDTH as u8)?;
        writer.write_u8(HEIGHT as u8)?;
        writer.write_u8(self.depth as u8)?;
        writer.write_u8(self.table.key_bytes() as u8)?;
        writer.write_u8(1)?;
        writer.write_u8(self.table.log_size() as u8)?;

        for &key in self.table.keys() {
            match self.table.key_bytes() {
                1 => writer.write_u8(key as u8)?,
                2 => writer.write_u16::<LittleEndian>(key as u16)?,
                _ => writer.write_u32::<LittleEndian>(key)?,
            }
        }
        writer.write_all(self.table.values())?;
        Ok(())
    }

    /// Builds a book from lines of the form `"<moves> <score>"`
    ///
    /// Lines with an invalid move sequence or score are skipped, reading stops
    /// at the first empty line.
    pub fn from_scored_lines<R: BufRead>(reader: R, depth: usize, log_size: u32) -> Result<Self> {
        let mut book = Self::new(depth, log_size, partial_key_bytes(depth, log_size));
        let mut count = 0usize;

        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                break;
            }
            match parse_scored_line(&line) {
                Some((position, score)) if position.num_moves() <= depth => {
                    book.insert(&position, score);
                    count += 1;
                }
                _ => warn!(line = line_number + 1, "Invalid line (line ignored): {}", line),
            }
        }
        info!(positions = count, depth, "built opening book");
        Ok(book)
    }

    /// Generates a book by solving every position of at most `depth` plies
    ///
    /// Positions are solved one ply level at a time starting from the deepest,
    /// so that every level is searched with the book of the levels below it.
    pub fn generate(depth: usize, log_size: u32) -> Self {
        let start = Instant::now();
        let positions = explore_positions(depth);
        info!(
            positions = positions.len(),
            depth,
            "enumerated unique positions"
        );

        let mut levels = vec![Vec::new(); depth + 1];
        for (_, position) in positions.iter() {
            levels[position.num_moves()].push(*position);
        }

        let progress = ProgressBar::new(positions.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("Calculating scores: {bar:40.cyan/blue} {pos}/{len} ~{eta} remaining")
                .progress_chars("█▓▒░  "),
        );

        let mut book = Self::new(depth, log_size, partial_key_bytes(depth, log_size));
        let solver = Solver::new_shared();

        for level in levels.iter().rev() {
            let snapshot = Arc::new(book.clone());
            let scores: Vec<(Position, i32)> = level
                .par_iter()
                .map_with(
                    solver.clone().with_opening_book(snapshot),
                    |solver, position| {
                        let score = solver.solve(position, false);
                        progress.inc(1);
                        (*position, score)
                    },
                )
                .collect();

            for (position, score) in scores.iter() {
                book.insert(position, *score);
            }
        }

        progress.finish();
        info!(
            "Opening book generation completed in {}",
            HumanDuration(start.elapsed())
        );
        book
    }
}

// buffers grow with the bytes actually read, so a truncated file fails
// before the full table is allocated
fn read_section<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(buf)
}

fn parse_scored_line(line: &str) -> Option<(Position, i32)> {
    let (moves, score) = line.split_once(' ')?;
    let score = score.trim().parse::<i32>().ok()?;
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return None;
    }
    let position = Position::from_moves(moves).ok()?;
    Some((position, score))
}

/// Lists a move sequence for every position of at most `depth` plies,
/// keeping only one of every pair of mirrored positions
///
/// Winning moves are never played, as the solver scores those positions
/// before reaching the book.
pub fn explore(depth: usize) -> Vec<String> {
    explore_positions(depth)
        .into_iter()
        .map(|(moves, _)| moves)
        .collect()
}

fn explore_positions(depth: usize) -> Vec<(String, Position)> {
    let mut visited = HashSet::new();
    let mut positions = Vec::new();
    let mut moves = String::with_capacity(depth);
    explore_from(
        &Position::new(),
        &mut moves,
        depth,
        &mut visited,
        &mut positions,
    );
    positions
}

fn explore_from(
    position: &Position,
    moves: &mut String,
    depth: usize,
    visited: &mut HashSet<u64>,
    positions: &mut Vec<(String, Position)>,
) {
    if !visited.insert(position.key3()) {
        return;
    }
    positions.push((moves.clone(), *position));
    if position.num_moves() >= depth {
        return;
    }

    for column in 0..WIDTH {
        if position.playable(column) && !position.check_winning_move(column) {
            let mut next = *position;
            next.play_column(column);
            moves.push((b'1' + column as u8) as char);
            explore_from(&next, moves, depth, visited, positions);
            moves.pop();
        }
    }
}
