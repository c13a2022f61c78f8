#[cfg(test)]
pub mod test {
    use anyhow::{anyhow, Result};
    use std::collections::{HashMap, HashSet};
    use std::fs::File;
    use std::io::{BufRead, BufReader, Cursor};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::opening_book::{explore, partial_key_bytes, OpeningBook};
    use crate::position::Position;
    use crate::solver::*;
    use crate::transposition_table::*;
    use crate::{default_book_path, Error, HEIGHT, WIDTH};

    // 41 tiles without any alignment, the last cell can't complete one either
    const DRAWN_SEQUENCE: &str = "31637415743444165521376365661553147227722";

    fn load_test_data(path: &str) -> Result<Vec<(String, i32)>> {
        let file = BufReader::new(File::open(path)?);
        let mut positions = vec![];

        for line in file.split(b'\n') {
            let buf = String::from_utf8(line?)?;
            if buf.trim().is_empty() {
                continue;
            }
            let mut test_data = buf.split_whitespace();
            let moves = test_data
                .next()
                .ok_or_else(|| anyhow!("invalid test data: {}", buf))?;
            let score = test_data
                .next()
                .ok_or_else(|| anyhow!("invalid test data: {}", buf))?
                .parse::<i32>()?;
            positions.push((moves.to_string(), score));
        }
        Ok(positions)
    }

    // a smaller table than the default keeps parallel tests light
    fn solver() -> Solver {
        Solver::with_transposition_table(TranspositionTable::new(20))
    }

    fn mirror(moves: &str) -> String {
        moves
            .chars()
            .map(|c| (b'1' + (WIDTH as u8 - 1) - (c as u8 - b'1')) as char)
            .collect()
    }

    #[test]
    pub fn sequence_replay() -> Result<()> {
        let mut position = Position::new();
        assert_eq!(position.play_sequence(""), 0);
        assert_eq!(position.play_sequence("448"), 2);

        // the seventh tile doesn't fit in the column
        assert_eq!(Position::new().play_sequence("4444444"), 6);
        // the seventh move would win the game
        assert_eq!(Position::new().play_sequence("1212121"), 6);
        assert_eq!(Position::new().play_sequence("12a"), 2);
        assert_eq!(Position::new().play_sequence("120"), 2);

        match Position::from_moves("1212121") {
            Err(Error::InvalidMove { ply, sequence }) => {
                assert_eq!(ply, 7);
                assert_eq!(sequence, "1212121");
            }
            _ => return Err(anyhow!("winning move accepted")),
        }

        let position = Position::from_moves("4453")?;
        assert_eq!(position.num_moves(), 4);
        assert_eq!(position.board_mask().count_ones(), 4);
        assert_eq!(position.player_mask() & !position.board_mask(), 0);
        Ok(())
    }

    #[test]
    pub fn key3_coding() -> Result<()> {
        assert_eq!(Position::new().key3(), 0);
        assert_eq!(Position::from_moves("4")?.key3(), 54);
        assert_eq!(Position::from_moves("1")?.key3(), 2);

        let board = Position::from_moves("22244444")?;
        assert_eq!(board.key3(), 154596);
        assert_eq!(Position::from_moves("66644444")?.key3(), 154596);
        Ok(())
    }

    #[test]
    pub fn key3_mirror_invariance() -> Result<()> {
        for moves in explore(5).into_iter().skip(1) {
            let position = Position::from_moves(&moves)?;
            let mirrored = Position::from_moves(mirror(&moves))?;
            assert_eq!(position.key3(), mirrored.key3(), "{}", moves);
            if position != mirrored {
                assert_ne!(position.key(), mirrored.key());
            }
        }
        for (moves, _) in load_test_data("test_data/endgame")? {
            let position = Position::from_moves(&moves)?;
            let mirrored = Position::from_moves(mirror(&moves))?;
            assert_eq!(position.key3(), mirrored.key3(), "{}", moves);
        }
        Ok(())
    }

    #[test]
    pub fn key_uniqueness() {
        fn visit(position: Position, plies: usize, seen: &mut HashSet<Position>) {
            if !seen.insert(position) || plies == 0 {
                return;
            }
            for column in 0..WIDTH {
                if position.playable(column) {
                    let mut next = position;
                    next.play_column(column);
                    visit(next, plies - 1, seen);
                }
            }
        }

        let mut seen = HashSet::new();
        visit(Position::new(), 6, &mut seen);
        assert_eq!(seen.len(), 22100);

        let mut keys = HashMap::new();
        for position in seen {
            if let Some(other) = keys.insert(position.key(), position) {
                panic!("{:?} and {:?} share a key", position, other);
            }
        }
    }

    #[test]
    pub fn winning_moves() -> Result<()> {
        // three tiles in the bottom row, the fourth column closes the alignment
        let position = Position::from_moves("112233")?;
        assert!(position.can_win_next());
        for column in 0..WIDTH {
            assert_eq!(position.check_winning_move(column), column == 3);
        }
        assert_ne!(position.winning_positions() & Position::bottom_mask(3), 0);

        let position = Position::from_moves("4455")?;
        assert!(!position.can_win_next());
        assert!((0..WIDTH).all(|column| !position.check_winning_move(column)));
        Ok(())
    }

    #[test]
    pub fn forced_moves() -> Result<()> {
        // the opponent threatens the bottom of the fourth column
        let position = Position::from_moves("11223")?;
        assert_eq!(position.non_losing_moves(), Position::bottom_mask(3));

        // two threats can't both be blocked
        let position = Position::from_moves("22334")?;
        assert_eq!(position.non_losing_moves(), 0);
        Ok(())
    }

    #[test]
    pub fn non_losing_moves() -> Result<()> {
        let mut positions = explore(5)
            .into_iter()
            .map(Position::from_moves)
            .collect::<Result<Vec<_>, _>>()?;
        for (moves, _) in load_test_data("test_data/endgame")? {
            positions.push(Position::from_moves(moves)?);
        }

        for position in positions.iter().filter(|p| !p.can_win_next()) {
            let non_losing = position.non_losing_moves();
            assert_eq!(non_losing & !position.possible_moves(), 0);

            for column in (0..WIDTH).filter(|&c| position.playable(c)) {
                let mut next = *position;
                next.play_column(column);
                if non_losing & Position::column_mask(column) != 0 {
                    assert!(!next.can_win_next(), "{:?} loses", next);
                } else if non_losing == 0 {
                    assert!(next.can_win_next(), "{:?} holds", next);
                }
            }
        }
        Ok(())
    }

    #[test]
    pub fn move_sorting() {
        assert_eq!(move_order(), [3, 4, 2, 5, 1, 6, 0]);

        let mut moves = MoveSorter::new();
        moves.push(1, 0, 2);
        moves.push(2, 1, 5);
        moves.push(4, 2, 2);
        moves.push(8, 3, 0);
        let columns: Vec<usize> = moves.map(|(_, column)| column).collect();
        assert_eq!(columns, vec![1, 2, 0, 3]);
    }

    #[test]
    pub fn transposition_tables() {
        let mut table = TranspositionTable::new(10);
        assert_eq!(table.len(), 1031);
        assert_eq!(table.get(42), 0);

        table.put(42, 7);
        assert_eq!(table.get(42), 7);
        table.put(42, 9);
        assert_eq!(table.get(42), 9);

        // same slot, different key
        assert_eq!(table.get(42 + 1031), 0);
        table.put(42 + 1031, 3);
        assert_eq!(table.get(42 + 1031), 3);
        assert_eq!(table.get(42), 0);

        table.reset();
        assert_eq!(table.get(42 + 1031), 0);

        let mut shared = SharedTranspositionTable::new(10);
        let mut clone = shared.clone();
        clone.put(1 << 40, 12);
        assert_eq!(shared.get(1 << 40), 12);
        assert_eq!(shared.get((1 << 40) + 1031), 0);
        shared.reset();
        assert_eq!(clone.get(1 << 40), 0);

        assert_eq!(next_prime(2), 2);
        assert_eq!(next_prime(1 << 23), 8388617);
        assert_eq!(table_size(24), 16777259);
    }

    #[test]
    pub fn immediate_results() -> Result<()> {
        let mut solver = solver();

        // the player to move wins with their 4th tile
        let position = Position::from_moves("112233")?;
        assert_eq!(solver.solve(&position, false), 18);
        assert_eq!(solver.solve(&position, true), 1);

        // the opponent wins with their 4th tile whatever happens
        let position = Position::from_moves("22334")?;
        assert_eq!(solver.solve(&position, false), -18);
        assert_eq!(solver.solve(&position, true), -1);
        Ok(())
    }

    #[test]
    pub fn last_cell_draw() -> Result<()> {
        let position = Position::from_moves(DRAWN_SEQUENCE)?;
        assert_eq!(position.num_moves(), WIDTH * HEIGHT - 1);
        assert!(!position.can_win_next());

        let mut solver = solver();
        assert_eq!(solver.solve(&position, false), 0);
        assert_eq!(solver.solve(&position, true), 0);

        let scores = solver.analyze(&position, false);
        assert_eq!(scores.iter().filter(|s| s.is_some()).count(), 1);
        assert!(scores.iter().flatten().all(|&s| s == 0));
        Ok(())
    }

    #[test]
    pub fn end_game() -> Result<()> {
        let mut solver = solver();

        let mut times = vec![];
        let mut posis = vec![];

        for (moves, score) in load_test_data("test_data/endgame")? {
            let position = Position::from_moves(&moves)?;
            solver.reset();
            let start_time = Instant::now();
            let calc = solver.solve(&position, false);
            let finish_time = Instant::now();
            assert_eq!(score, calc, "{}", moves);
            times.push(finish_time - start_time);
            posis.push(solver.node_count);

            // weak mode only keeps the sign
            assert_eq!(solver.solve(&position, true), score.signum(), "{}", moves);
        }

        println!(
            "End-game:\nMean time: {:.6}ms, Mean no. of positions: {}",
            (times.iter().sum::<Duration>() / times.len() as u32).as_secs_f64() * 1000.0,
            posis.iter().sum::<u64>() as f64 / posis.len() as f64,
        );
        Ok(())
    }

    #[test]
    pub fn repeated_solves() -> Result<()> {
        let mut solver = solver();
        for (moves, score) in load_test_data("test_data/endgame")?.into_iter().take(12) {
            let position = Position::from_moves(&moves)?;

            solver.reset();
            let fresh = solver.solve(&position, false);
            solver.reset();
            assert_eq!(solver.solve(&position, false), fresh);

            // a warmed table only prunes the search
            assert_eq!(solver.solve(&position, false), fresh);
            assert_eq!(fresh, score);
        }
        Ok(())
    }

    #[test]
    pub fn analysis() -> Result<()> {
        let mut analyzer = solver();
        let mut checker = solver();

        for (moves, score) in load_test_data("test_data/endgame")?.into_iter().step_by(4) {
            let position = Position::from_moves(&moves)?;
            let scores = analyzer.analyze(&position, false);

            for column in 0..WIDTH {
                let expected = if !position.playable(column) {
                    None
                } else if position.check_winning_move(column) {
                    Some(immediate_win_score(&position))
                } else {
                    let mut next = position;
                    next.play_column(column);
                    Some(-checker.solve(&next, false))
                };
                assert_eq!(scores[column], expected, "{} column {}", moves, column);
            }

            // the best column scores the position
            assert_eq!(scores.iter().flatten().max(), Some(&score), "{}", moves);

            let weak = analyzer.analyze(&position, true);
            for column in 0..WIDTH {
                assert_eq!(weak[column], scores[column].map(i32::signum));
            }
        }
        Ok(())
    }

    #[test]
    pub fn parallel_analysis() -> Result<()> {
        let mut solver = solver();
        let mut parallel = Solver::with_transposition_table(SharedTranspositionTable::new(20));

        for (moves, _) in load_test_data("test_data/endgame")?.into_iter().step_by(7) {
            let position = Position::from_moves(&moves)?;
            assert_eq!(
                parallel.analyze_parallel(&position, false),
                solver.analyze(&position, false),
                "{}",
                moves
            );
        }
        assert!(parallel.node_count > 0);
        Ok(())
    }

    #[test]
    pub fn explored_positions() {
        assert_eq!(explore(0), vec![""]);
        assert_eq!(explore(1), vec!["", "1", "2", "3", "4"]);
        assert_eq!(explore(2).len(), 30);
        assert_eq!(explore(3).len(), 151);
        assert_eq!(explore(4).len(), 719);
    }

    #[test]
    pub fn opening_book_round_trip() -> Result<()> {
        let depth = 4;
        let log_size = 12;
        let mut book = OpeningBook::new(depth, log_size, partial_key_bytes(depth, log_size));
        let positions = explore(depth)
            .into_iter()
            .map(Position::from_moves)
            .collect::<Result<Vec<_>, _>>()?;
        for (i, position) in positions.iter().enumerate() {
            book.insert(position, (i % 7) as i32 - 3);
        }

        let mut bytes = vec![];
        book.write_to(&mut bytes)?;
        assert_eq!(&bytes[..6], &[WIDTH as u8, HEIGHT as u8, 4, 1, 1, 12]);
        let loaded = OpeningBook::read_from(Cursor::new(&bytes))?;
        assert_eq!(loaded.depth(), depth);

        let path = std::env::temp_dir().join(format!("connect4_test_{}", default_book_path()));
        book.save(&path)?;
        let from_file = OpeningBook::load(&path)?;
        std::fs::remove_file(&path).ok();

        let mut stored = 0;
        for position in positions.iter() {
            let value = book.get(position);
            assert_eq!(loaded.get(position), value);
            assert_eq!(from_file.get(position), value);
            if value != 0 {
                stored += 1;
            }
        }
        // a few entries may have been replaced by colliding positions
        assert!(stored > positions.len() * 3 / 4);

        // positions deeper than the book are never found
        let deep = Position::from_moves("44444")?;
        assert_eq!(loaded.get(&deep), 0);
        Ok(())
    }

    #[test]
    pub fn opening_book_validation() -> Result<()> {
        let mut bytes = vec![];
        OpeningBook::new(2, 4, 1).write_to(&mut bytes)?;

        let mut wrong_width = bytes.clone();
        wrong_width[0] = WIDTH as u8 + 1;
        assert!(matches!(
            OpeningBook::read_from(Cursor::new(&wrong_width)),
            Err(Error::InvalidBook(_))
        ));

        let mut wrong_value_size = bytes.clone();
        wrong_value_size[4] = 2;
        assert!(matches!(
            OpeningBook::read_from(Cursor::new(&wrong_value_size)),
            Err(Error::InvalidBook(_))
        ));

        let mut wrong_key_size = bytes.clone();
        wrong_key_size[3] = 3;
        assert!(matches!(
            OpeningBook::read_from(Cursor::new(&wrong_key_size)),
            Err(Error::InvalidBook(_))
        ));

        assert!(matches!(
            OpeningBook::read_from(Cursor::new(&bytes[..bytes.len() - 1])),
            Err(Error::Io(_))
        ));

        // the header alone must not commit to a huge allocation
        assert!(matches!(
            OpeningBook::read_from(Cursor::new(&[7u8, 6, 14, 4, 1, 40][..])),
            Err(Error::InvalidBook(_))
        ));
        assert!(matches!(
            OpeningBook::read_from(Cursor::new(&[7u8, 6, 14, 4, 1, 31][..])),
            Err(Error::Io(_))
        ));
        assert!(OpeningBook::read_from(Cursor::new(&bytes)).is_ok());
        Ok(())
    }

    #[test]
    pub fn scored_lines() -> Result<()> {
        let input = " 1\n4 -1\n44 2\n4 99\nx 1\n4 1 2\n45\n\n5 0\n";
        let book = OpeningBook::from_scored_lines(Cursor::new(input), 4, 10)?;

        let value = |moves: &str, score: i32| -> Result<()> {
            let position = Position::from_moves(moves)?;
            assert_eq!(book.get(&position) as i32, score - MIN_SCORE + 1, "{}", moves);
            Ok(())
        };
        value("", 1)?;
        value("4", -1)?;
        value("44", 2)?;

        // reading stopped at the empty line
        assert_eq!(book.get(&Position::from_moves("5")?), 0);
        assert_eq!(book.get(&Position::from_moves("45")?), 0);
        Ok(())
    }

    #[test]
    pub fn opening_book_search() -> Result<()> {
        let mut plain = solver();

        for (moves, score) in load_test_data("test_data/endgame")? {
            let position = Position::from_moves(&moves)?;
            if position.can_win_next()
                || position.non_losing_moves() == 0
                || position.num_moves() > 33
                || score == 0
            {
                continue;
            }
            let non_losing = position.non_losing_moves();
            let children: Vec<Position> = (0..WIDTH)
                .filter(|&c| non_losing & Position::column_mask(c) != 0)
                .map(|c| {
                    let mut next = position;
                    next.play_column(c);
                    next
                })
                .collect();
            // every searched child must reach the book probe
            if children.iter().any(|child| child.non_losing_moves() == 0) {
                continue;
            }

            assert_eq!(plain.solve(&position, false), score);

            // the book is trusted as soon as the position is reached
            let mut book = OpeningBook::new(position.num_moves(), 12, 4);
            book.insert(&position, 0);
            let mut solver = solver().with_opening_book(Arc::new(book));
            assert_eq!(solver.solve(&position, false), 0, "{}", moves);

            // and below the root
            let mut book = OpeningBook::new(position.num_moves() + 1, 12, 4);
            for child in children.iter() {
                book.insert(child, 0);
            }
            solver.set_opening_book(Some(Arc::new(book)));
            solver.reset();
            assert_eq!(solver.solve(&position, false), 0, "{}", moves);
            assert!(solver.opening_book().is_some());
            return Ok(());
        }
        Err(anyhow!("no suitable test position"))
    }

    #[test]
    pub fn first_moves_from_book() -> Result<()> {
        // scores of the positions after each first move, for the player to move
        let input = "1 2\n2 1\n3 0\n4 -1\n5 0\n6 1\n7 2\n";
        let book = OpeningBook::from_scored_lines(Cursor::new(input), 1, 12)?;
        let mut solver = solver().with_opening_book(Arc::new(book));

        // only the centre column wins for the first player
        assert_eq!(
            solver.analyze(&Position::new(), false),
            [Some(-2), Some(-1), Some(0), Some(1), Some(0), Some(-1), Some(-2)]
        );
        assert_eq!(
            solver.analyze(&Position::new(), true),
            [Some(-1), Some(-1), Some(0), Some(1), Some(0), Some(-1), Some(-1)]
        );
        assert_eq!(solver.solve(&Position::from_moves("4")?, false), -1);
        assert_eq!(solver.solve(&Position::from_moves("4")?, true), -1);
        Ok(())
    }

    #[test]
    #[ignore = "needs an opening book"]
    pub fn full_search() -> Result<()> {
        let book = Arc::new(OpeningBook::load(default_book_path())?);
        let mut solver = Solver::new().with_opening_book(book);
        let start_time = Instant::now();
        let scores = solver.analyze(&Position::new(), false);
        let time = start_time.elapsed();

        // only the centre column wins, with the last tile
        assert_eq!(
            scores,
            [Some(-2), Some(-1), Some(0), Some(1), Some(0), Some(-1), Some(-2)]
        );
        assert_eq!(solver.solve(&Position::from_moves("4")?, true), -1);

        println!(
            "Full game analysis\n Time: {:.6}s, No. of positions: {}",
            time.as_secs_f64(),
            solver.node_count,
        );
        Ok(())
    }
}
