//! Explains contract-declared winning lines as highlighted board cells.
//!
//! The contract decides which lines won; this module only answers "which cells
//! on that line formed the run", so the reels can light them up. It never
//! scans lines the contract did not declare.

use std::collections::BTreeSet;

pub const REELS: usize = 5;
pub const ROWS: usize = 3;
pub const BOARD_LEN: usize = REELS * ROWS;
/// Shortest run that pays.
pub const MIN_RUN: usize = 3;

/// Row visited on each reel, left to right, for every known line.
const PAYLINE_ROWS: [[u8; REELS]; 20] = [
    [0, 0, 0, 0, 0],
    [1, 1, 1, 1, 1],
    [2, 2, 2, 2, 2],
    [0, 1, 2, 1, 0],
    [2, 1, 0, 1, 2],
    [0, 0, 1, 2, 2],
    [2, 2, 1, 0, 0],
    [1, 0, 0, 0, 1],
    [1, 2, 2, 2, 1],
    [0, 1, 0, 1, 0],
    [2, 1, 2, 1, 2],
    [0, 1, 1, 1, 0],
    [2, 1, 1, 1, 2],
    [1, 1, 0, 1, 1],
    [1, 1, 2, 1, 1],
    [0, 2, 0, 2, 0],
    [2, 0, 2, 0, 2],
    [1, 0, 1, 0, 1],
    [1, 2, 1, 2, 1],
    [0, 0, 2, 0, 0],
];

pub fn payline_count() -> usize {
    PAYLINE_ROWS.len()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub reel: u8,
    pub row: u8,
}

impl Cell {
    pub const fn new(reel: u8, row: u8) -> Self {
        Self { reel, row }
    }

    pub fn board_index(self) -> usize {
        self.row as usize * REELS + self.reel as usize
    }

    fn from_board_index(index: usize) -> Self {
        Self {
            reel: (index % REELS) as u8,
            row: (index / REELS) as u8,
        }
    }
}

/// Flat, row-major board indices of a known line.
pub fn line_cells(line: u8) -> Option<[usize; REELS]> {
    let rows = PAYLINE_ROWS.get(line as usize)?;
    let mut cells = [0usize; REELS];
    for (reel, row) in rows.iter().enumerate() {
        cells[reel] = *row as usize * REELS + reel;
    }
    Some(cells)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineHighlight {
    pub line: u8,
    pub symbol: u8,
    pub cells: Vec<Cell>,
}

impl LineHighlight {
    pub fn run(&self) -> usize {
        self.cells.len()
    }
}

/// Per-line explanation of the declared winners. Lines whose run from the
/// first cell is shorter than [`MIN_RUN`] are left out, as are unknown line
/// indices.
pub fn explain_lines(board: &[u8], winning_lines: &[u8]) -> Vec<LineHighlight> {
    winning_lines
        .iter()
        .filter_map(|&line| {
            let Some(cells) = line_cells(line) else {
                tracing::debug!(line, "ignoring unknown payline index");
                return None;
            };
            explain_line(board, line, &cells)
        })
        .collect()
}

fn explain_line(board: &[u8], line: u8, cells: &[usize]) -> Option<LineHighlight> {
    let symbol = *board.get(cells[0])?;
    let run: Vec<Cell> = cells
        .iter()
        .take_while(|&&index| board.get(index) == Some(&symbol))
        .map(|&index| Cell::from_board_index(index))
        .collect();
    if run.len() < MIN_RUN {
        return None;
    }
    Some(LineHighlight {
        line,
        symbol,
        cells: run,
    })
}

/// Union of every winning run's cells.
pub fn highlighted_cells(board: &[u8], winning_lines: &[u8]) -> BTreeSet<Cell> {
    explain_lines(board, winning_lines)
        .into_iter()
        .flat_map(|highlight| highlight.cells)
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    fn cells(pairs: &[(u8, u8)]) -> BTreeSet<Cell> {
        pairs.iter().map(|&(reel, row)| Cell::new(reel, row)).collect()
    }

    #[test]
    fn highlighted_cells__run_breaks_on_fourth_reel__marks_first_three_only() {
        // given
        let board = [2, 2, 2, 7, 7];

        // when
        let highlighted = highlighted_cells(&board, &[0]);

        // then
        assert_eq!(highlighted, cells(&[(0, 0), (1, 0), (2, 0)]));
    }

    #[test]
    fn highlighted_cells__run_of_two__contributes_nothing() {
        let board = [
            4, 4, 1, 4, 4, //
            0, 1, 2, 3, 5, //
            6, 7, 8, 9, 0,
        ];

        assert!(highlighted_cells(&board, &[0]).is_empty());
    }

    #[test]
    fn highlighted_cells__v_shape_line__follows_diagonal() {
        // given
        let board = [
            3, 0, 0, 0, 9, //
            1, 3, 1, 3, 1, //
            2, 2, 3, 2, 2,
        ];

        // when
        let highlighted = highlighted_cells(&board, &[3]);

        // then
        assert_eq!(
            highlighted,
            cells(&[(0, 0), (1, 1), (2, 2), (3, 1)])
        );
    }

    #[test]
    fn highlighted_cells__unknown_line_index__is_ignored() {
        let board = [1; BOARD_LEN];

        let highlighted = highlighted_cells(&board, &[0, 200]);

        assert_eq!(highlighted.len(), REELS);
    }

    #[test]
    fn highlighted_cells__overlapping_lines__cells_are_deduplicated() {
        // given
        let board = [5; BOARD_LEN];

        // when
        let highlighted = highlighted_cells(&board, &[0, 3, 9]);

        // then
        let expected: BTreeSet<Cell> = [0u8, 3, 9]
            .iter()
            .flat_map(|&line| line_cells(line).unwrap())
            .map(Cell::from_board_index)
            .collect();
        assert_eq!(highlighted, expected);
    }

    #[test]
    fn explain_lines__reports_symbol_and_run_per_line() {
        let board = [
            8, 8, 8, 8, 1, //
            0, 1, 2, 3, 4, //
            5, 6, 7, 0, 1,
        ];

        let explained = explain_lines(&board, &[0]);

        assert_eq!(explained.len(), 1);
        assert_eq!(explained[0].symbol, 8);
        assert_eq!(explained[0].run(), 4);
    }

    #[test]
    fn line_cells__every_line_visits_each_reel_once() {
        for line in 0..payline_count() as u8 {
            let cells = line_cells(line).unwrap();
            for (reel, index) in cells.iter().enumerate() {
                assert_eq!(index % REELS, reel);
                assert!(*index < BOARD_LEN);
            }
        }
    }

    proptest! {
        #[test]
        fn highlighted_cells__only_cells_of_declared_lines(
            board in proptest::collection::vec(0u8..4, BOARD_LEN),
            lines in proptest::collection::vec(0u8..25, 0..6),
        ) {
            let allowed: BTreeSet<Cell> = lines
                .iter()
                .filter_map(|&line| line_cells(line))
                .flat_map(|cells| cells.into_iter().map(Cell::from_board_index))
                .collect();

            let highlighted = highlighted_cells(&board, &lines);

            prop_assert!(highlighted.is_subset(&allowed));
            for highlight in explain_lines(&board, &lines) {
                prop_assert!(highlight.run() >= MIN_RUN);
                for cell in &highlight.cells {
                    prop_assert_eq!(board[cell.board_index()], highlight.symbol);
                }
            }
        }
    }
}
