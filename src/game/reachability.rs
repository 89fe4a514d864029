//! The reachability pruner: after any change to the move-board, determine
//! which still-empty cells can still be covered by some placement of the
//! pawn, and mark the rest dead.
//!
//! A cell participates in a legal placement of a given pawn rotation at a
//! given origin only if every filled offset of that rotation lands in
//! bounds on a cell whose current move-board value is exactly `0`. The
//! cell is "coverable" if it is part of at least one such placement, over
//! all four rotations and all origins.

use std::collections::HashSet;

use super::shapes::Grid;

pub fn coverable_cells(move_board: &[Vec<i32>], rotations: &[Grid]) -> HashSet<(usize, usize)> {
    let height = move_board.len();
    let width = if height > 0 { move_board[0].len() } else { 0 };
    let mut coverable = HashSet::new();

    for rotation in rotations {
        let offsets = rotation.filled_offsets();
        if offsets.is_empty() {
            continue;
        }
        for origin_y in 0..height {
            for origin_x in 0..width {
                if fits(move_board, width, height, &offsets, origin_x, origin_y) {
                    for (dx, dy) in &offsets {
                        coverable.insert((origin_x + dx, origin_y + dy));
                    }
                }
            }
        }
    }
    coverable
}

fn fits(
    move_board: &[Vec<i32>],
    width: usize,
    height: usize,
    offsets: &[(usize, usize)],
    origin_x: usize,
    origin_y: usize,
) -> bool {
    for (dx, dy) in offsets {
        let x = origin_x + dx;
        let y = origin_y + dy;
        if x >= width || y >= height {
            return false;
        }
        if move_board[y][x] != 0 {
            return false;
        }
    }
    true
}

/// Marks every still-`0` cell that is not coverable with `dead_value`.
/// Returns the number of cells changed.
pub fn prune_dead(move_board: &mut Vec<Vec<i32>>, rotations: &[Grid], dead_value: i32) -> usize {
    let coverable = coverable_cells(move_board, rotations);
    let mut changed = 0;
    for (y, row) in move_board.iter_mut().enumerate() {
        for (x, cell) in row.iter_mut().enumerate() {
            if *cell == 0 && !coverable.contains(&(x, y)) {
                *cell = dead_value;
                changed += 1;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domino_rotations() -> Vec<Grid> {
        Grid::from_shape("11", 2, 1).rotations()
    }

    #[test]
    fn all_cells_coverable_on_open_2x2_board() {
        let mut board = vec![vec![0; 2]; 2];
        let changed = prune_dead(&mut board, &domino_rotations(), -3);
        assert_eq!(changed, 0);
        assert!(board.iter().flatten().all(|&c| c == 0));
    }

    #[test]
    fn isolated_single_cell_becomes_dead() {
        // A single free cell surrounded by occupied cells: no domino
        // placement can land entirely on zeros.
        let mut board = vec![vec![1, 1, 1], vec![1, 0, 1], vec![1, 1, 1]];
        let changed = prune_dead(&mut board, &domino_rotations(), -3);
        assert_eq!(changed, 1);
        assert_eq!(board[1][1], -3);
    }

    #[test]
    fn pair_of_adjacent_zeros_stays_coverable() {
        let mut board = vec![vec![1, 1, 1], vec![1, 0, 0], vec![1, 1, 1]];
        let changed = prune_dead(&mut board, &domino_rotations(), -3);
        assert_eq!(changed, 0);
    }
}
