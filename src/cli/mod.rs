//! CLI-specific utilities for terracost
//!
//! Argument parsing helpers and progress display, kept apart from the library.

pub mod progress;

pub use progress::ProgressManager;

use terracost::GridPoint;

/// Parse a `row,col` source cell
pub fn parse_grid_point(s: &str) -> Result<GridPoint, String> {
    let (row, col) = s
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got '{s}'"))?;
    let row = row
        .trim()
        .parse()
        .map_err(|e| format!("bad row in '{s}': {e}"))?;
    let col = col
        .trim()
        .parse()
        .map_err(|e| format!("bad column in '{s}': {e}"))?;
    Ok(GridPoint::new(row, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grid_point() {
        assert_eq!(parse_grid_point("3,14").unwrap(), GridPoint::new(3, 14));
        assert_eq!(parse_grid_point(" 0 , 7 ").unwrap(), GridPoint::new(0, 7));
        assert!(parse_grid_point("3").is_err());
        assert!(parse_grid_point("a,1").is_err());
        assert!(parse_grid_point("-1,2").is_err());
    }
}
