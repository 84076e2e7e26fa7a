//! Delimited Matrix Codec
//!
//! Packs a 2-D matrix of text cells into one string so an array can travel
//! through a channel that carries a single text value (an RTD topic
//! parameter or an RTD result).
//!
//! # Format
//!
//! - `|` separates rows, `,` separates cells.
//! - A literal `\`, `,` or `|` inside a cell is preceded by `\`.
//! - No type tags and no length prefixes.
//!
//! Rows without cells are skipped when encoding. A final row consisting of
//! one empty cell encodes to nothing, so it does not survive a round trip;
//! neither does the matrix `[[""]]`.

/// Row-major matrix of text cells.
pub type Matrix = Vec<Vec<String>>;

pub const ROW_SEPARATOR: char = '|';
pub const CELL_SEPARATOR: char = ',';
pub const ESCAPE: char = '\\';

fn needs_escape(c: char) -> bool {
    c == ESCAPE || c == CELL_SEPARATOR || c == ROW_SEPARATOR
}

/// Encode a matrix into a single string.
pub fn encode<R, S>(matrix: &[R]) -> String
where
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    // Size the buffer up front; cells rarely need escaping.
    let capacity: usize = matrix
        .iter()
        .map(|row| {
            let row: &[S] = row.as_ref();
            row.iter().map(|c| AsRef::<str>::as_ref(c).len() + 1).sum::<usize>()
        })
        .sum();
    let mut out = String::with_capacity(capacity);

    let mut first_row = true;
    for row in matrix {
        let row: &[S] = row.as_ref();
        if row.is_empty() {
            continue;
        }
        if !first_row {
            out.push(ROW_SEPARATOR);
        }
        first_row = false;

        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push(CELL_SEPARATOR);
            }
            let cell: &str = cell.as_ref();
            for c in cell.chars() {
                if needs_escape(c) {
                    out.push(ESCAPE);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Decode a string produced by [`encode`].
///
/// Returns an empty matrix for empty input. A dangling escape at the very
/// end is dropped.
pub fn decode(encoded: &str) -> Matrix {
    let mut matrix = Matrix::new();
    let mut row = Vec::new();
    let mut cell = String::new();
    let mut escaping = false;
    // Set while the last unescaped character was a cell separator, which
    // means an empty cell follows it.
    let mut open_cell = false;

    for c in encoded.chars() {
        if escaping {
            cell.push(c);
            escaping = false;
            open_cell = false;
            continue;
        }
        match c {
            ESCAPE => {
                escaping = true;
                open_cell = false;
            }
            CELL_SEPARATOR => {
                row.push(std::mem::take(&mut cell));
                open_cell = true;
            }
            ROW_SEPARATOR => {
                row.push(std::mem::take(&mut cell));
                matrix.push(std::mem::take(&mut row));
                open_cell = false;
            }
            _ => {
                cell.push(c);
                open_cell = false;
            }
        }
    }

    if !cell.is_empty() || open_cell {
        row.push(cell);
    }
    if !row.is_empty() {
        matrix.push(row);
    }
    matrix
}
