/// Spreads the gap between a group's explicit colspans and the page
/// column count round-robin across its panels, first panels first, so a
/// short row still fills the page width.
pub fn balance_colspans(colspans: &[usize], page_columns: usize) -> Vec<usize> {
    let mut balanced: Vec<usize> = colspans.iter().map(|span| (*span).max(1)).collect();
    let total: usize = balanced.iter().sum();
    if balanced.is_empty() || total >= page_columns {
        return balanced;
    }
    let mut shortfall = page_columns - total;
    let mut index = 0;
    while shortfall > 0 {
        balanced[index] += 1;
        shortfall -= 1;
        index = (index + 1) % balanced.len();
    }
    balanced
}

/// Row accounting for the plot pass. A group consumes a row only when at
/// least one of its panels rendered; the caller flushes the page whenever
/// [`Paginator::advance`] says it just filled, and always flushes the
/// final page, even a blank one, so every report emits at least one page.
#[derive(Debug)]
pub struct Paginator {
    rows_per_page: usize,
    rows_on_page: usize,
}

impl Paginator {
    pub const ROWS_PER_PAGE: usize = 3;

    pub fn new(rows_per_page: usize) -> Paginator {
        Paginator {
            rows_per_page: rows_per_page.max(1),
            rows_on_page: 0,
        }
    }

    /// Grid row the next group renders into, zero-based from the top of
    /// the current page.
    pub fn row_on_page(&self) -> usize {
        self.rows_on_page
    }

    /// Registers one rendered row. True means the page just filled and
    /// must be flushed before the next group draws.
    pub fn advance(&mut self) -> bool {
        self.rows_on_page += 1;
        if self.rows_on_page == self.rows_per_page {
            self.rows_on_page = 0;
            return true;
        }
        false
    }
}
