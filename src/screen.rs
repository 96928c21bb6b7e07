//! Screen model: the grid, scrollback, cursor, attributes, and modes.
//!
//! The screen is a pure state machine. Nothing here blocks or performs I/O;
//! the parser drives mutations and the host drains dirty rows and events.

/// Colors a cell can carry. `Ansi` covers the 16 base colors, `Palette256`
/// the xterm 256-color cube, `Rgb` direct color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Ansi(u8),
    Palette256(u8),
    Rgb(u8, u8, u8),
}

/// Cell width class. Wide cells occupy two columns; the right-hand column
/// holds a continuation cell owned by the wide cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CellWidth {
    #[default]
    Single,
    Wide,
}

impl CellWidth {
    /// Number of columns this width class occupies.
    #[inline]
    pub fn columns(self) -> usize {
        match self {
            CellWidth::Single => 1,
            CellWidth::Wide => 2,
        }
    }
}

/// Classify a scalar into its terminal column width.
///
/// Wide ranges cover Hangul Jamo, CJK unified ideographs and compatibility
/// forms, Hangul syllables, fullwidth forms, and the supplementary
/// ideographic planes. Combining marks and ZWJ are treated as `Single`.
pub fn glyph_width(c: char) -> CellWidth {
    match c as u32 {
        0x1100..=0x115F
        | 0x2E80..=0x9FFF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x2FFFD
        | 0x30000..=0x3FFFD => CellWidth::Wide,
        _ => CellWidth::Single,
    }
}

/// A single cell in the terminal grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell {
    pub glyph: char,
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
    pub hidden: bool,
    pub strikethrough: bool,
    pub width: CellWidth,
    /// True for the right half of a wide pair. The glyph lives in the cell
    /// to the left.
    pub wide_continuation: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            glyph: ' ',
            fg: Color::Default,
            bg: Color::Default,
            bold: false,
            dim: false,
            italic: false,
            underline: false,
            blink: false,
            reverse: false,
            hidden: false,
            strikethrough: false,
            width: CellWidth::Single,
            wide_continuation: false,
        }
    }
}

impl Cell {
    #[inline]
    pub fn is_continuation(&self) -> bool {
        self.wide_continuation
    }
}

/// The live attribute register applied to newly printed cells.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Attributes {
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
    pub hidden: bool,
    pub strikethrough: bool,
}

/// Cursor state, including the deferred-wrap flag.
#[derive(Clone, Copy, Debug)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
    pub visible: bool,
    pub blink: bool,
    /// Set after printing into the last column; the next printable wraps,
    /// a cursor movement clears it.
    pub pending_wrap: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            visible: true,
            blink: true,
            pending_wrap: false,
        }
    }
}

/// Snapshot taken by DECSC: cursor position plus the attribute register.
#[derive(Clone, Copy, Debug, Default)]
struct SavedCursor {
    row: usize,
    col: usize,
    attrs: Attributes,
}

/// Terminal modes. `alternate_screen` is accepted but inert.
#[derive(Clone, Debug)]
pub struct Modes {
    pub autowrap: bool,
    pub origin_mode: bool,
    pub insert_mode: bool,
    pub application_cursor_keys: bool,
    pub application_keypad: bool,
    pub bracketed_paste: bool,
    pub linefeed_newline: bool,
    pub alternate_screen: bool,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            autowrap: true,
            origin_mode: false,
            insert_mode: false,
            application_cursor_keys: false,
            application_keypad: false,
            bracketed_paste: false,
            linefeed_newline: false,
            alternate_screen: false,
        }
    }
}

/// Events surfaced to the host. `SessionExited` is pushed by the session
/// supervisor; the rest originate in the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Bell,
    TitleChanged(String),
    SessionExited(i32),
}

/// An inclusive rectangle-free text selection over the grid, in
/// (row, col) coordinates. Start and end need not be ordered.
#[derive(Clone, Copy, Debug)]
pub struct Selection {
    pub start: (usize, usize),
    pub end: (usize, usize),
}

/// Ring buffer for scrollback history.
///
/// Lines are allocated lazily and recycled in place: when full, `push`
/// hands back the slot of the oldest line so the caller can swap the
/// evicted grid row in without reallocating.
pub struct ScrollbackRing {
    lines: Vec<Vec<Cell>>,
    start: usize,
    count: usize,
    capacity: usize,
}

impl ScrollbackRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(capacity.min(1024)),
            start: 0,
            count: 0,
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Claim the slot for a new line and return it for the caller to fill.
    /// Returns `None` when scrollback is disabled (capacity 0). When the
    /// ring is full the oldest line's slot is recycled.
    pub fn push(&mut self, cols: usize) -> Option<&mut Vec<Cell>> {
        if self.capacity == 0 {
            return None;
        }
        let idx = (self.start + self.count) % self.capacity;
        if self.count == self.capacity {
            self.start = (self.start + 1) % self.capacity;
        } else {
            if idx >= self.lines.len() {
                self.lines.push(vec![Cell::default(); cols]);
            }
            self.count += 1;
        }
        Some(&mut self.lines[idx])
    }

    /// Get a line by logical index: 0 is the oldest, `len() - 1` the newest.
    pub fn get(&self, index: usize) -> Option<&[Cell]> {
        if index >= self.count {
            return None;
        }
        Some(&self.lines[(self.start + index) % self.capacity])
    }

    /// Drop all lines. Allocations are kept for reuse.
    pub fn clear(&mut self) {
        self.start = 0;
        self.count = 0;
    }
}

/// Bitmap of rows whose contents changed since the host last drained.
struct DirtyRows {
    words: Vec<u64>,
    rows: usize,
}

impl DirtyRows {
    fn new(rows: usize) -> Self {
        Self {
            words: vec![0; rows.div_ceil(64)],
            rows,
        }
    }

    #[inline]
    fn mark(&mut self, row: usize) {
        if row < self.rows {
            self.words[row / 64] |= 1u64 << (row % 64);
        }
    }

    fn mark_region(&mut self, start: usize, end: usize) {
        for row in start..=end.min(self.rows.saturating_sub(1)) {
            self.mark(row);
        }
    }

    fn mark_all(&mut self) {
        self.words.fill(!0);
    }

    /// Collect the set rows in ascending order and clear the bitmap.
    fn drain(&mut self) -> Vec<usize> {
        let mut rows = Vec::new();
        for (w, word) in self.words.iter_mut().enumerate() {
            let mut bits = *word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                let row = w * 64 + bit;
                if row < self.rows {
                    rows.push(row);
                }
                bits &= bits - 1;
            }
            *word = 0;
        }
        rows
    }
}

/// The terminal screen: grid, scrollback, cursor, attribute register,
/// scroll region, modes, and dirty tracking.
pub struct Screen {
    /// Cell storage. Visual ordering goes through `line_map`.
    grid: Vec<Vec<Cell>>,
    /// Maps visual row index to grid row index, so scrolling rotates
    /// indices instead of moving cells.
    line_map: Vec<usize>,
    rows: usize,
    cols: usize,
    cursor: Cursor,
    saved_cursor: SavedCursor,
    attrs: Attributes,
    modes: Modes,
    scroll_top: usize,
    scroll_bottom: usize,
    scrollback: ScrollbackRing,
    /// Lines scrolled up into history by the viewer; 0 means live view.
    scroll_offset: usize,
    tab_stops: Vec<bool>,
    dirty: DirtyRows,
    title: String,
    events: Vec<Event>,
    /// Bytes to send back to the child (status reports and the like).
    response_queue: Vec<u8>,
}

fn default_tab_stops(cols: usize) -> Vec<bool> {
    (0..cols).map(|c| c % 8 == 0).collect()
}

impl Screen {
    /// Default scrollback bound.
    pub const DEFAULT_SCROLLBACK: usize = 10_000;

    /// Creates a screen. Dimensions are clamped to at least 1x1.
    pub fn new(rows: usize, cols: usize, max_scrollback: usize) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let mut dirty = DirtyRows::new(rows);
        dirty.mark_all();
        Self {
            grid: vec![vec![Cell::default(); cols]; rows],
            line_map: (0..rows).collect(),
            rows,
            cols,
            cursor: Cursor::default(),
            saved_cursor: SavedCursor::default(),
            attrs: Attributes::default(),
            modes: Modes::default(),
            scroll_top: 0,
            scroll_bottom: rows - 1,
            scrollback: ScrollbackRing::new(max_scrollback),
            scroll_offset: 0,
            tab_stops: default_tab_stops(cols),
            dirty,
            title: String::new(),
            events: Vec::new(),
            response_queue: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Grid size as (rows, cols).
    pub fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn modes(&self) -> &Modes {
        &self.modes
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    /// Scroll region as (top, bottom), inclusive.
    pub fn scroll_region(&self) -> (usize, usize) {
        (self.scroll_top, self.scroll_bottom)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Cell at a visual position.
    pub fn cell_at(&self, row: usize, col: usize) -> Option<&Cell> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(&self.grid[self.line_map[row]][col])
    }

    /// A visual row as a slice of cells.
    pub fn row(&self, row: usize) -> Option<&[Cell]> {
        if row >= self.rows {
            return None;
        }
        Some(&self.grid[self.line_map[row]])
    }

    /// Text content of a visual row, continuation cells skipped, trailing
    /// blanks trimmed.
    pub fn row_text(&self, row: usize) -> String {
        let mut out = String::new();
        if let Some(cells) = self.row(row) {
            for cell in cells {
                if !cell.is_continuation() {
                    out.push(cell.glyph);
                }
            }
        }
        out.truncate(out.trim_end().len());
        out
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// A committed scrollback row; index 0 is the oldest.
    pub fn scrollback_row(&self, index: usize) -> Option<&[Cell]> {
        self.scrollback.get(index)
    }

    /// Rows changed since the last drain, ascending. A second call without
    /// intervening mutation returns an empty set.
    pub fn drain_dirty(&mut self) -> Vec<usize> {
        self.dirty.drain()
    }

    /// Take all pending events in emission order.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Pending bytes to write back to the child, if any.
    pub fn take_response(&mut self) -> Option<Vec<u8>> {
        if self.response_queue.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.response_queue))
        }
    }

    // ------------------------------------------------------------------
    // Viewport (host-side scrollback viewing)
    // ------------------------------------------------------------------

    /// Current viewport offset into history; 0 is the live view.
    pub fn viewport_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Scroll the viewport up into history by n lines. Returns the new
    /// offset, clamped to the history length.
    pub fn scroll_viewport_up(&mut self, n: usize) -> usize {
        let new_offset = (self.scroll_offset + n).min(self.scrollback.len());
        if new_offset != self.scroll_offset {
            self.scroll_offset = new_offset;
            self.dirty.mark_all();
        }
        self.scroll_offset
    }

    /// Scroll the viewport back toward the live view by n lines.
    pub fn scroll_viewport_down(&mut self, n: usize) -> usize {
        let new_offset = self.scroll_offset.saturating_sub(n);
        if new_offset != self.scroll_offset {
            self.scroll_offset = new_offset;
            self.dirty.mark_all();
        }
        self.scroll_offset
    }

    /// Snap the viewport back to the live view.
    pub fn reset_viewport(&mut self) {
        if self.scroll_offset != 0 {
            self.scroll_offset = 0;
            self.dirty.mark_all();
        }
    }

    /// The row shown at viewport position `i`: history lines first when
    /// scrolled up, then the live grid.
    pub fn visible_row(&self, i: usize) -> Option<&[Cell]> {
        if i >= self.rows {
            return None;
        }
        let offset = self.scroll_offset.min(self.scrollback.len());
        if offset == 0 {
            return self.row(i);
        }
        let from_history = offset.min(self.rows);
        if i < from_history {
            self.scrollback.get(self.scrollback.len() - offset + i)
        } else {
            self.row(i - from_history)
        }
    }

    /// Extract the text covered by a selection. Endpoints are normalized;
    /// trailing blanks are trimmed per line and rows joined with newlines.
    pub fn text_in(&self, selection: &Selection) -> String {
        let (mut start, mut end) = (selection.start, selection.end);
        if end.0 < start.0 || (end.0 == start.0 && end.1 < start.1) {
            std::mem::swap(&mut start, &mut end);
        }
        let mut out = String::new();
        for row in start.0..=end.0.min(self.rows.saturating_sub(1)) {
            let cells = match self.row(row) {
                Some(c) => c,
                None => break,
            };
            let from = if row == start.0 { start.1 } else { 0 };
            let to = if row == end.0 {
                (end.1 + 1).min(self.cols)
            } else {
                self.cols
            };
            let mut line = String::new();
            for cell in cells.iter().take(to).skip(from) {
                if !cell.is_continuation() {
                    line.push(cell.glyph);
                }
            }
            line.truncate(line.trim_end().len());
            out.push_str(&line);
            if row < end.0 {
                out.push('\n');
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Events (pushed by the parser and the session supervisor)
    // ------------------------------------------------------------------

    pub fn bell(&mut self) {
        self.events.push(Event::Bell);
    }

    pub fn set_title(&mut self, title: String) {
        self.title = title.clone();
        self.events.push(Event::TitleChanged(title));
    }

    // ------------------------------------------------------------------
    // Printing
    // ------------------------------------------------------------------

    #[inline]
    fn make_cell(&self, glyph: char, width: CellWidth, continuation: bool) -> Cell {
        Cell {
            glyph,
            fg: self.attrs.fg,
            bg: self.attrs.bg,
            bold: self.attrs.bold,
            dim: self.attrs.dim,
            italic: self.attrs.italic,
            underline: self.attrs.underline,
            blink: self.attrs.blink,
            reverse: self.attrs.reverse,
            hidden: self.attrs.hidden,
            strikethrough: self.attrs.strikethrough,
            width,
            wide_continuation: continuation,
        }
    }

    /// Ensure a grid row has the current width and only default cells.
    fn clear_grid_row(&mut self, grid_row: usize) {
        let row = &mut self.grid[grid_row];
        if row.len() != self.cols {
            row.resize(self.cols, Cell::default());
        }
        row.fill(Cell::default());
    }

    /// Re-establish wide-pair integrity on a row: a wide cell without its
    /// continuation, or a continuation without its wide cell, is blanked.
    fn repair_wide_pairs(&mut self, visual_row: usize) {
        let grid_row = self.line_map[visual_row];
        let row = &mut self.grid[grid_row];
        let cols = row.len();
        for c in 0..cols {
            if row[c].wide_continuation {
                if c == 0 || row[c - 1].width != CellWidth::Wide {
                    row[c] = Cell::default();
                }
            } else if row[c].width == CellWidth::Wide
                && (c + 1 >= cols || !row[c + 1].wide_continuation)
            {
                row[c] = Cell::default();
            }
        }
    }

    /// Print one glyph at the cursor, honoring deferred wrap, wide-cell
    /// placement, and insert mode.
    pub fn write_glyph(&mut self, c: char) {
        let width = glyph_width(c);
        let w = width.columns();

        // A wide glyph can never be placed on a one-column grid.
        if width == CellWidth::Wide && self.cols < 2 {
            return;
        }

        if self.cursor.pending_wrap && self.modes.autowrap {
            self.cursor.pending_wrap = false;
            self.carriage_return();
            self.line_feed();
        }

        // A wide glyph cannot start in the last column: pad the column with
        // a blank carrying the current background, then wrap.
        if width == CellWidth::Wide && self.cursor.col == self.cols - 1 {
            if !self.modes.autowrap {
                return;
            }
            let grid_row = self.line_map[self.cursor.row];
            let col = self.cursor.col;
            if self.grid[grid_row][col].wide_continuation && col > 0 {
                self.grid[grid_row][col - 1] = Cell::default();
            }
            self.grid[grid_row][col] = Cell {
                bg: self.attrs.bg,
                ..Cell::default()
            };
            self.dirty.mark(self.cursor.row);
            self.carriage_return();
            self.line_feed();
        }

        if self.modes.insert_mode {
            let n = w.min(self.cols - self.cursor.col);
            let grid_row = self.line_map[self.cursor.row];
            let row = &mut self.grid[grid_row];
            row.truncate(self.cols - n);
            row.splice(
                self.cursor.col..self.cursor.col,
                std::iter::repeat(Cell::default()).take(n),
            );
            // The shift can sever a wide pair at either seam.
            self.repair_wide_pairs(self.cursor.row);
        }

        let grid_row = self.line_map[self.cursor.row];
        let col = self.cursor.col;

        // Overwriting either half of an existing wide pair clears the pair.
        if self.grid[grid_row][col].wide_continuation && col > 0 {
            self.grid[grid_row][col - 1] = Cell::default();
        }
        if self.grid[grid_row][col].width == CellWidth::Wide && col + 1 < self.cols {
            self.grid[grid_row][col + 1] = Cell::default();
        }

        self.grid[grid_row][col] = self.make_cell(c, width, false);

        if width == CellWidth::Wide {
            if self.grid[grid_row][col + 1].width == CellWidth::Wide && col + 2 < self.cols {
                self.grid[grid_row][col + 2] = Cell::default();
            }
            self.grid[grid_row][col + 1] = self.make_cell(' ', CellWidth::Single, true);
        }

        // Deferred wrap: the cursor parks on the last column rather than
        // wrapping eagerly, so the last column can hold a glyph without
        // spilling an empty line.
        let new_col = col + w;
        if new_col >= self.cols {
            self.cursor.col = self.cols - 1;
            if self.modes.autowrap {
                self.cursor.pending_wrap = true;
            }
        } else {
            self.cursor.col = new_col;
        }
        self.dirty.mark(self.cursor.row);
    }

    /// REP: repeat the glyph to the left of the cursor.
    pub fn repeat_last_glyph(&mut self, n: usize) {
        if self.cursor.col == 0 {
            return;
        }
        let grid_row = self.line_map[self.cursor.row];
        let cell = self.grid[grid_row][self.cursor.col - 1];
        if cell.is_continuation() {
            return;
        }
        for _ in 0..n.max(1).min(65_535) {
            self.write_glyph(cell.glyph);
        }
    }

    // ------------------------------------------------------------------
    // Control characters and simple cursor motion
    // ------------------------------------------------------------------

    pub fn backspace(&mut self) {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
        }
        self.cursor.pending_wrap = false;
    }

    /// Move to the next tab stop, or the last column when none remain.
    pub fn tab(&mut self) {
        let mut col = self.cursor.col + 1;
        while col < self.cols && !self.tab_stops[col] {
            col += 1;
        }
        self.cursor.col = col.min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    /// HTS: set a tab stop at the cursor column.
    pub fn set_tab_stop(&mut self) {
        self.tab_stops[self.cursor.col] = true;
    }

    /// TBC: 0 clears the stop at the cursor, 3 clears them all.
    pub fn clear_tab_stop(&mut self, mode: u8) {
        match mode {
            0 => self.tab_stops[self.cursor.col] = false,
            3 => self.tab_stops.fill(false),
            _ => log::debug!("unhandled tab clear mode {}", mode),
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
        self.cursor.pending_wrap = false;
    }

    /// Move down one row, scrolling when at the bottom of the scroll region.
    pub fn line_feed(&mut self) {
        self.cursor.pending_wrap = false;
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.row + 1 < self.rows {
            self.cursor.row += 1;
        }
    }

    /// Move up one row, scrolling down when at the top of the scroll region.
    pub fn reverse_line_feed(&mut self) {
        self.cursor.pending_wrap = false;
        if self.cursor.row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    /// Line feed plus carriage return (NEL).
    pub fn next_line(&mut self) {
        self.carriage_return();
        self.line_feed();
    }

    // ------------------------------------------------------------------
    // Addressed cursor movement
    // ------------------------------------------------------------------

    /// Absolute move, 0-indexed. Honors origin mode: with it set, the row is
    /// relative to the scroll region and confined to it.
    pub fn move_cursor_absolute(&mut self, row: usize, col: usize) {
        if self.modes.origin_mode {
            self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
        } else {
            self.cursor.row = row.min(self.rows - 1);
        }
        self.cursor.col = col.min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    /// Relative move, clamped to the grid (or the scroll region under
    /// origin mode).
    pub fn move_cursor_relative(&mut self, dr: isize, dc: isize) {
        let (min_row, max_row) = if self.modes.origin_mode {
            (self.scroll_top, self.scroll_bottom)
        } else {
            (0, self.rows - 1)
        };
        let row = self.cursor.row as isize + dr;
        let col = self.cursor.col as isize + dc;
        self.cursor.row = row.clamp(min_row as isize, max_row as isize) as usize;
        self.cursor.col = col.clamp(0, self.cols as isize - 1) as usize;
        self.cursor.pending_wrap = false;
    }

    /// Move to an absolute column, 0-indexed, row unchanged.
    pub fn column_absolute(&mut self, col: usize) {
        self.cursor.col = col.min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    /// Move to an absolute row, 0-indexed, column unchanged. Honors origin
    /// mode.
    pub fn row_absolute(&mut self, row: usize) {
        if self.modes.origin_mode {
            self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
        } else {
            self.cursor.row = row.min(self.rows - 1);
        }
        self.cursor.pending_wrap = false;
    }

    // ------------------------------------------------------------------
    // Erase and editing operations
    // ------------------------------------------------------------------

    /// ED: 0 = cursor to end, 1 = start to cursor (inclusive), 2 = whole
    /// grid, 3 = whole grid plus scrollback.
    pub fn erase_display(&mut self, mode: u8) {
        match mode {
            0 => {
                self.erase_line(0);
                for v in self.cursor.row + 1..self.rows {
                    let grid_row = self.line_map[v];
                    self.clear_grid_row(grid_row);
                    self.dirty.mark(v);
                }
            }
            1 => {
                for v in 0..self.cursor.row {
                    let grid_row = self.line_map[v];
                    self.clear_grid_row(grid_row);
                    self.dirty.mark(v);
                }
                self.erase_line(1);
            }
            2 | 3 => {
                for v in 0..self.rows {
                    let grid_row = self.line_map[v];
                    self.clear_grid_row(grid_row);
                }
                if mode == 3 {
                    self.scrollback.clear();
                }
                self.dirty.mark_all();
            }
            _ => log::debug!("unhandled erase display mode {}", mode),
        }
    }

    /// EL: 0 = cursor to end of line, 1 = start to cursor (inclusive),
    /// 2 = whole line.
    pub fn erase_line(&mut self, mode: u8) {
        let grid_row = self.line_map[self.cursor.row];
        let col = self.cursor.col;
        match mode {
            0 => self.grid[grid_row][col..].fill(Cell::default()),
            1 => self.grid[grid_row][..=col].fill(Cell::default()),
            2 => self.grid[grid_row].fill(Cell::default()),
            _ => {
                log::debug!("unhandled erase line mode {}", mode);
                return;
            }
        }
        self.repair_wide_pairs(self.cursor.row);
        self.dirty.mark(self.cursor.row);
    }

    /// ECH: blank n cells at the cursor without moving it.
    pub fn erase_chars(&mut self, n: usize) {
        let grid_row = self.line_map[self.cursor.row];
        let col = self.cursor.col;
        let end = (col + n.max(1)).min(self.cols);
        self.grid[grid_row][col..end].fill(Cell::default());
        self.repair_wide_pairs(self.cursor.row);
        self.dirty.mark(self.cursor.row);
    }

    /// ICH: shift cells right from the cursor, dropping off the row end.
    pub fn insert_chars(&mut self, n: usize) {
        let n = n.max(1).min(self.cols - self.cursor.col);
        let grid_row = self.line_map[self.cursor.row];
        let row = &mut self.grid[grid_row];
        row.truncate(self.cols - n);
        row.splice(
            self.cursor.col..self.cursor.col,
            std::iter::repeat(Cell::default()).take(n),
        );
        self.repair_wide_pairs(self.cursor.row);
        self.dirty.mark(self.cursor.row);
    }

    /// DCH: shift cells left into the cursor, padding the row end.
    pub fn delete_chars(&mut self, n: usize) {
        let n = n.max(1).min(self.cols - self.cursor.col);
        let grid_row = self.line_map[self.cursor.row];
        let row = &mut self.grid[grid_row];
        let end = (self.cursor.col + n).min(row.len());
        row.drain(self.cursor.col..end);
        row.resize(self.cols, Cell::default());
        self.repair_wide_pairs(self.cursor.row);
        self.dirty.mark(self.cursor.row);
    }

    /// IL: insert blank lines at the cursor, pushing lines below down within
    /// the scroll region. No-op when the cursor is outside the region.
    pub fn insert_lines(&mut self, n: usize) {
        if self.cursor.row < self.scroll_top || self.cursor.row > self.scroll_bottom {
            return;
        }
        let n = n.max(1).min(self.scroll_bottom - self.cursor.row + 1);
        for _ in 0..n {
            let recycled = self.line_map[self.scroll_bottom];
            for i in (self.cursor.row + 1..=self.scroll_bottom).rev() {
                self.line_map[i] = self.line_map[i - 1];
            }
            self.line_map[self.cursor.row] = recycled;
            self.clear_grid_row(recycled);
        }
        self.dirty.mark_region(self.cursor.row, self.scroll_bottom);
    }

    /// DL: delete lines at the cursor, pulling lines below up within the
    /// scroll region. No-op when the cursor is outside the region.
    pub fn delete_lines(&mut self, n: usize) {
        if self.cursor.row < self.scroll_top || self.cursor.row > self.scroll_bottom {
            return;
        }
        let n = n.max(1).min(self.scroll_bottom - self.cursor.row + 1);
        for _ in 0..n {
            let recycled = self.line_map[self.cursor.row];
            for i in self.cursor.row..self.scroll_bottom {
                self.line_map[i] = self.line_map[i + 1];
            }
            self.line_map[self.scroll_bottom] = recycled;
            self.clear_grid_row(recycled);
        }
        self.dirty.mark_region(self.cursor.row, self.scroll_bottom);
    }

    // ------------------------------------------------------------------
    // Scrolling
    // ------------------------------------------------------------------

    /// Scroll the region up by n lines. Rows leaving a region that starts at
    /// the top of the grid are committed to scrollback (a single-row region
    /// recycles in place and never grows history).
    pub fn scroll_up(&mut self, n: usize) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        let region = bottom - top + 1;
        let n = n.min(region);
        for _ in 0..n {
            let recycled = self.line_map[top];
            if top == 0 && region > 1 {
                if let Some(slot) = self.scrollback.push(self.cols) {
                    std::mem::swap(&mut self.grid[recycled], slot);
                }
            }
            self.clear_grid_row(recycled);
            self.line_map.copy_within(top + 1..=bottom, top);
            self.line_map[bottom] = recycled;
        }
        self.dirty.mark_region(top, bottom);
    }

    /// Scroll the region down by n lines. Never writes to scrollback.
    pub fn scroll_down(&mut self, n: usize) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        let n = n.min(bottom - top + 1);
        for _ in 0..n {
            let recycled = self.line_map[bottom];
            self.line_map.copy_within(top..bottom, top + 1);
            self.line_map[top] = recycled;
            self.clear_grid_row(recycled);
        }
        self.dirty.mark_region(top, bottom);
    }

    /// DECSTBM. Arguments are 0-indexed and clamped; an inverted pair is
    /// ignored. The cursor homes to the grid origin, or the region origin
    /// under origin mode.
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let top = top.min(self.rows - 1);
        let bottom = bottom.min(self.rows - 1);
        if top > bottom {
            log::debug!("ignoring inverted scroll region {}..{}", top, bottom);
            return;
        }
        self.scroll_top = top;
        self.scroll_bottom = bottom;
        self.cursor.row = if self.modes.origin_mode { top } else { 0 };
        self.cursor.col = 0;
        self.cursor.pending_wrap = false;
    }

    // ------------------------------------------------------------------
    // Saved cursor, attributes, modes, reset
    // ------------------------------------------------------------------

    /// DECSC: snapshot cursor position and the attribute register.
    pub fn save_cursor(&mut self) {
        self.saved_cursor = SavedCursor {
            row: self.cursor.row,
            col: self.cursor.col,
            attrs: self.attrs,
        };
    }

    /// DECRC: restore the snapshot, clamped to the current bounds.
    pub fn restore_cursor(&mut self) {
        self.cursor.row = self.saved_cursor.row.min(self.rows - 1);
        self.cursor.col = self.saved_cursor.col.min(self.cols - 1);
        self.attrs = self.saved_cursor.attrs;
        self.cursor.pending_wrap = false;
    }

    /// RIS: attributes, cursor, modes, tab stops, and scroll region back to
    /// defaults, grid erased. Scrollback survives.
    pub fn reset(&mut self) {
        self.attrs = Attributes::default();
        self.cursor = Cursor::default();
        self.saved_cursor = SavedCursor::default();
        self.modes = Modes::default();
        self.scroll_top = 0;
        self.scroll_bottom = self.rows - 1;
        self.scroll_offset = 0;
        self.tab_stops = default_tab_stops(self.cols);
        self.response_queue.clear();
        for grid_row in 0..self.grid.len() {
            self.clear_grid_row(grid_row);
        }
        self.dirty.mark_all();
    }

    pub fn reset_attributes(&mut self) {
        self.attrs = Attributes::default();
    }

    /// Apply an SGR parameter list to the attribute register. An empty list
    /// is a reset.
    pub fn apply_sgr(&mut self, params: &[u32]) {
        if params.is_empty() {
            self.attrs = Attributes::default();
            return;
        }
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.attrs = Attributes::default(),
                1 => self.attrs.bold = true,
                2 => self.attrs.dim = true,
                3 => self.attrs.italic = true,
                4 => self.attrs.underline = true,
                5 | 6 => self.attrs.blink = true,
                7 => self.attrs.reverse = true,
                8 => self.attrs.hidden = true,
                9 => self.attrs.strikethrough = true,
                22 => {
                    self.attrs.bold = false;
                    self.attrs.dim = false;
                }
                23 => self.attrs.italic = false,
                24 => self.attrs.underline = false,
                25 => self.attrs.blink = false,
                27 => self.attrs.reverse = false,
                28 => self.attrs.hidden = false,
                29 => self.attrs.strikethrough = false,
                30..=37 => self.attrs.fg = Color::Ansi((params[i] - 30) as u8),
                38 => {
                    if let Some((color, used)) = extended_color(params, i) {
                        self.attrs.fg = color;
                        i += used;
                    }
                }
                39 => self.attrs.fg = Color::Default,
                40..=47 => self.attrs.bg = Color::Ansi((params[i] - 40) as u8),
                48 => {
                    if let Some((color, used)) = extended_color(params, i) {
                        self.attrs.bg = color;
                        i += used;
                    }
                }
                49 => self.attrs.bg = Color::Default,
                90..=97 => self.attrs.fg = Color::Ansi((params[i] - 90 + 8) as u8),
                100..=107 => self.attrs.bg = Color::Ansi((params[i] - 100 + 8) as u8),
                other => log::trace!("ignoring SGR {}", other),
            }
            i += 1;
        }
    }

    /// DEC private mode set/reset (the `?`-prefixed family).
    pub fn set_private_mode(&mut self, code: u32, enable: bool) {
        match code {
            1 => self.modes.application_cursor_keys = enable,
            6 => {
                self.modes.origin_mode = enable;
                self.move_cursor_absolute(0, 0);
            }
            7 => {
                self.modes.autowrap = enable;
                if !enable {
                    self.cursor.pending_wrap = false;
                }
            }
            12 => self.cursor.blink = enable,
            25 => self.cursor.visible = enable,
            47 | 1047 | 1049 => {
                // Accepted for accounting only; the buffer itself is not
                // switched.
                self.modes.alternate_screen = enable;
                log::debug!("alternate screen mode {} set to {} (inert)", code, enable);
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => log::debug!("unhandled private mode {} ({})", code, enable),
        }
    }

    /// ANSI mode set/reset.
    pub fn set_ansi_mode(&mut self, code: u32, enable: bool) {
        match code {
            4 => self.modes.insert_mode = enable,
            20 => self.modes.linefeed_newline = enable,
            _ => log::debug!("unhandled ANSI mode {} ({})", code, enable),
        }
    }

    /// DECKPAM / DECKPNM.
    pub fn set_keypad_application(&mut self, enable: bool) {
        self.modes.application_keypad = enable;
    }

    /// DSR: 5 answers "terminal OK", 6 reports the cursor position.
    pub fn device_status_report(&mut self, param: u32) {
        match param {
            5 => self.response_queue.extend_from_slice(b"\x1b[0n"),
            6 => {
                let report = format!(
                    "\x1b[{};{}R",
                    self.cursor.row + 1,
                    self.cursor.col + 1
                );
                self.response_queue.extend_from_slice(report.as_bytes());
            }
            _ => log::debug!("unhandled device status report {}", param),
        }
    }

    /// DA: identify as a VT220-class terminal.
    pub fn device_attributes(&mut self, secondary: bool) {
        let response: &[u8] = if secondary {
            b"\x1b[>0;0;0c"
        } else {
            b"\x1b[?62;c"
        };
        self.response_queue.extend_from_slice(response);
    }

    /// DECALN: fill the grid with 'E' using default attributes.
    pub fn screen_alignment(&mut self) {
        let cell = Cell {
            glyph: 'E',
            ..Cell::default()
        };
        for v in 0..self.rows {
            let grid_row = self.line_map[v];
            let row = &mut self.grid[grid_row];
            if row.len() != self.cols {
                row.resize(self.cols, Cell::default());
            }
            row.fill(cell);
        }
        self.dirty.mark_all();
    }

    // ------------------------------------------------------------------
    // Resize
    // ------------------------------------------------------------------

    /// Reshape the grid. Columns truncate or pad; when rows shrink, the top
    /// rows move to scrollback. The scroll region resets, the cursor clamps,
    /// and every row is marked dirty. Wrapped lines are not reflowed.
    pub fn resize(&mut self, new_rows: usize, new_cols: usize) {
        let new_rows = new_rows.max(1);
        let new_cols = new_cols.max(1);
        if new_rows == self.rows && new_cols == self.cols {
            return;
        }
        log::debug!(
            "screen resize {}x{} -> {}x{}",
            self.rows,
            self.cols,
            new_rows,
            new_cols
        );

        // Detach rows in visual order.
        let mut visual: Vec<Vec<Cell>> = Vec::with_capacity(self.rows);
        for v in 0..self.rows {
            visual.push(std::mem::take(&mut self.grid[self.line_map[v]]));
        }

        // Rows dropped off the top are committed to history.
        let dropped = self.rows.saturating_sub(new_rows);
        for mut row in visual.drain(..dropped) {
            if let Some(slot) = self.scrollback.push(row.len()) {
                std::mem::swap(slot, &mut row);
            }
        }

        let mut grid: Vec<Vec<Cell>> = Vec::with_capacity(new_rows);
        for mut row in visual {
            row.resize(new_cols, Cell::default());
            grid.push(row);
        }
        while grid.len() < new_rows {
            grid.push(vec![Cell::default(); new_cols]);
        }

        self.grid = grid;
        self.line_map = (0..new_rows).collect();
        self.rows = new_rows;
        self.cols = new_cols;
        self.scroll_top = 0;
        self.scroll_bottom = new_rows - 1;
        self.scroll_offset = 0;
        self.tab_stops = default_tab_stops(new_cols);
        self.cursor.row = self.cursor.row.min(new_rows - 1);
        self.cursor.col = self.cursor.col.min(new_cols - 1);
        self.cursor.pending_wrap = false;
        for v in 0..new_rows {
            self.repair_wide_pairs(v);
        }
        self.dirty = DirtyRows::new(new_rows);
        self.dirty.mark_all();
    }
}

/// Parse an SGR 38/48 extended color. Returns the color and the number of
/// extra parameters consumed.
fn extended_color(params: &[u32], i: usize) -> Option<(Color, usize)> {
    match params.get(i + 1)? {
        5 => params
            .get(i + 2)
            .map(|&n| (Color::Palette256(n.min(255) as u8), 2)),
        2 => {
            if i + 4 < params.len() {
                let clamp = |v: u32| v.min(255) as u8;
                Some((
                    Color::Rgb(
                        clamp(params[i + 2]),
                        clamp(params[i + 3]),
                        clamp(params[i + 4]),
                    ),
                    4,
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen() -> Screen {
        Screen::new(5, 10, Screen::DEFAULT_SCROLLBACK)
    }

    fn write_str(screen: &mut Screen, s: &str) {
        for c in s.chars() {
            screen.write_glyph(c);
        }
    }

    #[test]
    fn test_write_advances_cursor() {
        let mut s = screen();
        write_str(&mut s, "Hi");
        assert_eq!(s.cursor().col, 2);
        assert_eq!(s.cell_at(0, 0).unwrap().glyph, 'H');
        assert_eq!(s.cell_at(0, 1).unwrap().glyph, 'i');
    }

    #[test]
    fn test_deferred_wrap() {
        let mut s = screen();
        write_str(&mut s, "0123456789");
        // The cursor parks on the last column instead of wrapping eagerly.
        assert_eq!(s.cursor().col, 9);
        assert!(s.cursor().pending_wrap);
        s.write_glyph('A');
        assert_eq!(s.cursor().row, 1);
        assert_eq!(s.cursor().col, 1);
        assert_eq!(s.cell_at(1, 0).unwrap().glyph, 'A');
        assert_eq!(s.cell_at(0, 9).unwrap().glyph, '9');
    }

    #[test]
    fn test_backspace_clears_pending_wrap() {
        let mut s = screen();
        write_str(&mut s, "0123456789");
        assert!(s.cursor().pending_wrap);
        s.backspace();
        assert!(!s.cursor().pending_wrap);
        assert_eq!(s.cursor().row, 0);
        assert_eq!(s.cursor().col, 8);
    }

    #[test]
    fn test_no_wrap_when_autowrap_off() {
        let mut s = screen();
        s.set_private_mode(7, false);
        write_str(&mut s, "0123456789AB");
        assert_eq!(s.cursor().row, 0);
        assert_eq!(s.cursor().col, 9);
        // Overwrites accumulate in the last column.
        assert_eq!(s.cell_at(0, 9).unwrap().glyph, 'B');
    }

    #[test]
    fn test_wide_glyph_occupies_two_cells() {
        let mut s = screen();
        s.write_glyph('漢');
        let head = s.cell_at(0, 0).unwrap();
        assert_eq!(head.glyph, '漢');
        assert_eq!(head.width, CellWidth::Wide);
        assert!(s.cell_at(0, 1).unwrap().is_continuation());
        assert_eq!(s.cursor().col, 2);
    }

    #[test]
    fn test_wide_glyph_wraps_from_last_column() {
        let mut s = screen();
        s.move_cursor_absolute(0, 9);
        s.write_glyph('漢');
        // Last column padded, glyph placed at the start of the next row.
        assert_eq!(s.cell_at(0, 9).unwrap().glyph, ' ');
        assert_eq!(s.cell_at(1, 0).unwrap().glyph, '漢');
        assert!(s.cell_at(1, 1).unwrap().is_continuation());
    }

    #[test]
    fn test_overwriting_wide_half_clears_pair() {
        let mut s = screen();
        s.write_glyph('漢');
        s.move_cursor_absolute(0, 1);
        s.write_glyph('x');
        assert_eq!(s.cell_at(0, 0).unwrap().glyph, ' ');
        assert_eq!(s.cell_at(0, 1).unwrap().glyph, 'x');
        assert!(!s.cell_at(0, 1).unwrap().is_continuation());
    }

    #[test]
    fn test_wide_pairs_always_complete() {
        let mut s = screen();
        write_str(&mut s, "漢字かな…");
        s.move_cursor_absolute(0, 3);
        s.erase_chars(2);
        for r in 0..5 {
            for c in 0..10 {
                let cell = s.cell_at(r, c).unwrap();
                if cell.width == CellWidth::Wide {
                    assert!(c + 1 < 10, "wide cell in last column at ({}, {})", r, c);
                    assert!(s.cell_at(r, c + 1).unwrap().is_continuation());
                }
            }
        }
    }

    #[test]
    fn test_line_feed_scrolls_at_bottom() {
        let mut s = screen();
        for i in 0..5 {
            s.write_glyph(char::from(b'A' + i));
            if i < 4 {
                s.next_line();
            }
        }
        assert_eq!(s.cursor().row, 4);
        s.line_feed();
        assert_eq!(s.cursor().row, 4);
        assert_eq!(s.row_text(0), "B");
        assert_eq!(s.scrollback_len(), 1);
        assert_eq!(s.scrollback_row(0).unwrap()[0].glyph, 'A');
    }

    #[test]
    fn test_single_row_region_line_feed() {
        let mut s = screen();
        s.set_scroll_region(2, 2);
        s.move_cursor_absolute(2, 0);
        let before = s.scrollback_len();
        s.line_feed();
        assert_eq!(s.cursor().row, 2);
        assert_eq!(s.scrollback_len(), before);
    }

    #[test]
    fn test_scroll_region_confines_scrolling() {
        let mut s = screen();
        for i in 0..5 {
            s.move_cursor_absolute(i, 0);
            s.write_glyph(char::from(b'A' + i as u8));
        }
        s.set_scroll_region(1, 3);
        s.move_cursor_absolute(3, 0);
        s.line_feed();
        assert_eq!(s.row_text(0), "A");
        assert_eq!(s.row_text(1), "C");
        assert_eq!(s.row_text(2), "D");
        assert_eq!(s.row_text(3), "");
        assert_eq!(s.row_text(4), "E");
        // Region does not start at the grid top, so nothing went to history.
        assert_eq!(s.scrollback_len(), 0);
    }

    #[test]
    fn test_reverse_line_feed_scrolls_down() {
        let mut s = screen();
        s.write_glyph('A');
        s.move_cursor_absolute(0, 0);
        s.reverse_line_feed();
        assert_eq!(s.cursor().row, 0);
        assert_eq!(s.row_text(0), "");
        assert_eq!(s.row_text(1), "A");
    }

    #[test]
    fn test_scrollback_bounded() {
        let mut s = Screen::new(2, 4, 3);
        for i in 0..10 {
            s.write_glyph(char::from(b'0' + i));
            s.line_feed();
            s.carriage_return();
        }
        assert_eq!(s.scrollback_len(), 3);
    }

    #[test]
    fn test_erase_display_modes() {
        let mut s = screen();
        for r in 0..5 {
            s.move_cursor_absolute(r, 0);
            write_str(&mut s, "XXXXXXXXXX");
        }
        s.move_cursor_absolute(2, 4);
        s.erase_display(0);
        assert_eq!(s.row_text(1), "XXXXXXXXXX");
        assert_eq!(s.row_text(2), "XXXX");
        assert_eq!(s.row_text(3), "");

        s.move_cursor_absolute(1, 3);
        s.erase_display(1);
        assert_eq!(s.row_text(0), "");
        assert_eq!(s.row_text(1), "    XXXXXX");

        s.erase_display(2);
        for r in 0..5 {
            assert_eq!(s.row_text(r), "");
        }
    }

    #[test]
    fn test_erase_display_3_purges_scrollback() {
        let mut s = screen();
        for _ in 0..8 {
            s.line_feed();
        }
        write_str(&mut s, "tail");
        assert!(s.scrollback_len() > 0);
        s.erase_display(3);
        assert_eq!(s.scrollback_len(), 0);
        assert_eq!(s.row_text(4), "");
    }

    #[test]
    fn test_erase_line_modes() {
        let mut s = screen();
        write_str(&mut s, "ABCDEFGHIJ");
        s.move_cursor_absolute(0, 4);
        s.erase_line(0);
        assert_eq!(s.row_text(0), "ABCD");
        s.move_cursor_absolute(0, 1);
        s.erase_line(1);
        assert_eq!(s.row_text(0), "  CD");
        s.erase_line(2);
        assert_eq!(s.row_text(0), "");
    }

    #[test]
    fn test_erased_cells_use_default_background() {
        let mut s = screen();
        s.apply_sgr(&[41]);
        write_str(&mut s, "redred");
        s.move_cursor_absolute(0, 0);
        s.erase_line(2);
        assert_eq!(s.cell_at(0, 0).unwrap().bg, Color::Default);
    }

    #[test]
    fn test_insert_delete_chars() {
        let mut s = screen();
        write_str(&mut s, "ABCDEFGHIJ");
        s.move_cursor_absolute(0, 2);
        s.insert_chars(3);
        assert_eq!(s.row_text(0), "AB   CDEFG");
        s.delete_chars(3);
        assert_eq!(s.row_text(0), "ABCDEFG");
    }

    #[test]
    fn test_insert_mode_shifts_row(){
        let mut s = screen();
        write_str(&mut s, "ABC");
        s.set_ansi_mode(4, true);
        s.move_cursor_absolute(0, 1);
        s.write_glyph('x');
        assert_eq!(s.row_text(0), "AxBC");
    }

    #[test]
    fn test_insert_delete_lines() {
        let mut s = screen();
        for i in 0..5 {
            s.move_cursor_absolute(i, 0);
            s.write_glyph(char::from(b'A' + i as u8));
        }
        s.move_cursor_absolute(1, 0);
        s.insert_lines(2);
        assert_eq!(s.row_text(0), "A");
        assert_eq!(s.row_text(1), "");
        assert_eq!(s.row_text(2), "");
        assert_eq!(s.row_text(3), "B");
        assert_eq!(s.row_text(4), "C");
        s.delete_lines(2);
        assert_eq!(s.row_text(1), "B");
        assert_eq!(s.row_text(2), "C");
    }

    #[test]
    fn test_save_restore_cursor_round_trip() {
        let mut s = screen();
        s.apply_sgr(&[1, 31]);
        s.move_cursor_absolute(2, 7);
        s.save_cursor();
        s.move_cursor_absolute(0, 0);
        s.apply_sgr(&[0]);
        s.restore_cursor();
        assert_eq!(s.cursor().row, 2);
        assert_eq!(s.cursor().col, 7);
        assert!(s.attributes().bold);
        assert_eq!(s.attributes().fg, Color::Ansi(1));
    }

    #[test]
    fn test_sgr_reset_idempotent() {
        let mut s = screen();
        s.apply_sgr(&[1, 4, 38, 5, 200]);
        s.apply_sgr(&[0]);
        let once = *s.attributes();
        s.apply_sgr(&[0]);
        assert_eq!(*s.attributes(), once);
        assert_eq!(once, Attributes::default());
    }

    #[test]
    fn test_sgr_double_clear() {
        let mut s = screen();
        s.apply_sgr(&[1, 2]);
        assert!(s.attributes().bold);
        assert!(s.attributes().dim);
        s.apply_sgr(&[22]);
        assert!(!s.attributes().bold);
        assert!(!s.attributes().dim);
    }

    #[test]
    fn test_origin_mode_confines_cursor() {
        let mut s = screen();
        s.set_scroll_region(1, 3);
        s.set_private_mode(6, true);
        assert_eq!(s.cursor().row, 1);
        s.move_cursor_absolute(10, 0);
        assert_eq!(s.cursor().row, 3);
        s.set_private_mode(6, false);
        s.move_cursor_absolute(4, 0);
        assert_eq!(s.cursor().row, 4);
    }

    #[test]
    fn test_resize_grows_and_shrinks() {
        let mut s = screen();
        for i in 0..5 {
            s.move_cursor_absolute(i, 0);
            s.write_glyph(char::from(b'A' + i as u8));
        }
        s.resize(7, 12);
        assert_eq!(s.size(), (7, 12));
        assert_eq!(s.row_text(0), "A");
        assert_eq!(s.row_text(4), "E");
        assert_eq!(s.row_text(6), "");

        // Shrinking moves the top rows into history.
        s.resize(3, 12);
        assert_eq!(s.size(), (3, 12));
        assert_eq!(s.row_text(0), "E");
        assert_eq!(s.scrollback_len(), 4);
        assert_eq!(s.scrollback_row(0).unwrap()[0].glyph, 'A');
    }

    #[test]
    fn test_resize_clamps_to_one() {
        let mut s = screen();
        s.resize(0, 0);
        assert_eq!(s.size(), (1, 1));
        s.write_glyph('x');
        assert_eq!(s.cell_at(0, 0).unwrap().glyph, 'x');
        s.resize(1, 1);
        assert_eq!(s.size(), (1, 1));
    }

    #[test]
    fn test_resize_resets_scroll_region_and_clamps_cursor() {
        let mut s = screen();
        s.set_scroll_region(1, 3);
        s.move_cursor_absolute(3, 9);
        s.resize(2, 4);
        assert_eq!(s.scroll_region(), (0, 1));
        assert!(s.cursor().row < 2);
        assert!(s.cursor().col < 4);
    }

    #[test]
    fn test_drain_dirty_clears() {
        let mut s = screen();
        s.drain_dirty();
        s.write_glyph('a');
        let dirty = s.drain_dirty();
        assert_eq!(dirty, vec![0]);
        assert!(s.drain_dirty().is_empty());
    }

    #[test]
    fn test_dirty_rows_after_scroll() {
        let mut s = screen();
        s.drain_dirty();
        s.move_cursor_absolute(4, 0);
        s.line_feed();
        let dirty = s.drain_dirty();
        assert_eq!(dirty, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut s = screen();
        s.apply_sgr(&[1, 31]);
        write_str(&mut s, "junk");
        s.set_scroll_region(1, 3);
        s.set_ansi_mode(4, true);
        s.reset();
        assert_eq!(*s.attributes(), Attributes::default());
        assert_eq!(s.cursor().row, 0);
        assert_eq!(s.cursor().col, 0);
        assert_eq!(s.scroll_region(), (0, 4));
        assert!(!s.modes().insert_mode);
        assert_eq!(s.row_text(0), "");
    }

    #[test]
    fn test_screen_alignment_fills_grid() {
        let mut s = screen();
        s.screen_alignment();
        assert_eq!(s.row_text(0), "EEEEEEEEEE");
        assert_eq!(s.row_text(4), "EEEEEEEEEE");
    }

    #[test]
    fn test_text_in_selection() {
        let mut s = screen();
        write_str(&mut s, "Hello");
        s.move_cursor_absolute(1, 0);
        write_str(&mut s, "World");
        let sel = Selection {
            start: (0, 1),
            end: (1, 2),
        };
        assert_eq!(s.text_in(&sel), "ello\nWor");
        // Reversed endpoints normalize.
        let rev = Selection {
            start: (1, 2),
            end: (0, 1),
        };
        assert_eq!(s.text_in(&rev), "ello\nWor");
    }

    #[test]
    fn test_title_event() {
        let mut s = screen();
        s.set_title("hello".to_string());
        assert_eq!(s.title(), "hello");
        assert_eq!(s.take_events(), vec![Event::TitleChanged("hello".into())]);
        assert!(s.take_events().is_empty());
    }

    #[test]
    fn test_tab_stops() {
        let mut s = Screen::new(5, 30, 0);
        s.write_glyph('a');
        s.tab();
        assert_eq!(s.cursor().col, 8);
        s.tab();
        assert_eq!(s.cursor().col, 16);
        s.move_cursor_absolute(0, 28);
        s.tab();
        assert_eq!(s.cursor().col, 29);
    }

    #[test]
    fn test_custom_tab_stops() {
        let mut s = Screen::new(5, 30, 0);
        s.move_cursor_absolute(0, 3);
        s.set_tab_stop();
        s.move_cursor_absolute(0, 0);
        s.tab();
        assert_eq!(s.cursor().col, 3);
        s.clear_tab_stop(0);
        s.move_cursor_absolute(0, 0);
        s.tab();
        assert_eq!(s.cursor().col, 8);
        s.clear_tab_stop(3);
        s.move_cursor_absolute(0, 0);
        s.tab();
        assert_eq!(s.cursor().col, 29);
    }

    #[test]
    fn test_repeat_last_glyph() {
        let mut s = screen();
        write_str(&mut s, "ab");
        s.repeat_last_glyph(3);
        assert_eq!(s.row_text(0), "abbbb");
        assert_eq!(s.cursor().col, 5);
    }

    #[test]
    fn test_repeat_wraps_like_printing() {
        let mut s = screen();
        s.move_cursor_absolute(0, 8);
        s.write_glyph('x');
        s.repeat_last_glyph(2);
        assert_eq!(s.cell_at(0, 9).unwrap().glyph, 'x');
        assert_eq!(s.cell_at(1, 0).unwrap().glyph, 'x');
    }

    #[test]
    fn test_device_status_reports() {
        let mut s = screen();
        assert!(s.take_response().is_none());
        s.move_cursor_absolute(2, 4);
        s.device_status_report(6);
        assert_eq!(s.take_response().unwrap(), b"\x1b[3;5R".to_vec());
        s.device_status_report(5);
        assert_eq!(s.take_response().unwrap(), b"\x1b[0n".to_vec());
        s.device_attributes(false);
        assert_eq!(s.take_response().unwrap(), b"\x1b[?62;c".to_vec());
    }

    #[test]
    fn test_viewport_scrolling() {
        let mut s = screen();
        for i in 0..8 {
            write_str(&mut s, &format!("line{}", i));
            s.next_line();
        }
        // Four rows have scrolled into history.
        assert_eq!(s.scrollback_len(), 4);
        assert_eq!(s.viewport_offset(), 0);

        let offset = s.scroll_viewport_up(2);
        assert_eq!(offset, 2);
        let top: String = s
            .visible_row(0)
            .unwrap()
            .iter()
            .map(|c| c.glyph)
            .collect::<String>()
            .trim_end()
            .to_string();
        assert_eq!(top, "line2");

        // Offset clamps to the history length.
        assert_eq!(s.scroll_viewport_up(100), 4);
        s.scroll_viewport_down(1);
        assert_eq!(s.viewport_offset(), 3);
        s.reset_viewport();
        assert_eq!(s.viewport_offset(), 0);
        let live: String = s
            .visible_row(0)
            .unwrap()
            .iter()
            .map(|c| c.glyph)
            .collect::<String>()
            .trim_end()
            .to_string();
        assert_eq!(live, "line4");
    }
}
