//! VT escape sequence parser.
//!
//! A byte-driven state machine in the VT500-series mold: total over every
//! byte in every state, no lookback beyond the small accumulators. Bytes go
//! in, `Screen` operations and events come out. Splitting a stream across
//! `advance` calls never changes the observable result.

use crate::screen::Screen;

/// Parameter values saturate here; anything larger is an attack, not a
/// cursor position.
const PARAM_MAX: u32 = 100_000;

/// Cap on OSC/DCS payload accumulation.
const MAX_STRING_LEN: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
enum State {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    /// ESC seen inside an OSC string; a following `\` terminates it.
    OscEscape,
    DcsEntry,
    DcsParam,
    DcsIntermediate,
    DcsPassthrough,
    /// ESC seen inside a DCS string.
    DcsEscape,
    DcsIgnore,
}

/// The escape sequence parser.
pub struct Parser {
    state: State,
    params: Vec<u32>,
    cur_param: Option<u32>,
    intermediates: Vec<u8>,
    /// Private marker byte (`?`, `>`, `<`, `=`) seen at the start of a CSI.
    private: Option<u8>,
    osc_buf: Vec<u8>,
    utf8_buf: [u8; 4],
    utf8_len: usize,
    utf8_need: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            params: Vec::with_capacity(16),
            cur_param: None,
            intermediates: Vec::with_capacity(4),
            private: None,
            osc_buf: Vec::new(),
            utf8_buf: [0; 4],
            utf8_len: 0,
            utf8_need: 0,
        }
    }

    /// True when no escape sequence is in flight.
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground
    }

    /// Feed a chunk of bytes, applying their effects to the screen.
    pub fn advance(&mut self, screen: &mut Screen, bytes: &[u8]) {
        let mut pos = 0;
        while pos < bytes.len() {
            if self.state == State::Ground {
                // Fast path: everything up to the next ESC is plain text
                // and C0 controls.
                let rest = &bytes[pos..];
                let run = memchr::memchr(0x1B, rest).unwrap_or(rest.len());
                for &b in &rest[..run] {
                    self.ground_byte(screen, b);
                }
                pos += run;
                if run < rest.len() {
                    self.utf8_restart();
                    self.enter_escape();
                    pos += 1;
                }
                continue;
            }
            let b = bytes[pos];
            pos += 1;
            self.step(screen, b);
        }
    }

    // ------------------------------------------------------------------
    // Ground state
    // ------------------------------------------------------------------

    fn ground_byte(&mut self, screen: &mut Screen, b: u8) {
        // Any non-continuation ASCII byte abandons a partial UTF-8 sequence.
        if self.utf8_need > 0 && b < 0x80 {
            self.utf8_restart();
        }
        match b {
            0x07 => screen.bell(),
            0x08 => screen.backspace(),
            0x09 => screen.tab(),
            0x0A..=0x0C => screen.line_feed(),
            0x0D => screen.carriage_return(),
            0x20..=0x7E => screen.write_glyph(b as char),
            0x80..=0xFF => self.utf8_byte(screen, b),
            // Remaining C0 bytes and DEL have no effect.
            _ => {}
        }
    }

    fn utf8_restart(&mut self) {
        self.utf8_len = 0;
        self.utf8_need = 0;
    }

    /// Accumulate one byte of a multi-byte UTF-8 sequence. Invalid leading
    /// bytes and lone continuations are dropped; an early restart drops the
    /// partial sequence.
    fn utf8_byte(&mut self, screen: &mut Screen, b: u8) {
        if self.utf8_need == 0 {
            let need = match b {
                0xC2..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF4 => 4,
                _ => return,
            };
            self.utf8_buf[0] = b;
            self.utf8_len = 1;
            self.utf8_need = need;
            return;
        }
        if !(0x80..=0xBF).contains(&b) {
            self.utf8_restart();
            self.utf8_byte(screen, b);
            return;
        }
        self.utf8_buf[self.utf8_len] = b;
        self.utf8_len += 1;
        if self.utf8_len == self.utf8_need {
            if let Ok(s) = std::str::from_utf8(&self.utf8_buf[..self.utf8_len]) {
                if let Some(c) = s.chars().next() {
                    screen.write_glyph(c);
                }
            }
            self.utf8_restart();
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    fn enter_escape(&mut self) {
        self.state = State::Escape;
        self.params.clear();
        self.cur_param = None;
        self.intermediates.clear();
        self.private = None;
    }

    fn step(&mut self, screen: &mut Screen, b: u8) {
        // String-collecting states own their control bytes; everywhere else
        // ESC restarts the sequence and C0 controls execute immediately.
        let in_string = matches!(
            self.state,
            State::OscString
                | State::OscEscape
                | State::DcsPassthrough
                | State::DcsEscape
                | State::DcsIgnore
        );
        if !in_string {
            if b == 0x1B {
                self.enter_escape();
                return;
            }
            if b < 0x20 {
                self.execute_control(screen, b);
                return;
            }
            if b == 0x7F {
                return;
            }
        }

        match self.state {
            State::Ground => self.ground_byte(screen, b),
            State::Escape => self.escape_byte(screen, b),
            State::EscapeIntermediate => self.escape_intermediate_byte(screen, b),
            State::CsiEntry => self.csi_entry_byte(screen, b),
            State::CsiParam => self.csi_param_byte(screen, b),
            State::CsiIntermediate => self.csi_intermediate_byte(b),
            State::CsiIgnore => {
                if (0x40..=0x7E).contains(&b) {
                    self.state = State::Ground;
                }
            }
            State::OscString => self.osc_byte(screen, b),
            State::OscEscape => {
                if b == b'\\' {
                    self.dispatch_osc(screen);
                }
                // Otherwise the ESC and this byte are both discarded.
                self.state = State::Ground;
            }
            State::DcsEntry => self.dcs_entry_byte(b),
            State::DcsParam => self.dcs_param_byte(b),
            State::DcsIntermediate => self.dcs_intermediate_byte(b),
            State::DcsPassthrough | State::DcsIgnore => self.dcs_string_byte(b),
            State::DcsEscape => {
                if b == b'\\' {
                    log::trace!("discarding {} byte DCS payload", self.osc_buf.len());
                }
                self.osc_buf.clear();
                self.state = State::Ground;
            }
        }
    }

    /// C0 controls embedded in escape sequences still take effect.
    fn execute_control(&mut self, screen: &mut Screen, b: u8) {
        match b {
            0x07 => screen.bell(),
            0x08 => screen.backspace(),
            0x09 => screen.tab(),
            0x0A..=0x0C => screen.line_feed(),
            0x0D => screen.carriage_return(),
            _ => {}
        }
    }

    fn escape_byte(&mut self, screen: &mut Screen, b: u8) {
        match b {
            b'[' => self.state = State::CsiEntry,
            b']' => {
                self.state = State::OscString;
                self.osc_buf.clear();
            }
            b'P' => {
                self.state = State::DcsEntry;
                self.osc_buf.clear();
            }
            b'M' => {
                screen.reverse_line_feed();
                self.state = State::Ground;
            }
            b'E' => {
                screen.next_line();
                self.state = State::Ground;
            }
            b'D' => {
                screen.line_feed();
                self.state = State::Ground;
            }
            b'7' => {
                screen.save_cursor();
                self.state = State::Ground;
            }
            b'8' => {
                screen.restore_cursor();
                self.state = State::Ground;
            }
            b'c' => {
                screen.reset();
                self.state = State::Ground;
            }
            b'=' => {
                screen.set_keypad_application(true);
                self.state = State::Ground;
            }
            b'>' => {
                screen.set_keypad_application(false);
                self.state = State::Ground;
            }
            b'H' => {
                screen.set_tab_stop();
                self.state = State::Ground;
            }
            b'\\' => self.state = State::Ground,
            0x20..=0x2F => {
                self.intermediates.push(b);
                self.state = State::EscapeIntermediate;
            }
            _ => {
                log::debug!("unhandled escape: ESC {:02x}", b);
                self.state = State::Ground;
            }
        }
    }

    fn escape_intermediate_byte(&mut self, screen: &mut Screen, b: u8) {
        match b {
            0x20..=0x2F => self.intermediates.push(b),
            0x30..=0x7E => {
                if self.intermediates == [b'#'] && b == b'8' {
                    screen.screen_alignment();
                } else {
                    // Charset designations and the like.
                    log::trace!(
                        "ignoring escape intermediate {:?} final {:02x}",
                        self.intermediates,
                        b
                    );
                }
                self.state = State::Ground;
            }
            _ => self.state = State::Ground,
        }
    }

    // ------------------------------------------------------------------
    // CSI
    // ------------------------------------------------------------------

    fn push_digit(&mut self, b: u8) {
        let cur = self.cur_param.unwrap_or(0);
        self.cur_param = Some((cur.saturating_mul(10) + u32::from(b - b'0')).min(PARAM_MAX));
    }

    fn csi_entry_byte(&mut self, screen: &mut Screen, b: u8) {
        match b {
            b'0'..=b'9' => {
                self.push_digit(b);
                self.state = State::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = State::CsiParam;
            }
            b':' => self.state = State::CsiIgnore,
            0x3C..=0x3F => {
                self.private = Some(b);
                self.state = State::CsiParam;
            }
            0x20..=0x2F => {
                self.intermediates.push(b);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7E => self.dispatch_csi(screen, b),
            _ => {}
        }
    }

    fn csi_param_byte(&mut self, screen: &mut Screen, b: u8) {
        match b {
            b'0'..=b'9' => self.push_digit(b),
            b';' => self.params.push(self.cur_param.take().unwrap_or(0)),
            b':' => self.state = State::CsiIgnore,
            // A private marker after parameters is malformed.
            0x3C..=0x3F => self.state = State::CsiIgnore,
            0x20..=0x2F => {
                if let Some(p) = self.cur_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(b);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7E => self.dispatch_csi(screen, b),
            _ => {}
        }
    }

    fn csi_intermediate_byte(&mut self, b: u8) {
        match b {
            0x20..=0x2F => self.intermediates.push(b),
            0x30..=0x3F => self.state = State::CsiIgnore,
            0x40..=0x7E => {
                // No dispatch carries intermediates here; drop the sequence.
                log::debug!(
                    "dropping CSI with intermediates {:?} final {:02x}",
                    self.intermediates,
                    b
                );
                self.state = State::Ground;
            }
            _ => {}
        }
    }

    /// Parameter accessor: missing or zero parameters take the default.
    fn param(&self, index: usize, default: u32) -> u32 {
        self.params
            .get(index)
            .copied()
            .filter(|&v| v != 0)
            .unwrap_or(default)
    }

    fn dispatch_csi(&mut self, screen: &mut Screen, final_byte: u8) {
        if let Some(p) = self.cur_param.take() {
            self.params.push(p);
        }
        self.state = State::Ground;

        let private = self.private;
        match (private, final_byte) {
            (None, b'A') => {
                let n = self.param(0, 1) as isize;
                screen.move_cursor_relative(-n, 0);
            }
            (None, b'B') => {
                let n = self.param(0, 1) as isize;
                screen.move_cursor_relative(n, 0);
            }
            (None, b'C') => {
                let n = self.param(0, 1) as isize;
                screen.move_cursor_relative(0, n);
            }
            (None, b'D') => {
                let n = self.param(0, 1) as isize;
                screen.move_cursor_relative(0, -n);
            }
            (None, b'E') => {
                let n = self.param(0, 1) as isize;
                screen.move_cursor_relative(n, 0);
                screen.carriage_return();
            }
            (None, b'F') => {
                let n = self.param(0, 1) as isize;
                screen.move_cursor_relative(-n, 0);
                screen.carriage_return();
            }
            (None, b'G') | (None, b'`') => {
                screen.column_absolute(self.param(0, 1) as usize - 1);
            }
            (None, b'd') => {
                screen.row_absolute(self.param(0, 1) as usize - 1);
            }
            (None, b'H') | (None, b'f') => {
                let row = self.param(0, 1) as usize - 1;
                let col = self.param(1, 1) as usize - 1;
                screen.move_cursor_absolute(row, col);
            }
            (None, b'J') => screen.erase_display(self.param(0, 0).min(255) as u8),
            (None, b'K') => screen.erase_line(self.param(0, 0).min(255) as u8),
            (None, b'L') => screen.insert_lines(self.param(0, 1) as usize),
            (None, b'M') => screen.delete_lines(self.param(0, 1) as usize),
            (None, b'P') => screen.delete_chars(self.param(0, 1) as usize),
            (None, b'@') => screen.insert_chars(self.param(0, 1) as usize),
            (None, b'X') => screen.erase_chars(self.param(0, 1) as usize),
            (None, b'S') => screen.scroll_up(self.param(0, 1) as usize),
            (None, b'T') => screen.scroll_down(self.param(0, 1) as usize),
            (None, b'r') => {
                let rows = screen.size().0 as u32;
                let top = self.param(0, 1).max(1) as usize - 1;
                let bottom = self.param(1, rows).max(1) as usize - 1;
                screen.set_scroll_region(top, bottom);
            }
            (None, b'm') => screen.apply_sgr(&self.params),
            (None, b'h') => {
                for &p in &self.params {
                    screen.set_ansi_mode(p, true);
                }
            }
            (None, b'l') => {
                for &p in &self.params {
                    screen.set_ansi_mode(p, false);
                }
            }
            (Some(b'?'), b'h') => {
                for &p in &self.params {
                    screen.set_private_mode(p, true);
                }
            }
            (Some(b'?'), b'l') => {
                for &p in &self.params {
                    screen.set_private_mode(p, false);
                }
            }
            (None, b's') => screen.save_cursor(),
            (None, b'u') => screen.restore_cursor(),
            (None, b'b') => screen.repeat_last_glyph(self.param(0, 1) as usize),
            (None, b'g') => screen.clear_tab_stop(self.param(0, 0).min(255) as u8),
            (None, b'n') => screen.device_status_report(self.param(0, 0)),
            (None, b'c') | (Some(b'?'), b'c') => screen.device_attributes(false),
            (Some(b'>'), b'c') => screen.device_attributes(true),
            _ => {
                log::debug!(
                    "dropping CSI: private={:?} params={:?} final={:?}",
                    private,
                    self.params,
                    final_byte as char
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // OSC
    // ------------------------------------------------------------------

    fn osc_byte(&mut self, screen: &mut Screen, b: u8) {
        match b {
            0x07 => {
                self.dispatch_osc(screen);
                self.state = State::Ground;
            }
            0x1B => self.state = State::OscEscape,
            0x00..=0x1F => {}
            _ => {
                if self.osc_buf.len() < MAX_STRING_LEN {
                    self.osc_buf.push(b);
                }
            }
        }
    }

    fn dispatch_osc(&mut self, screen: &mut Screen) {
        let buf = std::mem::take(&mut self.osc_buf);
        let (code, payload) = match memchr::memchr(b';', &buf) {
            Some(i) => (&buf[..i], &buf[i + 1..]),
            None => (&buf[..], &[][..]),
        };
        let code: u32 = match std::str::from_utf8(code).ok().and_then(|s| s.parse().ok()) {
            Some(c) => c,
            None => {
                log::debug!("malformed OSC prefix {:?}", code);
                return;
            }
        };
        match code {
            0 | 1 | 2 => {
                screen.set_title(String::from_utf8_lossy(payload).into_owned());
            }
            4 => log::debug!("ignoring OSC 4 palette override"),
            52 => log::debug!("ignoring OSC 52 clipboard operation"),
            other => log::debug!("unhandled OSC {}", other),
        }
    }

    // ------------------------------------------------------------------
    // DCS (accumulated, never interpreted)
    // ------------------------------------------------------------------

    fn dcs_entry_byte(&mut self, b: u8) {
        match b {
            b'0'..=b'9' | b';' => self.state = State::DcsParam,
            b':' => self.state = State::DcsIgnore,
            0x3C..=0x3F => self.state = State::DcsParam,
            0x20..=0x2F => self.state = State::DcsIntermediate,
            0x40..=0x7E => self.state = State::DcsPassthrough,
            _ => {}
        }
    }

    fn dcs_param_byte(&mut self, b: u8) {
        match b {
            b'0'..=b'9' | b';' => {}
            b':' | 0x3C..=0x3F => self.state = State::DcsIgnore,
            0x20..=0x2F => self.state = State::DcsIntermediate,
            0x40..=0x7E => self.state = State::DcsPassthrough,
            _ => {}
        }
    }

    fn dcs_intermediate_byte(&mut self, b: u8) {
        match b {
            0x20..=0x2F => {}
            0x30..=0x3F => self.state = State::DcsIgnore,
            0x40..=0x7E => self.state = State::DcsPassthrough,
            _ => {}
        }
    }

    fn dcs_string_byte(&mut self, b: u8) {
        match b {
            0x1B => self.state = State::DcsEscape,
            0x07 => {
                // Terminator handling mirrors OSC.
                self.osc_buf.clear();
                self.state = State::Ground;
            }
            _ => {
                if self.state == State::DcsPassthrough && self.osc_buf.len() < MAX_STRING_LEN {
                    self.osc_buf.push(b);
                }
            }
        }
    }
}
