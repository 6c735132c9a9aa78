//! HD44780 LCD driver module.
//!
//! [HD44780Driver] describes the controller command set together with
//! everything that can be derived from it (addressing, text output, glyph
//! definition); [GpioHD44780Driver] implements the byte transfers over GPIO
//! pin capabilities, including the 4-bit nibble multiplexing and the
//! busy-flag pacing.
//!
//! # Memory
//!
//! The controller has two independently addressed memory regions sharing one
//! address counter:
//! - **DDRAM** (Display Data RAM) holds the character codes currently shown.
//!   A single-line display occupies `0x00..=0x4F`; a two-line display
//!   occupies `0x00..=0x27` for line 0 and `0x40..=0x67` for line 1.
//! - **CGRAM** (Character Generator RAM) holds up to 8 user-defined 5x8
//!   glyphs, or 4 glyphs of 5x10 dots taking two slots each.
//!
//! Which region the counter indexes depends on the set-address instruction
//! issued last. The counter lives entirely on the controller; the driver
//! reads it back through the status register instead of mirroring it.
//!
//! # Sources
//!
//! - Hitachi, [“HD44780U (LCD-II) Dot Matrix Liquid Crystal Display
//!   Controller/Driver”](https://www.sparkfun.com/datasheets/LCD/HD44780.pdf),
//!   rev. 0.0.

mod gpio;

use crate::{DriverError, DriverResult};
pub use gpio::*;
use std::fmt::Debug;

/// Address of the first position of the second display line. Fixed by the
/// controller, not derived from the line length.
const SECOND_LINE_ADDRESS: u8 = 0x40;

/// Number of spaces written in place of one tab character.
const TAB_SIZE: usize = 4;

/// The `HD44780Driver` trait defines the interface of HD44780 LCD controller
/// drivers.
///
/// The four raw transfer methods at the bottom are the transport's concern;
/// every command and higher-level operation is built on top of them as a
/// default method, so a transport only has to know how to move bytes and
/// run the reset sequence.
pub trait HD44780Driver: Debug {
    /// Runs the power-on initialization sequence mandated by the datasheet
    /// and leaves the display on with the cursor and blinking disabled.
    fn init(&mut self) -> DriverResult<()>;

    /// Whether the controller is configured for a single display line.
    fn single_line(&self) -> bool;

    /// Clears the display and sets the cursor to the home position.
    fn clear_display(&mut self) -> DriverResult<()> {
        self.send_command(0b00000001)
    }

    /// Resets the display shift and sets the cursor to the home position.
    fn return_home(&mut self) -> DriverResult<()> {
        self.send_command(0b00000010)
    }

    /// Sets the display to the specified entry mode.
    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> DriverResult<()> {
        let mut command = 0b00000100;
        if cursor_direction == CursorDirection::Right {
            command |= 0b00000010;
        }
        if shift {
            command |= 0b00000001;
        }
        self.send_command(command)
    }

    /// Sets the display on/off, cursor on/off, and blinking on/off.
    fn set_display_control(
        &mut self,
        display_on: bool,
        cursor_on: bool,
        blink_on: bool,
    ) -> DriverResult<()> {
        let mut command = 0b00001000;
        if display_on {
            command |= 0b00000100;
        }
        if cursor_on {
            command |= 0b00000010;
        }
        if blink_on {
            command |= 0b00000001;
        }
        self.send_command(command)
    }

    /// Moves the cursor or shifts the display window by one position.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> DriverResult<()> {
        let mut command = 0b00010000;
        if display_shift {
            command |= 0b00001000;
        }
        if direction == CursorDirection::Right {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Sets the interface width, line count and font.
    fn function_set(&mut self, data_length: bool, two_lines: bool, font: bool) -> DriverResult<()> {
        let mut command = 0b00100000;
        if data_length {
            command |= 0b00010000;
        }
        if two_lines {
            command |= 0b00001000;
        }
        if font {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Sets the CGRAM address.
    fn set_cgram_address(&mut self, address: u8) -> DriverResult<()> {
        if address > 0b00111111 {
            return Err(DriverError::InvalidArgument);
        }
        let command = 0b01000000 | address;
        self.send_command(command)
    }

    /// Sets the DDRAM address.
    fn set_ddram_address(&mut self, address: u8) -> DriverResult<()> {
        if address > 0b01111111 {
            return Err(DriverError::InvalidArgument);
        }
        let command = 0b10000000 | address;
        self.send_command(command)
    }

    /// Reads the busy flag and address counter.
    fn get_busy_flag_and_address(&mut self) -> DriverResult<(bool, u8)> {
        let status = self.read_command()?;
        let busy_flag = status & 0b10000000 != 0;
        let address = status & 0b01111111;
        Ok((busy_flag, address))
    }

    /// Reads the address counter. The value indexes CGRAM or DDRAM depending
    /// on which set-address instruction was issued last.
    fn current_address(&mut self) -> DriverResult<u8> {
        Ok(self.get_busy_flag_and_address()?.1)
    }

    /// Gets the line the cursor is currently on, 0 or 1.
    ///
    /// Only meaningful in two-line configuration; a single-line display
    /// always reports line 0.
    fn current_line(&mut self) -> DriverResult<u8> {
        let address = self.current_address()?;
        Ok((!self.single_line() && address >= SECOND_LINE_ADDRESS) as u8)
    }

    /// Computes the DDRAM address of the given position.
    ///
    /// The column must stay below `0x28` on a two-line display and below
    /// `0x50` on a single-line one; out-of-range positions are not rejected
    /// and end up wherever the controller wraps them.
    fn address_for(&self, column: u8, row: u8) -> u8 {
        let start = if row % 2 == 1 && !self.single_line() {
            SECOND_LINE_ADDRESS
        } else {
            0
        };
        start.wrapping_add(column)
    }

    /// Moves the cursor to the given position.
    ///
    /// The same range considerations as for [Self::address_for] apply.
    fn cursor_to(&mut self, column: u8, row: u8) -> DriverResult<()> {
        self.set_ddram_address(self.address_for(column, row) & 0b01111111)
    }

    /// Applies a runtime configuration by re-sending the entry mode and
    /// display control instructions. Nothing is cached driver-side, so the
    /// call is idempotent.
    fn configure(&mut self, config: &DisplayConfig) -> DriverResult<()> {
        let direction = if config.right_to_left {
            CursorDirection::Left
        } else {
            CursorDirection::Right
        };
        self.set_entry_mode(direction, config.shift_display)?;
        self.set_display_control(config.display_on, config.cursor_on, config.blink_on)
    }

    /// Shifts the contents of the display by `n` positions, left to right
    /// when `n` is positive and right to left when it is negative. Both
    /// lines shift at the same time.
    ///
    /// Execution time grows linearly with `n`, roughly 37us per position
    /// (one busy-flag wait per shift instruction).
    fn shift_display(&mut self, n: i8) -> DriverResult<()> {
        // The controller's "shift right" moves the window so that content
        // advances right to left.
        let direction = if n < 0 {
            CursorDirection::Right
        } else {
            CursorDirection::Left
        };

        for _ in 0..n.unsigned_abs() {
            self.cursor_shift(true, direction)?;
        }

        Ok(())
    }

    /// Defines a user glyph in CGRAM.
    ///
    /// `slot` is the character code the glyph will be reachable under, 0 to 7
    /// for the 5x8 font. A 5x10 glyph occupies two slots, so tall glyphs go
    /// to slots 0, 2, 4 and 6; the spacing is the caller's responsibility.
    /// Each row holds one 5-bit pixel mask in its low bits, 8 rows for 5x8
    /// and 10 for 5x10.
    ///
    /// The address counter is saved before and restored after, so the cursor
    /// position survives the call.
    fn define_glyph(&mut self, slot: u8, font_5x10: bool, rows: &[u8]) -> DriverResult<()> {
        let height = if font_5x10 { 10 } else { 8 };
        if rows.len() < height {
            return Err(DriverError::InvalidArgument);
        }

        let ddram_address = self.current_address()?;

        self.set_cgram_address((slot << 3) & 0b00111111)?;

        for &row in &rows[..height] {
            self.send_data(row)?;
        }

        // A tall glyph spans two slots; blank the tail of the second one.
        if font_5x10 {
            for _ in 0..6 {
                self.send_data(0)?;
            }
        }

        self.set_ddram_address(ddram_address)
    }

    /// Writes a single character and advances the cursor.
    ///
    /// `\n` moves to the start of the other line, wrapping from the last
    /// line back to the first (on a single-line display it returns to the
    /// start of that line). `\t` expands to four spaces. Any other byte is
    /// sent verbatim as a character code.
    fn put_char(&mut self, chr: u8) -> DriverResult<()> {
        match chr {
            b'\n' => {
                let line = self.current_line()?;

                if !self.single_line() && line == 0 {
                    self.cursor_to(0, 1)
                } else {
                    self.cursor_to(0, 0)
                }
            }
            b'\t' => {
                for _ in 0..TAB_SIZE {
                    self.send_data(b' ')?;
                }
                Ok(())
            }
            _ => self.send_data(chr),
        }
    }

    /// Writes a string byte by byte, interpreting the control characters
    /// described in [Self::put_char].
    ///
    /// Only single-byte character codes are meaningful to the controller;
    /// multi-byte UTF-8 sequences come out as whatever the character ROM
    /// maps the individual bytes to.
    fn put_str(&mut self, text: &str) -> DriverResult<()> {
        for chr in text.bytes() {
            self.put_char(chr)?;
        }
        Ok(())
    }

    // Low-level transfers
    // These raw transfers are used by the functions above and implemented by
    // the transport. They are not meant to be called directly.

    /// Sends an instruction byte. Sets the RS pin to 0.
    fn send_command(&mut self, command: u8) -> DriverResult<()>;

    /// Sends a data byte to CGRAM or DDRAM. Sets the RS pin to 1.
    fn send_data(&mut self, data: u8) -> DriverResult<()>;

    /// Reads the status byte (busy flag and address counter). Sets the RS
    /// pin to 0.
    ///
    /// Returns both in a single byte; [Self::get_busy_flag_and_address]
    /// splits them.
    fn read_command(&mut self) -> DriverResult<u8>;

    /// Reads a data byte from CGRAM or DDRAM. Sets the RS pin to 1.
    fn read_data(&mut self) -> DriverResult<u8>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Moves the cursor to the left after writing/reading data.
    Left,
    /// Moves the cursor to the right after writing/reading data.
    Right,
}

/// Runtime display configuration, applied with [HD44780Driver::configure].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DisplayConfig {
    /// Whether the display is on. Data can still be written while it is off
    /// and shown later.
    pub display_on: bool,
    /// Whether the cursor is shown.
    pub cursor_on: bool,
    /// Whether the character under the cursor blinks.
    pub blink_on: bool,
    /// Shift the display window when data is entered instead of only moving
    /// the cursor.
    pub shift_display: bool,
    /// Advance right to left instead of left to right when a character is
    /// entered.
    pub right_to_left: bool,
}

impl Default for DisplayConfig {
    /// Display on, everything else off: the state [HD44780Driver::init]
    /// leaves the controller in.
    fn default() -> Self {
        DisplayConfig {
            display_on: true,
            cursor_on: false,
            blink_on: false,
            shift_display: false,
            right_to_left: false,
        }
    }
}

/// How long to keep polling the busy flag before giving up.
///
/// The protocol has no failure signal distinct from "still busy", so the
/// default is to poll forever and let an unresponsive controller stall the
/// caller. Environments that need bounded latency, and test harnesses, can
/// cap the number of polls instead.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BusyPolicy {
    /// Poll until the controller reports ready, however long that takes.
    #[default]
    WaitForever,
    /// Fail with [DriverError::Unresponsive] after this many busy polls.
    MaxPolls(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Records every transfer instead of touching hardware. Status bytes
    /// returned by `read_command` are scripted through `status`.
    #[derive(Debug, Default)]
    struct RecordingDriver {
        single_line: bool,
        sent: Vec<Transfer>,
        status: VecDeque<u8>,
    }

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    enum Transfer {
        Command(u8),
        Data(u8),
    }

    use Transfer::{Command, Data};

    impl RecordingDriver {
        fn one_line() -> Self {
            RecordingDriver {
                single_line: true,
                ..Default::default()
            }
        }
    }

    impl HD44780Driver for RecordingDriver {
        fn init(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn single_line(&self) -> bool {
            self.single_line
        }

        fn send_command(&mut self, command: u8) -> DriverResult<()> {
            self.sent.push(Command(command));
            Ok(())
        }

        fn send_data(&mut self, data: u8) -> DriverResult<()> {
            self.sent.push(Data(data));
            Ok(())
        }

        fn read_command(&mut self) -> DriverResult<u8> {
            Ok(self.status.pop_front().unwrap_or(0))
        }

        fn read_data(&mut self) -> DriverResult<u8> {
            Ok(0)
        }
    }

    #[test]
    fn entry_mode_bytes() {
        let mut lcd = RecordingDriver::default();
        lcd.set_entry_mode(CursorDirection::Right, false).unwrap();
        lcd.set_entry_mode(CursorDirection::Right, true).unwrap();
        lcd.set_entry_mode(CursorDirection::Left, false).unwrap();
        assert_eq!(lcd.sent, [Command(0x06), Command(0x07), Command(0x04)]);
    }

    #[test]
    fn display_control_bytes() {
        let mut lcd = RecordingDriver::default();
        lcd.set_display_control(false, false, false).unwrap();
        lcd.set_display_control(true, false, false).unwrap();
        lcd.set_display_control(true, true, false).unwrap();
        lcd.set_display_control(true, true, true).unwrap();
        assert_eq!(
            lcd.sent,
            [Command(0x08), Command(0x0C), Command(0x0E), Command(0x0F)]
        );
    }

    #[test]
    fn cursor_shift_bytes() {
        let mut lcd = RecordingDriver::default();
        lcd.cursor_shift(false, CursorDirection::Left).unwrap();
        lcd.cursor_shift(false, CursorDirection::Right).unwrap();
        lcd.cursor_shift(true, CursorDirection::Left).unwrap();
        lcd.cursor_shift(true, CursorDirection::Right).unwrap();
        assert_eq!(
            lcd.sent,
            [Command(0x10), Command(0x14), Command(0x18), Command(0x1C)]
        );
    }

    #[test]
    fn function_set_bytes() {
        let mut lcd = RecordingDriver::default();
        lcd.function_set(true, true, false).unwrap();
        lcd.function_set(false, true, false).unwrap();
        lcd.function_set(false, false, true).unwrap();
        assert_eq!(lcd.sent, [Command(0x38), Command(0x28), Command(0x24)]);
    }

    #[test]
    fn clear_and_home_bytes() {
        let mut lcd = RecordingDriver::default();
        lcd.clear_display().unwrap();
        lcd.return_home().unwrap();
        assert_eq!(lcd.sent, [Command(0x01), Command(0x02)]);
    }

    #[test]
    fn address_commands_validate_range() {
        let mut lcd = RecordingDriver::default();
        assert_eq!(
            lcd.set_cgram_address(0x40),
            Err(DriverError::InvalidArgument)
        );
        assert_eq!(
            lcd.set_ddram_address(0x80),
            Err(DriverError::InvalidArgument)
        );
        lcd.set_cgram_address(0x3F).unwrap();
        lcd.set_ddram_address(0x7F).unwrap();
        assert_eq!(lcd.sent, [Command(0x7F), Command(0xFF)]);
    }

    #[test]
    fn busy_flag_and_address_split() {
        let mut lcd = RecordingDriver::default();
        lcd.status.push_back(0xC5);
        lcd.status.push_back(0x45);
        assert_eq!(lcd.get_busy_flag_and_address().unwrap(), (true, 0x45));
        assert_eq!(lcd.get_busy_flag_and_address().unwrap(), (false, 0x45));
    }

    #[test]
    fn two_line_addressing() {
        let lcd = RecordingDriver::default();
        for column in 0..0x28 {
            assert_eq!(lcd.address_for(column, 0), column);
            assert_eq!(lcd.address_for(column, 1), 0x40 + column);
            assert_eq!(lcd.address_for(column, 2), column);
            assert_eq!(lcd.address_for(column, 3), 0x40 + column);
        }
    }

    #[test]
    fn single_line_addressing_ignores_row() {
        let lcd = RecordingDriver::one_line();
        for column in 0..0x50 {
            assert_eq!(lcd.address_for(column, 0), column);
            assert_eq!(lcd.address_for(column, 1), column);
        }
    }

    #[test]
    fn cursor_to_second_line() {
        let mut lcd = RecordingDriver::default();
        lcd.cursor_to(5, 1).unwrap();
        assert_eq!(lcd.sent, [Command(0xC5)]);
    }

    #[test]
    fn cursor_to_out_of_range_column_is_sent_as_is() {
        let mut lcd = RecordingDriver::default();
        lcd.cursor_to(0x50, 1).unwrap();
        assert_eq!(lcd.sent, [Command(0x90)]);
    }

    #[test]
    fn shift_display_negative_goes_right() {
        let mut lcd = RecordingDriver::default();
        lcd.shift_display(-3).unwrap();
        assert_eq!(lcd.sent, [Command(0x1C), Command(0x1C), Command(0x1C)]);
    }

    #[test]
    fn shift_display_positive_goes_left() {
        let mut lcd = RecordingDriver::default();
        lcd.shift_display(2).unwrap();
        assert_eq!(lcd.sent, [Command(0x18), Command(0x18)]);
    }

    #[test]
    fn configure_default_matches_init_state() {
        let mut lcd = RecordingDriver::default();
        lcd.configure(&DisplayConfig::default()).unwrap();
        assert_eq!(lcd.sent, [Command(0x06), Command(0x0C)]);
    }

    #[test]
    fn configure_everything_on() {
        let mut lcd = RecordingDriver::default();
        lcd.configure(&DisplayConfig {
            display_on: true,
            cursor_on: true,
            blink_on: true,
            shift_display: true,
            right_to_left: true,
        })
        .unwrap();
        assert_eq!(lcd.sent, [Command(0x05), Command(0x0F)]);
    }

    #[test]
    fn tab_expands_to_spaces_without_addressing() {
        let mut lcd = RecordingDriver::default();
        lcd.put_char(b'\t').unwrap();
        assert_eq!(lcd.sent, [Data(0x20); 4]);
    }

    #[test]
    fn newline_from_line_0_moves_to_line_1() {
        let mut lcd = RecordingDriver::default();
        lcd.status.push_back(0x05);
        lcd.put_char(b'\n').unwrap();
        assert_eq!(lcd.sent, [Command(0xC0)]);
    }

    #[test]
    fn newline_from_line_1_moves_back_to_line_0() {
        let mut lcd = RecordingDriver::default();
        lcd.status.push_back(0x45);
        lcd.put_char(b'\n').unwrap();
        assert_eq!(lcd.sent, [Command(0x80)]);
    }

    #[test]
    fn newline_on_single_line_returns_home() {
        let mut lcd = RecordingDriver::one_line();
        lcd.status.push_back(0x45);
        lcd.put_char(b'\n').unwrap();
        assert_eq!(lcd.sent, [Command(0x80)]);
    }

    #[test]
    fn put_str_sends_character_codes() {
        let mut lcd = RecordingDriver::default();
        lcd.put_str("Hi").unwrap();
        assert_eq!(lcd.sent, [Data(0x48), Data(0x69)]);
    }

    #[test]
    fn define_glyph_5x8_round_trip() {
        let rows = [0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0, 0, 0b11111];
        let mut lcd = RecordingDriver::default();
        lcd.status.push_back(0x12);
        lcd.define_glyph(3, false, &rows).unwrap();

        let mut expected = vec![Command(0x58)];
        expected.extend(rows.iter().map(|&row| Data(row)));
        expected.push(Command(0x92));
        assert_eq!(lcd.sent, expected);
    }

    #[test]
    fn define_glyph_5x10_pads_second_slot() {
        let rows = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut lcd = RecordingDriver::one_line();
        lcd.define_glyph(2, true, &rows).unwrap();

        let mut expected = vec![Command(0x50)];
        expected.extend(rows.iter().map(|&row| Data(row)));
        expected.extend([Data(0); 6]);
        expected.push(Command(0x80));
        assert_eq!(lcd.sent, expected);
    }

    #[test]
    fn define_glyph_rejects_short_rows() {
        let mut lcd = RecordingDriver::default();
        assert_eq!(
            lcd.define_glyph(0, false, &[0; 7]),
            Err(DriverError::InvalidArgument)
        );
        assert_eq!(
            lcd.define_glyph(0, true, &[0; 9]),
            Err(DriverError::InvalidArgument)
        );
        assert!(lcd.sent.is_empty());
    }
}
