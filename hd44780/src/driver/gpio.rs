use crate::delay::Delay;
use crate::driver::{BusyPolicy, CursorDirection, HD44780Driver};
use crate::{DriverError, DriverResult, GpioBus, GpioBusInput, GpioBusOutput, GpioOutput};
use log::{debug, trace};
use std::fmt::Debug;

/// [ns] Enable pulse width for a write transaction: data set-up time (195)
/// plus enable rise/fall time (25), padded.
const WRITE_PULSE_NS: u32 = 240;

/// [ns] Enable pulse width for a read transaction: data delay time (360)
/// plus enable rise/fall time (25), padded.
const READ_PULSE_NS: u32 = 400;

/// [us] Extra wait after a data register access; the address counter only
/// updates after the busy flag clears.
const ADDRESS_SETTLE_US: u32 = 5;

/// The data lines of the display, either all eight or the upper four.
///
/// In 4-bit operation only DB4..DB7 are wired and every byte travels as two
/// transactions, high nibble first; DB0..DB3 are left floating.
#[derive(Debug)]
pub enum GpioHD44780Bus<'a> {
    Bus8Bit(&'a mut dyn GpioBus<8>),
    Bus4Bit(&'a mut dyn GpioBus<4>),
}

impl GpioHD44780Bus<'_> {
    pub fn is_8bit(&self) -> bool {
        matches!(self, GpioHD44780Bus::Bus8Bit(_))
    }

    pub fn is_4bit(&self) -> bool {
        matches!(self, GpioHD44780Bus::Bus4Bit(_))
    }
}

/// HD44780 driver bit-banging the parallel bus over GPIO pin capabilities.
///
/// The driver owns no pins; it holds references to capabilities handed to it
/// by the platform and switches the data bus between output and input as
/// transfers demand. The RW line is required because every instruction is
/// paced by reading the busy flag back from the controller.
#[derive(Debug)]
pub struct GpioHD44780Driver<'a> {
    pin_e: &'a dyn GpioOutput,
    pin_rw: &'a dyn GpioOutput,
    pin_rs: &'a dyn GpioOutput,
    data_bus: GpioHD44780Bus<'a>,
    delay: Delay,
    single_line: bool,
    font_5x10: bool,
    busy_policy: BusyPolicy,
}

impl<'a> GpioHD44780Driver<'a> {
    /// Creates a driver for a display wired over 4 data lines (DB4..DB7).
    ///
    /// Defaults to two display lines, the 5x8 font, and waiting on the busy
    /// flag forever; see the `with_*` methods.
    pub fn new_4bit(
        pin_e: &'a dyn GpioOutput,
        pin_rw: &'a dyn GpioOutput,
        pin_rs: &'a dyn GpioOutput,
        data_bus: &'a mut dyn GpioBus<4>,
        delay: Delay,
    ) -> Self {
        Self::new(pin_e, pin_rw, pin_rs, GpioHD44780Bus::Bus4Bit(data_bus), delay)
    }

    /// Creates a driver for a display wired over all 8 data lines.
    pub fn new_8bit(
        pin_e: &'a dyn GpioOutput,
        pin_rw: &'a dyn GpioOutput,
        pin_rs: &'a dyn GpioOutput,
        data_bus: &'a mut dyn GpioBus<8>,
        delay: Delay,
    ) -> Self {
        Self::new(pin_e, pin_rw, pin_rs, GpioHD44780Bus::Bus8Bit(data_bus), delay)
    }

    fn new(
        pin_e: &'a dyn GpioOutput,
        pin_rw: &'a dyn GpioOutput,
        pin_rs: &'a dyn GpioOutput,
        data_bus: GpioHD44780Bus<'a>,
        delay: Delay,
    ) -> Self {
        GpioHD44780Driver {
            pin_e,
            pin_rw,
            pin_rs,
            data_bus,
            delay,
            single_line: false,
            font_5x10: false,
            busy_policy: BusyPolicy::default(),
        }
    }

    /// Selects single-line operation instead of the default two lines.
    pub fn with_single_line(mut self, single_line: bool) -> Self {
        self.single_line = single_line;
        self
    }

    /// Selects the 5x10 dot font instead of the default 5x8.
    ///
    /// The controller only supports the tall font together with single-line
    /// operation. The combination with two lines is not checked here and
    /// leaves the display in an undefined state.
    pub fn with_font_5x10(mut self, font_5x10: bool) -> Self {
        self.font_5x10 = font_5x10;
        self
    }

    /// Replaces the default wait-forever busy polling policy.
    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    /// One write transaction: drive the data lines, then latch them into the
    /// controller with an enable pulse held for the data set-up time.
    fn push_byte(
        pin_e: &dyn GpioOutput,
        delay: &Delay,
        bus: &dyn GpioBusOutput<8>,
        byte: u8,
    ) -> DriverResult<()> {
        bus.write_byte(byte)?;
        pin_e.write(true)?;
        delay.delay_ns(WRITE_PULSE_NS);
        pin_e.write(false)
    }

    fn push_nibble(
        pin_e: &dyn GpioOutput,
        delay: &Delay,
        bus: &dyn GpioBusOutput<4>,
        nibble: u8,
    ) -> DriverResult<()> {
        bus.write_nibble(nibble)?;
        pin_e.write(true)?;
        delay.delay_ns(WRITE_PULSE_NS);
        pin_e.write(false)
    }

    /// One read transaction: raise enable, wait out the data delay time,
    /// sample the lines, release enable.
    fn pull_byte(
        pin_e: &dyn GpioOutput,
        delay: &Delay,
        bus: &dyn GpioBusInput<8>,
    ) -> DriverResult<u8> {
        pin_e.write(true)?;
        delay.delay_ns(READ_PULSE_NS);
        let byte = bus.read_byte()?;
        pin_e.write(false)?;
        Ok(byte)
    }

    fn pull_nibble(
        pin_e: &dyn GpioOutput,
        delay: &Delay,
        bus: &dyn GpioBusInput<4>,
    ) -> DriverResult<u8> {
        pin_e.write(true)?;
        delay.delay_ns(READ_PULSE_NS);
        let nibble = bus.read_nibble()?;
        pin_e.write(false)?;
        Ok(nibble)
    }

    /// Writes one byte to the selected register and waits until the
    /// controller has digested it.
    fn send(&mut self, rs: bool, byte: u8) -> DriverResult<()> {
        trace!("Writing {:08b}, RS: {}", byte, rs);

        self.pin_rw.write(false)?;
        self.pin_rs.write(rs)?;

        let pin_e = self.pin_e;
        let delay = self.delay;

        match &mut self.data_bus {
            GpioHD44780Bus::Bus8Bit(bus) => {
                let out = bus.as_output()?;
                Self::push_byte(pin_e, &delay, &*out, byte)?;
            }
            GpioHD44780Bus::Bus4Bit(bus) => {
                let out = bus.as_output()?;
                Self::push_nibble(pin_e, &delay, &*out, (byte >> 4) & 0b1111)?;
                Self::push_nibble(pin_e, &delay, &*out, byte & 0b1111)?;
            }
        }

        self.await_ready()?;

        // The address counter updates only after the busy flag clears, with
        // a few microseconds of extra propagation delay.
        if rs {
            self.delay.delay_us(ADDRESS_SETTLE_US);
        }

        Ok(())
    }

    /// Reads one byte from the selected register.
    fn read(&mut self, rs: bool) -> DriverResult<u8> {
        self.pin_rw.write(true)?;
        self.pin_rs.write(rs)?;

        let pin_e = self.pin_e;
        let delay = self.delay;

        let byte = match &mut self.data_bus {
            GpioHD44780Bus::Bus8Bit(bus) => {
                let input = bus.as_input()?;
                Self::pull_byte(pin_e, &delay, &*input)?
            }
            GpioHD44780Bus::Bus4Bit(bus) => {
                let input = bus.as_input()?;
                let high = Self::pull_nibble(pin_e, &delay, &*input)?;
                let low = Self::pull_nibble(pin_e, &delay, &*input)?;
                (high << 4) | low
            }
        };

        trace!("Read {:08b}, RS: {}", byte, rs);

        Ok(byte)
    }

    /// Degraded write used during the reset dance, before the busy flag can
    /// be queried: always a single transaction, carrying only the high
    /// nibble on a 4-bit bus, and never followed by a busy poll.
    fn write_init(&mut self, byte: u8) -> DriverResult<()> {
        trace!("Writing init byte {:08b}", byte);

        self.pin_rw.write(false)?;
        self.pin_rs.write(false)?;

        let pin_e = self.pin_e;
        let delay = self.delay;

        match &mut self.data_bus {
            GpioHD44780Bus::Bus8Bit(bus) => {
                let out = bus.as_output()?;
                Self::push_byte(pin_e, &delay, &*out, byte)
            }
            GpioHD44780Bus::Bus4Bit(bus) => {
                let out = bus.as_output()?;
                Self::push_nibble(pin_e, &delay, &*out, (byte >> 4) & 0b1111)
            }
        }
    }

    /// Polls the status register until the busy flag clears.
    fn await_ready(&mut self) -> DriverResult<()> {
        let mut polls = 0u32;

        loop {
            let (busy, _) = self.get_busy_flag_and_address()?;
            if !busy {
                return Ok(());
            }

            polls += 1;
            if let BusyPolicy::MaxPolls(max) = self.busy_policy {
                if polls >= max {
                    return Err(DriverError::Unresponsive);
                }
            }
        }
    }
}

impl HD44780Driver for GpioHD44780Driver<'_> {
    /// Initialization by instruction, HD44780U datasheet pages 45-46. The
    /// order and the pacing are mandated by the datasheet; deviating from
    /// them leaves the controller in an unspecified state.
    fn init(&mut self) -> DriverResult<()> {
        debug!(
            "Initializing display: {}-bit bus, {} line(s), {} font",
            if self.data_bus.is_8bit() { 8 } else { 4 },
            if self.single_line { 1 } else { 2 },
            if self.font_5x10 { "5x10" } else { "5x8" },
        );

        // Wait for more than 40ms after VCC rises to 2.7V.
        self.delay.delay_ms(50);

        // Three 8-bit function set probes resynchronize the controller no
        // matter which interface mode it was left in. The busy flag cannot
        // be checked yet, so the pacing is pure delay.
        self.write_init(0b00110000)?;
        self.delay.delay_us(4500); // Wait for more than 4.1ms.
        self.write_init(0b00110000)?;
        self.delay.delay_us(120); // Wait for more than 100us.
        self.write_init(0b00110000)?;
        self.delay.delay_us(50); // Wait for more than 37us.

        // Drop to 4-bit operation; from here on every byte travels as two
        // nibbles.
        if self.data_bus.is_4bit() {
            self.write_init(0b00100000)?;
            self.delay.delay_us(50);
        }

        // The busy flag is queryable from here on.
        let eight_bit = self.data_bus.is_8bit();
        let two_lines = !self.single_line;
        let font_5x10 = self.font_5x10;
        self.function_set(eight_bit, two_lines, font_5x10)?;
        self.set_display_control(false, false, false)?;
        self.clear_display()?;
        self.set_entry_mode(CursorDirection::Right, false)?;
        self.set_display_control(true, false, false)
    }

    fn single_line(&self) -> bool {
        self.single_line
    }

    fn send_command(&mut self, command: u8) -> DriverResult<()> {
        self.send(false, command)
    }

    fn send_data(&mut self, data: u8) -> DriverResult<()> {
        self.send(true, data)
    }

    fn read_command(&mut self) -> DriverResult<u8> {
        self.read(false)
    }

    fn read_data(&mut self) -> DriverResult<u8> {
        let byte = self.read(true)?;

        // Data reads move the address counter just like data writes do.
        self.await_ready()?;
        self.delay.delay_us(ADDRESS_SETTLE_US);

        Ok(byte)
    }
}
