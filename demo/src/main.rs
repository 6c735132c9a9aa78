use dotenv::dotenv;
use eyre::eyre;
use hd44780_gpio::GpioDriver;
use hd44780_gpio::delay::Delay;
use hd44780_gpio::driver::{DisplayConfig, GpioHD44780Driver, HD44780Driver};
use hd44780_gpio::gpiod::GpiodDriver;
use log::{debug, info};
use std::env::var;
use std::thread::sleep;
use std::time::Duration;

/// Heart glyph, one 5-bit pixel mask per row.
const HEART: [u8; 8] = [
    0b00000, 0b01010, 0b11111, 0b11111, 0b01110, 0b00100, 0b00000, 0b00000,
];

fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

/// The delay calibration input: `LCD_CPU_HZ` if set, otherwise the CPU
/// frequency reported by the system.
fn cpu_hz() -> eyre::Result<u64> {
    if let Ok(hz) = var("LCD_CPU_HZ") {
        return Ok(hz.parse()?);
    }

    let system = sysinfo::System::new_all();
    let mhz = system.cpus().first().map(|cpu| cpu.frequency()).unwrap_or(0);

    if mhz == 0 {
        return Err(eyre!("cannot determine the CPU frequency, set LCD_CPU_HZ"));
    }

    Ok(mhz * 1_000_000)
}

fn main() -> eyre::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    // Get pin numbers from env
    let pin_e_no: usize = var("LCD_PIN_E")?.parse()?;
    let pin_rw_no: usize = var("LCD_PIN_RW")?.parse()?;
    let pin_rs_no: usize = var("LCD_PIN_RS")?.parse()?;
    // 4-bit data bus - DB4 DB5 DB6 DB7
    let data_pin_nos: [usize; 4] = parse_pin_bus(&var("LCD_PINS_DATA")?)?;

    info!(
        "LCD @ E: {}, RW: {}, RS: {}, Data: {:?}",
        pin_e_no, pin_rw_no, pin_rs_no, data_pin_nos
    );

    let hz = cpu_hz()?;
    debug!("Delay calibration base: {} Hz", hz);

    let chip_path = var("LCD_GPIOCHIP").unwrap_or_else(|_| "/dev/gpiochip0".to_string());
    let gpio = GpiodDriver::open(&chip_path)?;
    debug!("{:?} initialized.", gpio);

    let mut pin_e = gpio.get_pin(pin_e_no)?;
    let pin_e = pin_e.as_output()?;
    let mut pin_rw = gpio.get_pin(pin_rw_no)?;
    let pin_rw = pin_rw.as_output()?;
    let mut pin_rs = gpio.get_pin(pin_rs_no)?;
    let pin_rs = pin_rs.as_output()?;
    let mut data_bus = gpio.get_pin_bus(data_pin_nos)?;

    let mut lcd =
        GpioHD44780Driver::new_4bit(&*pin_e, &*pin_rw, &*pin_rs, &mut *data_bus, Delay::new(hz));

    lcd.init()?;
    info!("Display initialized");

    lcd.define_glyph(0, false, &HEART)?;

    // Glyph 0 is printable like any other character code.
    lcd.put_str("Hello from Rust \x00\n\tsecond line")?;

    sleep(Duration::from_secs(2));
    lcd.shift_display(-4)?;
    sleep(Duration::from_secs(2));
    lcd.shift_display(4)?;

    lcd.configure(&DisplayConfig {
        cursor_on: true,
        blink_on: true,
        ..DisplayConfig::default()
    })?;

    Ok(())
}
