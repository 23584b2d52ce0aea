//! Linux convenience layer: spidev for the bus, sysfs GPIO for the control
//! lines, the blocking flavor of the driver.

use std::io;
use std::string::String;
use std::thread;
use std::time::Duration;
use std::vec;
use std::vec::Vec;

use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::sysfs_gpio::{self, Direction};
use linux_embedded_hal::{Delay, SPIError, SpidevBus, SpidevDevice, SysfsPin};

use crate::{BUF_SIZE, Config, Ili9328, Timer};

type CsError = <SysfsPin as embedded_hal::digital::ErrorType>::Error;

/// Which `/dev/spidevB.D` node to use and how fast to clock it.
///
/// The ILI9328 serial interface is specified up to 10 MHz; the default stays
/// at a conservative 500 kHz.
#[derive(Debug, Clone, Copy)]
pub struct SpiConfig {
    pub bus: u8,
    pub dev: u8,
    pub speed_hz: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            dev: 0,
            speed_hz: 500_000,
        }
    }
}

#[derive(Debug)]
pub enum LinuxError {
    /// spidev configuration error
    Io(io::Error),
    /// SPI device open error
    Spi(SPIError),
    /// sysfs GPIO export or direction error
    Gpio(sysfs_gpio::Error),
    /// Chip select line error
    Cs(CsError),
}

impl core::fmt::Display for LinuxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinuxError::Io(err) => write!(f, "spidev configuration failed: {err}"),
            LinuxError::Spi(err) => write!(f, "SPI device error: {err:?}"),
            LinuxError::Gpio(err) => write!(f, "sysfs GPIO error: {err}"),
            LinuxError::Cs(err) => write!(f, "chip select error: {err:?}"),
        }
    }
}

impl std::error::Error for LinuxError {}

impl From<io::Error> for LinuxError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<sysfs_gpio::Error> for LinuxError {
    fn from(err: sysfs_gpio::Error) -> Self {
        Self::Gpio(err)
    }
}

/// Driver over a spidev bus with a software (sysfs GPIO) chip select.
pub type SoftCsIli9328<'b> =
    Ili9328<'b, ExclusiveDevice<SpidevBus, SysfsPin, NoDelay>, SysfsPin, Delay>;

/// Driver over a spidev device with a kernel-managed chip select.
pub type HardCsIli9328<'b> = Ili9328<'b, SpidevDevice, SysfsPin, Delay>;

impl Timer for Delay {
    fn delay_ms(milliseconds: u64) {
        thread::sleep(Duration::from_millis(milliseconds));
    }
}

/// Open the panel with the chip select on a sysfs GPIO line.
///
/// This is the wiring for boards where the panel does not sit on one of the
/// kernel's CE lines: every chip-select frame is bracketed by toggling
/// `cs_gpio`. Call [`Ili9328::init`] on the returned driver before drawing.
pub fn open(
    config: Config,
    spi: SpiConfig,
    cs_gpio: u64,
    reset_gpio: u64,
    buffer: &mut [u8],
) -> Result<SoftCsIli9328<'_>, LinuxError> {
    let mut bus = SpidevBus::open(device_path(&spi)).map_err(LinuxError::Spi)?;
    bus.configure(&spi_options(spi.speed_hz))?;
    let cs = output_pin(cs_gpio)?;
    let rst = output_pin(reset_gpio)?;
    let dev = ExclusiveDevice::new_no_delay(bus, cs).map_err(LinuxError::Cs)?;
    Ok(Ili9328::new(config, dev, rst, buffer))
}

/// Open the panel with the chip select handled by the spidev node itself.
pub fn open_hardware_cs(
    config: Config,
    spi: SpiConfig,
    reset_gpio: u64,
    buffer: &mut [u8],
) -> Result<HardCsIli9328<'_>, LinuxError> {
    let mut dev = SpidevDevice::open(device_path(&spi)).map_err(LinuxError::Spi)?;
    dev.configure(&spi_options(spi.speed_hz))?;
    let rst = output_pin(reset_gpio)?;
    Ok(Ili9328::new(config, dev, rst, buffer))
}

/// Heap-allocate a [`BUF_SIZE`] chunk buffer for the driver constructors,
/// for callers that would rather not carve one out of the stack.
pub fn chunk_buffer() -> Vec<u8> {
    vec![0u8; BUF_SIZE]
}

fn device_path(spi: &SpiConfig) -> String {
    std::format!("/dev/spidev{}.{}", spi.bus, spi.dev)
}

fn spi_options(speed_hz: u32) -> SpidevOptions {
    // The controller samples on the second edge with the clock idling high.
    SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(speed_hz)
        .mode(SpiModeFlags::SPI_MODE_3)
        .build()
}

fn output_pin(gpio: u64) -> Result<SysfsPin, LinuxError> {
    let pin = SysfsPin::new(gpio);
    pin.export()?;
    // The value/direction attributes can lag behind the export.
    thread::sleep(Duration::from_millis(10));
    pin.set_direction(Direction::Out)?;
    Ok(pin)
}
