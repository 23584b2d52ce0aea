#![no_std]

#[cfg(any(test, feature = "linux"))]
extern crate std;

use embedded_graphics_core::pixelcolor::{Rgb565, raw::RawU16};
use embedded_graphics_core::prelude::RawData;
use embedded_hal::digital::OutputPin;
#[cfg(not(feature = "async"))]
use embedded_hal::spi::{Operation, SpiDevice};
#[cfg(feature = "async")]
use embedded_hal_async::spi::{Operation, SpiDevice};

#[cfg(all(feature = "linux", feature = "async"))]
compile_error!(
    "the `linux` helpers are blocking-only; build the async core with `--no-default-features --features async`"
);

#[cfg(all(feature = "linux", not(feature = "async")))]
pub mod linux;

// Panel dimensions for ILI9328 240RGB×320
pub const SCREEN_WIDTH: u16 = 240; // Physical width (short edge)
pub const SCREEN_HEIGHT: u16 = 320; // Physical height (long edge)

// Recommended chunk buffer size: eight full portrait rows. One start byte is
// prepended per chunk, which keeps every transfer within the default 4 KiB
// spidev bufsiz.
pub const BUF_SIZE: usize = 240 * 8 * 2;

// Serial interface start bytes, device ID bits 0b01110.
const START_INDEX: u8 = 0x70; // RS=0, write: register index follows
const START_DATA: u8 = 0x72; // RS=1, write: register data / GRAM stream follows

#[derive(Debug, Clone, Copy)]
pub enum Register {
    /// Driver Output Control (01h) - SS and SM bits
    DriverOutputControl = 0x01,
    /// LCD Driving Control (02h) - Line inversion
    LcdDrivingControl = 0x02,
    /// Entry Mode (03h) - GRAM update direction and BGR order
    EntryMode = 0x03,
    /// Resize Control (04h)
    ResizeControl = 0x04,
    /// Display Control 1 (07h) - Display on/off, color depth
    DisplayControl1 = 0x07,
    /// Display Control 2 (08h) - Back porch and front porch
    DisplayControl2 = 0x08,
    /// Display Control 3 (09h) - Non-display area refresh cycle
    DisplayControl3 = 0x09,
    /// Display Control 4 (0Ah) - FMARK function
    DisplayControl4 = 0x0A,
    /// RGB Interface Control 1 (0Ch)
    RgbInterfaceControl1 = 0x0C,
    /// Frame Marker Position (0Dh)
    FrameMarkerPosition = 0x0D,
    /// RGB Interface Control 2 (0Fh) - Interface polarity
    RgbInterfaceControl2 = 0x0F,

    /// Power Control 1 (10h) - SAP, BT, AP, DSTB, SLP, STB
    PowerControl1 = 0x10,
    /// Power Control 2 (11h) - DC1, DC0, VC
    PowerControl2 = 0x11,
    /// Power Control 3 (12h) - VREG1OUT voltage
    PowerControl3 = 0x12,
    /// Power Control 4 (13h) - VDV for VCOM amplitude
    PowerControl4 = 0x13,

    /// Horizontal GRAM Address Set (20h) - Address counter column
    HorizontalGramAddress = 0x20,
    /// Vertical GRAM Address Set (21h) - Address counter row
    VerticalGramAddress = 0x21,
    /// Write Data to GRAM (22h)
    GramData = 0x22,

    /// Power Control 7 (29h) - VCM for VCOMH
    PowerControl7 = 0x29,
    /// Frame Rate and Color Control (2Bh)
    FrameRateControl = 0x2B,

    /// Gamma Control 1 (30h)
    GammaControl1 = 0x30,
    /// Gamma Control 2 (31h)
    GammaControl2 = 0x31,
    /// Gamma Control 3 (32h)
    GammaControl3 = 0x32,
    /// Gamma Control 4 (35h)
    GammaControl4 = 0x35,
    /// Gamma Control 5 (36h)
    GammaControl5 = 0x36,
    /// Gamma Control 6 (37h)
    GammaControl6 = 0x37,
    /// Gamma Control 7 (38h)
    GammaControl7 = 0x38,
    /// Gamma Control 8 (39h)
    GammaControl8 = 0x39,
    /// Gamma Control 9 (3Ch)
    GammaControl9 = 0x3C,
    /// Gamma Control 10 (3Dh)
    GammaControl10 = 0x3D,

    /// Horizontal Address Window Start (50h)
    HorizontalWindowStart = 0x50,
    /// Horizontal Address Window End (51h)
    HorizontalWindowEnd = 0x51,
    /// Vertical Address Window Start (52h)
    VerticalWindowStart = 0x52,
    /// Vertical Address Window End (53h)
    VerticalWindowEnd = 0x53,

    /// Driver Output Control 2 (60h) - Gate scan line
    GateScanControl1 = 0x60,
    /// Base Image Display Control (61h) - NDL, VLE, REV
    GateScanControl2 = 0x61,
    /// Vertical Scroll Control (6Ah)
    GateScanControl3 = 0x6A,

    /// Partial Image 1 Display Position (80h)
    PartialImage1Position = 0x80,
    /// Partial Image 1 Start Line (81h)
    PartialImage1Start = 0x81,
    /// Partial Image 1 End Line (82h)
    PartialImage1End = 0x82,
    /// Partial Image 2 Display Position (83h)
    PartialImage2Position = 0x83,
    /// Partial Image 2 Start Line (84h)
    PartialImage2Start = 0x84,
    /// Partial Image 2 End Line (85h)
    PartialImage2End = 0x85,

    /// Panel Interface Control 1 (90h)
    PanelInterfaceControl1 = 0x90,
    /// Panel Interface Control 2 (92h)
    PanelInterfaceControl2 = 0x92,
}

/// Logical orientation, implemented through the entry mode AM/ID bits.
///
/// The window and address counter registers always take physical
/// coordinates; the driver transforms logical rectangles accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// 240×320, scan left-to-right, top-to-bottom (ID=11, AM=0)
    Portrait,
    /// 320×240, logical x runs down the physical long edge (ID=10, AM=1)
    Landscape,
    /// 240×320 rotated 180° (ID=00, AM=0)
    PortraitFlipped,
    /// 320×240 rotated 180° (ID=01, AM=1)
    LandscapeFlipped,
}

impl Orientation {
    fn entry_mode(self) -> u16 {
        match self {
            Orientation::Portrait => 0x0030,
            Orientation::Landscape => 0x0028,
            Orientation::PortraitFlipped => 0x0000,
            Orientation::LandscapeFlipped => 0x0018,
        }
    }

    /// Logical (width, height) under this orientation.
    pub fn dimensions(self) -> (u16, u16) {
        match self {
            Orientation::Portrait | Orientation::PortraitFlipped => (SCREEN_WIDTH, SCREEN_HEIGHT),
            Orientation::Landscape | Orientation::LandscapeFlipped => {
                (SCREEN_HEIGHT, SCREEN_WIDTH)
            }
        }
    }
}

#[derive(Clone, Copy)]
pub struct Config {
    /// Swap the red and blue channels in GRAM. The common ILI9328 modules
    /// wire the panel BGR, so this defaults to on.
    pub bgr: bool,
    pub orientation: Orientation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bgr: true,
            orientation: Orientation::Portrait,
        }
    }
}

#[derive(Debug)]
pub enum Error<E, P> {
    /// Communication error
    Comm(E),
    /// Reset pin error
    Pin(P),
    /// A pixel write was issued before `init` completed
    NotInitialized,
    /// The region does not fit the logical screen bounds
    InvalidRegion {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    /// Pixel slice length does not match the region
    BufferSize { expected: usize, got: usize },
}

/// Convert one RGB888 pixel to its big-endian RGB565 wire bytes.
///
/// Byte 0 carries red and the upper half of green, byte 1 the rest of green
/// and blue, matching the GRAM stream order the controller expects.
pub const fn rgb888_to_rgb565(r: u8, g: u8, b: u8) -> [u8; 2] {
    let r = r >> 3;
    let g = g >> 2;
    let b = b >> 3;
    [(r << 3) | (g >> 3), ((g & 0x07) << 5) | b]
}

pub struct Ili9328<'b, SPI, RST, TIMER>
where
    SPI: SpiDevice,
    RST: OutputPin,
    TIMER: Timer,
{
    spi: SPI,
    rst: RST,
    config: Config,
    buffer: &'b mut [u8],
    initialized: bool,
    width: u16,
    height: u16,
    _timer: core::marker::PhantomData<TIMER>,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Ili9328",),
    async(feature = "async", keep_self)
)]
impl<'b, SPI, RST, E, P, TIMER> Ili9328<'b, SPI, RST, TIMER>
where
    SPI: SpiDevice<Error = E>,
    RST: OutputPin<Error = P>,
    TIMER: Timer,
{
    /// Create an uninitialized driver.
    ///
    /// `buffer` is scratch space for streaming and pixel conversion;
    /// [`BUF_SIZE`] is a good default. Buffers below one pixel (2 bytes)
    /// still work but degrade conversion to a frame per pixel.
    pub fn new(config: Config, spi: SPI, rst: RST, buffer: &'b mut [u8]) -> Self {
        let (width, height) = config.orientation.dimensions();
        Self {
            spi,
            rst,
            config,
            buffer,
            initialized: false,
            width,
            height,
            _timer: core::marker::PhantomData,
        }
    }

    /// Reset the panel and run the register init table, leaving the display
    /// on and the handle ready for pixel writes.
    pub async fn init(&mut self) -> Result<(), Error<E, P>> {
        self.reset().await?;

        // -------------- Start initial sequence ----------
        self.write_register(Register::DriverOutputControl, 0x0100)
            .await?; // set SS and SM bit
        self.write_register(Register::LcdDrivingControl, 0x0700)
            .await?; // set 1 line inversion
        self.write_register(Register::EntryMode, self.entry_mode())
            .await?; // GRAM write direction, BGR
        self.write_register(Register::ResizeControl, 0x0000).await?;
        self.write_register(Register::DisplayControl2, 0x0207)
            .await?; // back porch and front porch
        self.write_register(Register::DisplayControl3, 0x0000)
            .await?; // non-display area refresh cycle
        self.write_register(Register::DisplayControl4, 0x0000)
            .await?; // FMARK function
        self.write_register(Register::RgbInterfaceControl1, 0x0000)
            .await?;
        self.write_register(Register::FrameMarkerPosition, 0x0000)
            .await?;
        self.write_register(Register::RgbInterfaceControl2, 0x0000)
            .await?;

        // -------------- Power on sequence ---------------
        self.write_register(Register::PowerControl1, 0x0000).await?; // SAP, BT, AP, DSTB, SLP, STB
        self.write_register(Register::PowerControl2, 0x0007).await?; // DC1, DC0, VC
        self.write_register(Register::PowerControl3, 0x0000).await?; // VREG1OUT voltage
        self.write_register(Register::PowerControl4, 0x0000).await?; // VDV for VCOM amplitude
        self.write_register(Register::DisplayControl1, 0x0001)
            .await?; // discharge capacitor power voltage
        TIMER::delay_ms(200).await;

        self.write_register(Register::PowerControl1, 0x1490).await?;
        self.write_register(Register::PowerControl2, 0x0227).await?;
        TIMER::delay_ms(50).await;
        self.write_register(Register::PowerControl3, 0x001C).await?; // internal reference voltage = Vci
        TIMER::delay_ms(50).await;
        self.write_register(Register::PowerControl4, 0x1A00).await?;
        self.write_register(Register::PowerControl7, 0x0025).await?; // VCM for VCOMH
        self.write_register(Register::FrameRateControl, 0x000C)
            .await?;
        TIMER::delay_ms(50).await;
        self.write_register(Register::HorizontalGramAddress, 0x0000)
            .await?;
        self.write_register(Register::VerticalGramAddress, 0x0000)
            .await?;

        // -------------- Adjust the gamma curve ----------
        self.write_register(Register::GammaControl1, 0x0000).await?;
        self.write_register(Register::GammaControl2, 0x0506).await?;
        self.write_register(Register::GammaControl3, 0x0104).await?;
        self.write_register(Register::GammaControl4, 0x0207).await?;
        self.write_register(Register::GammaControl5, 0x000F).await?;
        self.write_register(Register::GammaControl6, 0x0306).await?;
        self.write_register(Register::GammaControl7, 0x0102).await?;
        self.write_register(Register::GammaControl8, 0x0707).await?;
        self.write_register(Register::GammaControl9, 0x0702).await?;
        self.write_register(Register::GammaControl10, 0x1604)
            .await?;

        // -------------- Set GRAM area -------------------
        self.write_register(Register::HorizontalWindowStart, 0x0000)
            .await?;
        self.write_register(Register::HorizontalWindowEnd, SCREEN_WIDTH - 1)
            .await?;
        self.write_register(Register::VerticalWindowStart, 0x0000)
            .await?;
        self.write_register(Register::VerticalWindowEnd, SCREEN_HEIGHT - 1)
            .await?;
        self.write_register(Register::GateScanControl1, 0xA700)
            .await?; // gate scan line
        self.write_register(Register::GateScanControl2, 0x0001)
            .await?; // NDL, VLE, REV
        self.write_register(Register::GateScanControl3, 0x0000)
            .await?; // scrolling line

        // -------------- Partial display control ---------
        self.write_register(Register::PartialImage1Position, 0x0000)
            .await?;
        self.write_register(Register::PartialImage1Start, 0x0000)
            .await?;
        self.write_register(Register::PartialImage1End, 0x0000)
            .await?;
        self.write_register(Register::PartialImage2Position, 0x0000)
            .await?;
        self.write_register(Register::PartialImage2Start, 0x0000)
            .await?;
        self.write_register(Register::PartialImage2End, 0x0000)
            .await?;

        // -------------- Panel control -------------------
        self.write_register(Register::PanelInterfaceControl1, 0x0010)
            .await?;
        self.write_register(Register::PanelInterfaceControl2, 0x0600)
            .await?;

        // 262K color and display ON
        self.write_register(Register::DisplayControl1, 0x0133)
            .await?;

        self.initialized = true;
        Ok(())
    }

    /// Pulse the active-low reset line.
    pub async fn reset(&mut self) -> Result<(), Error<E, P>> {
        self.rst.set_high().map_err(Error::Pin)?;
        TIMER::delay_ms(10).await;
        self.rst.set_low().map_err(Error::Pin)?;
        TIMER::delay_ms(10).await;
        self.rst.set_high().map_err(Error::Pin)?;
        TIMER::delay_ms(50).await; // Wait for reset to complete

        Ok(())
    }

    /// Logical (width, height) under the current orientation.
    pub fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    pub async fn set_orientation(&mut self, orientation: Orientation) -> Result<(), Error<E, P>> {
        self.config.orientation = orientation;
        (self.width, self.height) = orientation.dimensions();
        self.write_register(Register::EntryMode, self.entry_mode())
            .await
    }

    fn entry_mode(&self) -> u16 {
        let bgr = if self.config.bgr { 0x1000 } else { 0x0000 };
        bgr | self.config.orientation.entry_mode()
    }

    /// Consume the driver and hand back the SPI device and reset pin.
    pub fn release(self) -> (SPI, RST) {
        (self.spi, self.rst)
    }

    /// Map a logical coordinate to the physical column/row of the panel.
    fn to_physical(&self, x: u16, y: u16) -> (u16, u16) {
        match self.config.orientation {
            Orientation::Portrait => (x, y),
            Orientation::PortraitFlipped => (SCREEN_WIDTH - 1 - x, SCREEN_HEIGHT - 1 - y),
            Orientation::Landscape => (SCREEN_WIDTH - 1 - y, x),
            Orientation::LandscapeFlipped => (y, SCREEN_HEIGHT - 1 - x),
        }
    }

    /// Program the address window for a logical rectangle and issue the
    /// GRAM write index; subsequent data frames stream pixels into it.
    ///
    /// Fails with [`Error::InvalidRegion`] if the rectangle is empty or
    /// extends past the logical bounds, and [`Error::NotInitialized`] before
    /// [`Ili9328::init`] has run.
    pub async fn set_window(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    ) -> Result<(), Error<E, P>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if width == 0
            || height == 0
            || x as u32 + width as u32 > self.width as u32
            || y as u32 + height as u32 > self.height as u32
        {
            return Err(Error::InvalidRegion {
                x,
                y,
                width,
                height,
            });
        }

        let (x1, y1) = self.to_physical(x, y);
        let (x2, y2) = self.to_physical(x + width - 1, y + height - 1);

        self.write_register(Register::HorizontalWindowStart, x1.min(x2))
            .await?;
        self.write_register(Register::HorizontalWindowEnd, x1.max(x2))
            .await?;
        self.write_register(Register::VerticalWindowStart, y1.min(y2))
            .await?;
        self.write_register(Register::VerticalWindowEnd, y1.max(y2))
            .await?;

        // The address counter starts at the logical origin; the entry mode
        // ID/AM bits walk it through the window in logical raster order.
        self.write_register(Register::HorizontalGramAddress, x1)
            .await?;
        self.write_register(Register::VerticalGramAddress, y1)
            .await?;

        self.write_index(Register::GramData).await
    }

    /// Draw a rectangle from big-endian RGB565 bytes (2 per pixel).
    pub async fn draw_raw(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u8],
    ) -> Result<(), Error<E, P>> {
        let expected = width as usize * height as usize * 2;
        if pixels.len() != expected {
            return Err(Error::BufferSize {
                expected,
                got: pixels.len(),
            });
        }
        self.set_window(x, y, width, height).await?;

        // Chunk on a pixel boundary; the GRAM address counter carries over
        // between chip-select frames.
        let chunk = (self.buffer.len() & !1).max(2);
        for part in pixels.chunks(chunk) {
            self.write_gram(part).await?;
        }
        Ok(())
    }

    /// Draw a rectangle from packed RGB888 bytes (3 per pixel), converting
    /// to RGB565 on the fly through the chunk buffer.
    ///
    /// This is the path for externally rendered images: decode to raw RGB
    /// and hand the rows over.
    pub async fn draw_rgb888(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u8],
    ) -> Result<(), Error<E, P>> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(Error::BufferSize {
                expected,
                got: pixels.len(),
            });
        }
        self.set_window(x, y, width, height).await?;

        let usable = self.buffer.len() & !1;
        if usable == 0 {
            // No room to batch: one frame per pixel.
            for rgb in pixels.chunks_exact(3) {
                let bytes = rgb888_to_rgb565(rgb[0], rgb[1], rgb[2]);
                self.write_gram(&bytes).await?;
            }
            return Ok(());
        }

        let per_chunk = usable / 2;
        for part in pixels.chunks(per_chunk * 3) {
            let mut len = 0;
            for rgb in part.chunks_exact(3) {
                let [hi, lo] = rgb888_to_rgb565(rgb[0], rgb[1], rgb[2]);
                self.buffer[len] = hi;
                self.buffer[len + 1] = lo;
                len += 2;
            }
            self.spi
                .transaction(&mut [
                    Operation::Write(&[START_DATA]),
                    Operation::Write(&self.buffer[..len]),
                ])
                .await
                .map_err(Error::Comm)?;
        }
        Ok(())
    }

    /// Fill the whole logical screen with a single color.
    pub async fn fill_screen(&mut self, color: Rgb565) -> Result<(), Error<E, P>> {
        let (width, height) = (self.width, self.height);
        self.fill_rect(0, 0, width, height, color).await
    }

    /// Fill a rectangle with a single color (batched transmission).
    pub async fn fill_rect(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        color: Rgb565,
    ) -> Result<(), Error<E, P>> {
        self.set_window(x, y, width, height).await?;

        let color_bytes = RawU16::from(color).into_inner().to_be_bytes();

        const BATCH_PIXELS: usize = 256;
        let mut batch = [0u8; BATCH_PIXELS * 2];
        for i in 0..BATCH_PIXELS {
            batch[i * 2] = color_bytes[0];
            batch[i * 2 + 1] = color_bytes[1];
        }

        let total_pixels = width as u32 * height as u32;
        for _ in 0..total_pixels / BATCH_PIXELS as u32 {
            self.write_gram(&batch).await?;
        }
        let remaining = (total_pixels % BATCH_PIXELS as u32) as usize;
        if remaining > 0 {
            self.write_gram(&batch[..remaining * 2]).await?;
        }
        Ok(())
    }

    /// Draw a single pixel. Out-of-bounds coordinates are ignored.
    pub async fn set_pixel(&mut self, x: u16, y: u16, color: Rgb565) -> Result<(), Error<E, P>> {
        if x >= self.width || y >= self.height {
            return Ok(());
        }
        self.set_window(x, y, 1, 1).await?;
        let bytes = RawU16::from(color).into_inner().to_be_bytes();
        self.write_gram(&bytes).await
    }

    /// One chip-select frame selecting a register (or the GRAM write).
    async fn write_index(&mut self, register: Register) -> Result<(), Error<E, P>> {
        self.spi
            .write(&[START_INDEX, 0x00, register as u8])
            .await
            .map_err(Error::Comm)
    }

    /// Index frame followed by one 16-bit data frame.
    async fn write_register(&mut self, register: Register, value: u16) -> Result<(), Error<E, P>> {
        self.write_index(register).await?;
        let [hi, lo] = value.to_be_bytes();
        self.spi
            .write(&[START_DATA, hi, lo])
            .await
            .map_err(Error::Comm)
    }

    /// One GRAM data frame: start byte then pixel bytes, CS held throughout.
    async fn write_gram(&mut self, data: &[u8]) -> Result<(), Error<E, P>> {
        self.spi
            .transaction(&mut [Operation::Write(&[START_DATA]), Operation::Write(data)])
            .await
            .map_err(Error::Comm)
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Timer",),
    async(feature = "async", keep_self)
)]
/// Simplified timer trait for delay operations.
pub trait Timer {
    /// Delay for the specified number of milliseconds.
    async fn delay_ms(milliseconds: u64);
}

#[cfg(all(test, not(feature = "async")))]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::vec::Vec;

    #[derive(Default)]
    struct SpiLog {
        // One Vec per chip-select frame, start byte included.
        frames: Vec<Vec<u8>>,
    }

    impl embedded_hal::spi::ErrorType for SpiLog {
        type Error = Infallible;
    }

    impl SpiDevice for SpiLog {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
            let mut frame = Vec::new();
            for op in operations.iter() {
                match op {
                    Operation::Write(data) => frame.extend_from_slice(data),
                    _ => unreachable!("driver only writes"),
                }
            }
            self.frames.push(frame);
            Ok(())
        }
    }

    #[derive(Default)]
    struct PinLog {
        levels: Vec<bool>,
    }

    impl embedded_hal::digital::ErrorType for PinLog {
        type Error = Infallible;
    }

    impl OutputPin for PinLog {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.levels.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.levels.push(true);
            Ok(())
        }
    }

    struct NoDelay;

    impl Timer for NoDelay {
        fn delay_ms(_milliseconds: u64) {}
    }

    type TestDriver<'b> = Ili9328<'b, SpiLog, PinLog, NoDelay>;

    fn driver(config: Config, buffer: &mut [u8]) -> TestDriver<'_> {
        Ili9328::new(config, SpiLog::default(), PinLog::default(), buffer)
    }

    /// Pair up `[0x70, 0, index]` / `[0x72, hi, lo]` frames.
    fn register_writes(frames: &[Vec<u8>]) -> Vec<(u8, u16)> {
        let mut writes = Vec::new();
        let mut i = 0;
        while i + 1 < frames.len() {
            let (a, b) = (&frames[i], &frames[i + 1]);
            if a.len() == 3 && a[0] == START_INDEX && b.len() == 3 && b[0] == START_DATA {
                writes.push((a[2], u16::from_be_bytes([b[1], b[2]])));
                i += 2;
            } else {
                i += 1;
            }
        }
        writes
    }

    #[test]
    fn draw_before_init_is_rejected() {
        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        let pixels = [0u8; 8];
        assert!(matches!(
            lcd.draw_raw(0, 0, 2, 2, &pixels),
            Err(Error::NotInitialized)
        ));
        let (spi, _) = lcd.release();
        assert!(spi.frames.is_empty());
    }

    #[test]
    fn init_pulses_reset_and_writes_the_table() {
        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();
        let (spi, rst) = lcd.release();

        assert_eq!(rst.levels, [true, false, true]);

        let writes = register_writes(&spi.frames);
        assert_eq!(writes[0], (0x01, 0x0100));
        assert_eq!(writes[1], (0x02, 0x0700));
        assert_eq!(writes[2], (0x03, 0x1030)); // BGR portrait entry mode
        // Window spans the full panel and the display ends up on.
        assert!(writes.contains(&(0x51, 0x00EF)));
        assert!(writes.contains(&(0x53, 0x013F)));
        assert_eq!(*writes.last().unwrap(), (0x07, 0x0133));
    }

    #[test]
    fn init_runs_the_configured_entry_mode() {
        let mut buffer = [0u8; 64];
        let config = Config {
            bgr: false,
            orientation: Orientation::Landscape,
        };
        let mut lcd = driver(config, &mut buffer);
        lcd.init().unwrap();
        let (spi, _) = lcd.release();
        assert!(register_writes(&spi.frames).contains(&(0x03, 0x0028)));
    }

    #[test]
    fn draw_rejects_out_of_bounds_regions() {
        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();

        let pixels = [0u8; 82];
        assert!(matches!(
            lcd.draw_raw(200, 0, 41, 1, &pixels), // 200 + 41 > 240
            Err(Error::InvalidRegion { .. })
        ));
        let pixels = [0u8; 2];
        assert!(matches!(
            lcd.draw_raw(0, 320, 1, 1, &pixels),
            Err(Error::InvalidRegion { .. })
        ));
        assert!(matches!(
            lcd.draw_raw(0, 0, 0, 0, &[]),
            Err(Error::InvalidRegion { .. })
        ));
    }

    #[test]
    fn draw_rejects_mismatched_buffers() {
        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();
        assert!(matches!(
            lcd.draw_raw(0, 0, 2, 2, &[0u8; 7]),
            Err(Error::BufferSize {
                expected: 8,
                got: 7
            })
        ));
        assert!(matches!(
            lcd.draw_rgb888(0, 0, 2, 2, &[0u8; 8]),
            Err(Error::BufferSize {
                expected: 12,
                got: 8
            })
        ));
    }

    #[test]
    fn draw_sets_the_window_and_streams_gram_frames() {
        let mut buffer = [0u8; 8]; // force chunking: 4 pixels per frame
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();
        let before = lcd.spi.frames.len();

        let pixels: Vec<u8> = (0u8..24).collect(); // 4×3 pixels
        lcd.draw_raw(2, 3, 4, 3, &pixels).unwrap();
        let (spi, _) = lcd.release();
        let frames = &spi.frames[before..];

        let writes = register_writes(frames);
        assert_eq!(
            writes,
            [
                (0x50, 2),
                (0x51, 5),
                (0x52, 3),
                (0x53, 5),
                (0x20, 2),
                (0x21, 3),
            ]
        );

        // GRAM index frame, then data frames of 4 pixels each.
        assert_eq!(frames[12], [START_INDEX, 0x00, 0x22]);
        assert_eq!(frames[13].len(), 9);
        assert_eq!(frames[13][0], START_DATA);
        assert_eq!(&frames[13][1..], &pixels[..8]);
        assert_eq!(&frames[14][1..], &pixels[8..16]);
        assert_eq!(&frames[15][1..], &pixels[16..]);
        assert_eq!(frames.len(), 16);
    }

    #[test]
    fn landscape_windows_map_to_physical_coordinates() {
        let mut buffer = [0u8; 64];
        let config = Config {
            orientation: Orientation::Landscape,
            ..Config::default()
        };
        let mut lcd = driver(config, &mut buffer);
        lcd.init().unwrap();
        assert_eq!(lcd.dimensions(), (320, 240));
        let before = lcd.spi.frames.len();

        lcd.draw_raw(10, 20, 2, 2, &[0u8; 8]).unwrap();
        let (spi, _) = lcd.release();

        let writes = register_writes(&spi.frames[before..]);
        // Logical (10,20)-(11,21) lands on physical columns 218..219,
        // rows 10..11, with the counter on the logical origin.
        assert_eq!(
            writes,
            [
                (0x50, 218),
                (0x51, 219),
                (0x52, 10),
                (0x53, 11),
                (0x20, 219),
                (0x21, 10),
            ]
        );
    }

    #[test]
    fn portrait_flipped_windows_map_to_physical_coordinates() {
        let mut buffer = [0u8; 64];
        let config = Config {
            orientation: Orientation::PortraitFlipped,
            ..Config::default()
        };
        let mut lcd = driver(config, &mut buffer);
        lcd.init().unwrap();
        assert_eq!(lcd.dimensions(), (240, 320));
        let before = lcd.spi.frames.len();

        lcd.draw_raw(10, 20, 2, 2, &[0u8; 8]).unwrap();
        let (spi, _) = lcd.release();

        let writes = register_writes(&spi.frames[before..]);
        // Logical (10,20)-(11,21) mirrors to physical columns 228..229,
        // rows 298..299; the counter starts on the logical origin.
        assert_eq!(
            writes,
            [
                (0x50, 228),
                (0x51, 229),
                (0x52, 298),
                (0x53, 299),
                (0x20, 229),
                (0x21, 299),
            ]
        );
    }

    #[test]
    fn landscape_flipped_windows_map_to_physical_coordinates() {
        let mut buffer = [0u8; 64];
        let config = Config {
            orientation: Orientation::LandscapeFlipped,
            ..Config::default()
        };
        let mut lcd = driver(config, &mut buffer);
        lcd.init().unwrap();
        assert_eq!(lcd.dimensions(), (320, 240));
        let before = lcd.spi.frames.len();

        lcd.draw_raw(10, 20, 2, 2, &[0u8; 8]).unwrap();
        let (spi, _) = lcd.release();

        let writes = register_writes(&spi.frames[before..]);
        // Logical (10,20)-(11,21) lands on physical columns 20..21,
        // rows 308..309.
        assert_eq!(
            writes,
            [
                (0x50, 20),
                (0x51, 21),
                (0x52, 308),
                (0x53, 309),
                (0x20, 20),
                (0x21, 309),
            ]
        );
    }

    #[test]
    fn rgb888_draw_survives_a_sub_pixel_buffer() {
        let mut buffer = [0u8; 1];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();
        let before = lcd.spi.frames.len();

        let rgb888 = [0xFF, 0x00, 0x00, 0x00, 0xFF, 0x00];
        lcd.draw_rgb888(0, 0, 2, 1, &rgb888).unwrap();
        let (spi, _) = lcd.release();
        let frames = &spi.frames[before..];

        // Window writes, GRAM index, then one frame per converted pixel.
        assert_eq!(frames.len(), 15);
        assert_eq!(frames[13], [START_DATA, 0xF8, 0x00]);
        assert_eq!(frames[14], [START_DATA, 0x07, 0xE0]);
    }

    #[test]
    fn rgb888_conversion_matches_known_values() {
        assert_eq!(rgb888_to_rgb565(0xFF, 0x00, 0x00), [0xF8, 0x00]);
        assert_eq!(rgb888_to_rgb565(0x00, 0xFF, 0x00), [0x07, 0xE0]);
        assert_eq!(rgb888_to_rgb565(0x00, 0x00, 0xFF), [0x00, 0x1F]);
        assert_eq!(rgb888_to_rgb565(0xFF, 0xFF, 0xFF), [0xFF, 0xFF]);
        assert_eq!(rgb888_to_rgb565(0x00, 0x00, 0x00), [0x00, 0x00]);
    }

    #[test]
    fn rgb888_conversion_round_trips() {
        // Any value expressible in 5/6/5 bits must survive the packing.
        for r5 in [0u8, 1, 15, 31] {
            for g6 in [0u8, 1, 32, 63] {
                for b5 in [0u8, 7, 31] {
                    let [hi, lo] = rgb888_to_rgb565(r5 << 3, g6 << 2, b5 << 3);
                    assert_eq!(hi >> 3, r5);
                    assert_eq!(((hi & 0x07) << 3) | (lo >> 5), g6);
                    assert_eq!(lo & 0x1F, b5);
                }
            }
        }
    }

    #[test]
    fn rgb888_draw_produces_the_same_stream_as_raw() {
        let rgb888 = [
            0xFF, 0x00, 0x00, 0x00, 0xFF, 0x00, //
            0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let rgb565 = [0xF8, 0x00, 0x07, 0xE0, 0x00, 0x1F, 0xFF, 0xFF];

        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();
        let before = lcd.spi.frames.len();
        lcd.draw_rgb888(0, 0, 2, 2, &rgb888).unwrap();
        let converted = lcd.spi.frames[before..].to_vec();

        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();
        let before = lcd.spi.frames.len();
        lcd.draw_raw(0, 0, 2, 2, &rgb565).unwrap();
        let raw = lcd.spi.frames[before..].to_vec();

        assert_eq!(converted, raw);
    }

    #[test]
    fn fill_rect_batches_and_respects_bounds() {
        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();

        assert!(matches!(
            lcd.fill_rect(239, 0, 2, 2, Rgb565::new(0, 0, 0)),
            Err(Error::InvalidRegion { .. })
        ));

        let before = lcd.spi.frames.len();
        lcd.fill_rect(0, 0, 10, 2, Rgb565::new(31, 0, 0)).unwrap();
        let (spi, _) = lcd.release();
        assert_eq!(spi.frames.len(), before + 14); // 6 registers ×2, index, data
        // 20 pixels fit a single batch frame.
        let data = spi.frames.last().unwrap();
        assert_eq!(data.len(), 1 + 20 * 2);
        assert_eq!(data[1], 0xF8);
        assert_eq!(data[2], 0x00);
    }

    #[test]
    fn set_pixel_ignores_out_of_bounds() {
        let mut buffer = [0u8; 64];
        let mut lcd = driver(Config::default(), &mut buffer);
        lcd.init().unwrap();
        let before = lcd.spi.frames.len();
        lcd.set_pixel(240, 0, Rgb565::new(0, 63, 0)).unwrap();
        lcd.set_pixel(0, 320, Rgb565::new(0, 63, 0)).unwrap();
        assert_eq!(lcd.spi.frames.len(), before);

        lcd.set_pixel(5, 6, Rgb565::new(0, 63, 0)).unwrap();
        let (spi, _) = lcd.release();
        assert_eq!(spi.frames.last().unwrap(), &[START_DATA, 0x07, 0xE0]);
    }
}
