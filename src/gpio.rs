//! Front panel GPIO: the ATR trigger line for an external PA, and a bit-banged SPI port for
//! configuring it.

use crate::UsrpDevice;
use failure::Error;
use std::thread;
use std::time::Duration;

pub const GPIO_BANK: &str = "FP0";

// ATR configuration
pub const TRIGGER_BIT: u32 = 0x1 << 3;
pub const TX_BIT: u32 = 0x1 << 1;
pub const RX_BIT: u32 = 0x1 << 2;
pub const ATR_MASK: u32 = TRIGGER_BIT | TX_BIT | RX_BIT;

// SPI lines
pub const SCK_BIT: u32 = 0x1 << 1;
pub const SS_BIT: u32 = 0x1 << 2;
pub const MOSI_SHIFT: u32 = 4;
pub const MOSI_BITS: u32 = 0xff << MOSI_SHIFT;
pub const SPI_BITS: u32 = SCK_BIT | SS_BIT | MOSI_BITS;

/// Delays of the bit-banged SPI clock
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpiTiming {
    /// Time each half clock period is held
    pub bit_delay: Duration,
}

impl Default for SpiTiming {
    fn default() -> Self {
        SpiTiming {
            bit_delay: Duration::from_millis(10),
        }
    }
}

/// Let the radio drive the trigger line: high with TX or RX active, low when idle
pub fn arm_trigger<D: UsrpDevice + ?Sized>(dev: &mut D) -> Result<(), Error> {
    dev.set_gpio_attr(GPIO_BANK, "CTRL", ATR_MASK, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "DDR", ATR_MASK, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_TX", TRIGGER_BIT | TX_BIT, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_RX", TRIGGER_BIT | RX_BIT, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_XX", ATR_MASK, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_0X", 0, ATR_MASK)
}

/// Hold the trigger line low and return the pins to manual control
pub fn disarm_trigger<D: UsrpDevice + ?Sized>(dev: &mut D) -> Result<(), Error> {
    dev.set_gpio_attr(GPIO_BANK, "DDR", ATR_MASK, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "OUT", 0, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_TX", 0, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_RX", 0, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_XX", 0, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "ATR_0X", 0, ATR_MASK)?;
    dev.set_gpio_attr(GPIO_BANK, "CTRL", 0, ATR_MASK)
}

/// Clock `bytes` out in parallel on the MOSI lines, one byte per SCK rising edge, framed by SS
/// going low
pub fn spi_transfer<D: UsrpDevice + ?Sized>(
    dev: &mut D,
    bytes: &[u8],
    timing: &SpiTiming,
) -> Result<(), Error> {
    // Manual control, output mode
    dev.set_gpio_attr(GPIO_BANK, "CTRL", 0, SPI_BITS)?;
    dev.set_gpio_attr(GPIO_BANK, "DDR", SPI_BITS, SPI_BITS)?;
    // SS idles high, SCK starts low and the slave reads on the rising edge
    dev.set_gpio_attr(GPIO_BANK, "OUT", SS_BIT, SS_BIT)?;
    dev.set_gpio_attr(GPIO_BANK, "OUT", 0, SCK_BIT)?;
    dev.set_gpio_attr(GPIO_BANK, "OUT", 0, MOSI_BITS)?;
    thread::sleep(timing.bit_delay);
    dev.set_gpio_attr(GPIO_BANK, "OUT", 0, SS_BIT)?;

    for &byte in bytes {
        dev.set_gpio_attr(GPIO_BANK, "OUT", 0, SCK_BIT)?;
        dev.set_gpio_attr(GPIO_BANK, "OUT", u32::from(byte) << MOSI_SHIFT, MOSI_BITS)?;
        thread::sleep(timing.bit_delay);
        dev.set_gpio_attr(GPIO_BANK, "OUT", SCK_BIT, SCK_BIT)?;
        thread::sleep(timing.bit_delay);
    }

    dev.set_gpio_attr(GPIO_BANK, "OUT", 0, SCK_BIT)?;
    dev.set_gpio_attr(GPIO_BANK, "OUT", 0, MOSI_BITS)?;
    dev.set_gpio_attr(GPIO_BANK, "OUT", SS_BIT, SS_BIT)
}
