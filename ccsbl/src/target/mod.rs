//! Target-side abstractions: device families, the protocol engine, and the
//! flash operation driver.

pub mod bootloader;
pub mod family;
pub mod flasher;

// Re-export common types
pub use bootloader::Bootloader;
pub use family::DeviceFamily;
pub use flasher::Flasher;

use crate::error::Result;
use crate::port::Port;
use log::debug;
use std::time::Duration;

/// Use the DTR and RTS lines to pulse !RESET while the bootloader backdoor
/// pin is asserted, so supported boards enter the ROM bootloader without
/// manual pin sequencing.
///
/// With `inverted` false (the common wiring) DTR drives the backdoor pin
/// and RTS drives !RESET; `inverted` swaps the two. `active_high` selects
/// the level the backdoor pin is configured to trigger on.
pub fn invoke_bootloader<P>(port: &mut P, inverted: bool, active_high: bool) -> Result<()>
where
    P: Port,
{
    fn set_backdoor_pin<P: Port>(port: &mut P, inverted: bool, level: bool) -> Result<()> {
        if inverted {
            port.set_rts(level)
        } else {
            port.set_dtr(level)
        }
    }

    fn set_reset_pin<P: Port>(port: &mut P, inverted: bool, level: bool) -> Result<()> {
        if inverted {
            port.set_dtr(level)
        } else {
            port.set_rts(level)
        }
    }

    debug!("pulsing !RESET with the backdoor pin asserted");
    set_backdoor_pin(port, inverted, !active_high)?;
    set_reset_pin(port, inverted, false)?;
    set_reset_pin(port, inverted, true)?;
    set_reset_pin(port, inverted, false)?;
    // Keep the pin asserted while the chip comes out of reset.
    #[cfg(not(test))]
    std::thread::sleep(Duration::from_millis(2));
    set_backdoor_pin(port, inverted, active_high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct PinPort {
        dtr: bool,
        rts: bool,
    }

    impl Port for PinPort {
        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            unreachable!()
        }
        fn timeout(&self) -> Duration {
            unreachable!()
        }
        fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
            unreachable!()
        }
        fn baud_rate(&self) -> u32 {
            unreachable!()
        }
        fn clear_buffers(&mut self) -> Result<()> {
            unreachable!()
        }
        fn name(&self) -> &str {
            unreachable!()
        }
        fn set_dtr(&mut self, level: bool) -> Result<()> {
            self.dtr = level;
            Ok(())
        }
        fn set_rts(&mut self, level: bool) -> Result<()> {
            self.rts = level;
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            unreachable!()
        }
    }

    impl io::Read for PinPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            unreachable!()
        }
    }

    impl io::Write for PinPort {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            unreachable!()
        }
        fn flush(&mut self) -> io::Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn test_invoke_bootloader_restores_pin_levels() {
        // Active-low backdoor, normal wiring: both pins end deasserted.
        let mut port = PinPort {
            dtr: false,
            rts: false,
        };
        invoke_bootloader(&mut port, false, false).unwrap();
        assert!(!port.dtr);
        assert!(!port.rts);

        // Inverted wiring.
        let mut port = PinPort {
            dtr: false,
            rts: false,
        };
        invoke_bootloader(&mut port, true, false).unwrap();
        assert!(!port.dtr);
        assert!(!port.rts);

        // Active-high backdoor ends with the pin asserted high.
        let mut port = PinPort {
            dtr: true,
            rts: false,
        };
        invoke_bootloader(&mut port, false, true).unwrap();
        assert!(port.dtr);
        assert!(!port.rts);
    }
}
