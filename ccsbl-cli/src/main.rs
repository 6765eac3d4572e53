//! ccsbl CLI - program CC13xx/CC26xx flash over the ROM serial bootloader.

use anyhow::{Context, Result, bail};
use ccsbl::{Bootloader, DeviceFamily, Flasher, NativePort, Port, image};
use clap::Parser;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Read timeout for the serial port; sector erases are the slowest
/// acknowledged operation.
const PORT_TIMEOUT: Duration = Duration::from_secs(3);

/// ccsbl - program CC13xx/CC26xx flash over the ROM serial bootloader.
#[derive(Parser)]
#[command(name = "ccsbl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial device connected to the target (e.g. /dev/ttyUSB0).
    port: String,

    /// Firmware image: Intel HEX when the extension is .hex, else raw binary.
    file: PathBuf,

    /// Target device family: cc13x0, cc13x2, cc26x0, or cc26x2.
    #[arg(value_parser = parse_family)]
    family: DeviceFamily,

    /// Erase from the start address to the end of flash.
    #[arg(short = 'e')]
    erase: bool,

    /// Program the image into flash.
    #[arg(short = 'p')]
    program: bool,

    /// Verify the image against flash.
    #[arg(short = 'v')]
    verify: bool,

    /// Start address for erase, program, and verify (0x-prefixed hex,
    /// 0-prefixed octal, else decimal). Must be on a page boundary.
    #[arg(long = "start", value_name = "ADDR", value_parser = parse_number, default_value = "0")]
    start: u32,

    /// Pulse DTR/RTS to enter the ROM bootloader before connecting.
    #[arg(long)]
    invoke: bool,

    /// Baud rate.
    #[arg(short, long, default_value = "115200", env = "CCSBL_BAUD")]
    baud: u32,

    /// Verbose output level (--verbose, --verbose --verbose, ...).
    #[arg(long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Parse the family tag through the library, so an unknown tag surfaces as
/// its `BadFamily` error.
fn parse_family(s: &str) -> Result<DeviceFamily, String> {
    DeviceFamily::from_name(s).map_err(|e| e.to_string())
}

/// Parse an address the way `strtol(.., 0)` does: `0x` prefix means hex, a
/// leading `0` means octal, anything else decimal.
fn parse_number(s: &str) -> Result<u32, String> {
    let t = s.trim();
    let (digits, radix) = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X"))
    {
        (hex, 16)
    } else if t.len() > 1 && t.starts_with('0') {
        (&t[1..], 8)
    } else {
        (t, 10)
    };
    u32::from_str_radix(digits, radix).map_err(|e| format!("invalid number '{s}': {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match run(&cli) {
        Ok(()) => {
            println!(
                "{}",
                style("Operation completed successfully").green().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", style(format!("Error: {e:#}")).red());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if !(cli.erase || cli.program || cli.verify) {
        bail!("nothing to do: pass -e, -p, and/or -v");
    }

    let family = cli.family;
    println!("Device set to {}", style(family).cyan());

    ctrlc::set_handler(|| {
        ccsbl::set_interrupt_flag();
    })
    .context("failed to install the Ctrl-C handler")?;

    println!("Opening serial port {} @ {} baud", cli.port, cli.baud);
    let mut port = NativePort::open_with_timeout(&cli.port, cli.baud, PORT_TIMEOUT)
        .with_context(|| format!("could not open serial port {}", cli.port))?;

    if cli.invoke {
        log::info!("invoking the bootloader over DTR/RTS");
        ccsbl::invoke_bootloader(&mut port, false, false)
            .context("could not invoke the bootloader over DTR/RTS")?;
    }

    let engine = Bootloader::new(port, family);
    let mut flasher = Flasher::new(engine).with_cancel(ccsbl::cancel_context_from_global());
    flasher.set_start_addr(cli.start);

    // The family is known, so the (possibly coerced) start address anchors
    // a raw binary image.
    let runs = if cli.program || cli.verify {
        let runs = image::load_runs(&cli.file, flasher.start_addr())
            .with_context(|| format!("could not load image {}", cli.file.display()))?;
        let total: usize = runs.iter().map(|r| r.data.len()).sum();
        println!("Image: {} byte(s) in {} run(s)", total, runs.len());
        runs
    } else {
        Vec::new()
    };

    println!("Connecting (reset the device into its bootloader if needed)...");
    let chip_id = flasher
        .connect()
        .context("could not connect to the bootloader")?;
    println!(
        "{} chip id {:#010X}",
        style("Connected,").green(),
        chip_id
    );

    if cli.erase {
        let pb = progress_bar("Erasing");
        flasher
            .erase(|done, total| {
                pb.set_length(total);
                pb.set_position(done);
            })
            .context("flash erase failed")?;
        pb.finish();
    }

    if cli.program {
        let pb = progress_bar("Programming");
        flasher
            .program(&runs, |done, total| {
                pb.set_length(total);
                pb.set_position(done);
            })
            .context("flash programming failed")?;
        pb.finish();
    }

    if cli.verify {
        let pb = progress_bar("Verifying");
        flasher
            .verify(&runs, |done, total| {
                pb.set_length(total);
                pb.set_position(done);
            })
            .context("flash verification failed")?;
        pb.finish();
    }

    // The port would close on drop anyway; closing it here keeps teardown
    // on the happy path.
    flasher.into_engine().into_port().close()?;

    Ok(())
}

/// Build the bar used by every phase.
fn progress_bar(label: &str) -> ProgressBar {
    let pb = ProgressBar::new(1);
    #[allow(clippy::unwrap_used)] // Static template string, unwrap is safe
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:12} [{bar:50.cyan/blue}] {percent:>3}%")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.set_message(label.to_string());
    pb
}
