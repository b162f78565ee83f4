use clap::{Parser, Subcommand, ValueEnum};
use embedded_onewire::BusSpeed;
use onewire_emu::{Ds1961s, Ds2430a, Ds2431, EmulatedBus, Slave};
use onewire_memory::{DeviceSession, MemoryBank, family};

/// Drive the 1-Wire memory engine against an emulated EEPROM
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Emulated device
    #[arg(short, long, value_enum, default_value_t = Device::Ds2431)]
    device: Device,
    /// Operate the device at overdrive speed
    #[arg(short, long)]
    overdrive: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Device {
    Ds2430a,
    Ds2431,
    Ds1961s,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a data packet to a page and read it back
    Packet {
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        #[arg(short, long)]
        text: String,
    },
    /// Write hex encoded bytes to the first memory bank
    Write {
        #[arg(short, long, default_value_t = 0)]
        address: usize,
        #[arg(long)]
        hex: String,
    },
    /// Write protect a page
    Lock {
        #[arg(short, long)]
        page: usize,
    },
    /// Install a master secret, then read a page and check its MAC
    Auth {
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        #[arg(short, long)]
        secret: String,
    },
}

const SERIAL: [u8; 6] = [0x4d, 0x45, 0x4d, 0x4f, 0x52, 0x59];

fn main() {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();
    match args.device {
        Device::Ds2430a => run(Ds2430a::new(SERIAL), &args),
        Device::Ds2431 => run(Ds2431::new(SERIAL), &args),
        Device::Ds1961s => run(Ds1961s::new(SERIAL), &args),
    }
}

fn run<S: Slave>(device: S, args: &Args) {
    let rom = device.rom();
    let speed = if args.overdrive {
        BusSpeed::Overdrive
    } else {
        BusSpeed::Standard
    };
    let mut session = DeviceSession::new(EmulatedBus::new(device), linux_embedded_hal::Delay, rom)
        .expect("Invalid ROM code")
        .with_speed(speed);
    let descriptor = *family::banks(rom.to_le_bytes()[0])
        .and_then(|banks| banks.first())
        .expect("Unsupported device family");
    let mut bank = MemoryBank::new(descriptor);
    log::info!(
        "ROM: {:016x}, {}: {} pages of {} bytes",
        rom,
        descriptor.name,
        bank.page_count(),
        descriptor.page_length
    );
    if descriptor.capabilities.secret_protected() {
        // a new device has an all-zero secret
        session.set_secret([0; 8]);
    }
    match &args.command {
        Command::Packet { page, text } => {
            bank.write_page_packet(&mut session, *page, text.as_bytes())
                .expect("Failed to write packet");
            let mut payload = [0; 32];
            let len = bank
                .read_page_packet(&mut session, *page, &mut payload)
                .expect("Failed to read packet");
            log::info!(
                "Page {}: {:?}",
                page,
                String::from_utf8_lossy(&payload[..len])
            );
        }
        Command::Write { address, hex } => {
            let data = hex::decode(hex).expect("Invalid hex data");
            bank.write(&mut session, *address, &data)
                .expect("Failed to write");
        }
        Command::Lock { page } => {
            bank.lock_page(&mut session, *page)
                .expect("Failed to lock page");
            for page in 0..bank.page_count() {
                let locked = bank
                    .is_page_locked(&mut session, page)
                    .expect("Failed to read page attributes");
                log::info!("Page {}: locked {}", page, locked);
            }
        }
        Command::Auth { page, secret } => {
            bank.install_master_secret(&mut session, *page, secret.as_bytes())
                .expect("Failed to install secret");
            let challenge = session.generate_challenge(&mut rand::rng());
            log::info!("Challenge: {}", hex::encode(challenge));
            let mut data = [0; 32];
            bank.read_verified_page(&mut session, *page, &mut data)
                .expect("Failed to read authenticated page");
            log::info!("Page {} authenticated: {}", page, hex::encode(data));
        }
    }
    // Dump the bank
    let mut contents = vec![0; descriptor.size];
    bank.read(&mut session, 0, false, &mut contents)
        .expect("Failed to read memory");
    for (page, chunk) in contents.chunks(descriptor.page_length).enumerate() {
        log::info!("{:2}: {}", page, hex::encode(chunk));
    }
    let (bus, _) = session.release();
    log::info!("Commands: {}", hex::encode(bus.commands()));
}
