mod common;

use common::{SERIAL, Session, count, session};
use embedded_hal::delay::DelayNs;
use onewire_emu::{Ds1961s, Ds2431, EmulatedBus, Slave};
use onewire_memory::family::{ds1961s, ds2431};
use onewire_memory::{DeviceSession, MemoryBank, MemoryBankDescriptor, MemoryError, Timing, sha};

const SECRET_PHRASE: &[u8] = b"a master secret long enough to need two phrases of the SHA engine";

fn installed() -> (Session<Ds1961s>, MemoryBank) {
    let mut session = session(Ds1961s::new(SERIAL));
    let mut bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    bank.install_master_secret(&mut session, 3, SECRET_PHRASE)
        .unwrap();
    (session, bank)
}

#[test]
fn master_secret_matches_the_device() {
    let (session, _) = installed();
    let secret = session.secret().unwrap();
    assert_eq!(secret, session.bus().device().secret());
    assert_ne!(secret, [0; 8]);
    // one Compute Next Secret per 47-byte phrase
    assert_eq!(count(session.bus().commands(), 0x33), 2);
    assert_eq!(count(session.bus().commands(), 0x5a), 1);
}

#[test]
fn authenticated_page_verifies() {
    let (mut session, mut bank) = installed();
    bank.write(&mut session, 0x20, b"signed data").unwrap();
    assert_eq!(&session.bus().device().data()[0x20..0x2b], b"signed data");

    let mut rng = rand::rng();
    let challenge = session.generate_challenge(&mut rng);
    assert!(!session.challenge_spent());
    let auth = bank.read_authenticated_page(&mut session, 1).unwrap();
    assert_eq!(
        count(session.bus().commands(), ds1961s::READ_AUTHENTICATED_PAGE),
        1
    );
    assert_eq!(auth.challenge, challenge);
    assert_eq!(&auth.data[..11], b"signed data");
    bank.verify_authenticated_page(&mut session, &auth).unwrap();
    assert!(!session.challenge_spent());

    let mut buf = [0; 32];
    bank.read_verified_page(&mut session, 1, &mut buf).unwrap();
    assert_eq!(buf, auth.data);
}

#[test]
fn wrong_secret_spends_the_challenge() {
    let (mut session, mut bank) = installed();
    session.set_challenge([0x11; 8]);
    let auth = bank.read_authenticated_page(&mut session, 0).unwrap();
    session.set_secret([0xee; 8]);
    let err = bank
        .verify_authenticated_page(&mut session, &auth)
        .unwrap_err();
    assert_eq!(err, MemoryError::MacMismatch);
    assert!(!err.is_transient());
    assert!(session.challenge_spent());
    assert_eq!(
        bank.read_authenticated_page(&mut session, 0),
        Err(MemoryError::ChallengeReused)
    );

    session.set_challenge([0x22; 8]);
    assert!(bank.read_authenticated_page(&mut session, 0).is_ok());
}

#[test]
fn fresh_session_has_no_challenge() {
    let mut session = session(Ds1961s::new(SERIAL));
    let mut bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    assert!(session.challenge_spent());
    assert_eq!(
        bank.read_authenticated_page(&mut session, 0),
        Err(MemoryError::ChallengeReused)
    );
    assert!(session.bus().commands().is_empty());
}

#[test]
fn page_mac_matches_the_pinned_vector() {
    let mut session = session(Ds1961s::new(SERIAL));
    let mut bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    session.set_secret([0; 8]);
    session.set_challenge([0xff; 8]);
    let mut data = [0xaa; 32];
    let mut mac = [0; 20];
    bank.read_page_crc(&mut session, 0, &mut data, Some(&mut mac[..]))
        .unwrap();
    assert_eq!(data, [0; 32]);
    assert_eq!(
        mac,
        [
            0xe0, 0x50, 0xbb, 0xe5, 0xa8, 0x82, 0xfc, 0x9e, 0x00, 0x60, 0x8d, 0xcf, 0x83, 0x1a,
            0xe3, 0xda, 0x44, 0x23, 0x41, 0x80
        ]
    );
    let block = sha::authentication_block(&[0; 8], &data, 0, &session.serial(), &[0xff; 8]);
    assert_eq!(sha::verify_mac(&block, &mac), Ok(()));
}

#[test]
fn damaged_page_data_is_detected() {
    let (mut session, mut bank) = installed();
    session
        .bus_mut()
        .device_mut()
        .faults_mut()
        .corrupt_authenticated_read = true;
    let mut row = [0; 8];
    bank.read(&mut session, 0x40, false, &mut row).unwrap();
    assert!(!session.force_verify());

    session.set_challenge([0x33; 8]);
    assert_eq!(
        bank.read_authenticated_page(&mut session, 2),
        Err(MemoryError::FirstCrcFailed)
    );
    assert!(session.force_verify());
    assert!(session.challenge_spent());
}

#[test]
fn damaged_mac_is_detected() {
    let (mut session, mut bank) = installed();
    session.set_challenge([0x44; 8]);
    session
        .bus_mut()
        .device_mut()
        .faults_mut()
        .corrupt_mac = true;
    let mut row = [0; 8];
    bank.read(&mut session, 0x40, false, &mut row).unwrap();
    assert!(!session.force_verify());

    assert_eq!(
        bank.read_authenticated_page(&mut session, 2),
        Err(MemoryError::SecondCrcFailed)
    );
    assert!(session.force_verify());
    assert!(session.challenge_spent());
}

#[test]
fn authenticated_reads_need_a_page_crc_command() {
    let (mut session, _) = installed();
    let mut bank = MemoryBank::new(MemoryBankDescriptor {
        read_page_crc_command: None,
        ..ds1961s::MAIN_MEMORY
    });
    session.set_challenge([0x55; 8]);
    let before = session.bus().commands().len();
    assert_eq!(
        bank.read_authenticated_page(&mut session, 0),
        Err(MemoryError::UnsupportedOperation)
    );
    assert_eq!(session.bus().commands().len(), before);
    assert!(!session.challenge_spent());
}

/// Records every millisecond delay.
#[derive(Default)]
struct RecordingDelay(Vec<u32>);

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, _ns: u32) {}

    fn delay_ms(&mut self, ms: u32) {
        self.0.push(ms);
    }
}

#[test]
fn next_secret_waits_for_compute_and_programming() {
    let bus = EmulatedBus::new(Ds1961s::new(SERIAL));
    let rom = bus.device().rom();
    let mut session = DeviceSession::new(bus, RecordingDelay::default(), rom)
        .unwrap()
        .with_timing(
            Timing::default()
                .with_program_ms(7)
                .with_sha_compute_ms(3)
                .with_retry_delay_ms(1),
        );
    let mut bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    bank.install_master_secret(&mut session, 3, SECRET_PHRASE)
        .unwrap();
    let expected = session.bus().device().secret();
    assert_eq!(session.secret(), Some(expected));

    let (_, delay) = session.release();
    // one Compute Next Secret per phrase, each powered for 3 + 7 ms
    assert_eq!(delay.0.iter().filter(|&&ms| ms == 10).count(), 2);
    assert!(delay.0.contains(&3));
    assert!(delay.0.contains(&7));
}

#[test]
fn protected_secret_cannot_change() {
    let (mut session, mut bank) = installed();
    let secret = session.bus().device().secret();
    bank.protect_secret(&mut session).unwrap();
    assert_eq!(session.bus().device().control()[0], 0xaa);

    assert_eq!(
        bank.load_first_secret(&mut session, [0; 8]),
        Err(MemoryError::WriteProtected)
    );
    assert_eq!(
        bank.bind_secret_to_device(&mut session, 2, &[0x5a; 32]),
        Err(MemoryError::WriteProtected)
    );
    assert_eq!(session.bus().device().secret(), secret);
    assert_eq!(session.secret(), Some(secret));

    // protection is read back from the device
    let mut fresh = MemoryBank::new(ds1961s::MAIN_MEMORY);
    assert_eq!(
        fresh.install_master_secret(&mut session, 3, SECRET_PHRASE),
        Err(MemoryError::WriteProtected)
    );

    // page data stays writable
    bank.write(&mut session, 0x40, &[7; 8]).unwrap();
    assert_eq!(&session.bus().device().data()[0x40..0x48], &[7; 8]);
    bank.protect_secret(&mut session).unwrap();
}

#[test]
fn secret_protection_needs_a_shared_control_row() {
    let mut session = session(Ds1961s::new(SERIAL));
    let mut bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    assert_eq!(
        bank.protect_secret(&mut session),
        Err(MemoryError::SecretUnknown)
    );
    assert_eq!(session.bus().device().control()[0], 0x00);

    let mut other = common::session(Ds2431::new(SERIAL));
    let mut eeprom = MemoryBank::new(ds2431::MAIN_MEMORY);
    assert_eq!(
        eeprom.protect_secret(&mut other),
        Err(MemoryError::UnsupportedOperation)
    );
}

#[test]
fn secret_is_bound_to_the_device() {
    let (mut session, mut bank) = installed();
    let master = session.secret().unwrap();
    bank.bind_secret_to_device(&mut session, 2, &[0x5a; 32])
        .unwrap();
    let bound = session.secret().unwrap();
    assert_ne!(bound, master);
    assert_eq!(bound, session.bus().device().secret());

    // another serial number gives another secret
    let mut other = common::session(Ds1961s::new([9, 8, 7, 6, 5, 4]));
    let mut other_bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    other_bank
        .install_master_secret(&mut other, 3, SECRET_PHRASE)
        .unwrap();
    assert_eq!(other.secret(), Some(master));
    other_bank
        .bind_secret_to_device(&mut other, 2, &[0x5a; 32])
        .unwrap();
    assert_ne!(other.secret(), Some(bound));
}

#[test]
fn writes_need_the_secret() {
    let mut session = session(Ds1961s::new(SERIAL));
    let mut bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    assert_eq!(
        bank.write(&mut session, 0, &[1; 8]),
        Err(MemoryError::SecretUnknown)
    );

    // the device secret is all zeros until one is installed
    session.set_secret([0; 8]);
    bank.write(&mut session, 0, &[1; 8]).unwrap();
    assert_eq!(&session.bus().device().data()[..8], &[1; 8]);

    session.set_secret([1; 8]);
    assert_eq!(
        bank.write(&mut session, 0, &[2; 8]),
        Err(MemoryError::CopyFailed)
    );
    assert_eq!(&session.bus().device().data()[..8], &[1; 8]);
}

#[test]
fn shared_protection_locks_every_page() {
    let (mut session, mut bank) = installed();
    bank.set_page_write_once(&mut session, 1).unwrap();
    assert_eq!(bank.is_page_write_once(&mut session, 1), Ok(true));
    assert_eq!(
        bank.set_page_write_once(&mut session, 2),
        Err(MemoryError::WriteProtected)
    );

    bank.lock_page(&mut session, 0).unwrap();
    for page in 0..4 {
        assert_eq!(bank.is_page_locked(&mut session, page), Ok(true));
    }
    assert!(bank.is_read_only());
    assert_eq!(
        bank.write(&mut session, 0x60, &[0; 8]),
        Err(MemoryError::WriteProtected)
    );
    assert_eq!(session.bus().device().control()[1], 0xaa);
}

#[test]
fn register_bank_hides_the_secret() {
    let (mut session, _) = installed();
    let mut registers = MemoryBank::new(ds1961s::REGISTERS);
    let mut buf = [0; 24];
    registers.read(&mut session, 0, false, &mut buf).unwrap();
    assert_eq!(&buf[..8], &[0xff; 8]);
    assert_eq!(&buf[16..], &session.rom().to_le_bytes());
    assert_eq!(
        registers.write(&mut session, 8, &[0]),
        Err(MemoryError::UnsupportedOperation)
    );
    assert!(registers.is_read_only());
}

#[test]
fn secure_operations_need_a_secure_bank() {
    let mut session = session(Ds1961s::new(SERIAL));
    let mut registers = MemoryBank::new(ds1961s::REGISTERS);
    session.set_challenge([0; 8]);
    assert_eq!(
        registers.read_authenticated_page(&mut session, 0),
        Err(MemoryError::UnsupportedOperation)
    );
    assert_eq!(
        registers.load_first_secret(&mut session, [0; 8]),
        Err(MemoryError::UnsupportedOperation)
    );
    let mut bank = MemoryBank::new(ds1961s::MAIN_MEMORY);
    assert_eq!(
        bank.read_authenticated_page(&mut session, 4),
        Err(MemoryError::OutOfRange)
    );
}
