//! Test doubles: a scripted module, a stepping clock and a spy flash.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::collections::{BTreeMap, VecDeque};
use std::string::String;
use std::vec::Vec;

use crate::channel::RxChannel;
use crate::client::{Client, ClientConfig};
use crate::codec::encode_hex;
use crate::io::{Bank, Clock, Storage, Transport};

pub type TestClient = Client<MockTransport, MockClock>;

/// Module side of the link.
///
/// Each complete command line sent is checked against the next scripted
/// command, and that command's reply queued for receive.  With nothing
/// scripted, commands go unanswered.
pub struct MockTransport {
    rx: RxChannel<8192>,
    line: Vec<u8>,
    script: VecDeque<(Vec<u8>, Vec<u8>)>,
    boot: Vec<u8>,
    pub sent: Vec<u8>,
    pub inits: usize,
    pub baud: Option<u32>,
    pub fail_init: bool,
    pub fail_send: bool,
    pub fail_receive: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx: RxChannel::new(),
            line: Vec::new(),
            script: VecDeque::new(),
            boot: Vec::new(),
            sent: Vec::new(),
            inits: 0,
            baud: None,
            fail_init: false,
            fail_send: false,
            fail_receive: false,
        }
    }

    /// Queue unsolicited output.
    pub fn inject(&mut self, data: &[u8]) {
        assert_eq!(self.rx.extend(data), data.len(), "receive channel full");
    }

    /// Output produced each time the transport is initialised.
    pub fn boot_output(&mut self, data: &[u8]) {
        self.boot = data.to_vec();
    }

    /// Answer `cmd` with `reply`.
    pub fn expect(&mut self, cmd: &[u8], reply: &[u8]) {
        self.script.push_back((cmd.to_vec(), reply.to_vec()));
    }

    /// Whether every scripted command has been sent.
    pub fn script_done(&self) -> bool {
        self.script.is_empty()
    }
}

impl Transport for MockTransport {
    type Error = &'static str;

    fn init(&mut self) -> Result<(), Self::Error> {
        if self.fail_init {
            return Err("init failed");
        }
        self.inits += 1;
        let boot = self.boot.clone();
        self.inject(&boot);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_baud(&mut self, rate: u32) -> Result<(), Self::Error> {
        self.baud = Some(rate);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_send {
            return Err("send failed");
        }
        self.sent.extend_from_slice(data);
        self.line.extend_from_slice(data);

        if self.line.ends_with(b"\r\n") {
            let line = core::mem::take(&mut self.line);
            if let Some((cmd, reply)) = self.script.pop_front() {
                assert_eq!(
                    String::from_utf8_lossy(&line),
                    String::from_utf8_lossy(&cmd),
                    "unexpected command"
                );
                self.inject(&reply);
            }
        }
        Ok(data.len())
    }

    fn receive_one(&mut self) -> Result<Option<u8>, Self::Error> {
        if self.fail_receive {
            return Err("receive failed");
        }
        Ok(self.rx.pop())
    }

    fn flush(&mut self) {
        self.rx.clear();
    }
}

/// Clock advancing one tick each time it is read.
pub struct MockClock {
    now: u32,
}

impl MockClock {
    pub fn new(start: u32) -> Self {
        Self { now: start }
    }
}

impl Clock for MockClock {
    fn ticks(&mut self) -> u32 {
        let now = self.now;
        self.now = self.now.wrapping_add(1);
        now
    }
}

/// Flash spy with failure injection.
pub struct MockFlash {
    boot: Bank,
    memory: BTreeMap<u32, u64>,
    pub erased: Vec<Bank>,
    pub programs: Vec<(u32, u64)>,
    pub boot_sets: Vec<Bank>,
    pub fail_erase: bool,
    /// Index of the program call to fail
    pub fail_program_at: Option<usize>,
    /// Index of the program call whose read-back is wrong
    pub corrupt_at: Option<usize>,
    pub fail_boot_set: bool,
}

impl MockFlash {
    pub fn new(boot: Bank) -> Self {
        Self {
            boot,
            memory: BTreeMap::new(),
            erased: Vec::new(),
            programs: Vec::new(),
            boot_sets: Vec::new(),
            fail_erase: false,
            fail_program_at: None,
            corrupt_at: None,
            fail_boot_set: false,
        }
    }
}

impl Storage for MockFlash {
    type Error = &'static str;

    fn erase_bank(&mut self, bank: Bank) -> Result<(), Self::Error> {
        if self.fail_erase {
            return Err("erase failed");
        }
        self.erased.push(bank);
        self.memory.clear();
        Ok(())
    }

    fn program_doubleword(&mut self, address: u32, value: u64) -> Result<(), Self::Error> {
        let index = self.programs.len();
        self.programs.push((address, value));
        if self.fail_program_at == Some(index) {
            return Err("program failed");
        }
        let stored = if self.corrupt_at == Some(index) {
            value ^ 1
        } else {
            value
        };
        self.memory.insert(address, stored);
        Ok(())
    }

    fn read_doubleword(&mut self, address: u32) -> u64 {
        self.memory.get(&address).copied().unwrap_or(u64::MAX)
    }

    fn boot_bank(&mut self) -> Bank {
        self.boot
    }

    fn set_boot_bank(&mut self, bank: Bank) -> Result<(), Self::Error> {
        if self.fail_boot_set {
            return Err("option bytes locked");
        }
        self.boot_sets.push(bank);
        self.boot = bank;
        Ok(())
    }
}

/// Client config with a short ready timeout.
pub fn config() -> ClientConfig {
    ClientConfig {
        ready_timeout_ms: 1000,
        ..ClientConfig::default()
    }
}

/// Client which has not been initialised.
pub fn client() -> TestClient {
    Client::new(MockTransport::new(), MockClock::new(0), config())
}

/// Initialised client with nothing sent.
pub fn ready_client() -> TestClient {
    ready_client_with(config())
}

pub fn ready_client_with(config: ClientConfig) -> TestClient {
    let mut transport = MockTransport::new();
    transport.boot_output(b"+ETM:IDLE\r\n");
    let mut client = Client::new(transport, MockClock::new(0), config);
    client.init().expect("client init");
    client
}

pub fn inject(client: &mut TestClient, data: &[u8]) {
    client.transport_mut().inject(data);
}

/// Everything sent to the module, as text.
pub fn sent(client: &TestClient) -> String {
    String::from_utf8_lossy(&client.transport().sent).into_owned()
}

/// Module reply to a firmware chunk read.
pub fn firmware_reply(data: &[u8]) -> Vec<u8> {
    let mut hex = std::vec![0u8; data.len() * 2];
    let len = encode_hex(data, &mut hex).expect("hex buffer");
    let mut reply = b"\r\n+ETMHFWREAD:".to_vec();
    reply.extend_from_slice(&hex[..len]);
    reply.extend_from_slice(b"\r\n\r\nOK\r\n");
    reply
}
