// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Shared mocks for integration tests
//!
//! Keys are derived deterministically from the BIP32 path, see [mock_secret_key].

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    bip32::DerivationPath,
    hashes::{sha256, Hash},
    secp256k1::{PublicKey, Secp256k1, SecretKey},
    OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use log::{debug, LevelFilter};
use prost::Message;
use simplelog::SimpleLogger;

use hw_signer::{
    apdu::trezor::{messages::*, MessageType},
    backend::Backend,
    cancel::CancelToken,
    device::{
        Connect, Device, DeviceKey, DeviceType, LedgerDevice, LedgerTransport, TrezorDevice,
        TrezorTransport,
    },
    event::{Event, EventReceiver},
    key::{fingerprint, path_indices},
    transport::{Exchange, Response, TrezorLink},
    Error,
};

/// Setup logging, level from `LOG_LEVEL`
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Parse a derivation path
pub fn path(p: &str) -> DerivationPath {
    DerivationPath::from_str(p).unwrap()
}

/// Deterministic secret key for a path
pub fn mock_secret_key(path: &[u32]) -> SecretKey {
    let b: Vec<u8> = path.iter().flat_map(|i| i.to_be_bytes()).collect();
    let h = sha256::Hash::hash(&b);

    SecretKey::from_slice(&h.to_byte_array()).unwrap()
}

/// Deterministic compressed public key for a path
pub fn mock_public_key(path: &[u32]) -> [u8; 33] {
    PublicKey::from_secret_key(&Secp256k1::new(), &mock_secret_key(path)).serialize()
}

/// Deterministic chain code for a path
pub fn mock_chain_code(path: &[u32]) -> [u8; 32] {
    let mut b = b"chain".to_vec();
    b.extend(path.iter().flat_map(|i| i.to_be_bytes()));

    sha256::Hash::hash(&b).to_byte_array()
}

/// Mock DER signature, tagged with the final path index
pub fn mock_signature(path: &[u32]) -> Vec<u8> {
    let i = *path.last().unwrap_or(&0) as u8;
    vec![0x31, 0x06, 0x02, 0x01, i, 0x02, 0x01, i, 0x01]
}

/// Build a previous transaction paying the provided outputs
pub fn prev_tx(outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(vec![0x51]),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs,
    }
}

/// Collect pending events
pub fn drain(rx: &mut EventReceiver) -> Vec<Event> {
    let mut events = vec![];
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

/// Shared command log
pub type CommandLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// Fetch the instruction bytes from a command log
pub fn instructions(log: &CommandLog) -> Vec<u8> {
    log.lock().unwrap().iter().map(|c| c[1]).collect()
}

/// Fetch logged commands for an instruction
pub fn commands(log: &CommandLog, ins: u8) -> Vec<Vec<u8>> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|c| c[1] == ins)
        .cloned()
        .collect()
}

/// In-process ledger bitcoin application
pub struct MockLedger {
    log: CommandLog,
    fail: Option<(u8, u16)>,
    cancel: Option<(u8, CancelToken)>,
    delay: Duration,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(vec![])),
            fail: None,
            cancel: None,
            delay: Duration::from_millis(0),
        }
    }

    /// Share a command log with other mock instances
    pub fn with_log(mut self, log: CommandLog) -> Self {
        self.log = log;
        self
    }

    /// Respond to `ins` with status `sw`
    pub fn fail_on(mut self, ins: u8, sw: u16) -> Self {
        self.fail = Some((ins, sw));
        self
    }

    /// Trip `token` on receipt of `ins`
    pub fn cancel_on(mut self, ins: u8, token: CancelToken) -> Self {
        self.cancel = Some((ins, token));
        self
    }

    /// Delay each response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

fn parse_path(d: &[u8]) -> Vec<u32> {
    let n = d[0] as usize;
    (0..n)
        .map(|i| u32::from_be_bytes(d[1 + i * 4..][..4].try_into().unwrap()))
        .collect()
}

impl Exchange for MockLedger {
    fn exchange(&mut self, command: &[u8]) -> Result<Response, Error> {
        self.log.lock().unwrap().push(command.to_vec());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let (ins, data) = (command[1], &command[5..]);
        assert_eq!(command[0], 0xe0);
        assert_eq!(command[4] as usize, data.len());

        if let Some((i, t)) = &self.cancel {
            if *i == ins {
                t.cancel();
            }
        }
        if let Some((i, sw)) = self.fail {
            if i == ins {
                return Ok(Response {
                    data: vec![],
                    status: sw,
                });
            }
        }

        let data = match ins {
            // Wallet public key
            0x40 => {
                let p = parse_path(data);
                let sk = mock_secret_key(&p);
                let pk = PublicKey::from_secret_key(&Secp256k1::new(), &sk);

                let address = "1MockAddress";

                let mut r = vec![65];
                r.extend_from_slice(&pk.serialize_uncompressed());
                r.push(address.len() as u8);
                r.extend_from_slice(address.as_bytes());
                r.extend_from_slice(&mock_chain_code(&p));
                r
            }
            // Trusted input
            0x42 => vec![0x32; 56],
            // Hash input start
            0x44 => vec![],
            // Hash input finalize
            0x4a => vec![0x00, 0x00],
            // Hash sign
            0x48 => mock_signature(&parse_path(data)),
            _ => {
                return Ok(Response {
                    data: vec![],
                    status: 0x6d00,
                })
            }
        };

        Ok(Response {
            data,
            status: 0x9000,
        })
    }
}

/// Ledger connector creating [MockLedger] instances with a shared log
#[derive(Clone)]
pub struct MockLedgerConnector {
    pub log: CommandLog,
    pub delay: Duration,
    pub fail: Option<(u8, u16)>,
}

impl MockLedgerConnector {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(vec![])),
            delay: Duration::from_millis(0),
            fail: None,
        }
    }
}

impl Connect<LedgerTransport> for MockLedgerConnector {
    fn connect(&self) -> Result<LedgerTransport, Error> {
        let mut l = MockLedger::new()
            .with_log(self.log.clone())
            .with_delay(self.delay);
        if let Some((ins, sw)) = self.fail {
            l = l.fail_on(ins, sw);
        }
        Ok(Box::new(l))
    }
}

/// Create a mock ledger device
pub fn mock_ledger_device(id: &str, connector: MockLedgerConnector) -> Device {
    let key = DeviceKey {
        label: "Nano S".to_string(),
        vendor: "Ledger".to_string(),
        device_id: id.to_string(),
        device_type: DeviceType::Ledger,
    };

    Device::Ledger(LedgerDevice::new(key, Arc::new(connector)))
}

/// Backend returning a fixed device list after a delay
pub struct MockBackend {
    pub device_type: DeviceType,
    pub devices: Vec<Device>,
    pub delay: Duration,
}

#[async_trait]
impl Backend for MockBackend {
    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    async fn scan(&self) -> Result<Vec<Device>, Error> {
        tokio::time::sleep(self.delay).await;
        Ok(self.devices.clone())
    }
}

/// Backend constructing new device handles on every scan, as the USB
/// backends do
pub struct FreshTrezorBackend {
    pub ids: Arc<Mutex<Vec<String>>>,
    pub connector: MockTrezorConnector,
}

impl FreshTrezorBackend {
    pub fn new(ids: &[&str], connector: MockTrezorConnector) -> Self {
        Self {
            ids: Arc::new(Mutex::new(ids.iter().map(|s| s.to_string()).collect())),
            connector,
        }
    }
}

#[async_trait]
impl Backend for FreshTrezorBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::Trezor
    }

    async fn scan(&self) -> Result<Vec<Device>, Error> {
        let ids = self.ids.lock().unwrap().clone();
        Ok(ids
            .iter()
            .map(|id| mock_trezor_device(id, self.connector.clone()))
            .collect())
    }
}

/// Trezor signing flow step
#[derive(Clone, Debug, PartialEq)]
enum Step {
    Input(u32),
    PrevMeta(usize),
    PrevInput(usize, u32),
    PrevOutput(usize, u32),
    Output(u32),
    Confirm,
    Signature(u32),
    Finish,
}

/// Shared trezor message log (message types received)
pub type MessageLog = Arc<Mutex<Vec<u16>>>;

/// Shared trezor TxAck log
pub type AckLog = Arc<Mutex<Vec<TransactionType>>>;

/// Shared trezor passphrase log
pub type PassphraseLog = Arc<Mutex<Vec<PassphraseAck>>>;

/// In-process trezor one device
pub struct MockTrezor {
    log: MessageLog,
    acks: AckLog,
    pin: Option<String>,
    unlocked: bool,
    /// Passphrase log, where passphrase protection is enabled
    passphrases: Option<PassphraseLog>,
    passphrase_set: bool,
    /// Reject the confirmation step
    reject: bool,
    queue: VecDeque<(u16, Vec<u8>)>,
    /// Request awaiting PIN entry
    stashed: Option<(u16, Vec<u8>)>,
    steps: VecDeque<Step>,
    current: Option<Step>,
    inputs_count: u32,
    address_n: Vec<Vec<u32>>,
    prev_hashes: Vec<Vec<u8>>,
}

impl MockTrezor {
    pub fn new(log: MessageLog, acks: AckLog, pin: Option<String>) -> Self {
        Self {
            log,
            acks,
            pin,
            unlocked: false,
            passphrases: None,
            passphrase_set: false,
            reject: false,
            queue: VecDeque::new(),
            stashed: None,
            steps: VecDeque::new(),
            current: None,
            inputs_count: 0,
            address_n: vec![],
            prev_hashes: vec![],
        }
    }

    /// Enable passphrase protection, recording acks to `log`
    pub fn with_passphrase(mut self, log: PassphraseLog) -> Self {
        self.passphrases = Some(log);
        self
    }

    /// Reject transactions at the confirmation step
    pub fn with_reject(mut self, reject: bool) -> Self {
        self.reject = reject;
        self
    }

    fn respond<M: Message>(&mut self, t: MessageType, m: &M) {
        self.queue.push_back((t.into(), m.encode_to_vec()));
    }

    fn failure(&mut self, code: FailureType, message: &str) {
        self.steps.clear();
        self.current = None;
        self.respond(
            MessageType::Failure,
            &Failure {
                code: Some(code as i32),
                message: Some(message.to_string()),
            },
        );
    }

    fn locked(&mut self, msg_type: u16, payload: &[u8]) -> bool {
        if self.pin.is_some() && !self.unlocked {
            self.stashed = Some((msg_type, payload.to_vec()));
            self.respond(MessageType::PinMatrixRequest, &PinMatrixRequest { r#type: Some(1) });
            return true;
        }
        if self.passphrases.is_some() && !self.passphrase_set {
            self.stashed = Some((msg_type, payload.to_vec()));
            self.respond(
                MessageType::PassphraseRequest,
                &PassphraseRequest { on_device: None },
            );
            return true;
        }
        false
    }

    fn handle(&mut self, msg_type: u16, payload: &[u8]) {
        match MessageType::try_from(msg_type).unwrap() {
            MessageType::Initialize => self.respond(
                MessageType::Features,
                &Features {
                    vendor: Some("trezor.io".to_string()),
                    major_version: Some(1),
                    minor_version: Some(12),
                    patch_version: Some(1),
                    device_id: Some("MOCK0001".to_string()),
                    pin_protection: Some(self.pin.is_some()),
                    label: Some("Mock Trezor".to_string()),
                    initialized: Some(true),
                    ..Default::default()
                },
            ),
            MessageType::PinMatrixAck => {
                let ack = PinMatrixAck::decode(payload).unwrap();
                match self.pin.as_deref() == Some(ack.pin.as_str()) {
                    true => {
                        self.unlocked = true;
                        if let Some((t, d)) = self.stashed.take() {
                            self.handle(t, &d);
                        }
                    }
                    false => self.failure(FailureType::PinInvalid, "Invalid PIN"),
                }
            }
            MessageType::PassphraseAck => {
                let ack = PassphraseAck::decode(payload).unwrap();
                if let Some(l) = &self.passphrases {
                    l.lock().unwrap().push(ack);
                }

                self.passphrase_set = true;
                if let Some((t, d)) = self.stashed.take() {
                    self.handle(t, &d);
                }
            }
            MessageType::GetPublicKey => {
                if self.locked(msg_type, payload) {
                    return;
                }

                let req = GetPublicKey::decode(payload).unwrap();
                let p = req.address_n;

                let parent_fingerprint = match p.len() > 1 {
                    true => u32::from_be_bytes(fingerprint(&mock_public_key(&p[..p.len() - 1]))),
                    false => 0,
                };

                self.respond(
                    MessageType::PublicKey,
                    &hw_signer::apdu::trezor::messages::PublicKey {
                        node: HdNodeType {
                            depth: p.len() as u32,
                            fingerprint: parent_fingerprint,
                            child_num: *p.last().unwrap(),
                            chain_code: mock_chain_code(&p).to_vec(),
                            private_key: None,
                            public_key: Some(mock_public_key(&p).to_vec()),
                        },
                        xpub: None,
                    },
                );
            }
            MessageType::SignTx => {
                if self.locked(msg_type, payload) {
                    return;
                }

                let req = SignTx::decode(payload).unwrap();
                self.inputs_count = req.inputs_count;
                self.address_n = vec![vec![]; req.inputs_count as usize];
                self.prev_hashes = vec![vec![]; req.inputs_count as usize];

                self.steps = (0..req.inputs_count)
                    .map(Step::Input)
                    .chain((0..req.inputs_count as usize).map(Step::PrevMeta))
                    .chain((0..req.outputs_count).map(Step::Output))
                    .chain([Step::Confirm])
                    .chain((0..req.inputs_count).map(Step::Signature))
                    .chain([Step::Finish])
                    .collect();

                self.next_step();
            }
            MessageType::TxAck => {
                let ack = TxAck::decode(payload).unwrap();
                let tx = ack.tx.unwrap_or_default();

                match self.current.clone() {
                    Some(Step::Input(i)) => {
                        let input = &tx.inputs[0];
                        self.prev_hashes[i as usize] = input.prev_hash.clone();
                        self.address_n[i as usize] = input.address_n.clone();
                    }
                    Some(Step::PrevMeta(i)) => {
                        let prev: Vec<_> = (0..tx.inputs_cnt.unwrap())
                            .map(|j| Step::PrevInput(i, j))
                            .chain((0..tx.outputs_cnt.unwrap()).map(|j| Step::PrevOutput(i, j)))
                            .collect();
                        for s in prev.into_iter().rev() {
                            self.steps.push_front(s);
                        }
                    }
                    _ => (),
                }

                self.acks.lock().unwrap().push(tx);
                self.next_step();
            }
            MessageType::ButtonAck => self.next_step(),
            MessageType::Cancel => self.failure(FailureType::ActionCancelled, "Cancelled"),
            _ => self.failure(FailureType::UnexpectedMessage, "Unexpected message"),
        }
    }

    fn serialized(&self, index: u32) -> TxRequestSerializedType {
        TxRequestSerializedType {
            signature_index: Some(index),
            signature: Some(mock_signature(&self.address_n[index as usize])[..8].to_vec()),
            serialized_tx: None,
        }
    }

    fn next_step(&mut self) {
        let step = match self.steps.pop_front() {
            Some(s) => s,
            None => return,
        };
        self.current = Some(step.clone());

        let request = |t: RequestType, index: Option<u32>, hash: Option<Vec<u8>>| TxRequest {
            request_type: Some(t as i32),
            details: Some(TxRequestDetailsType {
                request_index: index,
                tx_hash: hash,
            }),
            serialized: None,
        };

        let r = match step {
            Step::Input(i) => request(RequestType::TxInput, Some(i), None),
            Step::PrevMeta(i) => {
                request(RequestType::TxMeta, None, Some(self.prev_hashes[i].clone()))
            }
            Step::PrevInput(i, j) => {
                request(RequestType::TxInput, Some(j), Some(self.prev_hashes[i].clone()))
            }
            Step::PrevOutput(i, j) => {
                request(RequestType::TxOutput, Some(j), Some(self.prev_hashes[i].clone()))
            }
            Step::Output(k) => request(RequestType::TxOutput, Some(k), None),
            Step::Confirm if self.reject => {
                self.failure(FailureType::ActionCancelled, "Cancelled");
                return;
            }
            Step::Confirm => {
                self.respond(MessageType::ButtonRequest, &ButtonRequest { code: Some(8) });
                return;
            }
            Step::Signature(i) => {
                let mut r = request(RequestType::TxInput, Some(i), None);
                if i > 0 {
                    r.serialized = Some(self.serialized(i - 1));
                }
                r
            }
            Step::Finish => {
                let mut r = request(RequestType::TxFinished, None, None);
                r.serialized = Some(self.serialized(self.inputs_count - 1));
                r
            }
        };

        self.respond(MessageType::TxRequest, &r);
    }
}

impl TrezorLink for MockTrezor {
    fn write_message(&mut self, msg_type: u16, payload: &[u8]) -> Result<(), Error> {
        debug!("mock trezor rx: {}", msg_type);

        self.log.lock().unwrap().push(msg_type);
        self.handle(msg_type, payload);

        Ok(())
    }

    fn read_message(&mut self) -> Result<(u16, Vec<u8>), Error> {
        self.queue.pop_front().ok_or(Error::Timeout)
    }
}

/// Trezor connector creating [MockTrezor] instances with shared logs
#[derive(Clone)]
pub struct MockTrezorConnector {
    pub log: MessageLog,
    pub acks: AckLog,
    pub pin: Option<String>,
    pub passphrases: Option<PassphraseLog>,
    pub reject: bool,
    pub connects: Arc<Mutex<usize>>,
}

impl MockTrezorConnector {
    pub fn new(pin: Option<&str>) -> Self {
        Self {
            log: Arc::new(Mutex::new(vec![])),
            acks: Arc::new(Mutex::new(vec![])),
            pin: pin.map(|p| p.to_string()),
            passphrases: None,
            reject: false,
            connects: Arc::new(Mutex::new(0)),
        }
    }
}

impl Connect<TrezorTransport> for MockTrezorConnector {
    fn connect(&self) -> Result<TrezorTransport, Error> {
        *self.connects.lock().unwrap() += 1;

        let mut t = MockTrezor::new(self.log.clone(), self.acks.clone(), self.pin.clone())
            .with_reject(self.reject);
        if let Some(l) = &self.passphrases {
            t = t.with_passphrase(l.clone());
        }

        Ok(Box::new(t))
    }
}

/// Create a mock trezor device
pub fn mock_trezor_device(id: &str, connector: MockTrezorConnector) -> Device {
    let key = DeviceKey {
        label: "TREZOR".to_string(),
        vendor: "SatoshiLabs".to_string(),
        device_id: id.to_string(),
        device_type: DeviceType::Trezor,
    };

    Device::Trezor(TrezorDevice::new(key, Arc::new(connector)))
}

/// Fetch the path indices for a path string
pub fn indices(p: &str) -> Vec<u32> {
    path_indices(&path(p))
}
