//
// license.rs
//
// License gate: key validation, the cached key file, and the state machine
// deciding whether full project analysis may run
//

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name of the cached license file
pub const LICENSE_FILE_NAME: &str = "metalware-license.txt";

/// Checksum target for the default validator
const CHECKSUM_MAGIC: i64 = 0x59E;
const CHECKSUM_MODULUS: i64 = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseState {
    /// No key seen yet
    Unset,
    /// A key was read from the cache file and is awaiting validation
    Cached,
    Valid,
    /// Terminal until a new key is supplied
    Invalid,
}

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("missing license")]
    Missing,
    #[error("invalid license key")]
    InvalidKey,
    #[error("failed to write license key to {}: {source}", path.display())]
    FailedToWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Side effects produced by gate transitions, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseEvent {
    Missing,
    Valid,
    Invalid,
    /// The key may be shared with the client for caching. Emitted once per
    /// gate lifetime, right after the first transition into `Valid`.
    CacheLicense { key: String },
    /// Non-fatal problem worth surfacing to the user
    Warning(String),
}

pub trait LicenseValidator: Send + Sync {
    fn is_valid(&self, key: &str) -> bool;
}

/// Default validator: folds the decimal digits of the key into a checksum.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumValidator;

impl LicenseValidator for ChecksumValidator {
    fn is_valid(&self, key: &str) -> bool {
        let digits: Vec<i64> = key
            .chars()
            .filter_map(|c| c.to_digit(10))
            .map(i64::from)
            .collect();

        let sum: i64 = digits.iter().sum();
        let product: f64 = digits.iter().fold(1.0, |acc, &d| acc * d as f64);
        let xor = digits.iter().fold(0i64, |acc, &d| acc ^ d);

        // Keys long enough to overflow the cube cannot be valid
        let Some(cubed) = sum.checked_pow(3) else {
            return false;
        };
        let folded_sum = cubed % CHECKSUM_MODULUS;
        let folded_product = ((product + 1.0).ln() as i64) % CHECKSUM_MODULUS;
        let folded_xor = (xor << 2) % CHECKSUM_MODULUS;

        folded_sum ^ folded_product ^ folded_xor == CHECKSUM_MAGIC
    }
}

/// Persistence for a single cached license key
pub trait LicenseStore: Send + Sync {
    fn read(&self) -> Option<String>;
    fn write(&self, key: &str) -> Result<(), LicenseError>;
}

/// Platform-specific default location of the license cache file
pub fn default_license_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        match std::env::var_os("APPDATA") {
            Some(appdata) => PathBuf::from(appdata).join(LICENSE_FILE_NAME),
            None => PathBuf::from(format!(".{}", LICENSE_FILE_NAME)),
        }
    }
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/tmp").join(LICENSE_FILE_NAME)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        PathBuf::from(format!(".{}", LICENSE_FILE_NAME))
    }
}

/// License key stored as the first whitespace-delimited token of a file
#[derive(Debug, Clone)]
pub struct FileLicenseStore {
    path: PathBuf,
}

impl FileLicenseStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn platform_default() -> Self {
        Self::new(default_license_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LicenseStore for FileLicenseStore {
    fn read(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        content.split_whitespace().next().map(str::to_string)
    }

    fn write(&self, key: &str) -> Result<(), LicenseError> {
        std::fs::write(&self.path, key).map_err(|source| LicenseError::FailedToWrite {
            path: self.path.clone(),
            source,
        })
    }
}

/// State machine gating full analysis on a validated license key
pub struct LicenseGate {
    state: LicenseState,
    key: Option<String>,
    shared_with_client: bool,
    validator: Box<dyn LicenseValidator>,
    store: Box<dyn LicenseStore>,
}

impl std::fmt::Debug for LicenseGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseGate")
            .field("state", &self.state)
            .field("shared_with_client", &self.shared_with_client)
            .finish_non_exhaustive()
    }
}

impl LicenseGate {
    pub fn new(store: Box<dyn LicenseStore>, validator: Box<dyn LicenseValidator>) -> Self {
        Self {
            state: LicenseState::Unset,
            key: None,
            shared_with_client: false,
            validator,
            store,
        }
    }

    pub fn with_file_store(path: PathBuf) -> Self {
        Self::new(
            Box::new(FileLicenseStore::new(path)),
            Box::new(ChecksumValidator),
        )
    }

    pub fn state(&self) -> LicenseState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == LicenseState::Valid
    }

    /// Swap the backing store (e.g. after a `licensePath` setting change).
    /// The current state is kept.
    pub fn set_store(&mut self, store: Box<dyn LicenseStore>) {
        self.store = store;
    }

    /// Look for a cached key and validate it.
    ///
    /// A no-op once the gate is `Valid`.
    pub fn load_cached(&mut self) -> Vec<LicenseEvent> {
        if self.is_valid() {
            return Vec::new();
        }

        let Some(key) = self.store.read() else {
            log::warn!("License error: {}", LicenseError::Missing);
            return vec![LicenseEvent::Missing];
        };

        log::info!("Found cached license key");
        self.state = LicenseState::Cached;
        self.key = Some(key.clone());

        let mut events = Vec::new();
        if self.validator.is_valid(&key) {
            self.enter_valid(key, &mut events);
        } else {
            log::error!("Cached license key is invalid");
            self.state = LicenseState::Invalid;
            events.push(LicenseEvent::Invalid);
        }
        events
    }

    /// Validate a key supplied by the client and persist it on success.
    pub fn set_key(&mut self, key: &str) -> Vec<LicenseEvent> {
        let key = key.trim();
        let mut events = Vec::new();

        if !self.validator.is_valid(key) {
            log::error!("License error: {}", LicenseError::InvalidKey);
            self.state = LicenseState::Invalid;
            self.key = None;
            events.push(LicenseEvent::Invalid);
            return events;
        }

        if let Err(err) = self.store.write(key) {
            log::error!("{}", err);
            events.push(LicenseEvent::Warning(err.to_string()));
        }

        self.key = Some(key.to_string());
        self.enter_valid(key.to_string(), &mut events);
        events
    }

    fn enter_valid(&mut self, key: String, events: &mut Vec<LicenseEvent>) {
        log::info!("License is valid");
        self.state = LicenseState::Valid;
        events.push(LicenseEvent::Valid);
        if !self.shared_with_client {
            self.shared_with_client = true;
            events.push(LicenseEvent::CacheLicense { key });
        }
    }
}
