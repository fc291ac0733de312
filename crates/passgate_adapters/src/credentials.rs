use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use passgate_core::crypto::{self, DerivedKey, DEFAULT_KDF_ITERATIONS, SALT_SIZE};
use passgate_core::entities::{
    unix_now, CredentialInput, CredentialRecord, LastLogin, LoginStrategy, SiteId,
};
use passgate_core::ports::CredentialVault;
use passgate_core::Error;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::fs::{ensure_private_dir, write_private_atomic};

pub const STORE_FILE: &str = "credentials.enc";
pub const SALT_FILE: &str = "salt.bin";

/// Shorter master passwords are accepted with a warning; rotation refuses them.
pub const MIN_MASTER_PASSWORD_LEN: usize = 8;

/// Credential store kept as one AES-256-GCM blob in a private data directory.
///
/// The key is derived from the master password and `salt.bin`; neither the password nor
/// the key ever touch the disk. Every mutation is written through immediately, and a
/// failed write leaves the in-memory records as they were.
pub struct EncryptedCredentialStore {
    data_dir: PathBuf,
    kdf_iterations: u32,
    key: Option<DerivedKey>,
    salt: Option<[u8; SALT_SIZE]>,
    records: BTreeMap<SiteId, CredentialRecord>,
}

impl EncryptedCredentialStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            key: None,
            salt: None,
            records: BTreeMap::new(),
        }
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    pub fn salt_path(&self) -> PathBuf {
        self.data_dir.join(SALT_FILE)
    }

    fn key(&self) -> Result<&DerivedKey, Error> {
        self.key.as_ref().ok_or(Error::StoreLocked)
    }

    fn ensure_unlocked(&self) -> Result<(), Error> {
        self.key().map(|_| ())
    }

    /// Existing salt, or a fresh one written to `salt.bin`.
    fn load_or_create_salt(&self) -> Result<[u8; SALT_SIZE], Error> {
        let path = self.salt_path();
        match std::fs::read(&path) {
            Ok(bytes) => bytes.as_slice().try_into().map_err(|_| {
                Error::Integrity(format!(
                    "salt file has {} bytes, expected {}",
                    bytes.len(),
                    SALT_SIZE
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let salt = crypto::generate_salt();
                write_private_atomic(&path, &salt)?;
                info!(path = %path.display(), "created new store salt");
                Ok(salt)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn sealed_records(&self, key: &DerivedKey) -> Result<Vec<u8>, Error> {
        let payload = Zeroizing::new(
            serde_json::to_vec(&self.records)
                .map_err(|e| Error::Encryption(format!("failed to serialize records: {}", e)))?,
        );
        crypto::seal(key, &payload)
    }

    /// Apply `change` to an existing record and persist it, undoing the change if the
    /// write fails.
    fn update_record(
        &mut self,
        site: &SiteId,
        change: impl FnOnce(&mut CredentialRecord),
    ) -> Result<(), Error> {
        self.ensure_unlocked()?;
        let record = self
            .records
            .get_mut(site)
            .ok_or_else(|| Error::NotFound(site.to_string()))?;
        let previous = record.clone();
        change(record);

        if let Err(e) = self.save() {
            self.records.insert(site.clone(), previous);
            return Err(e);
        }
        Ok(())
    }
}

impl CredentialVault for EncryptedCredentialStore {
    #[instrument(skip(self, master_password), fields(data_dir = %self.data_dir.display()))]
    fn initialize(&mut self, master_password: &str) -> Result<(), Error> {
        if master_password.is_empty() {
            return Err(Error::Authentication(
                "master password cannot be empty".to_string(),
            ));
        }
        if master_password.chars().count() < MIN_MASTER_PASSWORD_LEN {
            warn!(
                min_len = MIN_MASTER_PASSWORD_LEN,
                "master password is shorter than recommended"
            );
        }

        ensure_private_dir(&self.data_dir)?;
        let salt = self.load_or_create_salt()?;
        let key = crypto::derive_key(master_password, &salt, self.kdf_iterations)?;

        self.records.clear();
        self.salt = Some(salt);
        self.key = Some(key);
        debug!("store key derived");
        Ok(())
    }

    fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    #[instrument(skip(self))]
    fn load(&mut self) -> Result<(), Error> {
        let key = self.key()?;
        let path = self.store_path();

        let blob = match std::fs::read(&path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no store file yet, starting empty");
                self.records.clear();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let decoded = crypto::open(key, &blob).and_then(|plaintext| {
            serde_json::from_slice::<BTreeMap<SiteId, CredentialRecord>>(&plaintext)
                .map_err(|e| Error::Integrity(format!("store contents are not valid: {}", e)))
        });

        match decoded {
            Ok(records) => {
                info!(count = records.len(), "loaded credentials");
                self.records = records;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to open credential store, locking it");
                self.records.clear();
                self.key = None;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(count = self.records.len()))]
    fn save(&self) -> Result<(), Error> {
        let key = self.key()?;
        let blob = self.sealed_records(key)?;
        write_private_atomic(&self.store_path(), &blob)
    }

    #[instrument(skip(self, input), fields(site = %input.site))]
    fn add_or_update(&mut self, input: CredentialInput) -> Result<CredentialRecord, Error> {
        self.ensure_unlocked()?;
        let site = SiteId::new(&input.site)?;
        if input.username.trim().is_empty() {
            return Err(Error::Validation("username cannot be empty".to_string()));
        }

        let now = unix_now();
        let previous = self.records.get(&site).cloned();
        let record = CredentialRecord {
            site: site.clone(),
            username: input.username.clone(),
            password: input.password.clone(),
            has_bonus: input.has_bonus,
            notes: input.notes.clone(),
            login_strategy: input.login_strategy,
            google_login: input.google_login,
            last_login: previous.as_ref().and_then(|p| p.last_login),
            created_at: previous.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };
        self.records.insert(site.clone(), record.clone());

        if let Err(e) = self.save() {
            match previous {
                Some(previous) => {
                    self.records.insert(site, previous);
                }
                None => {
                    self.records.remove(&site);
                }
            }
            return Err(e);
        }

        debug!(created = record.created_at == now, "stored credentials");
        Ok(record)
    }

    #[instrument(skip(self))]
    fn remove(&mut self, site: &SiteId) -> Result<(), Error> {
        self.ensure_unlocked()?;
        let removed = self
            .records
            .remove(site)
            .ok_or_else(|| Error::NotFound(site.to_string()))?;

        if let Err(e) = self.save() {
            self.records.insert(site.clone(), removed);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, site: &SiteId) -> Result<Option<CredentialRecord>, Error> {
        self.ensure_unlocked()?;
        Ok(self.records.get(site).cloned())
    }

    fn get_all(&self) -> Result<BTreeMap<SiteId, CredentialRecord>, Error> {
        self.ensure_unlocked()?;
        Ok(self.records.clone())
    }

    fn get_bonus_sites(&self) -> Result<BTreeMap<SiteId, CredentialRecord>, Error> {
        self.ensure_unlocked()?;
        Ok(self
            .records
            .iter()
            .filter(|(_, record)| record.has_bonus)
            .map(|(site, record)| (site.clone(), record.clone()))
            .collect())
    }

    #[instrument(skip(self))]
    fn update_last_login(&mut self, site: &SiteId, success: bool) -> Result<(), Error> {
        self.update_record(site, |record| {
            record.last_login = Some(LastLogin {
                timestamp: unix_now(),
                success,
            });
        })
    }

    #[instrument(skip(self, new_password))]
    fn change_password(
        &mut self,
        site: &SiteId,
        new_password: &str,
        new_strategy: Option<LoginStrategy>,
    ) -> Result<(), Error> {
        if new_password.is_empty() {
            return Err(Error::Validation("password cannot be empty".to_string()));
        }
        self.update_record(site, |record| {
            record.password = new_password.to_string();
            if new_strategy.is_some() {
                record.login_strategy = new_strategy;
            }
            record.updated_at = unix_now();
        })
    }

    #[instrument(skip(self, new_password))]
    fn rotate_master_password(&mut self, new_password: &str) -> Result<(), Error> {
        self.ensure_unlocked()?;
        if new_password.is_empty() {
            return Err(Error::Authentication(
                "master password cannot be empty".to_string(),
            ));
        }
        if new_password.chars().count() < MIN_MASTER_PASSWORD_LEN {
            return Err(Error::Config(format!(
                "new master password must be at least {} characters",
                MIN_MASTER_PASSWORD_LEN
            )));
        }

        let salt = self.salt.ok_or(Error::StoreLocked)?;
        let new_key = crypto::derive_key(new_password, &salt, self.kdf_iterations)?;
        let blob = self.sealed_records(&new_key)?;
        write_private_atomic(&self.store_path(), &blob)?;

        self.key = Some(new_key);
        info!(count = self.records.len(), "master password rotated");
        Ok(())
    }

    fn clear_memory(&mut self) {
        self.key = None;
        self.salt = None;
        self.records.clear();
        debug!("credential store memory cleared");
    }
}
