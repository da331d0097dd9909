//! Account store backing authenticated sessions.
//!
//! Passwords are kept as PBKDF2-HMAC-SHA256 hashes with a random salt per
//! account. Public keys are derived from the login so that every gateway
//! computes the same key for the same account.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use ring::digest::{digest, SHA256, SHA256_OUTPUT_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use sensigate_core::{AccountConfig, Error, PolicyTier, PublicKey, Result};
use std::num::NonZeroU32;
use tracing::info;

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};
const SALT_LEN: usize = 16;

/// Salted password hash.
#[derive(Clone)]
struct PasswordHash {
    salt: [u8; SALT_LEN],
    hash: [u8; SHA256_OUTPUT_LEN],
}

impl PasswordHash {
    fn new(password: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| Error::Internal("no system randomness for password salt".into()))?;
        let mut hash = [0u8; SHA256_OUTPUT_LEN];
        pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, PBKDF2_ITERATIONS, &salt, password.as_bytes(), &mut hash);
        Ok(Self { salt, hash })
    }

    /// Constant-time check of `password` against the stored hash.
    fn verify(&self, password: &str) -> bool {
        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            &self.salt,
            password.as_bytes(),
            &self.hash,
        )
        .is_ok()
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// Public key of the account `login`.
pub fn account_key(login: &str) -> PublicKey {
    PublicKey::new(format!("user:{}", URL_SAFE_NO_PAD.encode(digest(&SHA256, login.as_bytes()))))
}

/// Public key of the application `app_id`.
pub fn application_key(app_id: &str) -> PublicKey {
    PublicKey::new(format!("app:{}", URL_SAFE_NO_PAD.encode(digest(&SHA256, app_id.as_bytes()))))
}

#[derive(Debug, Clone)]
pub struct Account {
    pub login: String,
    pub public_key: PublicKey,
    /// Overlay merged on the authenticated tier.
    pub policy: PolicyTier,
    password: PasswordHash,
}

impl Account {
    pub fn new(login: &str, password: &str, policy: PolicyTier) -> Result<Self> {
        Ok(Self {
            login: login.to_string(),
            public_key: account_key(login),
            policy,
            password: PasswordHash::new(password)?,
        })
    }

    pub fn verify(&self, password: &str) -> bool {
        self.password.verify(password)
    }
}

pub trait IdentityStore: Send + Sync {
    /// Fails with InvalidCredentials on an unknown login or a wrong password.
    fn authenticate(&self, login: &str, password: &str) -> Result<Account>;

    /// Fails with AccountConflict when the login is taken.
    fn register(&self, login: &str, password: &str) -> Result<Account>;

    fn change_password(&self, login: &str, old: &str, new: &str) -> Result<()>;

    /// Issue a one-time reset token for `login`, to be handed to the
    /// account's endpoint.
    fn request_reset(&self, login: &str) -> Result<String>;

    /// Consume a reset token; returns the login whose password was reset.
    fn reset_password(&self, token: &str, new: &str) -> Result<String>;

    fn account(&self, login: &str) -> Option<Account>;

    fn account_by_key(&self, public_key: &PublicKey) -> Option<Account>;
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    accounts: DashMap<String, Account>,
    resets: DashMap<String, String>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the configured bootstrap accounts.
    pub fn from_config(accounts: &[AccountConfig]) -> Result<Self> {
        let store = Self::new();
        for account in accounts {
            store
                .accounts
                .insert(account.login.clone(), Account::new(&account.login, &account.password, account.policy.clone())?);
        }
        if !accounts.is_empty() {
            info!("Loaded {} account(s)", accounts.len());
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn authenticate(&self, login: &str, password: &str) -> Result<Account> {
        match self.accounts.get(login) {
            Some(account) if account.verify(password) => Ok(account.clone()),
            _ => Err(Error::InvalidCredentials),
        }
    }

    fn register(&self, login: &str, password: &str) -> Result<Account> {
        if login.is_empty() || password.is_empty() {
            return Err(Error::InvalidValue("login and password must not be empty".into()));
        }
        match self.accounts.entry(login.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::AccountConflict(login.to_string())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let account = Account::new(login, password, PolicyTier::default())?;
                slot.insert(account.clone());
                info!("Registered account {}", login);
                Ok(account)
            }
        }
    }

    fn change_password(&self, login: &str, old: &str, new: &str) -> Result<()> {
        let mut account = self.accounts.get_mut(login).ok_or(Error::InvalidCredentials)?;
        if !account.verify(old) {
            return Err(Error::InvalidCredentials);
        }
        account.password = PasswordHash::new(new)?;
        Ok(())
    }

    fn request_reset(&self, login: &str) -> Result<String> {
        if !self.accounts.contains_key(login) {
            return Err(Error::not_found(format!("account {}", login)));
        }
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.resets.insert(token.clone(), login.to_string());
        Ok(token)
    }

    fn reset_password(&self, token: &str, new: &str) -> Result<String> {
        let (_, login) = self.resets.remove(token).ok_or(Error::InvalidCredentials)?;
        let mut account = self.accounts.get_mut(&login).ok_or(Error::InvalidCredentials)?;
        account.password = PasswordHash::new(new)?;
        Ok(login)
    }

    fn account(&self, login: &str) -> Option<Account> {
        self.accounts.get(login).map(|a| a.clone())
    }

    fn account_by_key(&self, public_key: &PublicKey) -> Option<Account> {
        self.accounts
            .iter()
            .find(|a| &a.public_key == public_key)
            .map(|a| a.clone())
    }
}
