//! User accounts and balances.

use std::collections::HashMap;
use std::sync::Arc;

use common::Username;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DomainError, Result};
use crate::value_objects::Money;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Account role. Merchants may list products and set discounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Consumer,
    Merchant,
}

impl Role {
    pub fn is_merchant(&self) -> bool {
        matches!(self, Role::Merchant)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Consumer => "Consumer",
            Role::Merchant => "Merchant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Consumer" => Ok(Role::Consumer),
            "Merchant" => Ok(Role::Merchant),
            other => Err(DomainError::validation(format!(
                "Invalid user type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub username: Username,
    pub password_hash: String,
    #[serde(rename = "type")]
    pub role: Role,
    balance: Money,
}

impl Account {
    pub fn new(username: impl Into<Username>, password_hash: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            role,
            balance: Money::zero(),
        }
    }

    pub fn with_balance(mut self, balance: Money) -> Self {
        self.balance = balance;
        self
    }

    pub fn balance(&self) -> Money {
        self.balance
    }
}

/// Hashes passwords for storage.
pub trait PasswordHasher: Send + Sync + std::fmt::Debug {
    fn hash(&self, password: &str) -> String;

    fn verify(&self, password: &str, hash: &str) -> bool {
        self.hash(password) == hash
    }
}

/// Hex-encoded SHA-256 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl PasswordHasher for Sha256Hasher {
    fn hash(&self, password: &str) -> String {
        format!("{:x}", Sha256::digest(password.as_bytes()))
    }
}

/// Balance mutations used by settlement.
///
/// `debit` and `credit` return the account's new balance. A debit larger than
/// the balance fails with [`DomainError::InsufficientBalance`] and leaves the
/// balance untouched.
pub trait BalanceLedger {
    fn balance(&self, username: &Username) -> Result<Money>;

    fn debit(&mut self, username: &Username, amount: Money) -> Result<Money>;

    fn credit(&mut self, username: &Username, amount: Money) -> Result<Money>;
}

/// All registered accounts.
#[derive(Debug, Clone)]
pub struct AccountLedger {
    accounts: HashMap<Username, Account>,
    hasher: Arc<dyn PasswordHasher>,
}

impl Default for AccountLedger {
    fn default() -> Self {
        Self::with_hasher(Arc::new(Sha256Hasher))
    }
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hasher(hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            accounts: HashMap::new(),
            hasher,
        }
    }

    /// Builds the ledger from persisted accounts. Later duplicates win.
    pub fn from_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let mut ledger = Self::new();
        for account in accounts {
            ledger.insert(account);
        }
        ledger
    }

    pub fn insert(&mut self, account: Account) {
        self.accounts.insert(account.username.clone(), account);
    }

    pub fn remove(&mut self, username: &Username) -> Option<Account> {
        self.accounts.remove(username)
    }

    pub fn get(&self, username: &Username) -> Option<&Account> {
        self.accounts.get(username)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn account_mut(&mut self, username: &Username) -> Result<&mut Account> {
        self.accounts
            .get_mut(username)
            .ok_or_else(|| DomainError::not_found(format!("User not found: {username}")))
    }

    pub fn register(&mut self, username: &str, password: &str, role: Role) -> Result<&Account> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(DomainError::validation(
                "Username and password cannot be empty.",
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(DomainError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters."
            )));
        }
        let username = Username::new(username);
        if self.accounts.contains_key(&username) {
            return Err(DomainError::validation(format!(
                "Username {username} already exists."
            )));
        }
        let account = Account::new(username.clone(), self.hasher.hash(password), role);
        tracing::info!(%username, %role, "account registered");
        Ok(self.accounts.entry(username).or_insert(account))
    }

    /// Checks credentials. Unknown users and wrong passwords are
    /// indistinguishable to the caller.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<&Account> {
        self.accounts
            .get(&Username::new(username.trim()))
            .filter(|a| self.hasher.verify(password, &a.password_hash))
            .ok_or_else(|| DomainError::validation("Invalid username or password."))
    }

    pub fn change_password(
        &mut self,
        username: &Username,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(DomainError::validation(format!(
                "New password must be at least {MIN_PASSWORD_LEN} characters."
            )));
        }
        let hasher = Arc::clone(&self.hasher);
        let account = self.account_mut(username)?;
        if !hasher.verify(old_password, &account.password_hash) {
            return Err(DomainError::validation("Old password is incorrect."));
        }
        account.password_hash = hasher.hash(new_password);
        Ok(())
    }

    pub fn recharge(&mut self, username: &Username, amount: Money) -> Result<Money> {
        if !amount.is_positive() {
            return Err(DomainError::validation("Recharge amount must be positive."));
        }
        self.credit(username, amount)
    }
}

impl BalanceLedger for AccountLedger {
    fn balance(&self, username: &Username) -> Result<Money> {
        self.get(username)
            .map(Account::balance)
            .ok_or_else(|| DomainError::not_found(format!("User not found: {username}")))
    }

    fn debit(&mut self, username: &Username, amount: Money) -> Result<Money> {
        if amount.is_negative() {
            return Err(DomainError::validation("Debit amount cannot be negative."));
        }
        let account = self.account_mut(username)?;
        if account.balance < amount {
            return Err(DomainError::InsufficientBalance {
                username: username.clone(),
                required: amount,
                available: account.balance,
            });
        }
        account.balance -= amount;
        Ok(account.balance)
    }

    fn credit(&mut self, username: &Username, amount: Money) -> Result<Money> {
        if amount.is_negative() {
            return Err(DomainError::validation("Credit amount cannot be negative."));
        }
        let account = self.account_mut(username)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| DomainError::validation("Balance overflow."))?;
        Ok(account.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> AccountLedger {
        let mut ledger = AccountLedger::new();
        ledger.register("alice", "secret1", Role::Consumer).unwrap();
        ledger.register("m1", "secret2", Role::Merchant).unwrap();
        ledger
    }

    #[test]
    fn test_register_starts_at_zero() {
        let ledger = ledger();
        let alice = ledger.get(&Username::new("alice")).unwrap();
        assert_eq!(alice.balance(), Money::zero());
        assert_eq!(alice.role, Role::Consumer);
        assert_ne!(alice.password_hash, "secret1");
    }

    #[test]
    fn test_register_validation() {
        let mut ledger = ledger();
        assert!(ledger.register("", "secret1", Role::Consumer).is_err());
        assert!(ledger.register("bob", "short", Role::Consumer).is_err());
        assert!(ledger.register("alice", "another1", Role::Merchant).is_err());
    }

    #[test]
    fn test_authenticate() {
        let ledger = ledger();
        assert!(ledger.authenticate("alice", "secret1").is_ok());
        assert!(ledger.authenticate("alice", "wrong!!").is_err());
        assert!(ledger.authenticate("nobody", "secret1").is_err());
    }

    #[test]
    fn test_change_password_requires_old() {
        let mut ledger = ledger();
        let alice = Username::new("alice");
        assert!(ledger.change_password(&alice, "nope", "newpass1").is_err());
        assert!(ledger.change_password(&alice, "secret1", "tiny").is_err());
        ledger.change_password(&alice, "secret1", "newpass1").unwrap();
        assert!(ledger.authenticate("alice", "newpass1").is_ok());
    }

    #[test]
    fn test_recharge_must_be_positive() {
        let mut ledger = ledger();
        let alice = Username::new("alice");
        assert!(ledger.recharge(&alice, Money::zero()).is_err());
        let balance = ledger.recharge(&alice, Money::from_whole(100)).unwrap();
        assert_eq!(balance, Money::from_whole(100));
    }

    #[test]
    fn test_debit_insufficient_leaves_balance() {
        let mut ledger = ledger();
        let alice = Username::new("alice");
        ledger.recharge(&alice, Money::from_whole(10)).unwrap();

        let err = ledger.debit(&alice, Money::from_whole(11)).unwrap_err();
        assert_eq!(err.kind(), "InsufficientBalance");
        assert_eq!(ledger.balance(&alice).unwrap(), Money::from_whole(10));

        assert_eq!(
            ledger.debit(&alice, Money::from_whole(10)).unwrap(),
            Money::zero()
        );
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            Sha256Hasher.hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_account_persisted_shape() {
        let account = Account::new("m1", "h", Role::Merchant).with_balance(Money::from_whole(4));
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["type"], "Merchant");
        assert_eq!(json["passwordHash"], "h");
        assert_eq!(json["balance"], 400);
    }
}
