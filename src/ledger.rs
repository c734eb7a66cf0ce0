//! Account-balance ledger.
//!
//! The ledger is a derived projection of the canonical chain, never the
//! source of truth. It is mutated only by the merge engine and the miner,
//! under the chain lock. Accounts that reach a zero balance are removed, so
//! two ledgers produced by the same transaction history compare equal.

use crate::codec::{Address, Numeral};
use crate::error::{ChainError, Result};
use crate::transaction::Transaction;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    accounts: HashMap<Address, Numeral>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &Address) -> Numeral {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Sum of every balance. Changes only when a mining reward is credited.
    pub fn total_supply(&self) -> Numeral {
        self.accounts
            .values()
            .fold(Numeral::zero(), |acc, v| acc.add(v))
    }

    /// Debit the sender and credit the receiver. Fails without touching the
    /// ledger when the sender cannot cover the amount.
    pub fn apply(&mut self, tx: &Transaction) -> Result<()> {
        self.debit(&tx.sender, &tx.amount)?;
        self.credit(&tx.receiver, &tx.amount);
        Ok(())
    }

    /// Exact inverse of `apply`: credit the sender, debit the receiver.
    /// Called for each transaction of a block being unwound, in reverse
    /// order, so the receiver always holds at least the amount.
    pub fn revert(&mut self, tx: &Transaction) -> Result<()> {
        self.debit(&tx.receiver, &tx.amount)?;
        self.credit(&tx.sender, &tx.amount);
        Ok(())
    }

    /// Mint without a corresponding debit. The sole point of currency
    /// creation: the per-block mining reward.
    pub fn credit(&mut self, address: &Address, amount: &Numeral) {
        let balance = self.balance(address).add(amount);
        self.set_balance(address, balance);
    }

    pub fn debit(&mut self, address: &Address, amount: &Numeral) -> Result<()> {
        let balance = self.balance(address);
        if balance.smaller_than(amount) {
            return Err(ChainError::InsufficientFunds);
        }
        self.set_balance(address, balance.sub(amount));
        Ok(())
    }

    fn set_balance(&mut self, address: &Address, balance: Numeral) {
        if balance.is_zero() {
            self.accounts.remove(address);
        } else {
            self.accounts.insert(*address, balance);
        }
    }
}
