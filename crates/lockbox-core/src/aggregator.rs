//! Scope aggregator: cross-principal totals of one scope.
//!
//! The update methods here are the only mutation path for [`ScopeTotals`].

use lockbox_types::{Amount, EscrowError, EscrowResult, ScopeId, ScopeTotals};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeAggregator {
    scope: ScopeId,
    totals: ScopeTotals,
}

impl ScopeAggregator {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            totals: ScopeTotals::default(),
        }
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn stats(&self) -> ScopeTotals {
        self.totals
    }

    /// Fails when adding `amount` to the locked total would overflow.
    pub fn check_deposit(&self, amount: Amount) -> EscrowResult<Amount> {
        self.totals
            .total_locked
            .checked_add(amount)
            .ok_or_else(|| {
                EscrowError::InvalidAmount(format!(
                    "deposit of {} would overflow locked total of {}",
                    amount, self.scope
                ))
            })
    }

    /// Fails with `Underflow` when the locked total cannot cover `amount`.
    pub fn check_release(&self, amount: Amount) -> EscrowResult<Amount> {
        self.totals
            .total_locked
            .checked_sub(amount)
            .ok_or_else(|| EscrowError::Underflow {
                scope: self.scope.clone(),
                detail: format!(
                    "scope total {} is below release amount {}",
                    self.totals.total_locked, amount
                ),
            })
    }

    pub fn check_contribution(&self, amount: Amount) -> EscrowResult<Amount> {
        self.totals
            .total_contributed
            .checked_add(amount)
            .ok_or_else(|| {
                EscrowError::InvalidAmount(format!(
                    "contribution of {} would overflow contributed total of {}",
                    amount, self.scope
                ))
            })
    }

    pub fn on_deposit(&mut self, amount: Amount) -> EscrowResult<()> {
        self.totals.total_locked = self.check_deposit(amount)?;
        Ok(())
    }

    pub fn on_release(&mut self, amount: Amount) -> EscrowResult<()> {
        self.totals.total_locked = self.check_release(amount)?;
        Ok(())
    }

    pub fn on_contribution(&mut self, amount: Amount) -> EscrowResult<()> {
        self.totals.total_contributed = self.check_contribution(amount)?;
        Ok(())
    }
}
