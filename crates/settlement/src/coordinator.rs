//! Settlement coordinator for moving funds between accounts.

use std::time::Instant;

use domain::{BalanceLedger, DomainError};

use crate::error::{Result, SettlementError};
use crate::plan::{SettlementPlan, SettlementReceipt, SettlementStep};
use crate::state::SettlementState;

/// Tracks one attempt: its state and the steps applied so far.
#[derive(Debug, Default)]
struct Attempt {
    state: SettlementState,
    applied: Vec<SettlementStep>,
}

impl Attempt {
    fn transition(&mut self, to: SettlementState) -> Result<()> {
        if to.predecessor() != Some(self.state) {
            return Err(SettlementError::InvalidState {
                expected: to.as_str(),
                actual: self.state,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Orchestrates the debit and credits of a settlement.
///
/// The coordinator drives a consumer debit followed by one credit per
/// merchant, with compensating transfers on failure. It holds no balances of
/// its own; every mutation goes through the [`BalanceLedger`] it is handed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementCoordinator;

impl SettlementCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Settles `plan` against `ledger`.
    ///
    /// On success every merchant holds their payout and the consumer has
    /// paid `plan.total`. On failure the ledger is restored to its state
    /// before the call, unless a compensation itself fails.
    #[tracing::instrument(skip(self, ledger, plan), fields(order_id = %plan.order_id, total = %plan.total))]
    pub fn settle<L: BalanceLedger>(
        &self,
        ledger: &mut L,
        plan: &SettlementPlan,
    ) -> Result<SettlementReceipt> {
        metrics::counter!("settlement_executions_total").increment(1);
        let start = Instant::now();
        let mut attempt = Attempt::default();
        attempt.transition(SettlementState::Running)?;

        // 1. Debit the consumer
        let debit = SettlementStep::Debit {
            username: plan.consumer.clone(),
            amount: plan.total,
        };
        let consumer_balance = match ledger.debit(&plan.consumer, plan.total) {
            Ok(balance) => balance,
            Err(source) => {
                // Nothing applied yet, nothing to undo.
                attempt.transition(SettlementState::Compensating)?;
                attempt.transition(SettlementState::Failed)?;
                metrics::counter!("settlement_failed_total").increment(1);
                tracing::info!(step = %debit.name(), error = %source, "settlement rejected");
                return Err(SettlementError::StepFailed {
                    step: debit.name(),
                    source,
                });
            }
        };
        attempt.applied.push(debit);

        // 2. Credit every merchant
        for (merchant, amount) in &plan.payouts {
            let credit = SettlementStep::Credit {
                username: merchant.clone(),
                amount: *amount,
            };
            if let Err(source) = ledger.credit(merchant, *amount) {
                tracing::warn!(step = %credit.name(), error = %source, "settlement step failed");
                let result = self.compensate(ledger, &mut attempt, credit.name(), source);
                metrics::counter!("settlement_failed_total").increment(1);
                metrics::histogram!("settlement_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                return Err(result);
            }
            attempt.applied.push(credit);
        }

        attempt.transition(SettlementState::Completed)?;
        let duration = start.elapsed().as_secs_f64();
        metrics::histogram!("settlement_duration_seconds").record(duration);
        metrics::counter!("settlement_completed_total").increment(1);
        tracing::info!(merchants = plan.payouts.len(), duration, "settlement completed");

        Ok(SettlementReceipt {
            order_id: plan.order_id,
            consumer_balance,
            steps: attempt.applied,
            state: attempt.state,
        })
    }

    /// Undoes a completed settlement, newest step first.
    ///
    /// Used when the settlement could not be made durable.
    #[tracing::instrument(skip(self, ledger, receipt), fields(order_id = %receipt.order_id))]
    pub fn reverse<L: BalanceLedger>(
        &self,
        ledger: &mut L,
        receipt: &SettlementReceipt,
    ) -> Result<()> {
        if !receipt.state.is_reversible() {
            return Err(SettlementError::InvalidState {
                expected: SettlementState::Completed.as_str(),
                actual: receipt.state,
            });
        }
        let mut first_failure = None;
        for step in receipt.steps.iter().rev() {
            if let Err(e) = Self::undo(ledger, step) {
                tracing::error!(step = %step.name(), error = %e, "reversal step failed");
                first_failure.get_or_insert_with(|| SettlementError::CompensationFailed {
                    step: step.name(),
                    reason: e.to_string(),
                });
            }
        }
        metrics::counter!("settlement_reversed_total").increment(1);
        match first_failure {
            Some(err) => Err(err),
            None => {
                tracing::info!("settlement reversed");
                Ok(())
            }
        }
    }

    /// Runs compensating transfers in reverse order of applied steps and
    /// returns the error to report.
    fn compensate<L: BalanceLedger>(
        &self,
        ledger: &mut L,
        attempt: &mut Attempt,
        failed_step: String,
        source: DomainError,
    ) -> SettlementError {
        if let Err(e) = attempt.transition(SettlementState::Compensating) {
            return e;
        }

        let mut compensation_failure = None;
        while let Some(step) = attempt.applied.pop() {
            match Self::undo(ledger, &step) {
                Ok(()) => tracing::debug!(step = %step.name(), "compensation step completed"),
                Err(e) => {
                    tracing::error!(step = %step.name(), error = %e, "compensation step failed");
                    compensation_failure.get_or_insert_with(|| {
                        SettlementError::CompensationFailed {
                            step: step.name(),
                            reason: e.to_string(),
                        }
                    });
                }
            }
        }

        if let Err(e) = attempt.transition(SettlementState::Failed) {
            return e;
        }
        tracing::warn!(step = %failed_step, reason = %source, "settlement failed");
        compensation_failure.unwrap_or_else(|| SettlementError::StepFailed {
            step: failed_step,
            source,
        })
    }

    fn undo<L: BalanceLedger>(ledger: &mut L, step: &SettlementStep) -> domain::Result<()> {
        match step {
            SettlementStep::Debit { username, amount } => ledger.credit(username, *amount)?,
            SettlementStep::Credit { username, amount } => ledger.debit(username, *amount)?,
        };
        Ok(())
    }
}
