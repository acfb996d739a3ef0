//! Folding the action ledger into totals and a derived status, and the
//! state-machine and amount checks that gate every new action.

use shared::{Payment, PaymentAction, PaymentStatus, PaymentType};

use crate::error::NotPermitted;

/// Running totals over one payment's ledger.
///
/// Only successful actions move the settled totals. Actions without an
/// outcome are counted separately as reservations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub authorized: bool,
    pub auth_declined: bool,
    pub voided: bool,
    pub captured: u64,
    pub refunded: u64,
    pub pending_capture: u64,
    pub pending_refund: u64,
    pub pending_void: bool,
    pub in_flight: usize,
}

impl LedgerSummary {
    pub fn fold<'a>(actions: impl IntoIterator<Item = &'a PaymentAction>) -> Self {
        let mut summary = Self::default();
        for action in actions {
            if !action.is_processed() {
                summary.in_flight += 1;
                match action.action_type {
                    PaymentType::Capture => {
                        summary.pending_capture =
                            summary.pending_capture.saturating_add(action.amount)
                    }
                    PaymentType::Refund => {
                        summary.pending_refund =
                            summary.pending_refund.saturating_add(action.amount)
                    }
                    PaymentType::Void => summary.pending_void = true,
                    PaymentType::Authorization => {}
                }
                continue;
            }

            let successful = action.is_successful();
            match action.action_type {
                PaymentType::Authorization if successful => summary.authorized = true,
                PaymentType::Authorization => summary.auth_declined = true,
                PaymentType::Capture if successful => {
                    summary.captured = summary.captured.saturating_add(action.amount)
                }
                PaymentType::Refund if successful => {
                    summary.refunded = summary.refunded.saturating_add(action.amount)
                }
                PaymentType::Void if successful => summary.voided = true,
                PaymentType::Capture | PaymentType::Refund | PaymentType::Void => {}
            }
        }
        summary
    }

    /// Authorized amount not yet captured or reserved by a pending capture.
    pub fn capturable(&self, authorized_amount: u64) -> u64 {
        authorized_amount
            .saturating_sub(self.captured)
            .saturating_sub(self.pending_capture)
    }

    pub fn net_captured(&self) -> u64 {
        self.captured.saturating_sub(self.refunded)
    }

    /// Captured amount not yet refunded or reserved by a pending refund.
    pub fn refundable(&self) -> u64 {
        self.net_captured().saturating_sub(self.pending_refund)
    }

    /// The status the ledger implies for a payment of `authorized_amount`.
    pub fn status(&self, authorized_amount: u64) -> PaymentStatus {
        if self.voided {
            PaymentStatus::Voided
        } else if self.refunded > 0 {
            if self.refunded >= self.captured {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            }
        } else if self.captured > 0 {
            if self.captured >= authorized_amount {
                PaymentStatus::Captured
            } else {
                PaymentStatus::PartiallyCaptured
            }
        } else if self.authorized {
            PaymentStatus::Authorized
        } else if self.auth_declined {
            PaymentStatus::Declined
        } else {
            PaymentStatus::Pending
        }
    }
}

/// Whether `operation` may start from `status`.
pub fn permits(status: PaymentStatus, operation: PaymentType) -> bool {
    use PaymentStatus::*;
    match operation {
        PaymentType::Authorization => status == Pending,
        PaymentType::Capture => matches!(status, Authorized | PartiallyCaptured),
        PaymentType::Refund => matches!(status, Captured | PartiallyCaptured | PartiallyRefunded),
        PaymentType::Void => status == Authorized,
    }
}

/// Checks `operation` against the payment's status and ledger, returning the
/// amount the new action should carry.
///
/// `requested` is ignored for Void, which always covers the authorized amount.
pub fn check_operation(
    payment: &Payment,
    summary: &LedgerSummary,
    operation: PaymentType,
    requested: u64,
) -> Result<u64, NotPermitted> {
    if !permits(payment.status, operation) {
        return Err(NotPermitted::InvalidStatus {
            status: payment.status,
            operation,
        });
    }

    let authorized_amount = payment.amount.minor_units;
    match operation {
        PaymentType::Authorization | PaymentType::Void => {
            if summary.in_flight > 0 {
                return Err(NotPermitted::ActionInFlight);
            }
            Ok(authorized_amount)
        }
        PaymentType::Capture => {
            // A void or refund settling first would make the payment terminal.
            if summary.pending_void || summary.pending_refund > 0 {
                return Err(NotPermitted::ActionInFlight);
            }
            let remaining = summary.capturable(authorized_amount);
            if requested > remaining {
                return Err(NotPermitted::ExceedsCapturable {
                    requested,
                    remaining,
                });
            }
            Ok(requested)
        }
        PaymentType::Refund => {
            if summary.pending_void || summary.pending_capture > 0 {
                return Err(NotPermitted::ActionInFlight);
            }
            if summary.net_captured() == 0 {
                return Err(NotPermitted::NothingToRefund);
            }
            let remaining = summary.refundable();
            if requested > remaining {
                return Err(NotPermitted::ExceedsRefundable {
                    requested,
                    remaining,
                });
            }
            Ok(requested)
        }
    }
}
