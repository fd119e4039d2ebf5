use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-reported swap status. Unrecognized values are carried verbatim so a
/// newer backend never breaks the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SwapStatus {
    SwapCreated,
    InvoiceSet,
    InvoicePending,
    InvoicePaid,
    TransactionMempool,
    TransactionConfirmed,
    TransactionServerMempool,
    TransactionServerConfirmed,
    TransactionClaimPending,
    TransactionClaimed,
    InvoiceSettled,
    InvoiceFailedToPay,
    InvoiceExpired,
    SwapExpired,
    TransactionFailed,
    TransactionLockupFailed,
    TransactionRefunded,
    Unknown(String),
}

impl SwapStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SwapStatus::SwapCreated => "swap.created",
            SwapStatus::InvoiceSet => "invoice.set",
            SwapStatus::InvoicePending => "invoice.pending",
            SwapStatus::InvoicePaid => "invoice.paid",
            SwapStatus::TransactionMempool => "transaction.mempool",
            SwapStatus::TransactionConfirmed => "transaction.confirmed",
            SwapStatus::TransactionServerMempool => "transaction.server.mempool",
            SwapStatus::TransactionServerConfirmed => "transaction.server.confirmed",
            SwapStatus::TransactionClaimPending => "transaction.claim.pending",
            SwapStatus::TransactionClaimed => "transaction.claimed",
            SwapStatus::InvoiceSettled => "invoice.settled",
            SwapStatus::InvoiceFailedToPay => "invoice.failedToPay",
            SwapStatus::InvoiceExpired => "invoice.expired",
            SwapStatus::SwapExpired => "swap.expired",
            SwapStatus::TransactionFailed => "transaction.failed",
            SwapStatus::TransactionLockupFailed => "transaction.lockupFailed",
            SwapStatus::TransactionRefunded => "transaction.refunded",
            SwapStatus::Unknown(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "swap.created" => SwapStatus::SwapCreated,
            "invoice.set" => SwapStatus::InvoiceSet,
            "invoice.pending" => SwapStatus::InvoicePending,
            "invoice.paid" => SwapStatus::InvoicePaid,
            "transaction.mempool" => SwapStatus::TransactionMempool,
            "transaction.confirmed" => SwapStatus::TransactionConfirmed,
            "transaction.server.mempool" => SwapStatus::TransactionServerMempool,
            "transaction.server.confirmed" => SwapStatus::TransactionServerConfirmed,
            "transaction.claim.pending" => SwapStatus::TransactionClaimPending,
            "transaction.claimed" => SwapStatus::TransactionClaimed,
            "invoice.settled" => SwapStatus::InvoiceSettled,
            "invoice.failedToPay" => SwapStatus::InvoiceFailedToPay,
            "invoice.expired" => SwapStatus::InvoiceExpired,
            "swap.expired" => SwapStatus::SwapExpired,
            "transaction.failed" => SwapStatus::TransactionFailed,
            "transaction.lockupFailed" => SwapStatus::TransactionLockupFailed,
            "transaction.refunded" => SwapStatus::TransactionRefunded,
            other => SwapStatus::Unknown(other.to_string()),
        }
    }

    /// Statuses after which the payer may be able to refund.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            SwapStatus::InvoiceFailedToPay
                | SwapStatus::InvoiceExpired
                | SwapStatus::SwapExpired
                | SwapStatus::TransactionFailed
                | SwapStatus::TransactionLockupFailed
                | SwapStatus::TransactionRefunded
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SwapStatus::InvoiceSettled | SwapStatus::TransactionClaimed)
    }

    /// Terminal statuses; the swap record becomes immutable afterwards except
    /// for recording our own claim transaction.
    pub fn is_final(&self) -> bool {
        self.is_failed() || self.is_success()
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SwapStatus {
    fn from(s: String) -> Self {
        SwapStatus::parse(&s)
    }
}

impl From<SwapStatus> for String {
    fn from(s: SwapStatus) -> Self {
        s.as_str().to_string()
    }
}
