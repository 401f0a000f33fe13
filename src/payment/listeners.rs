//! Payment lifecycle listeners
//!
//! Listeners are side-effect-only observers: they record or report, never
//! steer the engine, and must not call back into it.

use crate::{
    accounting::AccountingClient,
    payment::PendingPayment,
    store::{RecordStore, RecordStoreExt},
};
use std::sync::Arc;
use tracing::warn;

pub trait PaymentListener: Send + Sync {
    fn payment_added(&self, _payment: &PendingPayment) {}

    fn payment_sent(&self, _payment: &PendingPayment) {}

    fn payment_resent(&self, _payment: &PendingPayment) {}

    fn payment_verified(&self, _payment: &PendingPayment) {}
}

/// Records verified payments in the record store
pub struct StorePaymentListener {
    store: Arc<dyn RecordStore>,
}

impl StorePaymentListener {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

impl PaymentListener for StorePaymentListener {
    fn payment_verified(&self, payment: &PendingPayment) {
        if self.store.connect().is_err() {
            warn!(target: "pay", "could not connect to record store");
            return;
        }
        if let Err(err) = self.store.add_to("verified_payments", &payment.transaction) {
            warn!(target: "pay", "could not record verified payment: {err}");
        }
        let _ = self.store.disconnect();
    }
}

/// Reports payment progress to the accounting backend. The POSTs are spawned
/// so the engine lock is never held across them.
pub struct WebPaymentListener {
    accounting: AccountingClient,
}

impl WebPaymentListener {
    pub fn new(accounting: AccountingClient) -> Self {
        Self { accounting }
    }
}

impl PaymentListener for WebPaymentListener {
    fn payment_sent(&self, payment: &PendingPayment) {
        let accounting = self.accounting.clone();
        let incoming = payment.id.clone();
        let outgoing = payment.transaction.hash.clone();
        tokio::spawn(async move {
            accounting.payment_sent(&incoming, &outgoing).await;
        });
    }

    fn payment_verified(&self, payment: &PendingPayment) {
        let accounting = self.accounting.clone();
        let incoming = payment.id.clone();
        let outgoing = payment.transaction.hash.clone();
        tokio::spawn(async move {
            accounting.payment_verified(&incoming, &outgoing).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{eth::types::Transaction, store::MemoryStore};

    #[test]
    fn verified_payments_are_recorded() {
        let store = Arc::new(MemoryStore::default());
        let listener = StorePaymentListener::new(store.clone());

        let payment = PendingPayment {
            id: "1".to_string(),
            block_sent: 10,
            transaction: Transaction { hash: "0xfeed".to_string(), ..Default::default() },
        };
        listener.payment_verified(&payment);

        store.connect().unwrap();
        assert!(store.exists_in("verified_payments", &payment.transaction));
        store.disconnect().unwrap();
    }
}
