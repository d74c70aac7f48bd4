//! Application services composing the domain model, the store and the
//! payment gateway.

pub mod checkout;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reconciliation;
pub mod voucher;

pub use checkout::{CheckoutReceipt, CheckoutRequest, CheckoutService, CustomerInfo, VoucherQuote};
pub use notifications::{LogNotifier, NatsNotifier, Notifier, RecordingNotifier};
pub use orders::{OrderLifecycle, Transition};
pub use payments::{PaymentAdapter, PaymentHandle, VerifiedPayment};
pub use reconciliation::{
    CycleReport, PollerHandle, ReconcileOutcome, ReconciliationPoller, ReconciliationTimeout, Reconciler, RefreshResult,
};
pub use voucher::VoucherValidator;
