//! Booking pipeline: seat admission, payment reconciliation, and ticket
//! issuance for FCB matches.
//!
//! Every component takes the store handle explicitly. Work that talks to
//! outside services (rendering and email) never runs inside a webhook
//! request; it goes through the durable issuance queue and the
//! [`IssuanceWorker`].

pub mod admission;
pub mod error;
pub mod issuance;
pub mod mailer;
pub mod occupancy;
pub mod reconcile;
pub mod render;
pub mod worker;

pub use admission::{AdmissionController, ReservationRequest, is_valid_email};
pub use error::{BookingError, Result};
pub use issuance::{Issuance, IssuerSettings, TicketIssuer};
pub use mailer::{Attachment, LogMailer, Mailer, OutgoingEmail, ResendMailer};
pub use occupancy::{MatchWindow, list_matches_with_occupancy};
pub use reconcile::{PaymentReconciler, Reconciled};
pub use render::{TicketDocument, TicketRenderer};
pub use worker::{IssuanceWorker, WorkerReport};

#[cfg(test)]
pub(crate) mod testing;
