//! Email provider implementations.
//!
//! Each provider implements the [`Mailer`](crate::Mailer) trait.
//!
//! | Provider | Description |
//! |----------|-------------|
//! | [`GraphMailer`] | Microsoft Graph `sendMail` as a shared mailbox |

mod graph;
pub use graph::{GraphMailer, GRAPH_API_URL};
