pub mod error;
pub mod message;
pub mod payload;
pub mod transaction;

pub use error::{ClondikeError, Result};
pub use message::{Envelope, Group, MessageHeader, MessageId, ERR_FLAG, NO_TARGET_PID, TRANSACTION_ID_INVAL};
pub use transaction::{TransactionHandle, TransactionTable};
