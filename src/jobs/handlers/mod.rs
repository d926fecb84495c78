pub mod cleanup_handler;
pub mod confirmation_handler;
pub mod transfer_handler;

pub use cleanup_handler::CleanupHandler;
pub use confirmation_handler::{ConfirmationHandler, completed_dedupe_key};
pub use transfer_handler::TransferHandler;
