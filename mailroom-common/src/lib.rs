pub mod address;
pub mod attribute;
pub mod error;
pub mod logging;
pub mod mail;
pub mod message;

pub use address::MailAddress;
pub use attribute::AttributeValue;
pub use error::{AddressError, MessageError};
pub use mail::{Mail, MailBuilder, state};
pub use message::Message;
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
