pub mod attachments;
pub mod display;
pub mod encryption;
pub mod imap;
pub mod message;

pub use encryption::Credentials;
pub use imap::fetch_unread;
pub use message::Message;
