pub mod notification_dispatcher;
pub mod registration_service;
pub mod telegram_sender;

pub use notification_dispatcher::*;
pub use registration_service::*;
pub use telegram_sender::*;
