pub mod authorization;
pub mod message_service;

pub use authorization::ConversationAuthorizer;
pub use message_service::MessageService;
