pub mod conversation_service;
pub mod mailbox_service;
pub mod social_client;
pub mod view_service;
