pub mod notification;
pub mod otp_service;
pub mod token_service;
