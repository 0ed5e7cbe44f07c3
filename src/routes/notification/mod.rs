mod handler;

pub use handler::{SendNotificationResponse, send_batch_notification, send_notification};
