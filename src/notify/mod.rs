/// Outbound notifications: templates, rendering, and mail dispatch

pub mod mailer;
pub mod template;

pub use mailer::{HttpMailer, LogMailer, Mailer, OutgoingEmail};
pub use template::{render, MessageTemplate, TemplateStore};
