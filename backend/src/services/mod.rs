pub mod email;
pub mod encryption;
pub mod sms;

pub use email::{
    EmailDelivery, EmailError, EmailProvider, FailoverEmailService, HttpEmailProvider,
    OutgoingEmail, SmtpEmailProvider,
};
#[cfg(test)]
pub use encryption::MockSecretDecryptor;
pub use encryption::{EncryptionError, EncryptionService, SecretDecryptor};
pub use sms::{SmsClient, SmsClientFactory, SmsCredentials, SmsError, TwilioSmsFactory};
