use crate::backup::function_path;
use crate::backup::notifications::Notification;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use validator::Validate;

/// SMTP delivery of run reports.
///
/// The password is a [`RedactedString`], so the config can be logged as is.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[builder(into)]
    host: String,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    #[builder(into)]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: String,
    #[builder(into)]
    password: RedactedString,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl Notification for SmtpNotificationConfig {
    #[named]
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()> {
        tracing::info!(
            "Sending smtp notification from {} to {}",
            self.from,
            self.to.iter().join(", ")
        );
        let email = self
            .to
            .iter()
            .fold(Message::builder(), |email, send_to| email.to(send_to.clone()))
            .from(self.from.clone())
            .subject(topic.to_string())
            .header(ContentType::TEXT_PLAIN)
            .body(msg.to_string())
            .map_err(Error::from)
            .with_msg(format!(
                "Failed to build notification email from {} to {}",
                self.from,
                self.to.iter().join(", ")
            ))?;

        let creds = Credentials::new(self.username.clone(), self.password.inner().to_string());

        let mailer = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .with_msg(format!(
            "Failed to build smtp client for host {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))?
        .credentials(creds)
        .build();

        let response = mailer
            .send(&email)
            .map_err(Error::from)
            .with_debug_object_and_fn_name(self.host.clone(), function_path!())?;
        if response.is_positive() {
            Ok(())
        } else {
            let errors = response
                .message()
                .map(|m| Error::SmtpSendError(m.to_owned()))
                .collect_vec();
            if errors.is_empty() {
                Err(Error::SmtpSendError(format!("code {}", response.code())))
            } else {
                Err(errors.into())
            }
        }
    }
}
