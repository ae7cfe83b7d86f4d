//! Shortage notifications.
//!
//! One request per available channel per shortaged row, best effort: a
//! client without a contact record, or a channel whose send fails, never
//! blocks the remaining rows.

use crate::{
    config::NotificationConfig,
    error::ReconResult,
    store::{ContactRecord, ShortageRecord, ShortageStore},
    types::retag_client_id,
};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Where a contact can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationChannel {
    Email { address: String },
    Sms { mobile: String },
    Push { receiver: String },
}

impl NotificationChannel {
    /// Every channel the contact record supports. Blank entries count as absent.
    pub fn for_contact(contact: &ContactRecord, push_enabled: bool) -> Vec<Self> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let mut channels = Vec::new();
        if let Some(address) = present(&contact.email) {
            channels.push(NotificationChannel::Email { address });
        }
        if let Some(mobile) = present(&contact.mobile) {
            channels.push(NotificationChannel::Sms { mobile });
        }
        if push_enabled {
            channels.push(NotificationChannel::Push {
                receiver: contact.party_cd.clone(),
            });
        }
        channels
    }

    pub fn name(&self) -> &'static str {
        match self {
            NotificationChannel::Email { .. } => "email",
            NotificationChannel::Sms { .. } => "sms",
            NotificationChannel::Push { .. } => "push",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortageTemplateData {
    #[serde(rename = "CLIENT")]
    pub client: String,
    #[serde(rename = "ISIN")]
    pub isin: Option<String>,
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "QTY")]
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpecificFields {
    pub email_display_name: Option<String>,
    pub attachments: Option<Vec<serde_json::Value>>,
    pub event_type: Option<String>,
}

/// Wire shape of one outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub receivers: Vec<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub template_name: String,
    pub template_data_json: ShortageTemplateData,
    pub data_fields: Option<NotificationSpecificFields>,
}

/// Fire-and-forget egress, addressed by logical route name.
pub trait NotificationTransport {
    fn send(&self, route: &str, message: &NotificationMessage) -> ReconResult<()>;
}

/// Writes each message to the log.
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn send(&self, route: &str, message: &NotificationMessage) -> ReconResult<()> {
        log::info!("route={route} message={}", serde_json::to_string(message)?);
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboxEnvelope<'a> {
    route: &'a str,
    message: &'a NotificationMessage,
}

/// Appends one JSON line per message to a file a relay drains.
pub struct OutboxTransport {
    path: PathBuf,
}

impl OutboxTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NotificationTransport for OutboxTransport {
    fn send(&self, route: &str, message: &NotificationMessage) -> ReconResult<()> {
        let line = serde_json::to_string(&OutboxEnvelope { route, message })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Contact lookup by tagged party code.
pub trait ContactDirectory {
    fn contact_for(&self, party_cd: &str) -> ReconResult<Option<ContactRecord>>;
}

impl ContactDirectory for ShortageStore {
    fn contact_for(&self, party_cd: &str) -> ReconResult<Option<ContactRecord>> {
        ShortageStore::contact_for(self, party_cd)
    }
}

pub struct ShortageNotifier<'a, D: ContactDirectory, T: NotificationTransport> {
    directory: &'a D,
    transport: T,
    config: NotificationConfig,
    client_tag: char,
}

impl<'a, D: ContactDirectory, T: NotificationTransport> ShortageNotifier<'a, D, T> {
    pub fn new(directory: &'a D, transport: T, config: NotificationConfig, client_tag: char) -> Self {
        Self {
            directory,
            transport,
            config,
            client_tag,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Notify every positively shortaged row. Returns the number of rows for
    /// which at least one channel was sent.
    pub fn dispatch(&self, rows: &[ShortageRecord]) -> ReconResult<usize> {
        let mut notified = 0;
        for row in rows {
            let Some(quantity) = row.short_quantity.filter(|_| row.is_shortaged()) else {
                continue;
            };
            let Some(client_id) = row.client_id.as_deref() else {
                log::debug!(
                    "No client id on {} settlement {}; skipping",
                    row.security_symbol,
                    row.settlement_no
                );
                continue;
            };

            let party_cd = retag_client_id(client_id, self.client_tag);
            let Some(contact) = self.directory.contact_for(&party_cd)? else {
                log::debug!("No contact record for {party_cd}; skipping");
                continue;
            };

            let data = ShortageTemplateData {
                client: party_cd.clone(),
                isin: row.isin.clone(),
                symbol: row.security_symbol.clone(),
                quantity,
            };

            let mut sent = 0;
            for channel in NotificationChannel::for_contact(&contact, self.config.push_enabled) {
                let (route, message) = self.build(&channel, data.clone());
                match self.transport.send(route, &message) {
                    Ok(()) => sent += 1,
                    Err(e) => log::warn!("{} to {party_cd} failed: {e}", channel.name()),
                }
            }
            if sent > 0 {
                log::info!(
                    "Notified client={party_cd} isin={} qty={quantity} via {sent} channels",
                    row.isin.as_deref().unwrap_or("-")
                );
                notified += 1;
            }
        }
        Ok(notified)
    }

    fn build(
        &self,
        channel: &NotificationChannel,
        data: ShortageTemplateData,
    ) -> (&str, NotificationMessage) {
        let cfg = &self.config;
        match channel {
            NotificationChannel::Email { address } => (
                cfg.email_route.as_str(),
                NotificationMessage {
                    receivers: vec![address.clone()],
                    sender: Some(cfg.email_sender.clone()),
                    subject: Some(cfg.email_subject.clone()),
                    template_name: cfg.email_template.clone(),
                    template_data_json: data,
                    data_fields: Some(NotificationSpecificFields {
                        email_display_name: Some(cfg.email_display_name.clone()),
                        ..Default::default()
                    }),
                },
            ),
            NotificationChannel::Sms { mobile } => (
                cfg.sms_route.as_str(),
                NotificationMessage {
                    receivers: vec![mobile.clone()],
                    sender: Some(cfg.sms_sender.clone()),
                    subject: None,
                    template_name: cfg.sms_template.clone(),
                    template_data_json: data,
                    data_fields: None,
                },
            ),
            NotificationChannel::Push { receiver } => (
                cfg.push_route.as_str(),
                NotificationMessage {
                    receivers: vec![receiver.clone()],
                    sender: None,
                    subject: None,
                    template_name: cfg.push_template.clone(),
                    template_data_json: data,
                    data_fields: Some(NotificationSpecificFields {
                        event_type: Some("event".into()),
                        ..Default::default()
                    }),
                },
            ),
        }
    }
}
