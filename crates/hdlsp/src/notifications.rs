//
// notifications.rs
//
// Custom `backend/*` notifications and the outbound client seam
//

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::{Diagnostic, Url};
use tower_lsp::Client;

use crate::license::LicenseEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParams {
    pub message: String,
}

impl MessageParams {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLicenseParams {
    pub key: String,
}

/// `backend/warning` payload. `type` follows `MessageType` numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningParams {
    #[serde(rename = "type")]
    pub kind: u8,
    pub message: String,
}

impl WarningParams {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: 2,
            message: message.into(),
        }
    }
}

pub enum LicenseMissing {}

impl Notification for LicenseMissing {
    type Params = MessageParams;
    const METHOD: &'static str = "backend/licenseMissing";
}

pub enum LicenseValid {}

impl Notification for LicenseValid {
    type Params = MessageParams;
    const METHOD: &'static str = "backend/licenseValid";
}

pub enum LicenseInvalid {}

impl Notification for LicenseInvalid {
    type Params = MessageParams;
    const METHOD: &'static str = "backend/licenseInvalid";
}

pub enum CacheLicense {}

impl Notification for CacheLicense {
    type Params = CacheLicenseParams;
    const METHOD: &'static str = "backend/cacheLicense";
}

pub enum MacrosChanged {}

impl Notification for MacrosChanged {
    type Params = ();
    const METHOD: &'static str = "backend/macrosChanged";
}

pub enum ExclusionsChanged {}

impl Notification for ExclusionsChanged {
    type Params = ();
    const METHOD: &'static str = "backend/exclusionsChanged";
}

pub enum ProjectStructureChanged {}

impl Notification for ProjectStructureChanged {
    type Params = ();
    const METHOD: &'static str = "backend/projectStructureChanged";
}

pub enum Warning {}

impl Notification for Warning {
    type Params = WarningParams;
    const METHOD: &'static str = "backend/warning";
}

/// Every custom notification the server sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotice {
    LicenseMissing,
    LicenseValid,
    LicenseInvalid,
    CacheLicense { key: String },
    MacrosChanged,
    ExclusionsChanged,
    ProjectStructureChanged,
    Warning(String),
}

impl ServerNotice {
    pub fn method(&self) -> &'static str {
        match self {
            ServerNotice::LicenseMissing => LicenseMissing::METHOD,
            ServerNotice::LicenseValid => LicenseValid::METHOD,
            ServerNotice::LicenseInvalid => LicenseInvalid::METHOD,
            ServerNotice::CacheLicense { .. } => CacheLicense::METHOD,
            ServerNotice::MacrosChanged => MacrosChanged::METHOD,
            ServerNotice::ExclusionsChanged => ExclusionsChanged::METHOD,
            ServerNotice::ProjectStructureChanged => ProjectStructureChanged::METHOD,
            ServerNotice::Warning(_) => Warning::METHOD,
        }
    }
}

impl From<LicenseEvent> for ServerNotice {
    fn from(event: LicenseEvent) -> Self {
        match event {
            LicenseEvent::Missing => ServerNotice::LicenseMissing,
            LicenseEvent::Valid => ServerNotice::LicenseValid,
            LicenseEvent::Invalid => ServerNotice::LicenseInvalid,
            LicenseEvent::CacheLicense { key } => ServerNotice::CacheLicense { key },
            LicenseEvent::Warning(message) => ServerNotice::Warning(message),
        }
    }
}

/// Where diagnostics and notices go. The LSP client in production, a
/// recorder in tests.
#[async_trait::async_trait]
pub trait ClientSink: Send + Sync + 'static {
    async fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>);

    async fn notify(&self, notice: ServerNotice);
}

#[async_trait::async_trait]
impl ClientSink for Client {
    async fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        Client::publish_diagnostics(self, uri, diagnostics, None).await;
    }

    async fn notify(&self, notice: ServerNotice) {
        log::debug!("Sending {}", notice.method());
        match notice {
            ServerNotice::LicenseMissing => {
                self.send_notification::<LicenseMissing>(MessageParams::new(
                    "License error: missing license",
                ))
                .await
            }
            ServerNotice::LicenseValid => {
                self.send_notification::<LicenseValid>(MessageParams::new("License is valid"))
                    .await
            }
            ServerNotice::LicenseInvalid => {
                self.send_notification::<LicenseInvalid>(MessageParams::new(
                    "License error: invalid license",
                ))
                .await
            }
            ServerNotice::CacheLicense { key } => {
                self.send_notification::<CacheLicense>(CacheLicenseParams { key })
                    .await
            }
            ServerNotice::MacrosChanged => self.send_notification::<MacrosChanged>(()).await,
            ServerNotice::ExclusionsChanged => {
                self.send_notification::<ExclusionsChanged>(()).await
            }
            ServerNotice::ProjectStructureChanged => {
                self.send_notification::<ProjectStructureChanged>(()).await
            }
            ServerNotice::Warning(message) => {
                self.send_notification::<Warning>(WarningParams::new(message))
                    .await
            }
        }
    }
}
