use std::fs;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use google_drive3::oauth2::authenticator_delegate::{DefaultInstalledFlowDelegate, InstalledFlowDelegate};
use google_drive3::oauth2::authenticator::Authenticator;
use google_drive3::oauth2::{self, InstalledFlowAuthenticator, InstalledFlowReturnMethod};
use google_drive3::{hyper, hyper_rustls, DriveHub};
use google_sheets4::Sheets;
use hyper::client::HttpConnector;
use serde::Serialize;

use crate::config::Settings;
use crate::context::RemoteServices;
use crate::drive::BlobStore;
use crate::error::{Ez3dError, Result};
use crate::sheet::SheetService;
use crate::BoxFuture;

pub type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

const SHEETS_READONLY: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const DRIVE_READONLY: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Opens the consent page in the default browser before falling back to the
/// stock console prompt.
struct BrowserFlowDelegate;

impl InstalledFlowDelegate for BrowserFlowDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        need_code: bool,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            if let Err(e) = open::that(url) {
                tracing::warn!(error = %e, "failed to open browser for authorization");
            }
            DefaultInstalledFlowDelegate.present_user_url(url, need_code).await
        })
    }
}

fn http_client() -> Result<hyper::Client<HttpsConnector>> {
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| Ez3dError::Auth(format!("failed to load native TLS roots: {e}")))?
        .https_or_http()
        .enable_http1()
        .build();
    Ok(hyper::Client::builder().build(connector))
}

/// Run the installed-app OAuth flow (tokens cached on disk) and build the
/// Sheets and Drive hubs on top of it.
pub async fn connect(settings: &Settings) -> Result<RemoteServices> {
    let secret = oauth2::read_application_secret(&settings.client_secret)
        .await
        .map_err(|e| {
            Ez3dError::Auth(format!(
                "failed to read client secret {}: {e}",
                settings.client_secret.display()
            ))
        })?;

    if let Some(parent) = settings.token_cache.parent() {
        fs::create_dir_all(parent).map_err(|e| Ez3dError::io(parent, e))?;
    }
    tracing::debug!(path = %settings.token_cache.display(), "token cache");

    let auth = InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
        .persist_tokens_to_disk(settings.token_cache.clone())
        .flow_delegate(Box::new(BrowserFlowDelegate))
        .build()
        .await
        .map_err(|e| Ez3dError::Auth(format!("failed to create authenticator: {e}")))?;

    // One consent for both scopes; the hubs then reuse the cached token.
    auth.token(&[SHEETS_READONLY, DRIVE_READONLY])
        .await
        .map_err(|e| Ez3dError::Auth(e.to_string()))?;

    let services = remote_services(http_client()?, auth);
    tracing::info!("connected to Google Sheets and Drive");
    Ok(services)
}

/// Both hubs share one client and one authenticator.
fn remote_services(client: hyper::Client<HttpsConnector>, auth: Authenticator<HttpsConnector>) -> RemoteServices {
    let sheets = GoogleSheets {
        hub: Sheets::new(client.clone(), auth.clone()),
    };
    let drive = GoogleDrive {
        hub: DriveHub::new(client, auth),
    };
    RemoteServices::new(Arc::new(sheets), Arc::new(drive))
}

pub struct GoogleSheets {
    hub: Sheets<HttpsConnector>,
}

impl SheetService for GoogleSheets {
    fn values<'a>(
        &'a self,
        spreadsheet_id: &'a str,
        range: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<String>>>> {
        Box::pin(async move {
            let (_, value_range) = self
                .hub
                .spreadsheets()
                .values_get(spreadsheet_id, range)
                .add_scope(SHEETS_READONLY)
                .doit()
                .await
                .map_err(|e| Ez3dError::Remote(format!("reading {range}: {e}")))?;

            Ok(value_range
                .values
                .unwrap_or_default()
                .into_iter()
                .map(|row| row.iter().map(cell_text).collect())
                .collect())
        })
    }
}

/// Cells arrive as JSON values; numbers and booleans keep their textual form.
fn cell_text<T: Serialize>(cell: &T) -> String {
    match serde_json::to_value(cell) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Null) | Err(_) => String::new(),
        Ok(other) => other.to_string(),
    }
}

pub struct GoogleDrive {
    hub: DriveHub<HttpsConnector>,
}

impl BlobStore for GoogleDrive {
    fn download<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let (response, _) = self
                .hub
                .files()
                .get(file_id)
                .supports_all_drives(true)
                .param("alt", "media")
                .add_scope(DRIVE_READONLY)
                .doit()
                .await
                .map_err(|e| Ez3dError::Remote(format!("download of {file_id} failed: {e}")))?;

            let bytes = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| Ez3dError::Remote(format!("reading body of {file_id} failed: {e}")))?;
            Ok(bytes.to_vec())
        })
    }
}
