use std::fs;
use std::io::Write;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::ArchiveConfig;
use crate::domain::SchemaKind;
use crate::error::EgaError;
use crate::metadata::{SubmissionAction, SubmissionSet, build_submission};
use crate::xml::{receipt_success, write_submission_set};

const ERR_AUTH: &str = "no token received; session endpoint will be unavailable";
const ERR_FAILED: &str = "rejected by archive, see receipt output for details";
const MSG_SUCCEEDED: &str = "submission succeeded";
const TOKEN_HEADER: &str = "X-Token";

/// Submission identity with exactly one password source.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
    pub password_file: Option<Utf8PathBuf>,
}

impl Credentials {
    fn resolve(self) -> Result<(String, String), EgaError> {
        let password = match (self.password, self.password_file) {
            (Some(password), None) => password,
            (None, Some(path)) => fs::read_to_string(path.as_std_path())
                .map_err(|err| EgaError::Filesystem(format!("read password file {path}: {err}")))?
                .trim()
                .to_string(),
            _ => return Err(EgaError::CredentialSource),
        };
        Ok((self.user, password))
    }
}

/// Requested submission action; the trailing protect action is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAction {
    Add,
    Validate,
}

/// A prepared metadata document awaiting upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub schema: SchemaKind,
    pub source: String,
    pub data: String,
}

/// Client for the archive's REST API. Holds a session token for the
/// duration of its life when login succeeds; logs out best-effort on drop.
pub struct RestClient {
    client: Client,
    config: ArchiveConfig,
    submit_url: String,
    user: String,
    password: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(
        config: &ArchiveConfig,
        credentials: Credentials,
        test: bool,
    ) -> Result<Self, EgaError> {
        let (user, password) = credentials.resolve()?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("egameta/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EgaError::ArchiveHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| EgaError::ArchiveHttp(err.to_string()))?;

        let submit_url = if test {
            config.submit_url_test.clone()
        } else {
            config.submit_url_production.clone()
        };

        let mut rest = Self {
            client,
            config: config.clone(),
            submit_url,
            user,
            password,
            token: None,
        };
        // Token acquisition failure degrades the client instead of failing
        // construction: the legacy submit endpoint works without it.
        rest.token = match rest.login() {
            Ok(token) => Some(token),
            Err(err) => {
                error!("{err}");
                error!("{ERR_AUTH}");
                None
            }
        };
        Ok(rest)
    }

    fn login(&self) -> Result<String, EgaError> {
        let response = self
            .client
            .post(format!("{}login", self.config.api_url))
            .form(&[
                ("username", self.user.as_str()),
                ("password", self.password.as_str()),
                ("loginType", "submitter"),
            ])
            .send()
            .map_err(|err| EgaError::ArchiveHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "login failed".to_string());
            return Err(EgaError::ArchiveStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| EgaError::ArchiveHttp(err.to_string()))?;
        body.get("response")
            .and_then(|response| response.get("result"))
            .and_then(|result| result.get(0))
            .and_then(|result| result.get("session"))
            .and_then(|session| session.get("sessionToken"))
            .and_then(|token| token.as_str())
            .map(|token| token.to_string())
            .ok_or_else(|| EgaError::ArchiveHttp("no session token in login response".to_string()))
    }

    /// Submit prepared metadata documents in one multipart request and
    /// interpret the receipt. The raw receipt text is written to
    /// `receipt_out` whenever the archive returned a parseable receipt,
    /// including when it reports failure.
    pub fn submit(
        &self,
        uploads: &[FileUpload],
        action: SubmitAction,
        alias: Option<String>,
        receipt_out: &mut dyn Write,
    ) -> Result<(), EgaError> {
        let mut actions: Vec<SubmissionAction> = uploads
            .iter()
            .map(|upload| match action {
                SubmitAction::Add => SubmissionAction::Add {
                    source: upload.source.clone(),
                    schema: upload.schema,
                },
                SubmitAction::Validate => SubmissionAction::Validate {
                    source: upload.source.clone(),
                    schema: upload.schema,
                },
            })
            .collect();
        // Every envelope ends with a protect action regardless of the
        // requested action type.
        actions.push(SubmissionAction::Protect);

        let envelope = write_submission_set(&SubmissionSet {
            submissions: vec![build_submission(alias, actions, &self.config)],
        })?;
        info!("{envelope}");

        let mut form = Form::new();
        for upload in uploads {
            let part = Part::text(upload.data.clone())
                .file_name(upload.source.clone())
                .mime_str("text/plain")
                .map_err(|err| EgaError::ArchiveHttp(err.to_string()))?;
            form = form.part(upload.schema.form_name(), part);
        }
        let envelope_part = Part::text(envelope)
            .file_name("SUBMISSION")
            .mime_str("text/plain")
            .map_err(|err| EgaError::ArchiveHttp(err.to_string()))?;
        form = form.part("SUBMISSION", envelope_part);

        let response = self
            .client
            .post(format!("{}submit/", self.submit_url))
            .basic_auth(&self.user, Some(&self.password))
            .multipart(form)
            .send()
            .map_err(|err| EgaError::SubmissionFailed(err.to_string()))?;
        let status = response.status().as_u16();
        debug!("submit endpoint returned status {status}");
        let body = response
            .text()
            .map_err(|err| EgaError::SubmissionFailed(err.to_string()))?;

        handle_submit_response(status, &body, receipt_out)
    }

    /// Return the archive's JSON metadata for an accessioned entity,
    /// verbatim. Requires the session token acquired at construction.
    pub fn retrieve_metadata(
        &self,
        schema: SchemaKind,
        accession: &str,
    ) -> Result<Value, EgaError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| EgaError::SessionUnavailable(self.config.api_url.clone()))?;
        let url = format!(
            "{}{}/{accession}?idtype=ega_stable_id",
            self.config.api_url,
            schema.archive_path()
        );
        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, token)
            .send()
            .map_err(|err| EgaError::ArchiveHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "metadata retrieval failed".to_string());
            return Err(EgaError::ArchiveStatus { status, message });
        }
        response
            .json()
            .map_err(|err| EgaError::ArchiveHttp(err.to_string()))
    }
}

impl Drop for RestClient {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let _ = self
                .client
                .delete(format!("{}logout", self.config.api_url))
                .header(TOKEN_HEADER, token)
                .send();
        }
    }
}

/// Interpret the submit endpoint's response: status, then receipt parse,
/// then the receipt's own success flag. An HTTP 200 does not imply
/// archive-level success.
fn handle_submit_response(
    status: u16,
    body: &str,
    receipt_out: &mut dyn Write,
) -> Result<(), EgaError> {
    if !(200..300).contains(&status) {
        return Err(EgaError::SubmissionFailed(format!(
            "unexpected response {status}: {body}"
        )));
    }
    let success = receipt_success(body).map_err(|err| {
        EgaError::SubmissionFailed(format!("unexpected response {status}: {err}"))
    })?;

    receipt_out
        .write_all(body.as_bytes())
        .map_err(|err| EgaError::Filesystem(format!("write receipt output: {err}")))?;

    if !success {
        return Err(EgaError::SubmissionFailed(ERR_FAILED.to_string()));
    }
    info!("{MSG_SUCCEEDED}");
    Ok(())
}
