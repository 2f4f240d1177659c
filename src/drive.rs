//! Google Drive v3 adapter: document search and HTML import

use async_trait::async_trait;
use google_drive3::{api::File, DriveHub};
use mime_guess::Mime;
use std::io::Cursor;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::credentials::TokenSource;
use crate::error::{GctlError, Result};
use crate::http::{hub_url, Connector, HttpClient};
use crate::models::{DocumentMetadata, DocumentSummary, ResourceId, ResultPage};
use crate::search::RemoteCollection;

/// Generated Drive hub over the shared TLS connector
pub type Hub = DriveHub<Connector>;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3/";
/// Media uploads go to `{root}upload/drive/v3/...`
pub const DEFAULT_ROOT_URL: &str = "https://www.googleapis.com/";

/// Drive caps `pageSize` at 1000
pub const MAX_PAGE_SIZE: usize = 1000;

/// Target MIME type that makes Drive convert uploaded content to a Google Doc
pub const GOOGLE_DOC_MIME_TYPE: &str = "application/vnd.google-apps.document";

const LIST_FIELDS: &str =
    "nextPageToken, files(id, name, mimeType, createdTime, modifiedTime, size, webViewLink)";

/// Browser URL of a Google Doc
pub fn document_url(id: &str) -> String {
    format!("https://docs.google.com/document/d/{}/edit", id)
}

fn new_file(metadata: &DocumentMetadata) -> File {
    File {
        name: Some(metadata.name.clone()),
        mime_type: Some(metadata.mime_type.clone()),
        parents: (!metadata.parents.is_empty()).then(|| metadata.parents.clone()),
        ..Default::default()
    }
}

fn into_summary(file: File) -> DocumentSummary {
    DocumentSummary {
        id: file.id.unwrap_or_default(),
        name: file.name.unwrap_or_default(),
        mime_type: file.mime_type.unwrap_or_default(),
        created_time: file.created_time,
        modified_time: file.modified_time,
        size: file.size.and_then(|s| u64::try_from(s).ok()),
        web_view_link: file.web_view_link,
    }
}

/// Drive files as a searchable collection
#[derive(Clone)]
pub struct DriveCollection {
    http: HttpClient,
    tokens: TokenSource,
    base_url: String,
    root_url: String,
}

impl DriveCollection {
    pub fn new(
        http: HttpClient,
        tokens: TokenSource,
        base_url: impl AsRef<str>,
        root_url: impl AsRef<str>,
    ) -> Self {
        Self {
            http,
            tokens,
            base_url: hub_url(base_url.as_ref()),
            root_url: hub_url(root_url.as_ref()),
        }
    }

    /// Hub authorized with the current access token
    async fn hub(&self, cancel: &CancellationToken) -> Result<Hub> {
        let token = self.tokens.token(cancel).await?;
        let mut hub = DriveHub::new(self.http.api_client(), token);
        hub.base_url(self.base_url.clone());
        hub.root_url(self.root_url.clone());
        Ok(hub)
    }

    /// Create an empty file and return its id
    #[instrument(skip(self, cancel), fields(name = %metadata.name))]
    pub async fn create(
        &self,
        metadata: &DocumentMetadata,
        cancel: &CancellationToken,
    ) -> Result<ResourceId> {
        let hub = self.hub(cancel).await?;
        let call = hub
            .files()
            .create(new_file(metadata))
            .param("fields", "id")
            .doit_without_upload();
        let created = self.http.call("create file", call, cancel).await?;

        let id = created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GctlError::InvalidResponse("created file has no id".to_string()))?;
        debug!("Created file {}", id);
        Ok(id)
    }

    /// Overwrite a file's content
    #[instrument(skip(self, content, cancel), fields(bytes = content.len()))]
    pub async fn replace_content(
        &self,
        id: &str,
        content: Vec<u8>,
        content_type: Mime,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let hub = self.hub(cancel).await?;
        let call = hub
            .files()
            .update(File::default(), id)
            .upload(Cursor::new(content), content_type);
        self.http
            .call("upload file content", call, cancel)
            .await
            .map_err(|e| match e {
                GctlError::RemoteError(remote) => remote.for_resource(id).into(),
                other => other,
            })?;
        Ok(())
    }

    /// Import a local HTML file as a Google Doc and return its URL.
    ///
    /// If the upload fails after the document was created, the empty document
    /// stays in Drive and is reported through [`GctlError::PartialImport`].
    pub async fn import_html(
        &self,
        path: &Path,
        title: &str,
        folder_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let content = tokio::fs::read(path).await?;
        let metadata = DocumentMetadata {
            name: title.to_string(),
            mime_type: GOOGLE_DOC_MIME_TYPE.to_string(),
            parents: folder_id
                .filter(|f| !f.is_empty())
                .map(|f| vec![f.to_string()])
                .unwrap_or_default(),
        };

        let id = self.create(&metadata, cancel).await?;

        match self
            .replace_content(&id, content, mime_guess::mime::TEXT_HTML, cancel)
            .await
        {
            Ok(()) => {
                info!("Imported {} as document {}", path.display(), id);
                Ok(document_url(&id))
            }
            Err(GctlError::RemoteError(source)) => {
                warn!("Document {} created but content upload failed: {}", id, source);
                Err(GctlError::PartialImport {
                    resource_id: id,
                    source,
                })
            }
            Err(e) => {
                warn!("Document {} created but content upload did not finish: {}", id, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl RemoteCollection for DriveCollection {
    type Item = DocumentSummary;

    fn name(&self) -> &'static str {
        "drive"
    }

    fn max_page_size(&self) -> usize {
        MAX_PAGE_SIZE
    }

    async fn fetch_page(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage<DocumentSummary>> {
        let hub = self.hub(cancel).await?;
        let mut call = hub
            .files()
            .list()
            .page_size(page_size.min(MAX_PAGE_SIZE) as i32)
            .order_by("modifiedTime desc")
            .param("fields", LIST_FIELDS);
        if !query.is_empty() {
            call = call.q(query);
        }
        if let Some(token) = page_token {
            call = call.page_token(token);
        }

        let list = self.http.call("list drive files", call.doit(), cancel).await?;
        let files: Vec<DocumentSummary> = list
            .files
            .unwrap_or_default()
            .into_iter()
            .map(into_summary)
            .collect();
        debug!("Drive returned {} files", files.len());
        Ok(ResultPage::new(files, list.next_page_token))
    }
}
