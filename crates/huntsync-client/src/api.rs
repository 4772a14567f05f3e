//! Snapshot and write API.
//!
//! Writes are form-encoded requests; the response carries the change id the
//! server assigned in a header, and creates also return the new entity. The
//! [`HuntApi`] trait is the seam the tab actor depends on, so tests can run
//! against an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use huntsync_types::{
    ChangeId, Entity, EntityType, NewPuzzle, NewRound, Puzzle, PuzzleId, PuzzlePatch, Round,
    RoundId, RoundPatch, Snapshot,
};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::constants::{CHANGE_ID_HEADER, HTTP_TIMEOUT};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The session is no longer valid. Callers reload rather than report.
    #[error("session expired (401)")]
    Unauthorized,
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("response is missing the X-Change-ID header")]
    MissingChangeId,
    #[error("invalid X-Change-ID header: {0:?}")]
    InvalidChangeId(String),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One mutation against the write API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    CreatePuzzle(NewPuzzle),
    UpdatePuzzle { id: PuzzleId, patch: PuzzlePatch },
    DeletePuzzle { id: PuzzleId },
    CreateRound(NewRound),
    UpdateRound { id: RoundId, patch: RoundPatch },
    DeleteRound { id: RoundId },
}

impl WriteRequest {
    pub fn entity_type(&self) -> EntityType {
        match self {
            WriteRequest::CreatePuzzle(_)
            | WriteRequest::UpdatePuzzle { .. }
            | WriteRequest::DeletePuzzle { .. } => EntityType::Puzzle,
            WriteRequest::CreateRound(_)
            | WriteRequest::UpdateRound { .. }
            | WriteRequest::DeleteRound { .. } => EntityType::Round,
        }
    }

    /// Path relative to the API base.
    pub fn path(&self) -> String {
        match self {
            WriteRequest::CreatePuzzle(_) => "/puzzles".to_string(),
            WriteRequest::UpdatePuzzle { id, .. } | WriteRequest::DeletePuzzle { id } => {
                format!("/puzzles/{id}")
            }
            WriteRequest::CreateRound(_) => "/rounds".to_string(),
            WriteRequest::UpdateRound { id, .. } | WriteRequest::DeleteRound { id } => {
                format!("/rounds/{id}")
            }
        }
    }

    pub fn method(&self) -> Method {
        match self {
            WriteRequest::DeletePuzzle { .. } | WriteRequest::DeleteRound { .. } => Method::DELETE,
            _ => Method::POST,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, WriteRequest::CreatePuzzle(_) | WriteRequest::CreateRound(_))
    }

    /// Form body. Empty for deletes.
    pub fn form(&self) -> Vec<(&'static str, String)> {
        match self {
            WriteRequest::CreatePuzzle(p) => vec![
                ("name", p.name.clone()),
                ("round", p.round.to_string()),
                ("puzzle_url", p.puzzle_url.clone()),
            ],
            WriteRequest::UpdatePuzzle { patch, .. } => patch.form_fields(),
            WriteRequest::CreateRound(r) => vec![
                ("name", r.name.clone()),
                ("emoji", r.emoji.clone()),
                ("hue", r.hue.to_string()),
                ("sort", r.sort.to_string()),
                ("special", r.special.to_string()),
            ],
            WriteRequest::UpdateRound { patch, .. } => patch.form_fields(),
            WriteRequest::DeletePuzzle { .. } | WriteRequest::DeleteRound { .. } => Vec::new(),
        }
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub change_id: ChangeId,
    /// The entity as stored. Always present for creates.
    pub entity: Option<Entity>,
}

#[async_trait]
pub trait HuntApi: Send + Sync + 'static {
    /// Full current state plus its watermark.
    async fn home(&self) -> Result<Snapshot, ApiError>;

    async fn write(&self, request: WriteRequest) -> Result<WriteResponse, ApiError>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
    session_cookie: Option<String>,
}

impl HttpApi {
    pub fn new(base: &str, session_cookie: Option<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base, session_cookie, HTTP_TIMEOUT)
    }

    pub fn with_timeout(
        base: &str,
        session_cookie: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base: Url::parse(base)?, session_cookie })
    }

    /// `path` appended to the base, keeping the base's own path.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.session_cookie {
            Some(cookie) => builder.header(reqwest::header::COOKIE, cookie),
            None => builder,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { status: status.as_u16(), body });
    }
    Ok(response)
}

/// Parse the change id header value.
pub fn parse_change_id(raw: Option<&str>) -> Result<ChangeId, ApiError> {
    let raw = raw.ok_or(ApiError::MissingChangeId)?;
    raw.trim()
        .parse::<u64>()
        .map(ChangeId)
        .map_err(|_| ApiError::InvalidChangeId(raw.to_string()))
}

fn decode_entity(kind: EntityType, body: &str) -> Result<Entity, serde_json::Error> {
    Ok(match kind {
        EntityType::Puzzle => Entity::Puzzle(serde_json::from_str::<Puzzle>(body)?),
        EntityType::Round => Entity::Round(serde_json::from_str::<Round>(body)?),
    })
}

#[async_trait]
impl HuntApi for HttpApi {
    async fn home(&self) -> Result<Snapshot, ApiError> {
        let url = self.endpoint("/home")?;
        let response = check_status(self.request(Method::GET, url).send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteResponse, ApiError> {
        let url = self.endpoint(&request.path())?;
        debug!(method = %request.method(), %url, "write request");

        let mut builder = self.request(request.method(), url);
        let form = request.form();
        if !form.is_empty() {
            builder = builder.form(&form);
        }
        let response = check_status(builder.send().await?).await?;

        let header = response
            .headers()
            .get(CHANGE_ID_HEADER)
            .map(|v| v.to_str().unwrap_or_default().to_string());
        let change_id = parse_change_id(header.as_deref())?;

        let entity = match request.method() {
            Method::DELETE => None,
            _ => {
                let body = response.text().await?;
                match decode_entity(request.entity_type(), &body) {
                    Ok(entity) => Some(entity),
                    Err(e) if request.is_create() => return Err(e.into()),
                    Err(e) => {
                        warn!(%change_id, error = %e, "ignoring undecodable update response body");
                        None
                    }
                }
            }
        };
        Ok(WriteResponse { change_id, entity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huntsync_types::Status;

    #[test]
    fn test_paths_and_methods() {
        let req = WriteRequest::UpdatePuzzle { id: PuzzleId(5), patch: PuzzlePatch::status(Status::Working) };
        assert_eq!(req.path(), "/puzzles/5");
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.form(), vec![("status", "Working".to_string())]);

        let del = WriteRequest::DeleteRound { id: RoundId(2) };
        assert_eq!(del.path(), "/rounds/2");
        assert_eq!(del.method(), Method::DELETE);
        assert!(del.form().is_empty());
        assert_eq!(del.entity_type(), EntityType::Round);
    }

    #[test]
    fn test_create_forms() {
        let req = WriteRequest::CreatePuzzle(NewPuzzle {
            name: "Fish".into(),
            round: RoundId(3),
            puzzle_url: "https://hunt.example/fish".into(),
        });
        assert!(req.is_create());
        assert_eq!(req.path(), "/puzzles");
        assert_eq!(req.form()[1], ("round", "3".to_string()));
    }

    #[test]
    fn test_parse_change_id() {
        assert_eq!(parse_change_id(Some("42")).unwrap(), ChangeId(42));
        assert_eq!(parse_change_id(Some(" 7 ")).unwrap(), ChangeId(7));
        assert!(matches!(parse_change_id(None), Err(ApiError::MissingChangeId)));
        assert!(matches!(parse_change_id(Some("x")), Err(ApiError::InvalidChangeId(_))));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = HttpApi::new("https://hunt.example.com/api/", None).unwrap();
        assert_eq!(
            api.endpoint("/puzzles/3").unwrap().as_str(),
            "https://hunt.example.com/api/puzzles/3"
        );
    }

    #[test]
    fn test_decode_entity_by_kind() {
        let body = r#"{"id": 4, "name": "Ocean", "emoji": "🌊"}"#;
        let Entity::Round(r) = decode_entity(EntityType::Round, body).unwrap() else { panic!() };
        assert_eq!(r.id, RoundId(4));
        assert!(decode_entity(EntityType::Puzzle, body).is_err());
    }
}
